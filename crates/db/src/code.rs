//! Serialization of method code vectors.
//!
//! In memory, code is a vector of words: opcode numbers interleaved with
//! immediate operands, jump operands holding absolute word offsets. On disk
//! every word is varint-encoded and jump operands become signed byte deltas
//! relative to the operand's own byte position. Delta encoding is a fixed
//! point: operand widths depend on deltas which depend on widths, so sizing
//! iterates until stable (widths only ever grow).

use crate::error::{DbError, DbResult};
use cmm_core::{ArgType, Op};
use cmm_io::{varint, IoError, Reader, Writer};
use std::collections::HashMap;

struct Operand {
    kind: ArgType,
    value: i64,
    /// Encoded width in bytes; iteratively refined for jumps.
    width: usize,
}

struct Instr {
    op: Op,
    word_offset: usize,
    operands: Vec<Operand>,
}

/// Remapping hooks for operands that index per-object pools; the portable
/// pack uses these to renumber string and identifier indices.
pub struct OperandMap<'a> {
    pub string: &'a dyn Fn(i64) -> i64,
    pub ident: &'a dyn Fn(i64) -> i64,
}

impl Default for OperandMap<'_> {
    fn default() -> Self {
        OperandMap {
            string: &|v| v,
            ident: &|v| v,
        }
    }
}

fn parse_words(code: &[i64]) -> DbResult<Vec<Instr>> {
    let mut instrs = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = Op::from_number(code[pc])
            .ok_or_else(|| DbError::format(format!("unknown opcode word {}", code[pc])))?;
        let word_offset = pc;
        pc += 1;
        let mut operands = Vec::new();
        let (a1, a2) = op.args();
        for kind in [a1, a2] {
            if kind == ArgType::None {
                break;
            }
            let value = *code
                .get(pc)
                .ok_or_else(|| DbError::format("truncated instruction"))?;
            pc += 1;
            operands.push(Operand {
                kind,
                value,
                width: 1,
            });
        }
        instrs.push(Instr {
            op,
            word_offset,
            operands,
        });
    }
    Ok(instrs)
}

/// Encodes a code vector into `w`, preceded by its word count.
pub fn encode(code: &[i64], w: &mut Writer, map: &OperandMap<'_>) -> DbResult<()> {
    let mut instrs = parse_words(code)?;

    // Apply pool-index remapping before any sizing.
    for instr in &mut instrs {
        for operand in &mut instr.operands {
            match operand.kind {
                ArgType::Str => operand.value = (map.string)(operand.value),
                ArgType::Ident => operand.value = (map.ident)(operand.value),
                _ => {}
            }
        }
    }

    // Fixed widths for everything but jumps.
    for instr in &mut instrs {
        for operand in &mut instr.operands {
            if operand.kind != ArgType::Jump {
                operand.width = varint::size(operand.value);
            }
        }
    }

    // Iterate jump widths to a fixed point.
    loop {
        let byte_of_word = layout(&instrs, code.len());
        let mut changed = false;
        for i in 0..instrs.len() {
            let mut at = byte_of_word[&instrs[i].word_offset] + varint::size(instrs[i].op.number());
            for j in 0..instrs[i].operands.len() {
                let width = instrs[i].operands[j].width;
                if instrs[i].operands[j].kind == ArgType::Jump {
                    let target = instrs[i].operands[j].value;
                    let target_byte = *byte_of_word.get(&(target as usize)).ok_or_else(|| {
                        DbError::format(format!("jump to non-instruction word {target}"))
                    })?;
                    let encoded = varint::encode_jump(target_byte as i64 - at as i64);
                    let needed = varint::size(encoded);
                    if needed > width {
                        instrs[i].operands[j].width = needed;
                        changed = true;
                    }
                }
                at += instrs[i].operands[j].width.max(width);
            }
        }
        if !changed {
            break;
        }
    }

    // Emit.
    let byte_of_word = layout(&instrs, code.len());
    w.write_int(code.len() as i64);
    for instr in &instrs {
        let mut at = byte_of_word[&instr.word_offset] + varint::size(instr.op.number());
        w.write_int(instr.op.number());
        for operand in &instr.operands {
            if operand.kind == ArgType::Jump {
                let target_byte = byte_of_word[&(operand.value as usize)];
                let encoded = varint::encode_jump(target_byte as i64 - at as i64);
                // Deltas never shrink across sizing iterations, so the
                // converged width is exactly the encoded width.
                debug_assert_eq!(varint::size(encoded), operand.width);
                w.write_int(encoded);
            } else {
                w.write_int(operand.value);
            }
            at += operand.width;
        }
    }
    Ok(())
}

fn layout(instrs: &[Instr], word_len: usize) -> HashMap<usize, usize> {
    let mut byte_of_word = HashMap::with_capacity(instrs.len() + 1);
    let mut at = 0usize;
    for instr in instrs {
        byte_of_word.insert(instr.word_offset, at);
        at += varint::size(instr.op.number());
        for operand in &instr.operands {
            at += operand.width;
        }
    }
    byte_of_word.insert(word_len, at);
    byte_of_word
}

/// Decodes a code vector written by [`encode`].
pub fn decode(r: &mut Reader<'_>, map: &OperandMap<'_>) -> DbResult<Vec<i64>> {
    let word_len = r.read_len(1 << 24, "code length")?;
    let mut words = Vec::with_capacity(word_len);
    let mut word_of_byte = HashMap::new();
    // Jump fixups: (word slot, operand byte position, encoded delta).
    let mut jumps = Vec::new();

    let base = r.position();
    while words.len() < word_len {
        word_of_byte.insert(r.position() - base, words.len());
        let number = r.read_int()?;
        let op = Op::from_number(number).ok_or(IoError::UnknownOpcode { number })?;
        words.push(number);
        let (a1, a2) = op.args();
        for kind in [a1, a2] {
            if kind == ArgType::None {
                break;
            }
            let operand_byte = r.position() - base;
            let value = r.read_int()?;
            match kind {
                ArgType::Jump => {
                    jumps.push((words.len(), operand_byte, value));
                    words.push(0);
                }
                ArgType::Str => words.push((map.string)(value)),
                ArgType::Ident => words.push((map.ident)(value)),
                _ => words.push(value),
            }
        }
    }
    word_of_byte.insert(r.position() - base, words.len());

    if words.len() != word_len {
        return Err(DbError::format("code length mismatch"));
    }
    for (slot, operand_byte, encoded) in jumps {
        let target_byte = operand_byte as i64 + varint::decode_jump(encoded);
        let target_word = word_of_byte
            .get(&usize::try_from(target_byte).map_err(|_| DbError::format("jump before code"))?)
            .ok_or_else(|| DbError::format("jump to non-instruction byte"))?;
        words[slot] = *target_word as i64;
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(code: Vec<i64>) -> Vec<i64> {
        let mut w = Writer::new();
        encode(&code, &mut w, &OperandMap::default()).expect("encode");
        let image = w.into_vec();
        let mut r = Reader::new(&image);
        let back = decode(&mut r, &OperandMap::default()).expect("decode");
        assert_eq!(r.remaining(), 0);
        back
    }

    #[test]
    fn straight_line_code_round_trips() {
        let code = vec![
            Op::Zero.number(),
            Op::IntLit.number(),
            70_000,
            Op::Add.number(),
            Op::ReturnExpr.number(),
        ];
        assert_eq!(round_trip(code.clone()), code);
    }

    #[test]
    fn forward_and_backward_jumps_round_trip() {
        // while (1) {}: WHILE <end> <begin> ONE END <begin>
        let code = vec![
            Op::While.number(),
            6, // past the loop
            0, // loop start
            Op::One.number(),
            Op::End.number(),
            0, // back to the WHILE
            Op::Return.number(),
        ];
        assert_eq!(round_trip(code.clone()), code);
    }

    #[test]
    fn jump_to_code_end_round_trips() {
        let code = vec![Op::One.number(), Op::If.number(), 4, Op::Pop.number()];
        assert_eq!(round_trip(code.clone()), code);
    }

    #[test]
    fn pool_indices_can_be_remapped() {
        let code = vec![Op::StrLit.number(), 4, Op::SymbolLit.number(), 2];
        let mut w = Writer::new();
        let strings = |v: i64| v + 10;
        let idents = |v: i64| v + 20;
        encode(
            &code,
            &mut w,
            &OperandMap {
                string: &strings,
                ident: &idents,
            },
        )
        .expect("encode");
        let image = w.into_vec();
        let back = decode(&mut Reader::new(&image), &OperandMap::default()).expect("decode");
        assert_eq!(
            back,
            vec![Op::StrLit.number(), 14, Op::SymbolLit.number(), 22]
        );
    }

    #[test]
    fn unknown_opcodes_fail_load() {
        let mut w = Writer::new();
        w.write_int(1);
        w.write_int(9999);
        let image = w.into_vec();
        assert!(decode(&mut Reader::new(&image), &OperandMap::default()).is_err());
    }
}
