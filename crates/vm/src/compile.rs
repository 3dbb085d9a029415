//! Compiler and decompiler seams, the disassembler, and a code builder.
//!
//! The parser/compiler that turns source lines into bytecode is an external
//! collaborator consumed only through the [`Compiler`] trait; likewise the
//! decompiler. When no decompiler is installed, method listing falls back
//! to disassembly lines.

use cmm_core::ident::{self, Sym};
use cmm_core::{ArgType, CmmString, Dbref, List, Op, Value};
use cmm_db::{Method, Object};

/// Compiles source lines into a method for `obj`. `Err` carries one
/// message per compilation error.
pub trait Compiler {
    fn compile(&self, obj: &mut Object, lines: &[String]) -> Result<Method, Vec<String>>;
}

/// Renders a method back into source lines.
pub trait Decompiler {
    fn list(&self, method: &Method, obj: &Object, indent: usize, parens: bool) -> Vec<String>;
}

/// Disassembles a method into `[pc, name, operands...]` rows.
pub fn disassemble(method: &Method, obj: &Object) -> List {
    let code = &method.code;
    let mut rows = List::new();
    let mut pc = 0;
    while pc < code.len() {
        let at = pc;
        let Some(op) = Op::from_number(code[pc]) else {
            break;
        };
        pc += 1;
        let mut row = vec![Value::Int(at as i64), Value::Str(op.name().into())];
        let (a1, a2) = op.args();
        for kind in [a1, a2] {
            if kind == ArgType::None {
                break;
            }
            let operand = code[pc];
            pc += 1;
            row.push(match kind {
                ArgType::Str => match obj.get_string(operand as usize) {
                    Some(s) => Value::Str(s.clone()),
                    None => Value::Int(operand),
                },
                ArgType::Ident | ArgType::Var => match obj.get_ident(operand as usize) {
                    Some(id) => Value::symbol(id),
                    None => Value::Int(operand),
                },
                _ => Value::Int(operand),
            });
        }
        rows.add(Value::List(List::from_vec(row)));
    }
    rows
}

/// Disassembly rendered as source-ish lines, the listing fallback when no
/// decompiler collaborator is installed.
pub fn disassemble_lines(method: &Method, obj: &Object) -> Vec<String> {
    let rows = disassemble(method, obj);
    rows.iter()
        .map(|row| {
            let Some(row) = row.as_list() else {
                return String::new();
            };
            let mut line = String::new();
            for (i, field) in row.iter().enumerate() {
                if i > 0 {
                    line.push(' ');
                }
                let text: CmmString = match field {
                    Value::Str(s) if i == 1 => s.clone(),
                    other => other.to_literal(),
                };
                line.push_str(text.as_str());
            }
            line
        })
        .collect()
}

/// Builds method code against an object's pools. Local variables are
/// addressed positionally: formals first, then the rest parameter, then
/// declared locals.
pub struct MethodBuilder<'a> {
    obj: &'a mut Object,
    code: Vec<i64>,
    argnames: Vec<usize>,
    rest: Option<usize>,
    varnames: Vec<usize>,
    error_lists: Vec<Vec<Sym>>,
    overridable: bool,
}

impl<'a> MethodBuilder<'a> {
    pub fn new(obj: &'a mut Object) -> Self {
        MethodBuilder {
            obj,
            code: Vec::new(),
            argnames: Vec::new(),
            rest: None,
            varnames: Vec::new(),
            error_lists: Vec::new(),
            overridable: true,
        }
    }

    pub fn arg(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.argnames.push(ind);
        self
    }

    pub fn rest_arg(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.rest = Some(ind);
        self
    }

    pub fn var(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.varnames.push(ind);
        self
    }

    pub fn non_overridable(mut self) -> Self {
        self.overridable = false;
        self
    }

    /// Registers an error list for `CATCH`, returning its index.
    pub fn error_list(&mut self, errors: &[Sym]) -> i64 {
        self.error_lists
            .push(errors.iter().map(|&e| ident::dup(e)).collect());
        (self.error_lists.len() - 1) as i64
    }

    /// Emits a bare opcode.
    pub fn op(mut self, op: Op) -> Self {
        self.code.push(op.number());
        self
    }

    /// Emits an opcode with raw integer operands.
    pub fn op_with(mut self, op: Op, operands: &[i64]) -> Self {
        self.code.push(op.number());
        self.code.extend_from_slice(operands);
        self
    }

    /// Emits a string-literal push through the object's string pool.
    pub fn push_str(mut self, s: &str) -> Self {
        let ind = self.obj.add_string(&s.into());
        self.code.push(Op::StrLit.number());
        self.code.push(ind as i64);
        self
    }

    /// Emits a symbol-literal push through the object's identifier pool.
    pub fn push_sym(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.code.push(Op::SymbolLit.number());
        self.code.push(ind as i64);
        self
    }

    /// Emits an error-literal push through the object's identifier pool.
    pub fn push_err(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.code.push(Op::ErrorLit.number());
        self.code.push(ind as i64);
        self
    }

    /// Emits an integer-literal push.
    pub fn push_int(mut self, n: i64) -> Self {
        match n {
            0 => self.code.push(Op::Zero.number()),
            1 => self.code.push(Op::One.number()),
            _ => {
                self.code.push(Op::IntLit.number());
                self.code.push(n);
            }
        }
        self
    }

    /// Emits a message send `MESSAGE name` through the identifier pool.
    pub fn message(mut self, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.code.push(Op::Message.number());
        self.code.push(ind as i64);
        self
    }

    /// Emits an object-variable access opcode carrying an identifier
    /// operand.
    pub fn ident_op(mut self, op: Op, name: &str) -> Self {
        let ind = self.obj.add_ident(name);
        self.code.push(op.number());
        self.code.push(ind as i64);
        self
    }

    /// Current word offset, for assembling jump targets.
    pub fn here(&self) -> i64 {
        self.code.len() as i64
    }

    /// Patches the operand at `slot` (a word offset) to `target`.
    pub fn patch(mut self, slot: i64, target: i64) -> Self {
        self.code[slot as usize] = target;
        self
    }

    pub fn build(self, object: Dbref) -> Method {
        Method::new(
            None,
            object,
            self.argnames,
            self.rest,
            self.varnames,
            self.code,
            self.error_lists,
            self.overridable,
        )
    }
}
