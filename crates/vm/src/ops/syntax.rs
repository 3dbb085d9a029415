//! Opcodes generated by language syntax: literals, variables, control
//! flow, message dispatch, data building, and the scoped error actions.

use crate::error::VmResult;
use crate::frame::Specifier;
use crate::interp::Vm;
use cmm_core::ident;
use cmm_core::{Buffer, Dbref, Dict, Frob, List, Value};

impl Vm {
    pub(crate) fn op_comment(&mut self) -> VmResult<()> {
        let _ = self.operand();
        Ok(())
    }

    pub(crate) fn op_pop(&mut self) -> VmResult<()> {
        self.pop_n(1);
        Ok(())
    }

    pub(crate) fn op_set_local(&mut self) -> VmResult<()> {
        let ind = self.operand() as usize;
        let slot = self.cur_frame().var_start + ind;
        // Assignment is an expression; the value stays on the stack.
        let value = self.top().clone();
        self.stack[slot] = value;
        Ok(())
    }

    pub(crate) fn op_get_local(&mut self) -> VmResult<()> {
        let ind = self.operand() as usize;
        let slot = self.cur_frame().var_start + ind;
        self.push(self.stack[slot].clone());
        Ok(())
    }

    pub(crate) fn op_set_obj_var(&mut self) -> VmResult<()> {
        let Some(name) = self.operand_ident()? else {
            return self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            );
        };
        let obj = self.cur_frame().object;
        let class = self.cur_frame().definer();
        let value = self.top().clone();
        if !self.db.assign_var(obj, class, name, value)? {
            return self.throw(
                ident::ids().paramnf,
                format!("No such parameter {}.", ident::name(name)),
            );
        }
        Ok(())
    }

    pub(crate) fn op_get_obj_var(&mut self) -> VmResult<()> {
        let Some(name) = self.operand_ident()? else {
            return self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            );
        };
        let obj = self.cur_frame().object;
        let class = self.cur_frame().definer();
        match self.db.retrieve_var(obj, class, name)? {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => self.throw(
                ident::ids().paramnf,
                format!("No such parameter {}.", ident::name(name)),
            ),
        }
    }

    /// IF, IF_ELSE and CONDITIONAL: jump to the operand when the popped
    /// condition is false.
    pub(crate) fn op_if(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        let truthy = self.top().truthy();
        self.pop_n(1);
        if !truthy {
            self.cur_frame_mut().pc = target;
        }
        Ok(())
    }

    /// ELSE, END and END_CASE: unconditional jump.
    pub(crate) fn op_jump(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        self.cur_frame_mut().pc = target;
        Ok(())
    }

    pub(crate) fn op_while(&mut self) -> VmResult<()> {
        let end = self.operand() as usize;
        let _begin = self.operand();
        let truthy = self.top().truthy();
        self.pop_n(1);
        if !truthy {
            self.cur_frame_mut().pc = end;
        }
        Ok(())
    }

    /// FOR_RANGE: `[lower, upper]` on the stack; assigns the loop variable
    /// and advances, or exits when the range is exhausted.
    pub(crate) fn op_for_range(&mut self) -> VmResult<()> {
        let end = self.operand() as usize;
        let var = self.operand() as usize;
        let upper_slot = self.stack.len() - 1;
        let lower_slot = self.stack.len() - 2;
        let (lower, upper) = match (&self.stack[lower_slot], &self.stack[upper_slot]) {
            (Value::Int(lo), Value::Int(hi)) => (*lo, *hi),
            _ => {
                let shown = self.stack[lower_slot].to_literal();
                return self.type_error(
                    lower_slot,
                    ident::ids().integer,
                    format!("Range bound ({shown}) is not an integer."),
                );
            }
        };
        if lower > upper {
            self.pop_n(2);
            self.cur_frame_mut().pc = end;
        } else {
            let slot = self.cur_frame().var_start + var;
            self.stack[slot] = Value::Int(lower);
            self.stack[lower_slot] = Value::Int(lower + 1);
        }
        Ok(())
    }

    /// FOR_LIST: `[list, index]` on the stack.
    pub(crate) fn op_for_list(&mut self) -> VmResult<()> {
        let end = self.operand() as usize;
        let var = self.operand() as usize;
        let index_slot = self.stack.len() - 1;
        let list_slot = self.stack.len() - 2;
        let index = match &self.stack[index_slot] {
            Value::Int(n) => *n as usize,
            _ => 0,
        };
        let element = match &self.stack[list_slot] {
            Value::List(list) => {
                if index >= list.len() {
                    None
                } else {
                    Some(list.get(index).clone())
                }
            }
            _ => {
                let shown = self.stack[list_slot].to_literal();
                return self.type_error(
                    list_slot,
                    ident::ids().list,
                    format!("Loop target ({shown}) is not a list."),
                );
            }
        };
        match element {
            None => {
                self.pop_n(2);
                self.cur_frame_mut().pc = end;
            }
            Some(element) => {
                let slot = self.cur_frame().var_start + var;
                self.stack[slot] = element;
                self.stack[index_slot] = Value::Int(index as i64 + 1);
            }
        }
        Ok(())
    }

    /// BREAK: jump out of the loop, popping its control values.
    pub(crate) fn op_break(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        let count = self.operand() as usize;
        self.pop_n(count);
        self.cur_frame_mut().pc = target;
        Ok(())
    }

    /// CONTINUE: back to the loop head, control values intact.
    pub(crate) fn op_continue(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        let _ = self.operand();
        self.cur_frame_mut().pc = target;
        Ok(())
    }

    /// SWITCH is a runtime no-op; the value stays for the case opcodes.
    pub(crate) fn op_switch(&mut self) -> VmResult<()> {
        let _ = self.operand();
        Ok(())
    }

    /// CASE_VALUE: `[switch, case]`; on match pop both and jump into the
    /// body, otherwise pop the case value and fall through.
    pub(crate) fn op_case_value(&mut self) -> VmResult<()> {
        let body = self.operand() as usize;
        let case_slot = self.stack.len() - 1;
        let switch_slot = self.stack.len() - 2;
        let matched = self.stack[case_slot] == self.stack[switch_slot];
        if matched {
            self.pop_n(2);
            self.cur_frame_mut().pc = body;
        } else {
            self.pop_n(1);
        }
        Ok(())
    }

    /// CASE_RANGE: `[switch, lower, upper]`.
    pub(crate) fn op_case_range(&mut self) -> VmResult<()> {
        let body = self.operand() as usize;
        let upper_slot = self.stack.len() - 1;
        let lower_slot = self.stack.len() - 2;
        let switch_slot = self.stack.len() - 3;
        let switch = &self.stack[switch_slot];
        let matched = switch.order(&self.stack[lower_slot]).is_ge()
            && switch.order(&self.stack[upper_slot]).is_le();
        if matched {
            self.pop_n(3);
            self.cur_frame_mut().pc = body;
        } else {
            self.pop_n(2);
        }
        Ok(())
    }

    /// LAST_CASE_VALUE: on match fall into the body; otherwise jump to the
    /// next case group.
    pub(crate) fn op_last_case_value(&mut self) -> VmResult<()> {
        let next_group = self.operand() as usize;
        let case_slot = self.stack.len() - 1;
        let switch_slot = self.stack.len() - 2;
        let matched = self.stack[case_slot] == self.stack[switch_slot];
        if matched {
            self.pop_n(2);
        } else {
            self.pop_n(1);
            self.cur_frame_mut().pc = next_group;
        }
        Ok(())
    }

    pub(crate) fn op_last_case_range(&mut self) -> VmResult<()> {
        let next_group = self.operand() as usize;
        let upper_slot = self.stack.len() - 1;
        let lower_slot = self.stack.len() - 2;
        let switch_slot = self.stack.len() - 3;
        let switch = &self.stack[switch_slot];
        let matched = switch.order(&self.stack[lower_slot]).is_ge()
            && switch.order(&self.stack[upper_slot]).is_le();
        if matched {
            self.pop_n(3);
        } else {
            self.pop_n(2);
            self.cur_frame_mut().pc = next_group;
        }
        Ok(())
    }

    /// DEFAULT: pop the switch value and fall into the body.
    pub(crate) fn op_default(&mut self) -> VmResult<()> {
        self.pop_n(1);
        Ok(())
    }

    pub(crate) fn op_return(&mut self) -> VmResult<()> {
        self.return_value(Value::Int(0))
    }

    pub(crate) fn op_return_expr(&mut self) -> VmResult<()> {
        let value = self.top().clone();
        self.pop_n(1);
        self.return_value(value)
    }

    // --- literals -------------------------------------------------------

    pub(crate) fn op_zero(&mut self) -> VmResult<()> {
        self.push(Value::Int(0));
        Ok(())
    }

    pub(crate) fn op_one(&mut self) -> VmResult<()> {
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_int_lit(&mut self) -> VmResult<()> {
        let n = self.operand();
        self.push(Value::Int(n));
        Ok(())
    }

    pub(crate) fn op_str_lit(&mut self) -> VmResult<()> {
        let ind = self.operand() as usize;
        let definer = self.cur_frame().definer();
        let value = match self.db.fetch(definer)? {
            Some(obj) => obj
                .get_string(ind)
                .map(|s| Value::Str(s.clone()))
                .unwrap_or(Value::Str("".into())),
            None => Value::Str("".into()),
        };
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_dbref_lit(&mut self) -> VmResult<()> {
        let n = self.operand();
        self.push(Value::Dbref(Dbref(n)));
        Ok(())
    }

    pub(crate) fn op_symbol_lit(&mut self) -> VmResult<()> {
        match self.operand_ident()? {
            Some(id) => {
                self.push(Value::symbol(id));
                Ok(())
            }
            None => self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            ),
        }
    }

    pub(crate) fn op_error_lit(&mut self) -> VmResult<()> {
        match self.operand_ident()? {
            Some(id) => {
                self.push(Value::error(id));
                Ok(())
            }
            None => self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            ),
        }
    }

    /// NAME: push the dbref bound to a name in the name table.
    pub(crate) fn op_name_lit(&mut self) -> VmResult<()> {
        let Some(id) = self.operand_ident()? else {
            return self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            );
        };
        match self.db.get_name(id) {
            Some(dbref) => {
                self.push(Value::Dbref(dbref));
                Ok(())
            }
            None => self.throw(
                ident::ids().namenf,
                format!("Can't find object name {}.", ident::name(id)),
            ),
        }
    }

    // --- dispatch -------------------------------------------------------

    pub(crate) fn op_start_args(&mut self) -> VmResult<()> {
        self.arg_starts.push(self.stack.len());
        Ok(())
    }

    pub(crate) fn op_message(&mut self) -> VmResult<()> {
        let Some(name) = self.operand_ident()? else {
            return self.throw(
                ident::ids().methoderr,
                "Bad identifier operand.".to_owned(),
            );
        };
        let arg_start = self.pop_args()?;
        if arg_start == 0 {
            return self.throw(
                ident::ids().methoderr,
                "Message send with no receiver.".to_owned(),
            );
        }
        let receiver_slot = arg_start - 1;
        self.deliver(receiver_slot, name, receiver_slot, arg_start)
    }

    /// EXPR_MESSAGE: the receiver and a symbol-valued message sit below
    /// the arguments.
    pub(crate) fn op_expr_message(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        if arg_start < 2 {
            return self.throw(
                ident::ids().methoderr,
                "Message send with no receiver.".to_owned(),
            );
        }
        let receiver_slot = arg_start - 2;
        let message_slot = arg_start - 1;
        let name = match &self.stack[message_slot] {
            Value::Symbol(id) => *id,
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    message_slot,
                    ident::ids().symbol,
                    format!("Message ({shown}) is not a symbol."),
                );
            }
        };
        self.deliver(receiver_slot, name, receiver_slot, arg_start)
    }

    fn deliver(
        &mut self,
        receiver_slot: usize,
        name: cmm_core::Sym,
        stack_start: usize,
        arg_start: usize,
    ) -> VmResult<()> {
        let (target, rep) = match &self.stack[receiver_slot] {
            Value::Dbref(dbref) => (*dbref, None),
            Value::Frob(frob) => (frob.class, Some(frob.rep.clone())),
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    receiver_slot,
                    ident::ids().dbref,
                    format!("Receiver ({shown}) is not a dbref or frob."),
                );
            }
        };
        match self.send_message(target, name, rep, stack_start, arg_start)? {
            Ok(()) => Ok(()),
            Err(failure) => self.throw(failure.error, failure.message),
        }
    }

    pub(crate) fn op_pass(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        match self.pass_message(arg_start, arg_start)? {
            Ok(()) => Ok(()),
            Err(failure) => self.throw(failure.error, failure.message),
        }
    }

    // --- data building --------------------------------------------------

    pub(crate) fn op_list_build(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        let list: List = self.stack.drain(arg_start..).collect();
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_dict_build(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        let pairs: List = self.stack.drain(arg_start..).collect();
        match Dict::from_slices(&pairs) {
            Some(dict) => {
                self.push(Value::Dict(dict));
                Ok(())
            }
            None => self.throw(
                ident::ids().type_,
                "Dictionary entries must be [key, value] pairs.".to_owned(),
            ),
        }
    }

    pub(crate) fn op_buffer_build(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        let mut buf = Buffer::new();
        for slot in arg_start..self.stack.len() {
            match &self.stack[slot] {
                Value::Int(n) => buf.add(*n),
                other => {
                    let shown = other.to_literal();
                    return self.type_error(
                        slot,
                        ident::ids().integer,
                        format!("Buffer element ({shown}) is not an integer."),
                    );
                }
            }
        }
        self.pop_to(arg_start);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    pub(crate) fn op_frob_build(&mut self) -> VmResult<()> {
        let arg_start = self.pop_args()?;
        if self.stack.len() - arg_start != 2 {
            return self.throw(
                ident::ids().numargs,
                "A frob is built from a class and a representation.".to_owned(),
            );
        }
        let class = match &self.stack[arg_start] {
            Value::Dbref(dbref) => *dbref,
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    arg_start,
                    ident::ids().dbref,
                    format!("Frob class ({shown}) is not a dbref."),
                );
            }
        };
        let rep = self.stack[arg_start + 1].clone();
        self.pop_to(arg_start);
        self.push(Value::Frob(Box::new(Frob { class, rep })));
        Ok(())
    }

    /// INDEX: one-based indexing of strings, lists, dictionaries and
    /// buffers.
    pub(crate) fn op_index(&mut self) -> VmResult<()> {
        let index_slot = self.stack.len() - 1;
        let target_slot = self.stack.len() - 2;
        let ids = ident::ids();

        let result = match &self.stack[target_slot] {
            Value::Dict(dict) => {
                let key = &self.stack[index_slot];
                match dict.find(key) {
                    Some(value) => value.clone(),
                    None => {
                        let key = key.clone();
                        let shown = key.to_literal();
                        return self.throw_data(
                            ids.keynf,
                            format!("Key ({shown}) is not in the dictionary."),
                            Some(key),
                        );
                    }
                }
            }
            _ => {
                let index = match &self.stack[index_slot] {
                    Value::Int(n) => *n - 1,
                    other => {
                        let shown = other.to_literal();
                        return self.type_error(
                            index_slot,
                            ids.integer,
                            format!("Index ({shown}) is not an integer."),
                        );
                    }
                };
                let len = match &self.stack[target_slot] {
                    Value::Str(s) => s.as_str().chars().count(),
                    Value::List(l) => l.len(),
                    Value::Buffer(b) => b.len(),
                    other => {
                        let shown = other.to_literal();
                        return self.type_error(
                            target_slot,
                            ids.list,
                            format!("Value ({shown}) cannot be indexed."),
                        );
                    }
                };
                if !self.check_index(index, len, target_slot, index_slot)? {
                    return Ok(());
                }
                match &self.stack[target_slot] {
                    Value::Str(s) => {
                        let c = s
                            .as_str()
                            .chars()
                            .nth(index as usize)
                            .expect("index was range-checked");
                        Value::Str(c.to_string().into())
                    }
                    Value::List(l) => l.get(index as usize).clone(),
                    Value::Buffer(b) => Value::Int(b.retrieve(index as usize) as i64),
                    _ => unreachable!("checked above"),
                }
            }
        };
        self.pop_n(2);
        self.push(result);
        Ok(())
    }

    /// AND: short-circuit; jump keeping the false value, else pop.
    pub(crate) fn op_and(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        if self.top().truthy() {
            self.pop_n(1);
        } else {
            self.cur_frame_mut().pc = target;
        }
        Ok(())
    }

    pub(crate) fn op_or(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        if self.top().truthy() {
            self.cur_frame_mut().pc = target;
        } else {
            self.pop_n(1);
        }
        Ok(())
    }

    /// SPLICE: replace the list on top with its elements as arguments.
    pub(crate) fn op_splice(&mut self) -> VmResult<()> {
        let slot = self.stack.len() - 1;
        let list = match &self.stack[slot] {
            Value::List(l) => l.clone(),
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    slot,
                    ident::ids().list,
                    format!("Spliced value ({shown}) is not a list."),
                );
            }
        };
        self.pop_n(1);
        for v in list.iter() {
            self.push(v.clone());
        }
        Ok(())
    }

    /// SPLICE_ADD: append the list on top to the list below it.
    pub(crate) fn op_splice_add(&mut self) -> VmResult<()> {
        let top_slot = self.stack.len() - 1;
        let dest_slot = self.stack.len() - 2;
        let addition = match &self.stack[top_slot] {
            Value::List(l) => l.clone(),
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    top_slot,
                    ident::ids().list,
                    format!("Spliced value ({shown}) is not a list."),
                );
            }
        };
        match &mut self.stack[dest_slot] {
            Value::List(dest) => dest.append(&addition),
            _ => {
                let shown = self.stack[dest_slot].to_literal();
                return self.type_error(
                    dest_slot,
                    ident::ids().list,
                    format!("Splice target ({shown}) is not a list."),
                );
            }
        }
        self.pop_n(1);
        Ok(())
    }

    // --- scoped error actions -------------------------------------------

    pub(crate) fn op_critical(&mut self) -> VmResult<()> {
        let end = self.operand() as usize;
        let stack_pos = self.stack.len();
        self.cur_frame_mut()
            .specifiers
            .push(Specifier::Critical { end, stack_pos });
        Ok(())
    }

    pub(crate) fn op_critical_end(&mut self) -> VmResult<()> {
        self.cur_frame_mut().specifiers.pop();
        Ok(())
    }

    pub(crate) fn op_propagate(&mut self) -> VmResult<()> {
        let end = self.operand() as usize;
        self.cur_frame_mut()
            .specifiers
            .push(Specifier::Propagate { end });
        Ok(())
    }

    pub(crate) fn op_propagate_end(&mut self) -> VmResult<()> {
        self.cur_frame_mut().specifiers.pop();
        Ok(())
    }

    pub(crate) fn op_catch(&mut self) -> VmResult<()> {
        let handler = self.operand() as usize;
        let error_list = match self.operand() {
            -1 => None,
            ind => Some(ind as usize),
        };
        let stack_pos = self.stack.len();
        self.cur_frame_mut().specifiers.push(Specifier::Catch {
            error_list,
            handler,
            stack_pos,
        });
        Ok(())
    }

    /// CATCH_END: the protected body completed; discard the specifier and
    /// jump past the handler.
    pub(crate) fn op_catch_end(&mut self) -> VmResult<()> {
        let target = self.operand() as usize;
        self.cur_frame_mut().specifiers.pop();
        self.cur_frame_mut().pc = target;
        Ok(())
    }

    /// HANDLER_END: the handler block completed; its error info dies.
    pub(crate) fn op_handler_end(&mut self) -> VmResult<()> {
        self.cur_frame_mut().handlers.pop();
        Ok(())
    }
}
