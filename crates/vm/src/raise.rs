//! Raising and propagating interpreted errors.
//!
//! A raised error carries a traceback: a list whose first element is the
//! error condition `[error, explanation, arg]` plus a location row, with one
//! `[error, method, object, definer, pc]` row appended per unwound frame.
//! Propagation walks the current frame's specifier stack, applying the
//! topmost rule; an exhausted frame unwinds, replacing the error with
//! `~methoderr` unless a propagate specifier was crossed.

use crate::error::VmResult;
use crate::frame::{HandlerInfo, Specifier};
use crate::interp::Vm;
use cmm_config::SYSTEM_DBREF;
use cmm_core::ident::{self, Sym};
use cmm_core::{Dbref, List, Op, Value};
use tracing::trace;

impl Vm {
    /// The location row for the instruction that failed: `'function` or
    /// `'opcode`, then the operator's own symbol.
    fn locate_error(&self) -> List {
        let frame = self.cur_frame();
        let op = Op::from_number(frame.method.code[frame.last_pc]);
        let (kind, name) = match op {
            Some(op) => {
                let ids = ident::ids();
                let kind = if op.is_function() {
                    ids.function
                } else {
                    ids.opcode
                };
                (kind, op.name())
            }
            None => (ident::ids().opcode, "?"),
        };
        List::from_vec(vec![Value::symbol(kind), Value::Symbol(ident::get(name))])
    }

    /// `['method, name, object, definer, pc]` for user-raised errors.
    fn locate_method(&self) -> List {
        let mut row = vec![Value::symbol(ident::ids().method)];
        self.fill_in_method_info(&mut row);
        List::from_vec(row)
    }

    fn fill_in_method_info(&self, row: &mut Vec<Value>) {
        let frame = self.cur_frame();
        match frame.method.name {
            Some(name) => row.push(Value::symbol(name)),
            None => row.push(Value::Int(0)),
        }
        row.push(Value::Dbref(frame.object));
        row.push(Value::Dbref(frame.definer()));
        row.push(Value::Int(frame.pc as i64));
    }

    /// `[[error, explanation, arg], location]`.
    fn construct_traceback(
        &self,
        error: Sym,
        explanation: &str,
        arg: Option<Value>,
        location: List,
    ) -> List {
        let condition = List::from_vec(vec![
            Value::error(error),
            Value::Str(explanation.into()),
            arg.unwrap_or(Value::Int(0)),
        ]);
        List::from_vec(vec![Value::List(condition), Value::List(location)])
    }

    fn traceback_add(&self, mut traceback: List, error: Sym) -> List {
        let mut row = vec![Value::error(error)];
        self.fill_in_method_info(&mut row);
        traceback.add(Value::List(List::from_vec(row)));
        traceback
    }

    /// Raises `error` at the current instruction.
    pub(crate) fn throw(&mut self, error: Sym, explanation: String) -> VmResult<()> {
        self.throw_data(error, explanation, None)
    }

    /// Raises `error` with an attached datum.
    pub(crate) fn throw_data(
        &mut self,
        error: Sym,
        explanation: String,
        arg: Option<Value>,
    ) -> VmResult<()> {
        if self.frames.is_empty() {
            return Ok(());
        }
        let traceback =
            self.construct_traceback(error, &explanation, arg, self.locate_error());
        self.propagate_error(traceback, error)
    }

    /// The `throw` operator: raise from the method itself, unwinding the
    /// raising frame first.
    pub(crate) fn user_error(
        &mut self,
        error: Sym,
        explanation: String,
        arg: Option<Value>,
    ) -> VmResult<()> {
        let traceback =
            self.construct_traceback(error, &explanation, arg, self.locate_method());
        self.frame_return()?;
        self.propagate_error(traceback, error)
    }

    /// Tick exhaustion: the frame dies with `~methoderr` and no chance to
    /// return.
    pub(crate) fn out_of_ticks_error(&mut self) -> VmResult<()> {
        let methoderr = ident::ids().methoderr;
        let mut row = vec![Value::symbol(ident::ids().interpreter)];
        self.fill_in_method_info(&mut row);
        let traceback = self.construct_traceback(
            methoderr,
            "Out of ticks",
            None,
            List::from_vec(row),
        );
        self.frame_return()?;
        self.propagate_error(traceback, methoderr)
    }

    /// Applies the specifier rules to a raised error. Consumes the
    /// traceback.
    pub(crate) fn propagate_error(&mut self, traceback: List, error: Sym) -> VmResult<()> {
        let mut traceback = traceback;
        let mut error = ident::dup(error);
        let mut propagate = false;

        loop {
            if self.frames.is_empty() {
                ident::discard(error);
                return Ok(());
            }
            traceback = self.traceback_add(traceback, error);
            trace!(error = %ident::name(error), "propagating");

            // Walk this frame's specifiers, top first.
            loop {
                let Some(spec) = self.cur_frame_mut().specifiers.pop() else {
                    break;
                };
                match spec {
                    Specifier::ObjHandler { stack_pos, .. } => {
                        // An object error-handler itself threw: abandon the
                        // intervention and resume the original error.
                        self.pop_to(stack_pos);
                        let frame = self.cur_frame_mut();
                        let info = frame
                            .handlers
                            .pop()
                            .expect("object handler keeps its info");
                        ident::discard(error);
                        traceback = info.traceback.clone();
                        error = ident::dup(info.error);
                        traceback = self.traceback_add(traceback, error);
                        propagate = true;
                    }
                    Specifier::Critical { end, stack_pos } => {
                        // Recover: push the error value and continue past
                        // the critical expression.
                        self.pop_to(stack_pos);
                        self.push(Value::error(error));
                        self.cur_frame_mut().pc = end;
                        ident::discard(error);
                        return Ok(());
                    }
                    Specifier::Propagate { .. } => {
                        propagate = true;
                    }
                    Specifier::Catch {
                        error_list,
                        handler,
                        stack_pos,
                    } => {
                        let matches = match error_list {
                            None => true,
                            Some(ind) => self
                                .cur_frame()
                                .method
                                .error_lists
                                .get(ind)
                                .is_some_and(|list| list.contains(&error)),
                        };
                        if !matches {
                            continue;
                        }
                        let info = HandlerInfo::new(traceback, error);
                        let frame = self.cur_frame_mut();
                        frame.handlers.push(info);
                        frame.pc = handler;
                        self.pop_to(stack_pos);
                        ident::discard(error);
                        return Ok(());
                    }
                }
            }

            // No specifier claimed it; unwind a frame and keep going.
            self.frame_return()?;
            if !propagate {
                ident::discard(error);
                error = ident::dup(ident::ids().methoderr);
            }
        }
    }

    // --- object error-handler interception ------------------------------

    /// Value-misuse error whose target and offender are the same stack
    /// slot.
    pub(crate) fn data_handler(
        &mut self,
        slot: usize,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        self.err_handler(slot, slot, None, error, error, message)
    }

    /// Value-misuse error: `target_slot` chooses the handling class,
    /// `result_slot` is the operand a successful handler replaces.
    pub(crate) fn data_obj_handler(
        &mut self,
        target_slot: usize,
        result_slot: usize,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        self.err_handler(target_slot, result_slot, None, error, error, message)
    }

    /// Type misuse: reported as `~type`, with the expected type id as the
    /// suberror handed to the handler.
    pub(crate) fn type_error(
        &mut self,
        slot: usize,
        expected: Sym,
        message: String,
    ) -> VmResult<()> {
        self.err_handler(slot, slot, None, expected, ident::ids().type_, message)
    }

    /// Value-misuse error against an explicit object rather than a stack
    /// slot (the system object intercepts validation failures).
    pub(crate) fn obj_handler(
        &mut self,
        target: Dbref,
        result_slot: usize,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        self.err_handler_on(Value::Dbref(target), result_slot, None, error, error, message)
    }

    fn err_handler(
        &mut self,
        target_slot: usize,
        result_slot: usize,
        arg: Option<Value>,
        suberror: Sym,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        let target = self.stack[target_slot].clone();
        self.err_handler_on(target, result_slot, arg, suberror, error, message)
    }

    /// Tries to divert a value-misuse error to the target's `catch`
    /// method. On success the failing opcode is poised to restart with the
    /// handler's return value; otherwise the error propagates normally.
    fn err_handler_on(
        &mut self,
        target: Value,
        result_slot: usize,
        arg: Option<Value>,
        suberror: Sym,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        let traceback =
            self.construct_traceback(error, &message, arg, self.locate_error());

        // The handling class: the value's class for dbrefs and frobs, or
        // the dbref bound to the type's name.
        let handler_class = match &target {
            Value::Dbref(dbref) => Some(*dbref),
            Value::Frob(frob) => Some(frob.class),
            other => self.db.get_name(other.type_id()),
        };

        let catch_id = ident::ids().catch;
        let usable = match handler_class {
            Some(class) if self.frames.len() < self.max_call_depth => {
                match self.db.find_method(class, catch_id)? {
                    Some((method, _)) => {
                        let wanted = 3;
                        let ok = method.num_args() == wanted
                            || (method.num_args() < wanted && method.rest.is_some());
                        ok.then_some(class)
                    }
                    None => None,
                }
            }
            _ => None,
        };

        let Some(class) = usable else {
            return self.propagate_error(traceback, error);
        };

        // Rewind to the start of the failing opcode and record where the
        // replacement lands.
        {
            let stack_pos = self.stack.len();
            let frame = self.cur_frame_mut();
            frame.pc = frame.last_pc;
            frame.specifiers.push(Specifier::ObjHandler {
                stack_pos,
                result_slot,
            });
        }
        if self.arg_starts.len() < self.last_argpos {
            let boundary = self
                .last_arg_start
                .expect("a popped boundary was recorded");
            self.arg_starts.push(boundary);
        }
        {
            let frame = self.cur_frame_mut();
            frame
                .handlers
                .push(HandlerInfo::new(traceback.clone(), error));
        }

        // Build the intervention call: target.catch(suberror, traceback,
        // offender).
        let receiver_slot = self.stack.len();
        self.push(target);
        let arg_start = self.stack.len();
        let offender = self.stack[result_slot].clone();
        self.push(Value::error(suberror));
        self.push(Value::List(traceback));
        self.push(offender);

        match self.send_message(class, catch_id, None, receiver_slot, arg_start)? {
            Ok(()) => Ok(()),
            Err(_) => {
                // The method vanished between the probe and the call;
                // undo the intervention and propagate as if never tried.
                self.pop_to(receiver_slot);
                let frame = self.cur_frame_mut();
                frame.specifiers.pop();
                let info = frame.handlers.pop().expect("intervention info");
                let traceback = info.traceback.clone();
                self.propagate_error(traceback, error)
            }
        }
    }

    /// Routes a validation failure through the system object's handler.
    pub(crate) fn system_handler(
        &mut self,
        result_slot: usize,
        error: Sym,
        message: String,
    ) -> VmResult<()> {
        self.obj_handler(Dbref(SYSTEM_DBREF), result_slot, error, message)
    }
}
