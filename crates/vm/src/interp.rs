//! The interpreter core: stacks, frames, dispatch, and message sending.

use crate::error::{VmError, VmResult};
use crate::frame::{Frame, Specifier};
use crate::tasks::SavedTask;
use cmm_config::{Config, DirConfig, SYSTEM_DBREF};
use cmm_core::ident::{self, Sym};
use cmm_core::{Dbref, List, Op, Value};
use cmm_db::{Db, MethodRef};
use cmm_net::{Bridge, ConnId};
use tracing::debug;

/// Argument type requirements for function operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Any,
    Int,
    Str,
    Dbref,
    List,
    Symbol,
    Error,
    Frob,
    Dict,
    Buffer,
}

impl Ty {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Ty::Any, _)
                | (Ty::Int, Value::Int(_))
                | (Ty::Str, Value::Str(_))
                | (Ty::Dbref, Value::Dbref(_))
                | (Ty::List, Value::List(_))
                | (Ty::Symbol, Value::Symbol(_))
                | (Ty::Error, Value::Error(_))
                | (Ty::Frob, Value::Frob(_))
                | (Ty::Dict, Value::Dict(_))
                | (Ty::Buffer, Value::Buffer(_))
        )
    }

    /// The well-known id naming this requirement.
    pub fn type_id(self) -> Sym {
        let ids = ident::ids();
        match self {
            Ty::Any => ids.type_,
            Ty::Int => ids.integer,
            Ty::Str => ids.string,
            Ty::Dbref => ids.dbref,
            Ty::List => ids.list,
            Ty::Symbol => ids.symbol,
            Ty::Error => ids.error,
            Ty::Frob => ids.frob,
            Ty::Dict => ids.dictionary,
            Ty::Buffer => ids.buffer,
        }
    }

    fn english(self) -> &'static str {
        match self {
            Ty::Any => "a value",
            Ty::Int => "an integer",
            Ty::Str => "a string",
            Ty::Dbref => "a dbref",
            Ty::List => "a list",
            Ty::Symbol => "a symbol",
            Ty::Error => "an error",
            Ty::Frob => "a frob",
            Ty::Dict => "a dictionary",
            Ty::Buffer => "a buffer",
        }
    }
}

/// Why a message could not start a frame.
pub(crate) struct DispatchFailure {
    pub error: Sym,
    pub message: String,
}

/// The interpreter: owns the database, the I/O bridge, the data and
/// argument stacks, the frame chain, and the task lists.
pub struct Vm {
    pub db: Db,
    pub bridge: Bridge,
    pub(crate) dirs: DirConfig,
    pub(crate) method_ticks: i64,
    pub(crate) paused_method_ticks: i64,
    pub(crate) max_call_depth: usize,

    pub(crate) stack: Vec<Value>,
    pub(crate) arg_starts: Vec<usize>,
    pub(crate) frames: Vec<Frame>,

    pub(crate) task_id: i64,
    pub(crate) tick: i64,
    pub(crate) cur_conn: Option<ConnId>,
    pub(crate) opcode_restart: bool,
    pub(crate) last_argpos: usize,
    /// The boundary value most recently popped, so an opcode restart can
    /// rebuild the argument state of the failing instruction.
    pub(crate) last_arg_start: Option<usize>,

    /// Suspended tasks awaiting `resume`.
    pub(crate) tasks: Vec<SavedTask>,
    /// Tasks awaiting the next heartbeat.
    pub(crate) paused: Vec<SavedTask>,
    /// Stack storage recycled across tasks.
    pub(crate) stack_pool: Vec<(Vec<Value>, Vec<usize>)>,

    /// Cleared by the shutdown operator; the daemon exits its loop.
    pub(crate) running: bool,
    pub(crate) heartbeat_freq: Option<u64>,

    pub(crate) compiler: Option<Box<dyn crate::compile::Compiler>>,
    pub(crate) decompiler: Option<Box<dyn crate::compile::Decompiler>>,
}

impl Vm {
    pub fn new(db: Db, bridge: Bridge, config: &Config) -> Vm {
        Vm {
            db,
            bridge,
            dirs: config.dirs.clone(),
            method_ticks: config.vm.method_ticks,
            paused_method_ticks: config.vm.paused_method_ticks,
            max_call_depth: config.vm.max_call_depth,
            stack: Vec::with_capacity(256),
            arg_starts: Vec::with_capacity(32),
            frames: Vec::new(),
            task_id: 1,
            tick: 0,
            cur_conn: None,
            opcode_restart: false,
            last_argpos: 0,
            last_arg_start: None,
            tasks: Vec::new(),
            paused: Vec::new(),
            stack_pool: Vec::new(),
            running: true,
            heartbeat_freq: config.heartbeat_freq,
            compiler: None,
            decompiler: None,
        }
    }

    /// Installs the external parser/compiler collaborator.
    pub fn set_compiler(&mut self, compiler: Box<dyn crate::compile::Compiler>) {
        self.compiler = Some(compiler);
    }

    /// Installs the external decompiler collaborator.
    pub fn set_decompiler(&mut self, decompiler: Box<dyn crate::compile::Decompiler>) {
        self.decompiler = Some(decompiler);
    }

    /// False once a method has requested shutdown.
    pub fn running(&self) -> bool {
        self.running
    }

    /// Current heartbeat frequency in seconds.
    pub fn heartbeat_freq(&self) -> Option<u64> {
        self.heartbeat_freq
    }

    // --- stack helpers -------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop_n(&mut self, n: usize) {
        let new_len = self.stack.len().saturating_sub(n);
        self.stack.truncate(new_len);
    }

    pub(crate) fn pop_to(&mut self, mark: usize) {
        self.stack.truncate(mark);
    }

    pub(crate) fn top(&self) -> &Value {
        self.stack.last().expect("stack underflow")
    }

    /// Replaces the top of the stack.
    pub(crate) fn set_top(&mut self, value: Value) {
        let top = self.stack.len() - 1;
        self.stack[top] = value;
    }

    pub(crate) fn cur_frame(&self) -> &Frame {
        self.frames.last().expect("no current frame")
    }

    pub(crate) fn cur_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no current frame")
    }

    /// Reads the next immediate operand, advancing the pc past it.
    pub(crate) fn operand(&mut self) -> i64 {
        let frame = self.frames.last_mut().expect("no current frame");
        let value = frame.method.code[frame.pc];
        frame.pc += 1;
        value
    }

    /// The defining object's pool identifier named by an `Ident` operand.
    pub(crate) fn operand_ident(&mut self) -> VmResult<Option<Sym>> {
        let ind = self.operand() as usize;
        let definer = self.cur_frame().definer();
        match self.db.fetch(definer)? {
            Some(obj) => Ok(obj.get_ident(ind)),
            None => Ok(None),
        }
    }

    // --- argument checking ---------------------------------------------

    /// Pops the argument boundary and verifies count and types. On a
    /// violation the appropriate error is raised and `None` returned; the
    /// operator must then simply return.
    /// Pops the top argument boundary, remembering it for opcode restart.
    pub(crate) fn pop_args(&mut self) -> VmResult<usize> {
        let arg_start = self
            .arg_starts
            .pop()
            .ok_or_else(|| VmError::invariant("argument boundary stack underflow"))?;
        self.last_arg_start = Some(arg_start);
        Ok(arg_start)
    }

    pub(crate) fn func_args(
        &mut self,
        required: &[Ty],
        optional: &[Ty],
    ) -> VmResult<Option<(usize, usize)>> {
        let arg_start = self.pop_args()?;
        let num_args = self.stack.len() - arg_start;

        let min = required.len();
        let max = min + optional.len();
        if num_args < min || num_args > max {
            let wanted = if min == max {
                english_count(min)
            } else if min == 0 {
                format!("at most {}", english_count(max))
            } else {
                format!("{} to {}", english_count(min), english_count(max))
            };
            self.throw(
                ident::ids().numargs,
                format!(
                    "Called with {} argument{}, requires {}.",
                    english_count(num_args),
                    if num_args == 1 { "" } else { "s" },
                    wanted
                ),
            )?;
            return Ok(None);
        }

        for (i, ty) in required.iter().chain(optional.iter()).enumerate() {
            if i >= num_args {
                break;
            }
            if !ty.matches(&self.stack[arg_start + i]) {
                let slot = arg_start + i;
                let shown = self.stack[slot].to_literal();
                self.type_error(
                    slot,
                    ty.type_id(),
                    format!(
                        "The {} argument ({}) is not {}.",
                        ordinal(i + 1),
                        shown,
                        ty.english()
                    ),
                )?;
                return Ok(None);
            }
        }
        Ok(Some((arg_start, num_args)))
    }

    /// Restricts an operator to the system object. True when the check
    /// fails (an error has been raised).
    pub(crate) fn check_perms(&mut self) -> VmResult<bool> {
        let current = self.cur_frame().object;
        if current.0 != SYSTEM_DBREF {
            self.throw(
                ident::ids().perm,
                format!("Current object ({current}) is not the system object."),
            )?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Range-checks a one-based index against `len`. On failure the range
    /// error goes through the offending value's error handler.
    pub(crate) fn check_index(
        &mut self,
        index: i64,
        len: usize,
        target_slot: usize,
        offender_slot: usize,
    ) -> VmResult<bool> {
        let ids = ident::ids();
        if index < 0 {
            self.data_obj_handler(
                target_slot,
                offender_slot,
                ids.range,
                format!("Index ({}) is less than one.", index + 1),
            )?;
            Ok(false)
        } else if index as usize >= len {
            self.data_obj_handler(
                target_slot,
                offender_slot,
                ids.range,
                format!("Index ({}) is greater than length ({len})", index + 1),
            )?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Range-checks a zero-based `[start, start+len)` span against `end`.
    pub(crate) fn check_range(
        &mut self,
        start: i64,
        len: i64,
        end: usize,
        target_slot: usize,
    ) -> VmResult<bool> {
        let ids = ident::ids();
        if start < 0 {
            self.data_obj_handler(
                target_slot,
                target_slot + 1,
                ids.range,
                format!("Segment start ({}) is less than one.", start + 1),
            )?;
            Ok(false)
        } else if len < 0 {
            self.data_obj_handler(
                target_slot,
                target_slot + 2,
                ids.range,
                format!("Segment length ({len}) is less than zero."),
            )?;
            Ok(false)
        } else if start as usize + len as usize > end {
            self.data_obj_handler(
                target_slot,
                target_slot + 2,
                ids.range,
                format!(
                    "Segment extends to {}, past the end of the object ({end}).",
                    start + len
                ),
            )?;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    // --- frames ---------------------------------------------------------

    /// Starts a frame for `method` on `obj`. The actual arguments sit at
    /// `[arg_start, stack top]`; `stack_start` additionally covers the
    /// receiver slots consumed by the call.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn frame_start(
        &mut self,
        obj: Dbref,
        method: MethodRef,
        sender: Option<Dbref>,
        rep: Option<Value>,
        caller: Option<Dbref>,
        stack_start: usize,
        arg_start: usize,
    ) -> VmResult<Result<(), DispatchFailure>> {
        let num_args = self.stack.len() - arg_start;
        let formal = method.num_args();
        if num_args < formal || (num_args > formal && method.rest.is_none()) {
            let name = method
                .name
                .map(ident::name)
                .unwrap_or_else(|| "<eval>".to_owned());
            return Ok(Err(DispatchFailure {
                error: ident::ids().numargs,
                message: format!(
                    "{obj}.{name} called with {} argument{}, requires {}{}",
                    english_count(num_args),
                    if num_args == 1 { "" } else { "s" },
                    if formal == 0 {
                        "none".to_owned()
                    } else {
                        english_count(formal)
                    },
                    if method.rest.is_none() { "." } else { " or more." }
                ),
            }));
        }

        if self.frames.len() >= self.max_call_depth {
            return Ok(Err(DispatchFailure {
                error: ident::ids().maxdepth,
                message: "Maximum call depth exceeded.".to_owned(),
            }));
        }

        if method.rest.is_some() {
            // Collect the excess actuals into the rest list.
            let rest_start = arg_start + formal;
            let rest: List = self.stack.drain(rest_start..).collect();
            self.push(Value::List(rest));
        }

        self.db.pin(obj)?;
        self.db.pin(method.object)?;

        // Locals start zeroed after the formals.
        for _ in 0..method.num_vars() {
            self.push(Value::Int(0));
        }

        let frame = Frame {
            object: obj,
            sender,
            rep,
            caller,
            pc: 0,
            last_pc: 0,
            ticks: self.method_ticks,
            stack_start,
            var_start: arg_start,
            argpos_start: self.arg_starts.len(),
            specifiers: Vec::new(),
            handlers: Vec::new(),
            method,
        };
        self.frames.push(frame);
        self.opcode_restart = false;
        Ok(Ok(()))
    }

    /// Pops the current frame, discarding frame-owned data and restoring
    /// the caller's stacks.
    pub(crate) fn frame_return(&mut self) -> VmResult<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::invariant("frame return with no frame"))?;
        self.pop_to(frame.stack_start);
        self.arg_starts.truncate(frame.argpos_start);

        self.db.unpin(frame.object)?;
        self.db.unpin(frame.method.object)?;

        let Frame {
            method,
            specifiers,
            handlers,
            ..
        } = frame;
        drop(specifiers);
        drop(handlers);
        self.db.discard_method_refs(&method)?;
        Ok(())
    }

    /// Returns `value` from the current frame. If the caller is waiting on
    /// an object error-handler, the value instead replaces the failing
    /// operand and that opcode restarts.
    pub(crate) fn return_value(&mut self, value: Value) -> VmResult<()> {
        self.frame_return()?;
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        if let Some(Specifier::ObjHandler { result_slot, .. }) = frame.specifiers.last() {
            let slot = *result_slot;
            frame.specifiers.pop();
            frame.handlers.pop();
            self.stack[slot] = value;
            self.opcode_restart = true;
            return Ok(());
        }
        self.push(value);
        Ok(())
    }

    // --- message dispatch -----------------------------------------------

    /// Resolves and starts `message` on `dbref`. `stack_start` covers the
    /// receiver slots; `arg_start` is where the actuals begin.
    pub(crate) fn send_message(
        &mut self,
        dbref: Dbref,
        message: Sym,
        rep: Option<Value>,
        stack_start: usize,
        arg_start: usize,
    ) -> VmResult<Result<(), DispatchFailure>> {
        if !self.db.check(dbref) && self.db.fetch(dbref)?.is_none() {
            return Ok(Err(DispatchFailure {
                error: ident::ids().objnf,
                message: format!("Object {dbref} not found."),
            }));
        }
        let Some((method, _definer)) = self.db.find_method(dbref, message)? else {
            return Ok(Err(DispatchFailure {
                error: ident::ids().methodnf,
                message: format!("Method {} not found.", ident::name(message)),
            }));
        };

        let sender = self.frames.last().map(|f| f.object);
        let caller = self.frames.last().map(|f| f.definer());
        self.frame_start(dbref, method, sender, rep, caller, stack_start, arg_start)
    }

    /// Forwards the unchanged argument list to the next method in the
    /// resolution order past the current method's definer.
    pub(crate) fn pass_message(
        &mut self,
        stack_start: usize,
        arg_start: usize,
    ) -> VmResult<Result<(), DispatchFailure>> {
        let (object, name, definer, sender, rep, caller) = {
            let frame = self.cur_frame();
            let Some(name) = frame.method.name else {
                // Anonymous eval frames cannot pass.
                return Ok(Err(DispatchFailure {
                    error: ident::ids().methodnf,
                    message: "Anonymous method cannot pass.".to_owned(),
                }));
            };
            (
                frame.object,
                name,
                frame.definer(),
                frame.sender,
                frame.rep.clone(),
                frame.caller,
            )
        };
        let Some((method, _)) = self.db.find_next_method(object, name, definer)? else {
            return Ok(Err(DispatchFailure {
                error: ident::ids().methodnf,
                message: format!("No next method {} found.", ident::name(name)),
            }));
        };
        self.frame_start(object, method, sender, rep, caller, stack_start, arg_start)
    }

    // --- the dispatch loop ----------------------------------------------

    /// Runs the current frame chain until it is empty.
    pub(crate) fn execute(&mut self) -> VmResult<()> {
        while !self.frames.is_empty() {
            self.tick += 1;

            let out_of_ticks = {
                let frame = self.cur_frame_mut();
                frame.ticks -= 1;
                frame.ticks <= 0
            };
            if out_of_ticks {
                self.out_of_ticks_error()?;
                continue;
            }

            let word = {
                let frame = self.cur_frame_mut();
                if frame.pc >= frame.method.code.len() {
                    None
                } else {
                    frame.last_pc = frame.pc;
                    let word = frame.method.code[frame.pc];
                    frame.pc += 1;
                    Some(word)
                }
            };
            let Some(word) = word else {
                // Falling off the end behaves as a plain return.
                self.return_value(Value::Int(0))?;
                continue;
            };

            self.last_argpos = self.arg_starts.len();
            self.opcode_restart = false;

            match Op::from_number(word) {
                Some(op) => self.dispatch(op)?,
                None => {
                    self.throw(
                        ident::ids().methoderr,
                        format!("Unrecognized opcode word {word}."),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Executes a task: delivers `message` with `args` to `dbref` and runs
    /// it to completion or suspension. Returns the dispatch error id when
    /// the message could not start.
    pub fn task(
        &mut self,
        conn: Option<ConnId>,
        dbref: Dbref,
        message: Sym,
        args: Vec<Value>,
    ) -> VmResult<Option<Sym>> {
        // A requested shutdown stops accepting work.
        if !self.running {
            return Ok(Some(ident::ids().disconnect));
        }

        self.cur_conn = conn;
        for arg in args {
            self.push(arg);
        }

        match self.send_message(dbref, message, None, 0, 0)? {
            Ok(()) => {
                self.execute()?;
                if !self.stack.is_empty() {
                    return Err(VmError::invariant("stack not empty after interpretation"));
                }
                self.task_id += 1;
                Ok(None)
            }
            Err(failure) => {
                debug!(
                    dbref = dbref.0,
                    message = %ident::name(message),
                    error = %ident::name(failure.error),
                    "task not started"
                );
                self.pop_to(0);
                Ok(Some(failure.error))
            }
        }
    }

    /// Runs an already-built method as an anonymous task on `obj`.
    pub fn task_method(
        &mut self,
        conn: Option<ConnId>,
        obj: Dbref,
        method: MethodRef,
    ) -> VmResult<()> {
        self.cur_conn = conn;
        match self.frame_start(obj, method, None, None, None, 0, 0)? {
            Ok(()) => {
                self.execute()?;
                if !self.stack.is_empty() {
                    return Err(VmError::invariant("stack not empty after interpretation"));
                }
                self.task_id += 1;
                Ok(())
            }
            Err(_) => {
                self.pop_to(0);
                Ok(())
            }
        }
    }
}

/// Counts in prose for small numbers, the way error text reads.
pub(crate) fn english_count(n: usize) -> String {
    match n {
        0 => "none".to_owned(),
        1 => "one".to_owned(),
        2 => "two".to_owned(),
        3 => "three".to_owned(),
        4 => "four".to_owned(),
        5 => "five".to_owned(),
        6 => "six".to_owned(),
        7 => "seven".to_owned(),
        8 => "eight".to_owned(),
        9 => "nine".to_owned(),
        10 => "ten".to_owned(),
        _ => n.to_string(),
    }
}

pub(crate) fn ordinal(n: usize) -> &'static str {
    match n {
        1 => "first",
        2 => "second",
        3 => "third",
        4 => "fourth",
        5 => "fifth",
        6 => "sixth",
        _ => "later",
    }
}
