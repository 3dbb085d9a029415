//! Activation records and their error-action specifiers.

use cmm_core::{Dbref, List, Sym, Value};
use cmm_db::MethodRef;

/// How a raised error is treated while the specifier is in force, highest
/// priority first on the frame's specifier stack.
#[derive(Debug)]
pub enum Specifier {
    /// `critical(expr)`: pop to the mark, push the error value, and resume
    /// at `end`.
    Critical { end: usize, stack_pos: usize },
    /// `propagate(expr)`: unwind normally but keep the original error id
    /// across the frame boundary.
    Propagate { end: usize },
    /// `catch` statement: on a matching error, pop to the mark, push
    /// handler info, and jump to the handler.
    Catch {
        /// Index into the method's error lists; `None` catches any error.
        error_list: Option<usize>,
        handler: usize,
        stack_pos: usize,
    },
    /// An object error-handler call is in flight; on its clean return the
    /// failing opcode restarts with `result_slot` replaced by the returned
    /// value.
    ObjHandler {
        stack_pos: usize,
        result_slot: usize,
    },
}

/// The error a `catch` handler (or a pending object handler) is holding.
#[derive(Debug)]
pub struct HandlerInfo {
    pub traceback: List,
    pub error: Sym,
}

impl HandlerInfo {
    pub fn new(traceback: List, error: Sym) -> Self {
        HandlerInfo {
            traceback,
            error: cmm_core::ident::dup(error),
        }
    }
}

impl Drop for HandlerInfo {
    fn drop(&mut self) {
        cmm_core::ident::discard(self.error);
    }
}

/// One activation record. The frame pins its object and its method's
/// defining object in the cache for its lifetime.
#[derive(Debug)]
pub struct Frame {
    pub object: Dbref,
    pub sender: Option<Dbref>,
    /// The representation when the frame was entered through a frob.
    pub rep: Option<Value>,
    pub caller: Option<Dbref>,
    pub method: MethodRef,
    pub pc: usize,
    pub last_pc: usize,
    pub ticks: i64,
    /// Stack position the frame started at (receiver slot included).
    pub stack_start: usize,
    /// Base of the frame's local-variable slots (formals first).
    pub var_start: usize,
    /// Argument-boundary stack depth to restore on return.
    pub argpos_start: usize,
    pub specifiers: Vec<Specifier>,
    pub handlers: Vec<HandlerInfo>,
}

impl Frame {
    /// The defining object of the running method.
    pub fn definer(&self) -> Dbref {
        self.method.object
    }
}
