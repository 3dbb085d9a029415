//! Error-handling functions available inside catch handlers.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Value};

impl Vm {
    /// error(): the error id the active handler caught.
    pub(crate) fn op_error_func(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        match self.cur_frame().handlers.last() {
            Some(info) => {
                let error = info.error;
                self.push(Value::error(error));
                Ok(())
            }
            None => self.throw(
                ident::ids().methoderr,
                "Not in an error handler.".to_owned(),
            ),
        }
    }

    /// traceback(): the traceback the active handler caught.
    pub(crate) fn op_traceback(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        match self.cur_frame().handlers.last() {
            Some(info) => {
                let traceback = info.traceback.clone();
                self.push(Value::List(traceback));
                Ok(())
            }
            None => self.throw(
                ident::ids().methoderr,
                "Not in an error handler.".to_owned(),
            ),
        }
    }

    /// throw(error, explanation[, arg]): raise from the method itself.
    pub(crate) fn op_throw(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Error, Ty::Str], &[Ty::Any])? else {
            return Ok(());
        };
        let error = match &self.stack[start] {
            Value::Error(id) => ident::dup(*id),
            _ => unreachable!("checked by func_args"),
        };
        let explanation = self.stack[start + 1]
            .as_str()
            .expect("checked")
            .as_str()
            .to_owned();
        let arg = (num_args == 3).then(|| self.stack[start + 2].clone());
        let result = self.user_error(error, explanation, arg);
        ident::discard(error);
        result
    }

    /// rethrow(error): continue the caught traceback under a new id.
    pub(crate) fn op_rethrow(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Error], &[])? else {
            return Ok(());
        };
        let error = match &self.stack[start] {
            Value::Error(id) => ident::dup(*id),
            _ => unreachable!("checked by func_args"),
        };
        let Some(info) = self.cur_frame().handlers.last() else {
            ident::discard(error);
            return self.throw(
                ident::ids().methoderr,
                "Not in an error handler.".to_owned(),
            );
        };
        let traceback = info.traceback.clone();
        self.pop_n(1);
        let result = self.propagate_error(traceback, error);
        ident::discard(error);
        result
    }
}
