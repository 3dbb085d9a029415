//! Information about the current method invocation.

use crate::error::VmResult;
use crate::interp::Vm;
use cmm_core::{ident, Frob, Value};

impl Vm {
    /// this(): the current object, as a frob when the invocation carried a
    /// representation.
    pub(crate) fn op_this(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let frame = self.cur_frame();
        let value = match &frame.rep {
            Some(rep) => Value::Frob(Box::new(Frob {
                class: frame.object,
                rep: rep.clone(),
            })),
            None => Value::Dbref(frame.object),
        };
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_definer(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let definer = self.cur_frame().definer();
        self.push(Value::Dbref(definer));
        Ok(())
    }

    pub(crate) fn op_sender(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let value = match self.cur_frame().sender {
            Some(sender) => Value::Dbref(sender),
            None => Value::Int(0),
        };
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_caller(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let value = match self.cur_frame().caller {
            Some(caller) => Value::Dbref(caller),
            None => Value::Int(0),
        };
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_task_id(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        self.push(Value::Int(self.task_id));
        Ok(())
    }

    /// rep(): the representation of a frob invocation.
    pub(crate) fn op_rep(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        match self.cur_frame().rep.clone() {
            Some(rep) => {
                self.push(rep);
                Ok(())
            }
            None => self.throw(
                ident::ids().frob,
                "Invocation has no representation.".to_owned(),
            ),
        }
    }
}
