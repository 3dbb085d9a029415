//! Buffer functions.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Buffer, Value};

impl Vm {
    fn arg_buffer(&self, slot: usize) -> &Buffer {
        self.stack[slot].as_buffer().expect("checked by func_args")
    }

    pub(crate) fn op_buffer_len(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer], &[])? else {
            return Ok(());
        };
        let len = self.arg_buffer(start).len() as i64;
        self.pop_n(1);
        self.push(Value::Int(len));
        Ok(())
    }

    pub(crate) fn op_buffer_retrieve(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer, Ty::Int], &[])? else {
            return Ok(());
        };
        let len = self.arg_buffer(start).len();
        let pos = self.stack[start + 1].as_int().expect("checked") - 1;
        if !self.check_index(pos, len, start, start + 1)? {
            return Ok(());
        }
        let byte = self.arg_buffer(start).retrieve(pos as usize) as i64;
        self.pop_n(2);
        self.push(Value::Int(byte));
        Ok(())
    }

    pub(crate) fn op_buffer_append(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer, Ty::Buffer], &[])? else {
            return Ok(());
        };
        let other = self.arg_buffer(start + 1).clone();
        let mut buf = self.arg_buffer(start).clone();
        buf.append(&other);
        self.pop_n(2);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    pub(crate) fn op_buffer_replace(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer, Ty::Int, Ty::Int], &[])? else {
            return Ok(());
        };
        let len = self.arg_buffer(start).len();
        let pos = self.stack[start + 1].as_int().expect("checked") - 1;
        if !self.check_index(pos, len, start, start + 1)? {
            return Ok(());
        }
        let byte = self.stack[start + 2].as_int().expect("checked");
        let mut buf = self.arg_buffer(start).clone();
        buf.replace(pos as usize, byte);
        self.pop_n(3);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    pub(crate) fn op_buffer_add(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer, Ty::Int], &[])? else {
            return Ok(());
        };
        let byte = self.stack[start + 1].as_int().expect("checked");
        let mut buf = self.arg_buffer(start).clone();
        buf.add(byte);
        self.pop_n(2);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    /// buffer_truncate(buf, pos): non-negative keeps the first `pos`
    /// bytes; negative trims from the front.
    pub(crate) fn op_buffer_truncate(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer, Ty::Int], &[])? else {
            return Ok(());
        };
        let len = self.arg_buffer(start).len() as i64;
        let pos = self.stack[start + 1].as_int().expect("checked");
        if pos.unsigned_abs() as i64 >= len {
            return self.data_obj_handler(
                start,
                start + 1,
                ident::ids().range,
                format!(
                    "Position ({}) is greater than buffer length ({len}).",
                    pos + 1
                ),
            );
        }
        let mut buf = self.arg_buffer(start).clone();
        buf.truncate(pos);
        self.pop_n(2);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    /// buffer_to_strings(buf[, separator]).
    pub(crate) fn op_buffer_to_strings(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Buffer], &[Ty::Buffer])? else {
            return Ok(());
        };
        let sep = (num_args == 2).then(|| self.arg_buffer(start + 1).clone());
        let list = self.arg_buffer(start).to_strings(sep.as_ref());
        self.pop_n(num_args);
        self.push(Value::List(list));
        Ok(())
    }

    /// buffer_from_strings(list[, separator]).
    pub(crate) fn op_buffer_from_strings(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::List], &[Ty::Buffer])? else {
            return Ok(());
        };
        let list = self.stack[start].as_list().expect("checked").clone();
        for (i, v) in list.iter().enumerate() {
            if !matches!(v, Value::Str(_)) {
                let shown = v.to_literal();
                return self.throw(
                    ident::ids().type_,
                    format!("List element {} ({shown}) not a string.", i + 1),
                );
            }
        }
        let sep = (num_args == 2).then(|| self.arg_buffer(start + 1).clone());
        let buf = Buffer::from_strings(&list, sep.as_ref());
        self.pop_n(num_args);
        self.push(Value::Buffer(buf));
        Ok(())
    }
}
