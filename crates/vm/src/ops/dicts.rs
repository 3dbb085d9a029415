//! Dictionary functions.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Dict, Value};

impl Vm {
    fn arg_dict(&self, slot: usize) -> &Dict {
        match &self.stack[slot] {
            Value::Dict(d) => d,
            _ => unreachable!("checked by func_args"),
        }
    }

    pub(crate) fn op_dict_keys(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dict], &[])? else {
            return Ok(());
        };
        let keys = self.arg_dict(start).keys().clone();
        self.pop_n(1);
        self.push(Value::List(keys));
        Ok(())
    }

    pub(crate) fn op_dict_add(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dict, Ty::Any, Ty::Any], &[])? else {
            return Ok(());
        };
        let key = self.stack[start + 1].clone();
        let value = self.stack[start + 2].clone();
        let mut dict = self.arg_dict(start).clone();
        dict.add(key, value);
        self.pop_n(3);
        self.push(Value::Dict(dict));
        Ok(())
    }

    pub(crate) fn op_dict_del(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dict, Ty::Any], &[])? else {
            return Ok(());
        };
        let key = self.stack[start + 1].clone();
        let mut dict = self.arg_dict(start).clone();
        if !dict.del(&key) {
            let shown = key.to_literal();
            return self.throw_data(
                ident::ids().keynf,
                format!("Key ({shown}) is not in the dictionary."),
                Some(key),
            );
        }
        self.pop_n(2);
        self.push(Value::Dict(dict));
        Ok(())
    }

    pub(crate) fn op_dict_contains(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dict, Ty::Any], &[])? else {
            return Ok(());
        };
        let contains = self.arg_dict(start).contains(&self.stack[start + 1]);
        self.pop_n(2);
        self.push(Value::Int(i64::from(contains)));
        Ok(())
    }
}
