//! List functions.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{List, Value};

impl Vm {
    fn arg_list(&self, slot: usize) -> &List {
        self.stack[slot].as_list().expect("checked by func_args")
    }

    pub(crate) fn op_listlen(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List], &[])? else {
            return Ok(());
        };
        let len = self.arg_list(start).len() as i64;
        self.pop_n(1);
        self.push(Value::Int(len));
        Ok(())
    }

    /// sublist(list, start[, len]).
    pub(crate) fn op_sublist(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::List, Ty::Int], &[Ty::Int])? else {
            return Ok(());
        };
        let total = self.arg_list(start).len() as i64;
        let from = self.stack[start + 1].as_int().expect("checked") - 1;
        let span = if num_args == 3 {
            self.stack[start + 2].as_int().expect("checked")
        } else {
            total - from
        };
        if !self.check_range(from, span, total as usize, start)? {
            return Ok(());
        }
        let sub = self.arg_list(start).sublist(from as usize, span as usize);
        self.pop_n(num_args);
        self.push(Value::List(sub));
        Ok(())
    }

    /// insert(list, pos, value).
    pub(crate) fn op_insert(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Int, Ty::Any], &[])? else {
            return Ok(());
        };
        let len = self.arg_list(start).len();
        let pos = self.stack[start + 1].as_int().expect("checked") - 1;
        if !self.check_index(pos, len, start, start + 1)? {
            return Ok(());
        }
        let value = self.stack[start + 2].clone();
        let mut list = self.arg_list(start).clone();
        list.insert(pos as usize, value);
        self.pop_n(3);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_replace(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Int, Ty::Any], &[])? else {
            return Ok(());
        };
        let len = self.arg_list(start).len();
        let pos = self.stack[start + 1].as_int().expect("checked") - 1;
        if !self.check_index(pos, len, start, start + 1)? {
            return Ok(());
        }
        let value = self.stack[start + 2].clone();
        let mut list = self.arg_list(start).clone();
        list.replace(pos as usize, value);
        self.pop_n(3);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_delete(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Int], &[])? else {
            return Ok(());
        };
        let len = self.arg_list(start).len();
        let pos = self.stack[start + 1].as_int().expect("checked") - 1;
        if !self.check_index(pos, len, start, start + 1)? {
            return Ok(());
        }
        let mut list = self.arg_list(start).clone();
        list.delete(pos as usize);
        self.pop_n(2);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_setadd(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Any], &[])? else {
            return Ok(());
        };
        let value = self.stack[start + 1].clone();
        let mut list = self.arg_list(start).clone();
        list.setadd(value);
        self.pop_n(2);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_setremove(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Any], &[])? else {
            return Ok(());
        };
        let value = self.stack[start + 1].clone();
        let mut list = self.arg_list(start).clone();
        list.setremove(&value);
        self.pop_n(2);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_toset(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List], &[])? else {
            return Ok(());
        };
        let mut list = self.arg_list(start).clone();
        list.toset();
        self.pop_n(1);
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_union(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::List], &[])? else {
            return Ok(());
        };
        let other = self.arg_list(start + 1).clone();
        let mut list = self.arg_list(start).clone();
        list.union(&other);
        self.pop_n(2);
        self.push(Value::List(list));
        Ok(())
    }

    /// factor(a, b) -> [only-a, intersection, only-b].
    pub(crate) fn op_factor(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::List], &[])? else {
            return Ok(());
        };
        let factored = self.arg_list(start).factor(self.arg_list(start + 1));
        self.pop_n(2);
        self.push(Value::List(factored));
        Ok(())
    }

    pub(crate) fn op_qsort(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List], &[])? else {
            return Ok(());
        };
        let mut list = self.arg_list(start).clone();
        list.qsort();
        self.pop_n(1);
        self.push(Value::List(list));
        Ok(())
    }
}
