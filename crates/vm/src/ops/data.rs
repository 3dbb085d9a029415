//! Generic data-manipulation functions.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Dbref, Value};

impl Vm {
    pub(crate) fn op_type(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Any], &[])? else {
            return Ok(());
        };
        let type_id = self.stack[start].type_id();
        self.pop_n(1);
        self.push(Value::symbol(type_id));
        Ok(())
    }

    /// class([value]): the class of a dbref or frob; with no argument, the
    /// current object.
    pub(crate) fn op_class(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[], &[Ty::Any])? else {
            return Ok(());
        };
        if num_args == 0 {
            let this = self.cur_frame().object;
            self.push(Value::Dbref(this));
            return Ok(());
        }
        let class = match &self.stack[start] {
            Value::Dbref(dbref) => *dbref,
            Value::Frob(frob) => frob.class,
            other => {
                let shown = other.to_literal();
                return self.type_error(
                    start,
                    ident::ids().dbref,
                    format!("class only applies to dbrefs or frobs, not {shown}."),
                );
            }
        };
        self.pop_n(1);
        self.push(Value::Dbref(class));
        Ok(())
    }

    pub(crate) fn op_toint(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Any], &[])? else {
            return Ok(());
        };
        let value = match &self.stack[start] {
            Value::Int(n) => *n,
            Value::Str(s) => {
                let text = s.as_str().trim_start();
                let digits: String = text
                    .chars()
                    .enumerate()
                    .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                    .map(|(_, c)| c)
                    .collect();
                digits.parse().unwrap_or(0)
            }
            Value::Dbref(dbref) => dbref.0,
            other => {
                let shown = other.to_literal();
                return self.throw(
                    ident::ids().type_,
                    format!("The first argument ({shown}) is not a dbref or string."),
                );
            }
        };
        self.pop_n(1);
        self.push(Value::Int(value));
        Ok(())
    }

    pub(crate) fn op_tostr(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Any], &[])? else {
            return Ok(());
        };
        let text = self.stack[start].to_display();
        self.pop_n(1);
        self.push(Value::Str(text));
        Ok(())
    }

    pub(crate) fn op_toliteral(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Any], &[])? else {
            return Ok(());
        };
        let text = self.stack[start].to_literal();
        self.pop_n(1);
        self.push(Value::Str(text));
        Ok(())
    }

    pub(crate) fn op_todbref(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        let n = self.stack[start].as_int().expect("checked");
        if n < 0 {
            return self.throw(ident::ids().type_, "dbrefs must be 0 or greater".to_owned());
        }
        self.pop_n(1);
        self.push(Value::Dbref(Dbref(n)));
        Ok(())
    }

    pub(crate) fn op_tosym(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let id = ident::get(self.stack[start].as_str().expect("checked").as_str());
        self.pop_n(1);
        self.push(Value::Symbol(id));
        Ok(())
    }

    pub(crate) fn op_toerr(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let id = ident::get(self.stack[start].as_str().expect("checked").as_str());
        self.pop_n(1);
        self.push(Value::Error(id));
        Ok(())
    }

    /// valid(value): true when a dbref (or a frob's class) names an
    /// existing object.
    pub(crate) fn op_valid(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Any], &[])? else {
            return Ok(());
        };
        let valid = match &self.stack[start] {
            Value::Dbref(dbref) => {
                let dbref = *dbref;
                self.db.check(dbref)
            }
            Value::Frob(frob) => {
                let class = frob.class;
                self.db.check(class)
            }
            _ => false,
        };
        self.pop_n(1);
        self.push(Value::Int(i64::from(valid)));
        Ok(())
    }
}
