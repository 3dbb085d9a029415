//! Miscellaneous functions: version, randomness, time, extremes, and the
//! name table reader.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_config::VERSION;
use cmm_core::{ident, List, Value};
use rand::Rng;

impl Vm {
    pub(crate) fn op_version(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let (major, minor, bugfix) = VERSION;
        self.push(Value::List(List::from_vec(vec![
            Value::Int(major),
            Value::Int(minor),
            Value::Int(bugfix),
        ])));
        Ok(())
    }

    /// random(n): uniform in `[1, n]`.
    pub(crate) fn op_random(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        let n = self.stack[start].as_int().expect("checked");
        if n <= 0 {
            return self.throw(
                ident::ids().range,
                format!("Argument ({n}) is not positive."),
            );
        }
        let drawn = rand::thread_rng().gen_range(1..=n);
        self.pop_n(1);
        self.push(Value::Int(drawn));
        Ok(())
    }

    pub(crate) fn op_time(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        self.push(Value::Int(chrono::Utc::now().timestamp()));
        Ok(())
    }

    /// ctime([time]): the classic 24-character timestamp.
    pub(crate) fn op_ctime(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[], &[Ty::Int])? else {
            return Ok(());
        };
        let when = if num_args == 1 {
            self.stack[start].as_int().expect("checked")
        } else {
            chrono::Utc::now().timestamp()
        };
        let text = chrono::DateTime::from_timestamp(when, 0)
            .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
            .unwrap_or_else(|| "Thu Jan  1 00:00:00 1970".to_owned());
        self.pop_n(num_args);
        self.push(Value::Str(text.into()));
        Ok(())
    }

    /// max/min over any number of arguments, ordered canonically. The
    /// first argument fixes the family: an integer or a string.
    fn find_extreme(&mut self, want_greater: bool) -> VmResult<()> {
        let start = self.pop_args()?;
        let num_args = self.stack.len() - start;
        if num_args == 0 {
            return self.throw(
                ident::ids().numargs,
                "Called with no arguments, requires at least one.".to_owned(),
            );
        }
        if !matches!(self.stack[start], Value::Int(_) | Value::Str(_)) {
            let shown = self.stack[start].to_literal();
            return self.throw(
                ident::ids().type_,
                format!("First argument ({shown}) not an integer or string."),
            );
        }
        let mut extreme = start;
        for slot in start + 1..self.stack.len() {
            let better = {
                let order = self.stack[slot].order(&self.stack[extreme]);
                if want_greater {
                    order.is_gt()
                } else {
                    order.is_lt()
                }
            };
            if better {
                extreme = slot;
            }
        }
        let winner = self.stack[extreme].clone();
        self.pop_n(num_args);
        self.push(winner);
        Ok(())
    }

    pub(crate) fn op_max(&mut self) -> VmResult<()> {
        self.find_extreme(true)
    }

    pub(crate) fn op_min(&mut self) -> VmResult<()> {
        self.find_extreme(false)
    }

    pub(crate) fn op_abs(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        let n = self.stack[start].as_int().expect("checked");
        self.pop_n(1);
        self.push(Value::Int(n.wrapping_abs()));
        Ok(())
    }

    /// get_name(symbol[, handled]): the dbref bound to a name. With the
    /// flag set, a missing binding goes through the system object's
    /// handler instead of raising directly.
    pub(crate) fn op_get_name(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Symbol], &[Ty::Int])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_symbol().expect("checked");
        match self.db.get_name(name) {
            Some(dbref) => {
                self.pop_n(num_args);
                self.push(Value::Dbref(dbref));
                Ok(())
            }
            None => {
                let handled = num_args == 2
                    && self.stack[start + 1].as_int().is_some_and(|flag| flag != 0);
                let message = format!("Can't find object name {}.", ident::name(name));
                if handled {
                    self.system_handler(start, ident::ids().namenf, message)
                } else {
                    self.throw(ident::ids().namenf, message)
                }
            }
        }
    }

    pub(crate) fn op_ticks_left(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let ticks = self.cur_frame().ticks;
        self.push(Value::Int(ticks));
        Ok(())
    }
}
