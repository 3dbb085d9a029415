//! Arithmetic, relational, and bitwise operators.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, Value};
use std::cmp::Ordering;

impl Vm {
    pub(crate) fn op_not(&mut self) -> VmResult<()> {
        let truthy = self.top().truthy();
        self.set_top(Value::Int(i64::from(!truthy)));
        Ok(())
    }

    pub(crate) fn op_negate(&mut self) -> VmResult<()> {
        let slot = self.stack.len() - 1;
        match &self.stack[slot] {
            Value::Int(n) => {
                let n = *n;
                self.set_top(Value::Int(n.wrapping_neg()));
                Ok(())
            }
            other => {
                let shown = other.to_literal();
                self.type_error(
                    slot,
                    ident::ids().integer,
                    format!("Operand ({shown}) is not an integer."),
                )
            }
        }
    }

    fn binary_ints(&mut self) -> VmResult<Option<(i64, i64)>> {
        let b_slot = self.stack.len() - 1;
        let a_slot = self.stack.len() - 2;
        let a = match &self.stack[a_slot] {
            Value::Int(n) => *n,
            other => {
                let shown = other.to_literal();
                self.type_error(
                    a_slot,
                    ident::ids().integer,
                    format!("Left operand ({shown}) is not an integer."),
                )?;
                return Ok(None);
            }
        };
        let b = match &self.stack[b_slot] {
            Value::Int(n) => *n,
            other => {
                let shown = other.to_literal();
                self.type_error(
                    b_slot,
                    ident::ids().integer,
                    format!("Right operand ({shown}) is not an integer."),
                )?;
                return Ok(None);
            }
        };
        Ok(Some((a, b)))
    }

    pub(crate) fn op_multiply(&mut self) -> VmResult<()> {
        let Some((a, b)) = self.binary_ints()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(a.wrapping_mul(b)));
        Ok(())
    }

    pub(crate) fn op_divide(&mut self) -> VmResult<()> {
        let Some((a, b)) = self.binary_ints()? else {
            return Ok(());
        };
        if b == 0 {
            return self.throw(ident::ids().div, "Division by zero.".to_owned());
        }
        self.pop_n(2);
        self.push(Value::Int(a.wrapping_div(b)));
        Ok(())
    }

    pub(crate) fn op_modulo(&mut self) -> VmResult<()> {
        let Some((a, b)) = self.binary_ints()? else {
            return Ok(());
        };
        if b == 0 {
            return self.throw(ident::ids().div, "Modulo by zero.".to_owned());
        }
        self.pop_n(2);
        self.push(Value::Int(a.wrapping_rem(b)));
        Ok(())
    }

    pub(crate) fn op_subtract(&mut self) -> VmResult<()> {
        let Some((a, b)) = self.binary_ints()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(a.wrapping_sub(b)));
        Ok(())
    }

    /// `+` adds integers and concatenates strings, lists, and buffers.
    pub(crate) fn op_add(&mut self) -> VmResult<()> {
        let b_slot = self.stack.len() - 1;
        let a_slot = self.stack.len() - 2;
        let result = match (&self.stack[a_slot], &self.stack[b_slot]) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Value::Str(a), Value::Str(b)) => {
                let mut out = a.clone();
                out.add(b.as_str());
                Value::Str(out)
            }
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.append(b);
                Value::List(out)
            }
            (Value::Buffer(a), Value::Buffer(b)) => {
                let mut out = a.clone();
                out.append(b);
                Value::Buffer(out)
            }
            (a, b) => {
                let shown_a = a.to_literal();
                let shown_b = b.to_literal();
                // The left operand is offered to its class's handler.
                return self.data_obj_handler(
                    a_slot,
                    a_slot,
                    ident::ids().type_,
                    format!("Cannot add {shown_a} and {shown_b}."),
                );
            }
        };
        self.pop_n(2);
        self.push(result);
        Ok(())
    }

    pub(crate) fn op_equal(&mut self) -> VmResult<()> {
        let b_slot = self.stack.len() - 1;
        let equal = self.stack[b_slot - 1] == self.stack[b_slot];
        self.pop_n(2);
        self.push(Value::Int(i64::from(equal)));
        Ok(())
    }

    pub(crate) fn op_not_equal(&mut self) -> VmResult<()> {
        let b_slot = self.stack.len() - 1;
        let equal = self.stack[b_slot - 1] == self.stack[b_slot];
        self.pop_n(2);
        self.push(Value::Int(i64::from(!equal)));
        Ok(())
    }

    /// Ordering comparisons apply to integer and string pairs.
    fn relation(&mut self) -> VmResult<Option<Ordering>> {
        let b_slot = self.stack.len() - 1;
        let a_slot = self.stack.len() - 2;
        match (&self.stack[a_slot], &self.stack[b_slot]) {
            (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp_ci(b))),
            (a, b) => {
                let shown_a = a.to_literal();
                let shown_b = b.to_literal();
                self.data_obj_handler(
                    a_slot,
                    a_slot,
                    ident::ids().type_,
                    format!("Cannot order {shown_a} and {shown_b}."),
                )?;
                Ok(None)
            }
        }
    }

    pub(crate) fn op_greater(&mut self) -> VmResult<()> {
        let Some(order) = self.relation()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(i64::from(order == Ordering::Greater)));
        Ok(())
    }

    pub(crate) fn op_greater_or_equal(&mut self) -> VmResult<()> {
        let Some(order) = self.relation()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(i64::from(order != Ordering::Less)));
        Ok(())
    }

    pub(crate) fn op_less(&mut self) -> VmResult<()> {
        let Some(order) = self.relation()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(i64::from(order == Ordering::Less)));
        Ok(())
    }

    pub(crate) fn op_less_or_equal(&mut self) -> VmResult<()> {
        let Some(order) = self.relation()? else {
            return Ok(());
        };
        self.pop_n(2);
        self.push(Value::Int(i64::from(order != Ordering::Greater)));
        Ok(())
    }

    /// IN: one-based position of a substring or list member, zero when
    /// absent.
    pub(crate) fn op_in(&mut self) -> VmResult<()> {
        let b_slot = self.stack.len() - 1;
        let a_slot = self.stack.len() - 2;
        let position = match (&self.stack[a_slot], &self.stack[b_slot]) {
            (needle, Value::List(haystack)) => {
                haystack.search(needle, 0).map_or(0, |at| at as i64 + 1)
            }
            (Value::Str(needle), Value::Str(haystack)) => {
                let needle = needle.as_str().to_ascii_lowercase();
                let haystack = haystack.as_str().to_ascii_lowercase();
                haystack.find(needle.as_str()).map_or(0, |at| {
                    haystack[..at].chars().count() as i64 + 1
                })
            }
            (_, other) => {
                let shown = other.to_literal();
                return self.type_error(
                    b_slot,
                    ident::ids().list,
                    format!("Membership target ({shown}) is not a list or string."),
                );
            }
        };
        self.pop_n(2);
        self.push(Value::Int(position));
        Ok(())
    }

    // --- bitwise functions ----------------------------------------------

    pub(crate) fn op_bitand(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int, Ty::Int], &[])? else {
            return Ok(());
        };
        let a = self.stack[start].as_int().expect("checked");
        let b = self.stack[start + 1].as_int().expect("checked");
        self.pop_n(2);
        self.push(Value::Int(a & b));
        Ok(())
    }

    pub(crate) fn op_bitor(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int, Ty::Int], &[])? else {
            return Ok(());
        };
        let a = self.stack[start].as_int().expect("checked");
        let b = self.stack[start + 1].as_int().expect("checked");
        self.pop_n(2);
        self.push(Value::Int(a | b));
        Ok(())
    }

    /// shift(n, count): positive counts shift left, negative right.
    pub(crate) fn op_bitshift(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int, Ty::Int], &[])? else {
            return Ok(());
        };
        let n = self.stack[start].as_int().expect("checked");
        let count = self.stack[start + 1].as_int().expect("checked");
        let shifted = if count >= 0 {
            n.wrapping_shl(count.min(63) as u32)
        } else {
            n.wrapping_shr((-count).min(63) as u32)
        };
        self.pop_n(2);
        self.push(Value::Int(shifted));
        Ok(())
    }
}
