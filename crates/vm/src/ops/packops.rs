//! Portable packing operators.

use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_core::{ident, List, Value};
use cmm_db::netpack;

impl Vm {
    /// pack([value]): a portable buffer for a value, or for the current
    /// object when called without arguments. Bare dbrefs cannot be packed.
    pub(crate) fn op_pack(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[], &[Ty::Any])? else {
            return Ok(());
        };
        let buf = if num_args == 0 {
            let obj = self.cur_frame().object;
            netpack::pack_object(&mut self.db, obj, false)?
        } else {
            let value = self.stack[start].clone();
            match netpack::pack_value(&mut self.db, &value)? {
                Some(buf) => buf,
                None => {
                    let shown = value.to_literal();
                    return self.throw(
                        ident::ids().type_,
                        format!("Can't pack data of type {shown}."),
                    );
                }
            }
        };
        self.pop_n(num_args);
        self.push(Value::Buffer(buf));
        Ok(())
    }

    /// unpack(buffer): rebuild a packed value (or a whole object under a
    /// fresh dbref), remapping dbrefs through the name table. Returns
    /// `[value, leftover?, references?]`.
    pub(crate) fn op_unpack(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Buffer], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let buf = self.stack[start].as_buffer().expect("checked").clone();
        match netpack::unpack(&mut self.db, &buf)? {
            Ok(unpacked) => {
                let mut result = List::new();
                result.add(unpacked.value);
                if let Some(leftover) = unpacked.leftover {
                    result.add(Value::Buffer(leftover));
                }
                if let Some(references) = unpacked.references {
                    result.add(Value::List(references));
                }
                self.pop_n(1);
                self.push(Value::List(result));
                Ok(())
            }
            Err(unresolved) => self.throw_data(
                ident::ids().namenf,
                "Unresolved References".to_owned(),
                Some(Value::List(unresolved)),
            ),
        }
    }

    /// digestable(): the current object packed without variable values,
    /// suitable for checksumming.
    pub(crate) fn op_digestable(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let buf = netpack::pack_object(&mut self.db, obj, true)?;
        self.push(Value::Buffer(buf));
        Ok(())
    }

    /// depends([deep]): the current object's reference-translation
    /// dictionary; with an argument, dbref literals inside method code
    /// count too.
    pub(crate) fn op_depends(&mut self) -> VmResult<()> {
        let Some((_, num_args)) = self.func_args(&[], &[Ty::Any])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let refs = netpack::depends(&mut self.db, obj, num_args > 0)?;
        self.pop_n(num_args);
        self.push(Value::Dict(refs));
        Ok(())
    }
}
