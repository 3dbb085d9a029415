//! Packing and unpacking of object images for the backing store.
//!
//! An image is, in order: parents, children, the variable table (size,
//! blanks, hash table, entries), the method table, the string pool, the
//! identifier pool, and the search generation. Identifiers serialize as
//! their interned names and are re-interned on load.

use crate::code::{self, OperandMap};
use crate::error::{DbError, DbResult};
use crate::method::{Method, MethodRef};
use crate::object::{IdentEntry, MethodSlot, Object, StringEntry, Var, VarSlot, VarTable};
use cmm_core::ident;
use cmm_core::{Buffer, Dbref, Dict, Frob, List, Value};
use cmm_io::{Reader, Writer};
use std::rc::Rc;

/// Packs an object into its image form.
pub fn pack_object(obj: &Object) -> DbResult<Vec<u8>> {
    let mut w = Writer::new();
    pack_list(&mut w, &obj.parents);
    pack_list(&mut w, &obj.children);
    pack_vars(&mut w, obj)?;
    pack_methods(&mut w, obj)?;
    pack_strings(&mut w, obj);
    pack_idents(&mut w, obj);
    w.write_int(obj.search as i64);
    Ok(w.into_vec())
}

/// Rebuilds an object from its image.
pub fn unpack_object(dbref: Dbref, image: &[u8]) -> DbResult<Object> {
    let mut r = Reader::new(image);
    let parents = unpack_list(&mut r)?;
    let children = unpack_list(&mut r)?;
    let vars = unpack_vars(&mut r)?;
    let methods = unpack_methods(&mut r, dbref)?;
    let strings = unpack_strings(&mut r)?;
    let idents = unpack_idents(&mut r)?;
    let search = r.read_int()?;

    let mut obj = Object::new(dbref, parents);
    obj.children = children;
    obj.vars = vars;
    obj.methods = methods;
    obj.strings = strings;
    obj.idents = idents;
    obj.search = search as u64;
    obj.dirty = false;
    Ok(obj)
}

/// Size in bytes of the object's packed image.
pub fn packed_size(obj: &Object) -> DbResult<usize> {
    Ok(pack_object(obj)?.len())
}

pub(crate) fn pack_value(w: &mut Writer, value: &Value) {
    w.write_int(value.type_tag() as i64);
    match value {
        Value::Int(n) => w.write_int(*n),
        Value::Str(s) => w.write_str(Some(s.as_str())),
        Value::Dbref(dbref) => w.write_int(dbref.0),
        Value::List(l) => {
            w.write_int(l.len() as i64);
            for v in l.iter() {
                pack_value(w, v);
            }
        }
        Value::Symbol(id) | Value::Error(id) => w.write_ident(Some(&ident::name(*id))),
        Value::Frob(frob) => {
            w.write_int(frob.class.0);
            pack_value(w, &frob.rep);
        }
        Value::Dict(d) => {
            pack_list_inner(w, d.keys());
            pack_list_inner(w, d.values());
        }
        Value::Buffer(b) => {
            w.write_int(b.len() as i64);
            w.write_bytes(b.as_bytes());
        }
    }
}

pub(crate) fn unpack_value(r: &mut Reader<'_>) -> DbResult<Value> {
    let tag = r.read_int()?;
    Ok(match tag {
        0 => Value::Int(r.read_int()?),
        1 => {
            let s = r
                .read_str("string value")?
                .ok_or_else(|| DbError::format("blank string value"))?;
            Value::Str(s.into())
        }
        2 => Value::Dbref(Dbref(r.read_int()?)),
        3 => Value::List(unpack_list_inner(r)?),
        4 => Value::Symbol(read_ident_required(r)?),
        5 => Value::Error(read_ident_required(r)?),
        6 => {
            let class = Dbref(r.read_int()?);
            let rep = unpack_value(r)?;
            Value::Frob(Box::new(Frob { class, rep }))
        }
        7 => {
            let keys = unpack_list_inner(r)?;
            let values = unpack_list_inner(r)?;
            Value::Dict(Dict::from_keys_values(&keys, &values))
        }
        8 => {
            let len = r.read_len(1 << 28, "buffer value")?;
            Value::Buffer(Buffer::from_bytes(r.read_bytes(len, "buffer value")?))
        }
        _ => return Err(cmm_io::IoError::UnknownTypeTag { tag }.into()),
    })
}

fn read_ident_required(r: &mut Reader<'_>) -> DbResult<cmm_core::Sym> {
    let name = r
        .read_ident()?
        .ok_or_else(|| DbError::format("blank identifier value"))?;
    Ok(ident::get(&name))
}

fn pack_list(w: &mut Writer, list: &List) {
    pack_list_inner(w, list);
}

fn pack_list_inner(w: &mut Writer, list: &List) {
    w.write_int(list.len() as i64);
    for v in list.iter() {
        pack_value(w, v);
    }
}

fn unpack_list(r: &mut Reader<'_>) -> DbResult<List> {
    unpack_list_inner(r)
}

fn unpack_list_inner(r: &mut Reader<'_>) -> DbResult<List> {
    let len = r.read_len(1 << 24, "list length")?;
    let mut list = List::with_capacity(len);
    for _ in 0..len {
        list.add(unpack_value(r)?);
    }
    Ok(list)
}

fn pack_vars(w: &mut Writer, obj: &Object) -> DbResult<()> {
    let table = &obj.vars;
    w.write_int(table.slots.len() as i64);
    w.write_int(table.blanks);
    for (i, slot) in table.slots.iter().enumerate() {
        w.write_int(table.hashtab[i]);
        match &slot.var {
            Some(var) => {
                w.write_ident(Some(&ident::name(var.name)));
                w.write_int(var.class.0);
                pack_value(w, &var.value);
            }
            None => w.write_ident(None),
        }
        w.write_int(slot.next);
    }
    Ok(())
}

fn unpack_vars(r: &mut Reader<'_>) -> DbResult<VarTable> {
    let size = r.read_len(1 << 24, "var table size")?;
    let blanks = r.read_int()?;
    let mut table = VarTable::with_size(size);
    table.blanks = blanks;
    for i in 0..size {
        table.hashtab[i] = r.read_int()?;
        let var = match r.read_ident()? {
            Some(name) => Some(Var {
                name: ident::get(&name),
                class: Dbref(r.read_int()?),
                value: unpack_value(r)?,
            }),
            None => None,
        };
        let next = r.read_int()?;
        table.slots[i] = VarSlot { var, next };
    }
    Ok(table)
}

fn pack_method(w: &mut Writer, method: &Method) -> DbResult<()> {
    match method.name {
        Some(name) => w.write_ident(Some(&ident::name(name))),
        None => w.write_ident(None),
    }
    w.write_int(method.argnames.len() as i64);
    for &ind in &method.argnames {
        w.write_int(ind as i64);
    }
    w.write_int(method.rest.map_or(-1, |ind| ind as i64));
    w.write_int(method.varnames.len() as i64);
    for &ind in &method.varnames {
        w.write_int(ind as i64);
    }
    w.write_int(method.error_lists.len() as i64);
    for list in &method.error_lists {
        w.write_int(list.len() as i64);
        for &id in list {
            w.write_ident(Some(&ident::name(id)));
        }
    }
    w.write_int(i64::from(method.overridable));
    code::encode(&method.code, w, &OperandMap::default())
}

fn unpack_method(r: &mut Reader<'_>, object: Dbref) -> DbResult<Option<Method>> {
    let name = match r.read_ident()? {
        Some(name) => ident::get(&name),
        None => return Ok(None),
    };
    let num_args = r.read_len(1 << 16, "method arg count")?;
    let mut argnames = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        argnames.push(r.read_int()? as usize);
    }
    let rest = match r.read_int()? {
        -1 => None,
        ind => Some(ind as usize),
    };
    let num_vars = r.read_len(1 << 16, "method var count")?;
    let mut varnames = Vec::with_capacity(num_vars);
    for _ in 0..num_vars {
        varnames.push(r.read_int()? as usize);
    }
    let num_lists = r.read_len(1 << 16, "error list count")?;
    let mut error_lists = Vec::with_capacity(num_lists);
    for _ in 0..num_lists {
        let n = r.read_len(1 << 16, "error list length")?;
        let mut list = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r
                .read_ident()?
                .ok_or_else(|| DbError::format("blank error id"))?;
            list.push(ident::get(&name));
        }
        error_lists.push(list);
    }
    let overridable = r.read_int()? != 0;
    let code = code::decode(r, &OperandMap::default())?;
    Ok(Some(Method::new(
        Some(name),
        object,
        argnames,
        rest,
        varnames,
        code,
        error_lists,
        overridable,
    )))
}

fn pack_methods(w: &mut Writer, obj: &Object) -> DbResult<()> {
    let table = &obj.methods;
    w.write_int(table.slots.len() as i64);
    w.write_int(table.blanks);
    for (i, slot) in table.slots.iter().enumerate() {
        w.write_int(table.hashtab[i]);
        match &slot.method {
            Some(m) => pack_method(w, m)?,
            None => w.write_ident(None),
        }
        w.write_int(slot.next);
    }
    Ok(())
}

fn unpack_methods(r: &mut Reader<'_>, object: Dbref) -> DbResult<crate::object::MethodTable> {
    let size = r.read_len(1 << 24, "method table size")?;
    let blanks = r.read_int()?;
    let mut table = crate::object::MethodTable::with_size(size);
    table.blanks = blanks;
    for i in 0..size {
        table.hashtab[i] = r.read_int()?;
        let method: Option<MethodRef> = unpack_method(r, object)?.map(Rc::new);
        let next = r.read_int()?;
        table.slots[i] = MethodSlot { method, next };
    }
    Ok(table)
}

fn pack_strings(w: &mut Writer, obj: &Object) {
    w.write_int(obj.strings.len() as i64);
    for entry in &obj.strings {
        match &entry.string {
            Some(s) => {
                w.write_str(Some(s.as_str()));
                w.write_int(entry.refs as i64);
            }
            None => w.write_str(None),
        }
    }
}

fn unpack_strings(r: &mut Reader<'_>) -> DbResult<Vec<StringEntry>> {
    let len = r.read_len(1 << 24, "string pool size")?;
    let mut strings = Vec::with_capacity(len);
    for _ in 0..len {
        match r.read_str("string pool entry")? {
            Some(s) => {
                let refs = r.read_len(1 << 32, "string refs")?;
                strings.push(StringEntry {
                    string: Some(s.into()),
                    refs,
                });
            }
            None => strings.push(StringEntry {
                string: None,
                refs: 0,
            }),
        }
    }
    Ok(strings)
}

fn pack_idents(w: &mut Writer, obj: &Object) {
    w.write_int(obj.idents.len() as i64);
    for entry in &obj.idents {
        match entry.id {
            Some(id) => {
                w.write_ident(Some(&ident::name(id)));
                w.write_int(entry.refs as i64);
            }
            None => w.write_ident(None),
        }
    }
}

fn unpack_idents(r: &mut Reader<'_>) -> DbResult<Vec<IdentEntry>> {
    let len = r.read_len(1 << 24, "ident pool size")?;
    let mut idents = Vec::with_capacity(len);
    for _ in 0..len {
        match r.read_ident()? {
            Some(name) => {
                let refs = r.read_len(1 << 32, "ident refs")?;
                idents.push(IdentEntry {
                    id: Some(ident::get(&name)),
                    refs,
                });
            }
            None => idents.push(IdentEntry { id: None, refs: 0 }),
        }
    }
    Ok(idents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::{CmmString, Op};

    fn sample_value() -> Value {
        let mut dict = Dict::new();
        dict.add(Value::Int(1), Value::Str("one".into()));
        dict.add(Value::symbol(ident::get("k")), Value::Dbref(Dbref(9)));
        Value::List(List::from_vec(vec![
            Value::Int(-5),
            Value::Str("text".into()),
            Value::Dict(dict),
            Value::Buffer(Buffer::from_bytes(b"\x00\x01\xff")),
            Value::Frob(Box::new(Frob {
                class: Dbref(4),
                rep: Value::List(List::from_vec(vec![Value::Int(7)])),
            })),
            Value::error(ident::ids().range),
        ]))
    }

    #[test]
    fn values_round_trip() {
        let value = sample_value();
        let mut w = Writer::new();
        pack_value(&mut w, &value);
        let image = w.into_vec();
        let mut r = Reader::new(&image);
        let back = unpack_value(&mut r).expect("unpack");
        assert_eq!(back, value);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn objects_round_trip_with_vars_and_methods() {
        let mut obj = Object::new(Dbref(5), List::from_vec(vec![Value::Dbref(Dbref(1))]));
        obj.children = List::from_vec(vec![Value::Dbref(Dbref(8))]);
        let speed = ident::get("speed");
        obj.add_param(speed);
        obj.assign_var(Dbref(5), speed, sample_value());

        let greeting = obj.add_string(&CmmString::from("hi there"));
        let code = vec![
            Op::StrLit.number(),
            greeting as i64,
            Op::ReturnExpr.number(),
        ];
        let name = ident::get("greet");
        let method = Method::new(
            Some(ident::dup(name)),
            Dbref(5),
            Vec::new(),
            None,
            Vec::new(),
            code.clone(),
            vec![vec![ident::dup(ident::ids().range)]],
            true,
        );
        obj.methods.add(Rc::new(method));
        obj.search = 17;

        let image = pack_object(&obj).expect("pack");
        let back = unpack_object(Dbref(5), &image).expect("unpack");

        assert_eq!(back.parents, obj.parents);
        assert_eq!(back.children, obj.children);
        assert!(!back.dirty);
        assert_eq!(back.search, 17);
        assert_eq!(back.local_var(Dbref(5), speed), Some(&sample_value()));
        let m = back.methods.find(name).expect("method survives");
        assert_eq!(m.code, code);
        assert_eq!(m.error_lists.len(), 1);
        assert!(m.overridable);
        assert_eq!(
            back.get_string(greeting).map(|s| s.as_str().to_owned()),
            Some("hi there".to_owned())
        );
        ident::discard(speed);
        ident::discard(name);
    }
}
