//! Portable packing of values and whole objects.
//!
//! A pack prepends a translation dictionary mapping every reachable dbref to
//! the object's bound name (its root-declared `name` parameter), so the
//! buffer can travel to another instance and be unpacked with automatic
//! dbref remapping through the local name table.

use crate::code::{self, OperandMap};
use crate::error::{DbError, DbResult};
use crate::method::Method;
use crate::object::Object;
use crate::Db;
use cmm_config::ROOT_DBREF;
use cmm_core::ident::{self, Sym};
use cmm_core::{ArgType, Buffer, Dbref, Dict, Frob, List, Op, Value};
use cmm_io::{Reader, Writer};

/// The result of a successful unpack.
#[derive(Debug)]
pub struct Unpacked {
    /// The reconstructed value; a fresh dbref for object packs.
    pub value: Value,
    /// Any unconsumed buffer tail.
    pub leftover: Option<Buffer>,
    /// The foreign dbrefs that were translated, when a translation
    /// dictionary was present.
    pub references: Option<List>,
}

/// Packs an arbitrary non-dbref value portably. Scalar kinds carry no
/// translation dictionary; containers and frobs are prefixed with one.
pub fn pack_value(db: &mut Db, value: &Value) -> DbResult<Option<Buffer>> {
    match value {
        Value::Dbref(_) => Ok(None),
        Value::Int(_) | Value::Str(_) | Value::Symbol(_) | Value::Error(_) | Value::Buffer(_) => {
            let mut ctx = PackCtx::new(db, false);
            ctx.value(value)?;
            Ok(Some(Buffer::from_vec(ctx.w.into_vec())))
        }
        Value::List(_) | Value::Dict(_) | Value::Frob(_) => {
            let mut body = PackCtx::new(db, true);
            match value {
                Value::List(l) => body.list(l)?,
                Value::Dict(d) => body.dict(d)?,
                Value::Frob(f) => body.frob(f)?,
                _ => unreachable!(),
            }
            let refs = body.refs.take().expect("collecting context has refs");
            let body_bytes = body.w.into_vec();

            let mut out = PackCtx::new(db, false);
            out.w.write_int(value.type_tag() as i64);
            out.dict(&refs)?;
            out.w.write_bytes(&body_bytes);
            Ok(Some(Buffer::from_vec(out.w.into_vec())))
        }
    }
}

/// Packs the object itself: parents, variables, pools, and methods behind a
/// translation dictionary. With `digest` set, variable values are omitted
/// (the form used for checksumming, not unpackable).
pub fn pack_object(db: &mut Db, dbref: Dbref, digest: bool) -> DbResult<Buffer> {
    let mut body = PackCtx::new(db, true);
    body.object_body(dbref, !digest)?;
    let refs = body.refs.take().expect("collecting context has refs");
    let body_bytes = body.w.into_vec();

    let mut out = PackCtx::new(db, false);
    out.w.write_int(Value::Dbref(dbref).type_tag() as i64);
    out.dict(&refs)?;
    out.w.write_bytes(&body_bytes);
    Ok(Buffer::from_vec(out.w.into_vec()))
}

/// The translation dictionary alone: every named dbref the object's image
/// references. With `methodrefs` set, dbref literals inside method code
/// count as references too.
pub fn depends(db: &mut Db, dbref: Dbref, methodrefs: bool) -> DbResult<Dict> {
    let mut body = PackCtx::new(db, true);
    body.methodrefs = methodrefs;
    body.object_body(dbref, true)?;
    Ok(body.refs.take().expect("collecting context has refs"))
}

struct PackCtx<'a> {
    db: &'a mut Db,
    refs: Option<Dict>,
    methodrefs: bool,
    w: Writer,
}

impl<'a> PackCtx<'a> {
    fn new(db: &'a mut Db, collect: bool) -> Self {
        PackCtx {
            db,
            refs: collect.then(Dict::new),
            methodrefs: true,
            w: Writer::new(),
        }
    }

    /// Records the bound name of `dbref` in the translation dictionary.
    /// Objects without a root-declared `name` parameter stay untranslated.
    fn add_ref(&mut self, dbref: Dbref) -> DbResult<()> {
        let Some(refs) = &mut self.refs else {
            return Ok(());
        };
        let key = Value::Int(dbref.0);
        if refs.contains(&key) {
            return Ok(());
        }
        let name = self
            .db
            .retrieve_var(dbref, Dbref(ROOT_DBREF), ident::ids().name)?;
        if let Some(Value::Symbol(id)) = name {
            let name_string = Value::Str(ident::name(id).into());
            if let Some(refs) = &mut self.refs {
                refs.add(key, name_string);
            }
        }
        Ok(())
    }

    fn value(&mut self, value: &Value) -> DbResult<()> {
        self.w.write_int(value.type_tag() as i64);
        match value {
            Value::Int(n) => self.w.write_int(*n),
            Value::Str(s) => self.w.write_str(Some(s.as_str())),
            Value::Dbref(dbref) => {
                self.add_ref(*dbref)?;
                self.w.write_int(dbref.0);
            }
            Value::List(l) => self.list(l)?,
            Value::Symbol(id) | Value::Error(id) => self.w.write_ident(Some(&ident::name(*id))),
            Value::Frob(frob) => self.frob(frob)?,
            Value::Dict(d) => self.dict(d)?,
            Value::Buffer(b) => {
                self.w.write_int(b.len() as i64);
                self.w.write_bytes(b.as_bytes());
            }
        }
        Ok(())
    }

    fn list(&mut self, list: &List) -> DbResult<()> {
        self.w.write_int(list.len() as i64);
        for v in list.iter() {
            self.value(v)?;
        }
        Ok(())
    }

    fn dict(&mut self, dict: &Dict) -> DbResult<()> {
        self.list(dict.keys())?;
        if !dict.keys().is_empty() {
            self.list(dict.values())?;
        }
        Ok(())
    }

    fn frob(&mut self, frob: &Frob) -> DbResult<()> {
        self.add_ref(frob.class)?;
        self.w.write_int(frob.class.0);
        self.value(&frob.rep)
    }

    fn object_body(&mut self, dbref: Dbref, with_values: bool) -> DbResult<()> {
        let parents = match self.db.fetch(dbref)? {
            Some(obj) => obj.parents.clone(),
            None => return Err(DbError::Missing { dbref: dbref.0 }),
        };
        self.list(&parents)?;

        // Variables: name, defining class (a reference), and value.
        let vars: Vec<(Sym, Dbref, Value)> = {
            let obj = self.fetch_existing(dbref)?;
            obj.vars
                .iter()
                .map(|v| (ident::dup(v.name), v.class, v.value.clone()))
                .collect()
        };
        self.w.write_int(vars.len() as i64);
        for (name, class, value) in &vars {
            self.w.write_ident(Some(&ident::name(*name)));
            self.add_ref(*class)?;
            self.w.write_int(class.0);
            if with_values {
                self.value(value)?;
            }
        }
        for (name, _, _) in vars {
            ident::discard(name);
        }

        // String pool, blanks squeezed out; `string_map[i]` is the packed
        // index of pool slot i.
        let (strings, string_map) = {
            let obj = self.fetch_existing(dbref)?;
            let mut strings = Vec::new();
            let mut map = Vec::with_capacity(obj.strings_len());
            for i in 0..obj.strings_len() {
                match obj.get_string(i) {
                    Some(s) => {
                        map.push(strings.len() as i64);
                        strings.push(s.clone());
                    }
                    None => map.push(-1),
                }
            }
            (strings, map)
        };
        self.w.write_int(strings.len() as i64);
        for s in &strings {
            self.w.write_str(Some(s.as_str()));
        }

        // Identifier pool, likewise.
        let (idents, ident_map) = {
            let obj = self.fetch_existing(dbref)?;
            let mut idents = Vec::new();
            let mut map = Vec::with_capacity(obj.idents_len());
            for i in 0..obj.idents_len() {
                match obj.get_ident(i) {
                    Some(id) => {
                        map.push(idents.len() as i64);
                        idents.push(ident::name(id));
                    }
                    None => map.push(-1),
                }
            }
            (idents, map)
        };
        self.w.write_int(idents.len() as i64);
        for name in &idents {
            self.w.write_ident(Some(name));
        }

        // Methods, with pool indices renumbered through the squeeze maps
        // and dbref literals recorded as references.
        let methods: Vec<crate::method::MethodRef> = {
            let obj = self.fetch_existing(dbref)?;
            obj.methods.iter().cloned().collect()
        };
        self.w.write_int(methods.len() as i64);
        for method in &methods {
            if self.methodrefs {
                self.collect_code_refs(dbref, method)?;
            }
            self.pack_method(method, &string_map, &ident_map)?;
        }
        Ok(())
    }

    fn fetch_existing(&mut self, dbref: Dbref) -> DbResult<&mut Object> {
        self.db
            .fetch(dbref)?
            .ok_or(DbError::Missing { dbref: dbref.0 })
    }

    /// Walks a method's code recording dbref literals and name-bound
    /// dbrefs in the translation dictionary.
    fn collect_code_refs(&mut self, definer: Dbref, method: &Method) -> DbResult<()> {
        let code = &method.code;
        let mut pc = 0;
        while pc < code.len() {
            let Some(op) = Op::from_number(code[pc]) else {
                break;
            };
            pc += 1;
            if op == Op::DbrefLit {
                self.add_ref(Dbref(code[pc]))?;
            } else if op == Op::NameLit {
                let bound = {
                    let obj = self.fetch_existing(definer)?;
                    obj.get_ident(code[pc] as usize)
                };
                if let Some(id) = bound {
                    if let Some(target) = self.db.get_name(id) {
                        self.add_ref(target)?;
                    }
                }
            }
            let (a1, a2) = op.args();
            pc += usize::from(a1 != ArgType::None) + usize::from(a2 != ArgType::None);
        }
        Ok(())
    }

    fn pack_method(
        &mut self,
        method: &Method,
        string_map: &[i64],
        ident_map: &[i64],
    ) -> DbResult<()> {
        match method.name {
            Some(name) => self.w.write_ident(Some(&ident::name(name))),
            None => self.w.write_ident(None),
        }
        self.w.write_int(method.argnames.len() as i64);
        for &ind in &method.argnames {
            self.w.write_int(ident_map[ind]);
        }
        self.w
            .write_int(method.rest.map_or(-1, |ind| ident_map[ind]));
        self.w.write_int(method.varnames.len() as i64);
        for &ind in &method.varnames {
            self.w.write_int(ident_map[ind]);
        }
        self.w.write_int(method.error_lists.len() as i64);
        for list in &method.error_lists {
            self.w.write_int(list.len() as i64);
            for &id in list {
                self.w.write_ident(Some(&ident::name(id)));
            }
        }
        self.w.write_int(i64::from(method.overridable));
        let strings = |v: i64| string_map.get(v as usize).copied().unwrap_or(-1);
        let idents = |v: i64| ident_map.get(v as usize).copied().unwrap_or(-1);
        code::encode(
            &method.code,
            &mut self.w,
            &OperandMap {
                string: &strings,
                ident: &idents,
            },
        )
    }
}

/// Unpacks a portable buffer. `Err(names)` reports unresolved reference
/// names for the operator layer to raise `~namenf`.
pub fn unpack(db: &mut Db, buf: &Buffer) -> DbResult<Result<Unpacked, List>> {
    let bytes = buf.as_bytes();
    let mut r = Reader::new(bytes);
    let tag = r.read_int()?;

    let (value, references) = match tag {
        // Scalars travel without a translation dictionary.
        0 | 1 | 4 | 5 | 8 => {
            let mut ctx = UnpackCtx { trans: None };
            let value = ctx.value_of_tag(&mut r, tag)?;
            (value, None)
        }
        // Containers and frobs: translate, then rebuild.
        3 | 6 | 7 => {
            let raw_trans = UnpackCtx { trans: None }.dict(&mut r)?;
            let trans = match translate_references(db, raw_trans)? {
                Ok(trans) => trans,
                Err(unresolved) => return Ok(Err(unresolved)),
            };
            let references = trans.keys().clone();
            let mut ctx = UnpackCtx { trans: Some(trans) };
            let value = ctx.value_of_tag(&mut r, tag)?;
            (value, Some(references))
        }
        // A whole object: create it under a fresh dbref.
        2 => {
            let raw_trans = UnpackCtx { trans: None }.dict(&mut r)?;
            let trans = match translate_references(db, raw_trans)? {
                Ok(trans) => trans,
                Err(unresolved) => return Ok(Err(unresolved)),
            };
            let references = trans.keys().clone();
            let mut ctx = UnpackCtx { trans: Some(trans) };
            let dbref = ctx.object(db, &mut r)?;
            (Value::Dbref(dbref), Some(references))
        }
        _ => return Err(cmm_io::IoError::UnknownTypeTag { tag }.into()),
    };

    let leftover = (r.remaining() > 0)
        .then(|| Buffer::from_bytes(&bytes[r.position()..]));
    Ok(Ok(Unpacked {
        value,
        leftover,
        references,
    }))
}

/// Rewrites the translation dictionary's values from names to local
/// dbrefs, collecting unresolved names.
fn translate_references(db: &Db, raw: Dict) -> DbResult<Result<Dict, List>> {
    let mut trans = Dict::new();
    let mut unresolved = List::new();
    for (key, value) in raw.keys().iter().zip(raw.values().iter()) {
        let name = match value.as_str() {
            Some(s) => s.as_str().to_owned(),
            None => {
                return Err(DbError::format("translation value is not a name string"));
            }
        };
        match db.resolve_name_str(&name) {
            Some(dbref) => trans.add(key.clone(), Value::Dbref(dbref)),
            None => unresolved.add(value.clone()),
        }
    }
    if unresolved.is_empty() {
        Ok(Ok(trans))
    } else {
        Ok(Err(unresolved))
    }
}

struct UnpackCtx {
    trans: Option<Dict>,
}

impl UnpackCtx {
    /// Maps a foreign dbref through the translation dictionary; unknown
    /// references collapse to `#-1`.
    fn translate(&self, dbref: i64) -> Dbref {
        match &self.trans {
            Some(trans) => match trans.find(&Value::Int(dbref)) {
                Some(Value::Dbref(local)) => *local,
                _ => Dbref(-1),
            },
            None => Dbref(-1),
        }
    }

    fn value(&mut self, r: &mut Reader<'_>) -> DbResult<Value> {
        let tag = r.read_int()?;
        self.value_of_tag(r, tag)
    }

    fn value_of_tag(&mut self, r: &mut Reader<'_>, tag: i64) -> DbResult<Value> {
        Ok(match tag {
            0 => Value::Int(r.read_int()?),
            1 => Value::Str(
                r.read_str("string")?
                    .ok_or_else(|| DbError::format("blank string"))?
                    .into(),
            ),
            2 => Value::Dbref(self.translate(r.read_int()?)),
            3 => Value::List(self.list(r)?),
            4 => Value::Symbol(self.ident_required(r)?),
            5 => Value::Error(self.ident_required(r)?),
            6 => {
                let class = self.translate(r.read_int()?);
                let rep = self.value(r)?;
                Value::Frob(Box::new(Frob { class, rep }))
            }
            7 => Value::Dict(self.dict(r)?),
            8 => {
                let len = r.read_len(1 << 28, "buffer")?;
                Value::Buffer(Buffer::from_bytes(r.read_bytes(len, "buffer")?))
            }
            _ => return Err(cmm_io::IoError::UnknownTypeTag { tag }.into()),
        })
    }

    fn ident_required(&mut self, r: &mut Reader<'_>) -> DbResult<Sym> {
        let name = r
            .read_ident()?
            .ok_or_else(|| DbError::format("blank identifier"))?;
        Ok(ident::get(&name))
    }

    fn list(&mut self, r: &mut Reader<'_>) -> DbResult<List> {
        let len = r.read_len(1 << 24, "list")?;
        let mut list = List::with_capacity(len);
        for _ in 0..len {
            list.add(self.value(r)?);
        }
        Ok(list)
    }

    fn dict(&mut self, r: &mut Reader<'_>) -> DbResult<Dict> {
        let keys = self.list(r)?;
        if keys.is_empty() {
            return Ok(Dict::new());
        }
        let values = self.list(r)?;
        Ok(Dict::from_keys_values(&keys, &values))
    }

    fn object(&mut self, db: &mut Db, r: &mut Reader<'_>) -> DbResult<Dbref> {
        let parents = self.list(r)?;
        let dbref = db.create(parents)?;

        let num_vars = r.read_len(1 << 24, "packed vars")?;
        for _ in 0..num_vars {
            let name = self.ident_required(r)?;
            let class = self.translate(r.read_int()?);
            let value = self.value(r)?;
            if let Some(obj) = db.fetch(dbref)? {
                obj.assign_var(class, name, value);
            }
            ident::discard(name);
        }

        let num_strings = r.read_len(1 << 24, "packed strings")?;
        for _ in 0..num_strings {
            let s = r
                .read_str("packed string")?
                .ok_or_else(|| DbError::format("blank packed string"))?;
            if let Some(obj) = db.fetch(dbref)? {
                obj.add_string(&s.into());
            }
        }

        let num_idents = r.read_len(1 << 24, "packed idents")?;
        for _ in 0..num_idents {
            let name = r
                .read_ident()?
                .ok_or_else(|| DbError::format("blank packed ident"))?;
            if let Some(obj) = db.fetch(dbref)? {
                obj.add_ident(&name);
            }
        }

        let num_methods = r.read_len(1 << 24, "packed methods")?;
        for _ in 0..num_methods {
            let method = self.method(r, dbref)?;
            let name = method.name.expect("packed methods are named");
            db.add_method(dbref, name, method)?;
        }
        Ok(dbref)
    }

    fn method(&mut self, r: &mut Reader<'_>, object: Dbref) -> DbResult<Method> {
        let name = self.ident_required(r)?;
        let num_args = r.read_len(1 << 16, "packed args")?;
        let mut argnames = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            argnames.push(r.read_int()? as usize);
        }
        let rest = match r.read_int()? {
            -1 => None,
            ind => Some(ind as usize),
        };
        let num_vars = r.read_len(1 << 16, "packed locals")?;
        let mut varnames = Vec::with_capacity(num_vars);
        for _ in 0..num_vars {
            varnames.push(r.read_int()? as usize);
        }
        let num_lists = r.read_len(1 << 16, "packed error lists")?;
        let mut error_lists = Vec::with_capacity(num_lists);
        for _ in 0..num_lists {
            let n = r.read_len(1 << 16, "packed error list")?;
            let mut list = Vec::with_capacity(n);
            for _ in 0..n {
                list.push(self.ident_required(r)?);
            }
            error_lists.push(list);
        }
        let overridable = r.read_int()? != 0;
        let code = code::decode(r, &OperandMap::default())?;
        Ok(Method::new(
            Some(name),
            object,
            argnames,
            rest,
            varnames,
            code,
            error_lists,
            overridable,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_config::Config;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir, sub: &str) -> Db {
        let mut config = Config::default();
        config.dirs.binary = dir.path().join(sub).join("binary");
        config.dirs.backup = dir.path().join(sub).join("backup");
        Db::open(&config).expect("open")
    }

    /// Minimal world: the system/root pair, `pad` filler objects to shift
    /// dbrefs, then a named object bound in the name table.
    fn seed(db: &mut Db, bound: &str, pad: usize) -> Dbref {
        let system = db.create(List::new()).expect("system");
        assert_eq!(system, Dbref(0));
        let root = db.create(List::new()).expect("root");
        assert_eq!(root, Dbref(ROOT_DBREF));
        db.fetch(root)
            .expect("fetch")
            .expect("exists")
            .add_param(ident::ids().name);
        for _ in 0..pad {
            db.create(List::new()).expect("filler");
        }

        let named = db
            .create(List::from_vec(vec![Value::Dbref(root)]))
            .expect("named");
        let bound_sym = ident::get(bound);
        db.assign_var(named, root, ident::ids().name, Value::Symbol(ident::dup(bound_sym)))
            .expect("assign name");
        db.set_name(bound_sym, named);
        ident::discard(bound_sym);
        named
    }

    #[test]
    fn scalar_values_round_trip_without_translation() {
        let dir = TempDir::new().expect("tempdir");
        let mut db = open_db(&dir, "a");
        for value in [
            Value::Int(-3),
            Value::Str("portable".into()),
            Value::symbol(ident::ids().parse),
            Value::error(ident::ids().range),
            Value::Buffer(Buffer::from_bytes(b"\x01\x02")),
        ] {
            let packed = pack_value(&mut db, &value)
                .expect("pack")
                .expect("packable");
            let unpacked = unpack(&mut db, &packed)
                .expect("unpack")
                .expect("no unresolved names");
            assert_eq!(unpacked.value, value);
            assert!(unpacked.leftover.is_none());
            assert!(unpacked.references.is_none());
        }
    }

    #[test]
    fn dbrefs_remap_through_bound_names() {
        let dir = TempDir::new().expect("tempdir");

        let mut src = open_db(&dir, "src");
        let named_src = seed(&mut src, "shared", 0);
        let value = Value::List(List::from_vec(vec![
            Value::Dbref(named_src),
            Value::Int(42),
        ]));
        let packed = pack_value(&mut src, &value)
            .expect("pack")
            .expect("packable");

        // A second instance where the same name binds a different dbref.
        let mut dst = open_db(&dir, "dst");
        let named_dst = seed(&mut dst, "shared", 1);
        assert_ne!(named_src, named_dst);

        let unpacked = unpack(&mut dst, &packed)
            .expect("unpack")
            .expect("resolved");
        assert_eq!(
            unpacked.value,
            Value::List(List::from_vec(vec![
                Value::Dbref(named_dst),
                Value::Int(42),
            ]))
        );
        let refs = unpacked.references.expect("translated refs");
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn unresolved_names_are_reported() {
        let dir = TempDir::new().expect("tempdir");
        let mut src = open_db(&dir, "src");
        let named = seed(&mut src, "only_here", 0);
        let value = Value::List(List::from_vec(vec![Value::Dbref(named)]));
        let packed = pack_value(&mut src, &value)
            .expect("pack")
            .expect("packable");

        let mut dst = open_db(&dir, "dst");
        let unresolved = unpack(&mut dst, &packed)
            .expect("unpack")
            .expect_err("names must be missing");
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved.get(0), &Value::Str("only_here".into()));
    }

    #[test]
    fn whole_objects_transport_methods_and_vars() {
        let dir = TempDir::new().expect("tempdir");
        let mut src = open_db(&dir, "src");
        let class = seed(&mut src, "parent_class", 0);

        let hp = ident::get("hp");
        let greet = ident::get("greet");
        {
            let obj = src.fetch(class).expect("fetch").expect("exists");
            obj.add_param(hp);
        }
        src.assign_var(class, class, hp, Value::Int(7)).expect("ok");
        let code_string = {
            let obj = src.fetch(class).expect("fetch").expect("exists");
            obj.add_string(&"hello".into())
        };
        let method = Method::new(
            None,
            class,
            Vec::new(),
            None,
            Vec::new(),
            vec![
                Op::StrLit.number(),
                code_string as i64,
                Op::ReturnExpr.number(),
            ],
            Vec::new(),
            true,
        );
        src.add_method(class, greet, method).expect("add");

        let packed = pack_object(&mut src, class, false).expect("pack");

        let mut dst = open_db(&dir, "dst");
        let dst_class = seed(&mut dst, "parent_class", 0);
        dst.fetch(dst_class)
            .expect("fetch")
            .expect("exists")
            .add_param(hp);
        let unpacked = unpack(&mut dst, &packed)
            .expect("unpack")
            .expect("resolved");
        let new_dbref = unpacked.value.as_dbref().expect("object pack yields dbref");
        assert!(dst.check(new_dbref));

        // Hierarchy references translated: hp rides on the local class.
        assert_eq!(
            dst.retrieve_var(new_dbref, dst_class, hp).expect("ok"),
            Some(Value::Int(7))
        );
        let (m, definer) = dst
            .find_method(new_dbref, greet)
            .expect("find")
            .expect("found");
        assert_eq!(definer, new_dbref);
        let obj = dst.fetch(new_dbref).expect("fetch").expect("exists");
        let pool_ind = m.code[1] as usize;
        assert_eq!(
            obj.get_string(pool_ind).map(|s| s.as_str().to_owned()),
            Some("hello".to_owned())
        );
        ident::discard(hp);
        ident::discard(greet);
    }
}
