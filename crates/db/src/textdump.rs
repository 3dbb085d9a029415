//! The textual database dump.
//!
//! Objects are emitted ancestors-first so the reader can recreate the
//! parent graph in declaration order. Each object is written as `parent`
//! lines, an `object` line, `var` lines with literal values, and `method`
//! blocks closed by a lone `.`.

use crate::error::{DbError, DbResult};
use crate::method::MethodRef;
use crate::object::Object;
use crate::Db;
use cmm_core::ident;
use cmm_core::Dbref;
use std::fs::{self, File};
use std::io::{BufWriter, Write};

/// Lists a method's source lines; the decompiler is an external
/// collaborator supplied by the interpreter layer.
pub type MethodLister<'a> = dyn Fn(&MethodRef, &Object) -> Vec<String> + 'a;

impl Db {
    /// Writes the full text dump, replacing the previous file atomically.
    pub fn text_dump(&mut self, lister: &MethodLister<'_>) -> DbResult<()> {
        let path = self.textdump_path();
        let tmp_path = path.with_extension("tmp");
        let file = File::create(&tmp_path).map_err(|e| DbError::file(&tmp_path, e))?;
        let mut out = BufWriter::new(file);

        self.cur_search += 1;
        for dbref in self.all_dbrefs()? {
            self.text_dump_object(dbref, &mut out, lister)?;
        }

        out.flush()
            .and_then(|_| out.get_ref().sync_all())
            .map_err(|e| DbError::file(&tmp_path, e))?;
        drop(out);
        fs::rename(&tmp_path, &path).map_err(|e| DbError::file(&path, e))?;
        Ok(())
    }

    fn text_dump_object(
        &mut self,
        dbref: Dbref,
        out: &mut BufWriter<File>,
        lister: &MethodLister<'_>,
    ) -> DbResult<()> {
        let parents = {
            let cur_search = self.cur_search;
            let Some(obj) = self.fetch(dbref)? else {
                return Ok(());
            };
            if obj.search == cur_search {
                return Ok(());
            }
            obj.search = cur_search;
            obj.dirty = true;
            obj.parents.clone()
        };

        // Parents go out before their descendants.
        for parent in parents.iter() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            self.text_dump_object(parent, out, lister)?;
        }

        let path = self.textdump_path();
        let write_err = |e: std::io::Error| DbError::file(&path, e);

        let Some(obj) = self.fetch(dbref)? else {
            return Ok(());
        };

        for parent in obj.parents.clone().iter() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            writeln!(out, "parent {parent}").map_err(write_err)?;
        }
        writeln!(out, "object {dbref}").map_err(write_err)?;
        writeln!(out).map_err(write_err)?;

        for var in obj.vars.iter() {
            writeln!(
                out,
                "var {} {} {}",
                var.class.0,
                ident::name(var.name),
                var.value.to_literal()
            )
            .map_err(write_err)?;
        }
        writeln!(out).map_err(write_err)?;

        let methods: Vec<MethodRef> = obj.methods.iter().cloned().collect();
        for method in methods {
            let name = method.name.expect("table methods are named");
            writeln!(out, "method {}", ident::name(name)).map_err(write_err)?;
            let obj = self
                .fetch(dbref)?
                .ok_or(DbError::Missing { dbref: dbref.0 })?;
            for line in lister(&method, obj) {
                writeln!(out, "    {line}").map_err(write_err)?;
            }
            writeln!(out, ".").map_err(write_err)?;
            writeln!(out).map_err(write_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use cmm_config::Config;
    use cmm_core::{List, Op, Value};
    use tempfile::TempDir;

    #[test]
    fn dump_orders_ancestors_first() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.dirs.binary = dir.path().join("binary");
        config.dirs.backup = dir.path().join("backup");
        config.dirs.textdump = dir.path().join("textdump");
        let mut db = Db::open(&config).expect("open");

        let top = db.create(List::new()).expect("top");
        let mid = db
            .create(List::from_vec(vec![Value::Dbref(top)]))
            .expect("mid");
        let hp = ident::get("hp");
        db.fetch(mid).expect("f").expect("e").add_param(hp);
        db.assign_var(mid, mid, hp, Value::Str("ten".into()))
            .expect("assign");
        let m = ident::get("m");
        db.add_method(
            mid,
            m,
            Method::new(
                None,
                mid,
                Vec::new(),
                None,
                Vec::new(),
                vec![Op::Zero.number(), Op::ReturnExpr.number()],
                Vec::new(),
                true,
            ),
        )
        .expect("add");

        db.text_dump(&|method, _obj| vec![format!("// {} words", method.code.len())])
            .expect("dump");

        let text = std::fs::read_to_string(dir.path().join("textdump")).expect("read");
        let top_at = text.find(&format!("object {top}")).expect("top dumped");
        let mid_at = text.find(&format!("object {mid}")).expect("mid dumped");
        assert!(top_at < mid_at);
        assert!(text.contains(&format!("parent {top}")));
        assert!(text.contains("var "));
        assert!(text.contains("\"ten\""));
        assert!(text.contains("method m"));
        assert!(text.contains("    // 3 words"));
        assert!(text.contains("\n.\n"));
        ident::discard(hp);
        ident::discard(m);
    }
}
