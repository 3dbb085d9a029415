//! The object database: cache, backing store, object model operations,
//! method resolution, and persistence.

pub mod cache;
pub mod code;
pub mod dbpack;
pub mod error;
pub mod method;
pub mod netpack;
pub mod object;
pub mod resolver;
pub mod store;
pub mod textdump;

pub use error::{DbError, DbResult};
pub use method::{Method, MethodRef};
pub use object::{Object, Var};

use cache::Cache;
use cmm_config::Config;
use cmm_core::ident::{self, Sym};
use cmm_core::{Dbref, List, Value};
use resolver::MethodCache;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use store::Store;
use tracing::info;

/// The database facade: owns the cache, the global resolution stamp, the
/// traversal generation counter, and the object-name table.
pub struct Db {
    pub(crate) cache: Cache,
    /// Bumped by every parent-graph edit and method add/delete.
    pub(crate) stamp: u64,
    /// Traversal generation; compared against each object's `search`.
    pub(crate) cur_search: u64,
    pub(crate) method_cache: MethodCache,
    names: HashMap<Sym, Dbref>,
    /// Dbrefs whose connections must be booted, drained by the daemon.
    pending_boots: Vec<Dbref>,
    textdump_path: PathBuf,
    backup_dir: PathBuf,
}

impl Db {
    /// Opens (or creates) the database under the configured directories.
    pub fn open(config: &Config) -> DbResult<Db> {
        let store = Store::open(&config.dirs.binary)?;
        let mut names = HashMap::new();
        for (name, dbref) in store.load_names()? {
            names.insert(ident::get(&name), Dbref(dbref));
        }
        let cache = Cache::new(store, config.cache.width, config.cache.depth);
        Ok(Db {
            cache,
            stamp: 1,
            cur_search: 0,
            method_cache: MethodCache::new(),
            names,
            pending_boots: Vec::new(),
            textdump_path: config.dirs.textdump.clone(),
            backup_dir: config.dirs.backup.clone(),
        })
    }

    /// True when no object exists yet (fresh database).
    pub fn is_empty(&self) -> bool {
        self.cache.store().db_top() == 0
    }

    /// Next dbref to be allocated.
    pub fn db_top(&self) -> i64 {
        self.cache.store().db_top()
    }

    /// Mutable access to an object image; `None` means no such object.
    pub fn fetch(&mut self, dbref: Dbref) -> DbResult<Option<&mut Object>> {
        self.cache.fetch(dbref)
    }

    /// Existence probe that never faults the image in.
    pub fn check(&mut self, dbref: Dbref) -> bool {
        self.cache.check(dbref)
    }

    /// Pins an object resident for the duration of a frame.
    pub fn pin(&mut self, dbref: Dbref) -> DbResult<()> {
        self.cache.pin(dbref)
    }

    /// Releases a pin, completing destruction of a dead object on its last
    /// release.
    pub fn unpin(&mut self, dbref: Dbref) -> DbResult<()> {
        if self.cache.unpin(dbref) {
            self.complete_destruction(dbref)?;
        }
        Ok(())
    }

    pub fn pins(&self, dbref: Dbref) -> usize {
        self.cache.pins(dbref)
    }

    /// Creates a new object under `parents` (already validated) and links
    /// it into each parent's children.
    pub fn create(&mut self, parents: List) -> DbResult<Dbref> {
        let dbref = Dbref(self.cache.store().db_top());
        self.cache.store_mut().set_db_top(dbref.0 + 1);
        let obj = Object::new(dbref, parents.clone());
        self.cache.install(obj)?;
        self.update_parents_children(dbref, &parents, true)?;
        Ok(dbref)
    }

    /// Creates the object `dbref` explicitly; used by boot and unpack.
    pub fn create_at(&mut self, dbref: Dbref, parents: List) -> DbResult<Dbref> {
        self.cache.store_mut().set_db_top(dbref.0 + 1);
        let obj = Object::new(dbref, parents.clone());
        self.cache.install(obj)?;
        self.update_parents_children(dbref, &parents, true)?;
        Ok(dbref)
    }

    fn update_parents_children(
        &mut self,
        child: Dbref,
        parents: &List,
        add: bool,
    ) -> DbResult<()> {
        let child_value = Value::Dbref(child);
        for parent in parents.iter() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            if let Some(obj) = self.fetch(parent)? {
                if add {
                    obj.children.setadd(child_value.clone());
                } else {
                    obj.children.delete_element(&child_value);
                }
                obj.dirty = true;
            }
        }
        Ok(())
    }

    /// Validates and installs a new parent list. `Err(index)` names the
    /// offending entry: not a dbref, nonexistent, or a cycle.
    pub fn change_parents(
        &mut self,
        dbref: Dbref,
        new_parents: &List,
    ) -> DbResult<Result<(), usize>> {
        for (i, entry) in new_parents.iter().enumerate() {
            let parent = match entry.as_dbref() {
                Some(parent) => parent,
                None => return Ok(Err(i)),
            };
            if !self.check(parent) || self.has_ancestor(parent, dbref)? {
                return Ok(Err(i));
            }
        }

        self.stamp += 1;
        let old_parents = match self.fetch(dbref)? {
            Some(obj) => obj.parents.clone(),
            None => return Ok(Err(0)),
        };
        self.update_parents_children(dbref, &old_parents, false)?;
        if let Some(obj) = self.fetch(dbref)? {
            obj.parents = new_parents.clone();
            obj.dirty = true;
        }
        self.update_parents_children(dbref, new_parents, true)?;
        Ok(Ok(()))
    }

    /// Marks `dbref` dead. Destruction completes when the last pin is
    /// released; connections on the object are queued for booting either
    /// way.
    pub fn destroy(&mut self, dbref: Dbref) -> DbResult<()> {
        let unpinned = {
            let Some(obj) = self.fetch(dbref)? else {
                return Ok(());
            };
            obj.dead = true;
            self.cache.pins(dbref) == 0
        };
        if unpinned {
            self.complete_destruction(dbref)?;
        }
        Ok(())
    }

    /// Finishes destruction: unlinks the graph, reparents orphaned
    /// children to the destroyed object's parents, and drops the image.
    fn complete_destruction(&mut self, dbref: Dbref) -> DbResult<()> {
        self.stamp += 1;
        let (parents, children) = match self.fetch(dbref)? {
            Some(obj) => (obj.parents.clone(), obj.children.clone()),
            None => return Ok(()),
        };

        self.update_parents_children(dbref, &parents, false)?;

        let self_value = Value::Dbref(dbref);
        for child in children.iter() {
            let child = child.as_dbref().expect("children hold dbrefs");
            let now_orphaned = {
                let Some(kid) = self.fetch(child)? else {
                    continue;
                };
                kid.parents.delete_element(&self_value);
                kid.dirty = true;
                kid.parents.is_empty()
            };
            if now_orphaned {
                if let Some(kid) = self.fetch(child)? {
                    kid.parents = parents.clone();
                }
                self.update_parents_children(child, &parents, true)?;
            }
        }

        self.pending_boots.push(dbref);
        self.cache.remove(dbref);
        info!(dbref = dbref.0, "object destroyed");
        Ok(())
    }

    /// Dbrefs whose connections must be booted; drained by the daemon
    /// loop.
    pub fn take_pending_boots(&mut self) -> Vec<Dbref> {
        std::mem::take(&mut self.pending_boots)
    }

    /// Installs `method` as `name` on `dbref`, replacing any previous
    /// definition and invalidating the method cache.
    pub fn add_method(&mut self, dbref: Dbref, name: Sym, mut method: Method) -> DbResult<()> {
        self.stamp += 1;
        self.del_method_inner(dbref, name)?;
        if let Some(old) = method.name {
            ident::discard(old);
        }
        method.name = Some(ident::dup(name));
        method.object = dbref;
        if let Some(obj) = self.fetch(dbref)? {
            obj.methods.add(Rc::new(method));
            obj.dirty = true;
        }
        Ok(())
    }

    /// Deletes the method `name` on `dbref`. False when absent.
    pub fn del_method(&mut self, dbref: Dbref, name: Sym) -> DbResult<bool> {
        self.stamp += 1;
        self.del_method_inner(dbref, name)
    }

    fn del_method_inner(&mut self, dbref: Dbref, name: Sym) -> DbResult<bool> {
        let Some(obj) = self.fetch(dbref)? else {
            return Ok(false);
        };
        let Some(removed) = obj.methods.remove(name) else {
            return Ok(false);
        };
        obj.dirty = true;
        if Rc::strong_count(&removed) == 1 {
            // No frame is running it; release its pool references now.
            obj.discard_code_refs(&removed);
        } else {
            // Frames still hold it; the last one to return releases.
            removed.detach();
        }
        Ok(true)
    }

    /// Releases a detached method's pool references once the final frame
    /// has finished with it.
    pub fn discard_method_refs(&mut self, method: &MethodRef) -> DbResult<()> {
        if method.is_detached() && Rc::strong_count(method) == 1 {
            if let Some(obj) = self.fetch(method.object)? {
                obj.discard_code_refs(method);
            }
        }
        Ok(())
    }

    /// Assigns `(class, name)` on `obj_dbref`. False when the variable is
    /// not declared on `class`.
    pub fn assign_var(
        &mut self,
        obj_dbref: Dbref,
        class: Dbref,
        name: Sym,
        value: Value,
    ) -> DbResult<bool> {
        let declared = match self.fetch(class)? {
            Some(class_obj) => class_obj.vars.find(class, name).is_some(),
            None => false,
        };
        if !declared {
            return Ok(false);
        }
        if let Some(obj) = self.fetch(obj_dbref)? {
            obj.assign_var(class, name, value);
        }
        Ok(true)
    }

    /// Reads `(class, name)` on `obj_dbref`; an unassigned descendant slot
    /// yields the defining class's value. `None` when undeclared.
    pub fn retrieve_var(
        &mut self,
        obj_dbref: Dbref,
        class: Dbref,
        name: Sym,
    ) -> DbResult<Option<Value>> {
        let default = match self.fetch(class)? {
            Some(class_obj) => match class_obj.vars.find(class, name) {
                Some(var) => var.value.clone(),
                None => return Ok(None),
            },
            None => return Ok(None),
        };
        if let Some(obj) = self.fetch(obj_dbref)? {
            if let Some(value) = obj.local_var(class, name) {
                return Ok(Some(value.clone()));
            }
        }
        Ok(Some(default))
    }

    /// Binds `name` to `dbref` in the object-name table.
    pub fn set_name(&mut self, name: Sym, dbref: Dbref) {
        if self.names.insert(ident::dup(name), dbref).is_some() {
            // The table already held a reference for this key.
            ident::discard(name);
        }
    }

    /// Unbinds `name`. False when it was not bound.
    pub fn del_name(&mut self, name: Sym) -> bool {
        match self.names.remove(&name) {
            Some(_) => {
                ident::discard(name);
                true
            }
            None => false,
        }
    }

    /// The dbref bound to `name`.
    pub fn get_name(&self, name: Sym) -> Option<Dbref> {
        self.names.get(&name).copied()
    }

    /// Resolves a name string without touching reference counts.
    pub fn resolve_name_str(&self, name: &str) -> Option<Dbref> {
        let id = ident::lookup(name)?;
        self.get_name(id)
    }

    /// Writes every dirty image and the name table back; atomically
    /// updates the index.
    pub fn sync(&mut self) -> DbResult<()> {
        self.cache.sync()?;
        self.save_names()
    }

    /// Full binary dump: sync, then compact the canonical files.
    pub fn dump(&mut self) -> DbResult<()> {
        self.cache.dump()?;
        self.save_names()?;
        info!("binary dump complete");
        Ok(())
    }

    /// Sync, then copy the canonical files under the backup prefix.
    pub fn backup(&mut self) -> DbResult<()> {
        self.sync()?;
        let backup_dir = self.backup_dir.clone();
        self.cache.store_mut().backup(&backup_dir)?;
        info!(dir = %backup_dir.display(), "binary backup complete");
        Ok(())
    }

    fn save_names(&mut self) -> DbResult<()> {
        let names: Vec<(String, i64)> = self
            .names
            .iter()
            .map(|(&name, &dbref)| (ident::name(name), dbref.0))
            .collect();
        self.cache.store().save_names(&names)
    }

    pub(crate) fn textdump_path(&self) -> PathBuf {
        self.textdump_path.clone()
    }

    /// Every existing dbref, in ascending order. Syncs first so the store
    /// index is complete.
    pub fn all_dbrefs(&mut self) -> DbResult<Vec<Dbref>> {
        self.cache.sync()?;
        let mut dbrefs: Vec<i64> = self.cache.store().dbrefs().collect();
        dbrefs.sort_unstable();
        Ok(dbrefs.into_iter().map(Dbref).collect())
    }

    /// Packed image size of an object.
    pub fn object_size(&mut self, dbref: Dbref) -> DbResult<Option<usize>> {
        match self.fetch(dbref)? {
            Some(obj) => Ok(Some(dbpack::packed_size(obj)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::Op;
    use tempfile::TempDir;

    fn open_db() -> (Db, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.dirs.binary = dir.path().join("binary");
        config.dirs.backup = dir.path().join("backup");
        config.dirs.textdump = dir.path().join("textdump");
        (Db::open(&config).expect("open"), dir)
    }

    fn dbrefs(list: &List) -> Vec<i64> {
        list.iter()
            .map(|v| v.as_dbref().expect("dbref list").0)
            .collect()
    }

    fn method_returning_zero(object: Dbref, overridable: bool) -> Method {
        Method::new(
            None,
            object,
            Vec::new(),
            None,
            Vec::new(),
            vec![Op::Zero.number(), Op::ReturnExpr.number()],
            Vec::new(),
            overridable,
        )
    }

    #[test]
    fn create_links_children_both_ways() {
        let (mut db, _dir) = open_db();
        let root = db.create(List::new()).expect("create root");
        let child = db
            .create(List::from_vec(vec![Value::Dbref(root)]))
            .expect("create child");
        assert_eq!(child.0, root.0 + 1);
        let root_obj = db.fetch(root).expect("fetch").expect("exists");
        assert_eq!(dbrefs(&root_obj.children), vec![child.0]);
        assert!(db.has_ancestor(child, root).expect("walk"));
        assert!(!db.has_ancestor(root, child).expect("walk"));
    }

    #[test]
    fn change_parents_rejects_cycles_and_relinks() {
        let (mut db, _dir) = open_db();
        let a = db.create(List::new()).expect("a");
        let b = db
            .create(List::from_vec(vec![Value::Dbref(a)]))
            .expect("b");
        let c = db
            .create(List::from_vec(vec![Value::Dbref(a)]))
            .expect("c");

        // a cannot become a child of its descendant b.
        let result = db
            .change_parents(a, &List::from_vec(vec![Value::Dbref(b)]))
            .expect("validate");
        assert_eq!(result, Err(0));

        // Moving c under b unlinks it from a.
        db.change_parents(c, &List::from_vec(vec![Value::Dbref(b)]))
            .expect("change")
            .expect("valid");
        let a_obj = db.fetch(a).expect("fetch").expect("exists");
        assert_eq!(dbrefs(&a_obj.children), vec![b.0]);
        let b_obj = db.fetch(b).expect("fetch").expect("exists");
        assert_eq!(dbrefs(&b_obj.children), vec![c.0]);
        let anc = db.ancestors(c).expect("ancestors");
        assert_eq!(dbrefs(&anc), vec![a.0, b.0, c.0]);
    }

    #[test]
    fn destruction_reparents_orphans() {
        let (mut db, _dir) = open_db();
        let top = db.create(List::new()).expect("top");
        let middle = db
            .create(List::from_vec(vec![Value::Dbref(top)]))
            .expect("middle");
        let leaf = db
            .create(List::from_vec(vec![Value::Dbref(middle)]))
            .expect("leaf");

        db.destroy(middle).expect("destroy");
        assert!(!db.check(middle));
        let leaf_obj = db.fetch(leaf).expect("fetch").expect("exists");
        assert_eq!(dbrefs(&leaf_obj.parents), vec![top.0]);
        let top_obj = db.fetch(top).expect("fetch").expect("exists");
        assert_eq!(dbrefs(&top_obj.children), vec![leaf.0]);
        assert!(db.take_pending_boots().contains(&middle));
    }

    #[test]
    fn destruction_waits_for_pins() {
        let (mut db, _dir) = open_db();
        let doomed = db.create(List::new()).expect("create");
        db.pin(doomed).expect("pin");
        db.destroy(doomed).expect("destroy");
        // Still resident while pinned.
        assert!(!db.check(doomed));
        assert_eq!(db.pins(doomed), 1);
        db.unpin(doomed).expect("unpin");
        assert_eq!(db.pins(doomed), 0);
        assert!(!db.check(doomed));
    }

    #[test]
    fn resolution_prefers_local_unless_blocked() {
        let (mut db, _dir) = open_db();
        let m = ident::get("m");
        let a = db.create(List::new()).expect("a");
        let b = db.create(List::new()).expect("b");
        let c = db
            .create(List::from_vec(vec![Value::Dbref(a), Value::Dbref(b)]))
            .expect("c");

        // a defines m overridable; b defines m non-overridable: b wins.
        db.add_method(a, m, method_returning_zero(a, true))
            .expect("add");
        db.add_method(b, m, method_returning_zero(b, false))
            .expect("add");
        let (_, definer) = db.find_method(c, m).expect("find").expect("found");
        assert_eq!(definer, b);

        // Removing b.m leaves a.m; the stamped cache must notice.
        assert!(db.del_method(b, m).expect("del"));
        let (_, definer) = db.find_method(c, m).expect("find").expect("found");
        assert_eq!(definer, a);

        // A local definition on c wins over overridable a.m.
        db.add_method(c, m, method_returning_zero(c, true))
            .expect("add");
        let (_, definer) = db.find_method(c, m).expect("find").expect("found");
        assert_eq!(definer, c);

        // find_next resolves past c.
        let (_, definer) = db
            .find_next_method(c, m, c)
            .expect("find next")
            .expect("found");
        assert_eq!(definer, a);
        ident::discard(m);
    }

    #[test]
    fn vars_fall_back_to_defining_class() {
        let (mut db, _dir) = open_db();
        let hp = ident::get("hp");
        let class = db.create(List::new()).expect("class");
        let inst = db
            .create(List::from_vec(vec![Value::Dbref(class)]))
            .expect("inst");

        db.fetch(class)
            .expect("fetch")
            .expect("exists")
            .add_param(hp);
        assert!(db
            .assign_var(class, class, hp, Value::Int(100))
            .expect("assign"));

        // Unassigned on the instance: defining class's value.
        assert_eq!(
            db.retrieve_var(inst, class, hp).expect("retrieve"),
            Some(Value::Int(100))
        );
        assert!(db.assign_var(inst, class, hp, Value::Int(40)).expect("ok"));
        assert_eq!(
            db.retrieve_var(inst, class, hp).expect("retrieve"),
            Some(Value::Int(40))
        );

        // Undeclared name.
        let missing = ident::get("missing");
        assert_eq!(db.retrieve_var(inst, class, missing).expect("ok"), None);
        assert!(!db
            .assign_var(inst, class, missing, Value::Int(1))
            .expect("ok"));
        ident::discard(hp);
        ident::discard(missing);
    }

    #[test]
    fn images_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.dirs.binary = dir.path().join("binary");
        config.dirs.backup = dir.path().join("backup");

        let hp = ident::get("hp");
        let m = ident::get("m");
        let (class, inst);
        {
            let mut db = Db::open(&config).expect("open");
            class = db.create(List::new()).expect("class");
            inst = db
                .create(List::from_vec(vec![Value::Dbref(class)]))
                .expect("inst");
            db.fetch(class).expect("f").expect("e").add_param(hp);
            db.assign_var(class, class, hp, Value::Str("full".into()))
                .expect("assign");
            db.add_method(class, m, method_returning_zero(class, true))
                .expect("add");
            db.set_name(ident::ids().name, class);
            db.dump().expect("dump");
        }

        let mut db = Db::open(&config).expect("reopen");
        assert_eq!(db.db_top(), inst.0 + 1);
        assert_eq!(
            db.retrieve_var(inst, class, hp).expect("retrieve"),
            Some(Value::Str("full".into()))
        );
        let (method, definer) = db.find_method(inst, m).expect("find").expect("found");
        assert_eq!(definer, class);
        assert_eq!(method.code, vec![Op::Zero.number(), Op::ReturnExpr.number()]);
        assert_eq!(db.get_name(ident::ids().name), Some(class));
        ident::discard(hp);
        ident::discard(m);
    }
}
