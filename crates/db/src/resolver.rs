//! Method resolution: reverse depth-first traversal over the parent graph,
//! memoized by a stamp-invalidated direct-indexed cache.

use crate::error::DbResult;
use crate::method::MethodRef;
use crate::Db;
use cmm_core::ident::{self, Sym};
use cmm_core::{Dbref, Value};

pub(crate) const METHOD_CACHE_SIZE: usize = 503;

const NO_AFTER: i64 = -1;

#[derive(Default, Clone)]
struct CacheEntry {
    stamp: u64,
    dbref: i64,
    name: Option<Sym>,
    after: i64,
    loc: i64,
}

/// Memoizes `(dbref, name, after) -> defining dbref`, valid only while the
/// entry's stamp equals the current global stamp.
pub(crate) struct MethodCache {
    entries: Vec<CacheEntry>,
}

impl MethodCache {
    pub(crate) fn new() -> Self {
        MethodCache {
            entries: vec![CacheEntry::default(); METHOD_CACHE_SIZE],
        }
    }

    fn slot(dbref: Dbref, name: Sym, after: i64) -> usize {
        let mix = 10 + dbref.0 + ((name.index() as i64) << 4) + after;
        mix.rem_euclid(METHOD_CACHE_SIZE as i64) as usize
    }

    fn check(&self, stamp: u64, dbref: Dbref, name: Sym, after: i64) -> Option<Dbref> {
        let entry = &self.entries[Self::slot(dbref, name, after)];
        if entry.stamp == stamp
            && entry.dbref == dbref.0
            && entry.name == Some(name)
            && entry.after == after
            && entry.loc != -1
        {
            Some(Dbref(entry.loc))
        } else {
            None
        }
    }

    fn set(&mut self, stamp: u64, dbref: Dbref, name: Sym, after: i64, loc: Dbref) {
        let entry = &mut self.entries[Self::slot(dbref, name, after)];
        if let Some(old) = entry.name.take() {
            ident::discard(old);
        }
        *entry = CacheEntry {
            stamp,
            dbref: dbref.0,
            name: Some(ident::dup(name)),
            after,
            loc: loc.0,
        };
    }
}

struct Search {
    name: Sym,
    stop_at: i64,
    done: bool,
    found: Option<(MethodRef, Dbref)>,
}

impl Db {
    /// Resolves `name` sent to `dbref`: ancestors by reverse right-to-left
    /// depth-first traversal, the last method found winning unless a
    /// non-overridable one stops the walk, with a local definition
    /// preferred when no ancestor blocks it.
    pub fn find_method(&mut self, dbref: Dbref, name: Sym) -> DbResult<Option<(MethodRef, Dbref)>> {
        if let Some(hit) = self.method_cache_check(dbref, name, NO_AFTER)? {
            return Ok(Some(hit));
        }

        let parents = match self.fetch(dbref)? {
            Some(obj) => obj.parents.clone(),
            None => return Ok(None),
        };

        let mut found = if parents.len() == 1 {
            let parent = parents.get(0).as_dbref().expect("parents hold dbrefs");
            self.find_method(parent, name)?
        } else {
            self.search_ancestors(&parents, name, NO_AFTER)?
        };

        let blocked = found.as_ref().is_some_and(|(m, _)| !m.overridable);
        if !blocked {
            if let Some(obj) = self.fetch(dbref)? {
                if let Some(local) = obj.methods.find(name) {
                    found = Some((local, dbref));
                }
            }
        }

        if let Some((_, definer)) = &found {
            let definer = *definer;
            self.method_cache
                .set(self.stamp, dbref, name, NO_AFTER, definer);
        }
        Ok(found)
    }

    /// Like [`find_method`], but only methods strictly past `after` in the
    /// traversal count; used by the `pass` opcode.
    pub fn find_next_method(
        &mut self,
        dbref: Dbref,
        name: Sym,
        after: Dbref,
    ) -> DbResult<Option<(MethodRef, Dbref)>> {
        if let Some(hit) = self.method_cache_check(dbref, name, after.0)? {
            return Ok(Some(hit));
        }

        let parents = match self.fetch(dbref)? {
            Some(obj) => obj.parents.clone(),
            None => return Ok(None),
        };

        let found = if parents.len() == 1 {
            let parent = parents.get(0).as_dbref().expect("parents hold dbrefs");
            if dbref == after {
                self.find_method(parent, name)?
            } else {
                self.find_next_method(parent, name, after)?
            }
        } else {
            let stop_at = if dbref == after { NO_AFTER } else { after.0 };
            self.search_ancestors(&parents, name, stop_at)?
        };

        if let Some((_, definer)) = &found {
            let definer = *definer;
            self.method_cache
                .set(self.stamp, dbref, name, after.0, definer);
        }
        Ok(found)
    }

    fn method_cache_check(
        &mut self,
        dbref: Dbref,
        name: Sym,
        after: i64,
    ) -> DbResult<Option<(MethodRef, Dbref)>> {
        let Some(loc) = self.method_cache.check(self.stamp, dbref, name, after) else {
            return Ok(None);
        };
        let Some(obj) = self.fetch(loc)? else {
            return Ok(None);
        };
        Ok(obj.methods.find(name).map(|m| (m, loc)))
    }

    fn search_ancestors(
        &mut self,
        parents: &cmm_core::List,
        name: Sym,
        stop_at: i64,
    ) -> DbResult<Option<(MethodRef, Dbref)>> {
        self.cur_search += 1;
        let mut search = Search {
            name,
            stop_at,
            done: false,
            found: None,
        };
        for parent in parents.iter().rev() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            self.search_object(parent, &mut search)?;
        }
        Ok(search.found)
    }

    /// Reverse depth-first visit: ancestors before descendants, parents
    /// right to left, each object at most once per generation.
    fn search_object(&mut self, dbref: Dbref, search: &mut Search) -> DbResult<()> {
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

        for parent in parents.iter().rev() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            self.search_object(parent, search)?;
        }

        if search.done {
            return Ok(());
        }
        if dbref.0 == search.stop_at {
            search.done = true;
            return Ok(());
        }

        if let Some(obj) = self.fetch(dbref)? {
            if let Some(method) = obj.methods.find(search.name) {
                let overridable = method.overridable;
                search.found = Some((method, dbref));
                if !overridable {
                    search.done = true;
                }
            }
        }
        Ok(())
    }

    /// Ancestors of `dbref` in traversal order, the object itself last.
    pub fn ancestors(&mut self, dbref: Dbref) -> DbResult<cmm_core::List> {
        self.cur_search += 1;
        let mut backwards = Vec::new();
        self.ancestors_aux(dbref, &mut backwards)?;
        backwards.reverse();
        Ok(backwards.into_iter().map(Value::Dbref).collect())
    }

    fn ancestors_aux(&mut self, dbref: Dbref, out: &mut Vec<Dbref>) -> DbResult<()> {
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
        for parent in parents.iter().rev() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            self.ancestors_aux(parent, out)?;
        }
        out.push(dbref);
        Ok(())
    }

    /// True when `ancestor` is reachable from `dbref` along parent links
    /// (reflexively).
    pub fn has_ancestor(&mut self, dbref: Dbref, ancestor: Dbref) -> DbResult<bool> {
        if dbref == ancestor {
            return Ok(true);
        }
        self.cur_search += 1;
        self.has_ancestor_aux(dbref, ancestor)
    }

    fn has_ancestor_aux(&mut self, dbref: Dbref, ancestor: Dbref) -> DbResult<bool> {
        let parents = {
            let cur_search = self.cur_search;
            let Some(obj) = self.fetch(dbref)? else {
                return Ok(false);
            };
            if obj.search == cur_search {
                return Ok(false);
            }
            obj.search = cur_search;
            obj.dirty = true;
            obj.parents.clone()
        };
        for parent in parents.iter() {
            if parent.as_dbref() == Some(ancestor) {
                return Ok(true);
            }
        }
        for parent in parents.iter() {
            let parent = parent.as_dbref().expect("parents hold dbrefs");
            if self.has_ancestor_aux(parent, ancestor)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
