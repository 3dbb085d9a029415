//! The object cache: a fixed-geometry chained table of in-memory object
//! images over the backing store.
//!
//! A dbref hashes to a chain by `dbref mod width`; each chain holds up to
//! `depth` holders. A holder is pinned while frames or traversals hold it;
//! only unpinned holders are eviction candidates, and a dirty image is
//! always written back before its holder is reused.

use crate::dbpack;
use crate::error::DbResult;
use crate::object::Object;
use crate::store::Store;
use cmm_core::Dbref;
use tracing::{trace, warn};

struct Holder {
    obj: Object,
    pins: usize,
    last_use: u64,
}

pub struct Cache {
    chains: Vec<Vec<Holder>>,
    depth: usize,
    store: Store,
    tick: u64,
}

impl Cache {
    pub fn new(store: Store, width: usize, depth: usize) -> Cache {
        Cache {
            chains: (0..width.max(1)).map(|_| Vec::new()).collect(),
            depth: depth.max(1),
            store,
            tick: 0,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    fn chain_of(&self, dbref: Dbref) -> usize {
        (dbref.0.rem_euclid(self.chains.len() as i64)) as usize
    }

    fn position(&self, dbref: Dbref) -> Option<(usize, usize)> {
        let chain = self.chain_of(dbref);
        self.chains[chain]
            .iter()
            .position(|h| h.obj.dbref == dbref)
            .map(|at| (chain, at))
    }

    /// Tests existence without faulting the image in. Dead residents do not
    /// exist.
    pub fn check(&self, dbref: Dbref) -> bool {
        match self.position(dbref) {
            Some((chain, at)) => !self.chains[chain][at].obj.dead,
            None => self.store.contains(dbref.0),
        }
    }

    /// Mutable access to the object image, faulting from disk on miss.
    /// Returns `None` for an absent dbref (the operator layer raises
    /// `~objnf`). A dead-but-resident object is still returned: holders
    /// keep running its methods until the final release completes the
    /// destruction.
    pub fn fetch(&mut self, dbref: Dbref) -> DbResult<Option<&mut Object>> {
        self.tick += 1;
        let tick = self.tick;
        if let Some((chain, at)) = self.position(dbref) {
            let holder = &mut self.chains[chain][at];
            holder.last_use = tick;
            return Ok(Some(&mut holder.obj));
        }

        if !self.store.contains(dbref.0) {
            return Ok(None);
        }
        let image = self.store.read(dbref.0)?;
        let obj = dbpack::unpack_object(dbref, &image)?;
        let (chain, at) = self.install_holder(obj)?;
        Ok(Some(&mut self.chains[chain][at].obj))
    }

    /// Installs a freshly created object.
    pub fn install(&mut self, obj: Object) -> DbResult<()> {
        self.install_holder(obj)?;
        Ok(())
    }

    fn install_holder(&mut self, obj: Object) -> DbResult<(usize, usize)> {
        let chain = self.chain_of(obj.dbref);
        if self.chains[chain].len() >= self.depth {
            self.evict_from(chain)?;
        }
        self.tick += 1;
        let holder = Holder {
            obj,
            pins: 0,
            last_use: self.tick,
        };
        self.chains[chain].push(holder);
        Ok((chain, self.chains[chain].len() - 1))
    }

    /// Writes back and drops the least-recently-used unpinned holder of
    /// `chain`. When every holder is pinned the chain is allowed to
    /// overflow.
    fn evict_from(&mut self, chain: usize) -> DbResult<()> {
        let victim = self.chains[chain]
            .iter()
            .enumerate()
            .filter(|(_, h)| h.pins == 0)
            .min_by_key(|(_, h)| h.last_use)
            .map(|(i, _)| i);
        let Some(at) = victim else {
            warn!(chain, "cache chain overflow: every holder is pinned");
            return Ok(());
        };
        let holder = &mut self.chains[chain][at];
        if holder.obj.dirty && !holder.obj.dead {
            let image = dbpack::pack_object(&holder.obj)?;
            self.store.write(holder.obj.dbref.0, &image)?;
            holder.obj.dirty = false;
        }
        trace!(dbref = holder.obj.dbref.0, "evicting");
        self.chains[chain].remove(at);
        Ok(())
    }

    /// Pins `dbref` resident. The image must already be cached or on disk.
    pub fn pin(&mut self, dbref: Dbref) -> DbResult<()> {
        if self.position(dbref).is_none() {
            self.fetch(dbref)?;
        }
        if let Some((chain, at)) = self.position(dbref) {
            self.chains[chain][at].pins += 1;
        }
        Ok(())
    }

    /// Releases one pin. Returns true when the object is dead and this was
    /// the final pin, meaning the caller must complete its destruction.
    pub fn unpin(&mut self, dbref: Dbref) -> bool {
        if let Some((chain, at)) = self.position(dbref) {
            let holder = &mut self.chains[chain][at];
            if holder.pins > 0 {
                holder.pins -= 1;
            }
            return holder.obj.dead && holder.pins == 0;
        }
        false
    }

    pub fn pins(&self, dbref: Dbref) -> usize {
        match self.position(dbref) {
            Some((chain, at)) => self.chains[chain][at].pins,
            None => 0,
        }
    }

    /// Drops `dbref` from the cache and the store index.
    pub fn remove(&mut self, dbref: Dbref) {
        if let Some((chain, at)) = self.position(dbref) {
            self.chains[chain].remove(at);
        }
        self.store.remove(dbref.0);
    }

    /// Writes every dirty image back and atomically rewrites the index.
    pub fn sync(&mut self) -> DbResult<()> {
        for chain in &mut self.chains {
            for holder in chain.iter_mut() {
                if holder.obj.dirty && !holder.obj.dead {
                    let image = dbpack::pack_object(&holder.obj)?;
                    self.store.write(holder.obj.dbref.0, &image)?;
                    holder.obj.dirty = false;
                }
            }
        }
        self.store.sync_index()
    }

    /// Sync, then rewrite the canonical files compactly.
    pub fn dump(&mut self) -> DbResult<()> {
        self.sync()?;
        self.store.compact()
    }

    #[cfg(test)]
    pub(crate) fn resident(&self, dbref: Dbref) -> bool {
        self.position(dbref).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::{ident, List, Value};
    use tempfile::tempdir;

    fn cache(width: usize, depth: usize) -> (Cache, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("store");
        (Cache::new(store, width, depth), dir)
    }

    fn blank(dbref: i64) -> Object {
        Object::new(Dbref(dbref), List::new())
    }

    #[test]
    fn eviction_writes_back_dirty_images() {
        let (mut cache, _dir) = cache(1, 2);
        let name = ident::get("flag");
        for n in 0..3 {
            let mut obj = blank(n);
            obj.add_param(name);
            obj.assign_var(Dbref(n), name, Value::Int(n));
            cache.install(obj).expect("install");
        }
        // Chain depth is 2: object 0 was evicted and written back.
        assert!(!cache.resident(Dbref(0)));
        let obj = cache.fetch(Dbref(0)).expect("fetch").expect("exists");
        assert_eq!(obj.local_var(Dbref(0), name), Some(&Value::Int(0)));
        ident::discard(name);
    }

    #[test]
    fn pinned_holders_are_not_evicted() {
        let (mut cache, _dir) = cache(1, 2);
        cache.install(blank(0)).expect("install");
        cache.install(blank(1)).expect("install");
        cache.pin(Dbref(0)).expect("pin");
        cache.pin(Dbref(1)).expect("pin");
        cache.install(blank(2)).expect("install overflows");
        assert!(cache.resident(Dbref(0)));
        assert!(cache.resident(Dbref(1)));
        assert!(cache.resident(Dbref(2)));
        assert!(!cache.unpin(Dbref(0)));
        cache.install(blank(3)).expect("install evicts 0");
        assert!(!cache.resident(Dbref(0)));
        assert!(cache.resident(Dbref(1)));
    }

    #[test]
    fn check_probes_without_faulting() {
        let (mut cache, _dir) = cache(3, 3);
        cache.install(blank(5)).expect("install");
        cache.sync().expect("sync");
        // Force out of memory.
        cache.remove(Dbref(5));
        assert!(!cache.resident(Dbref(5)));
        // Store index still knows nothing of 5 after remove.
        assert!(!cache.check(Dbref(5)));

        cache.install(blank(6)).expect("install");
        cache.sync().expect("sync");
        assert!(cache.check(Dbref(6)));
    }

    #[test]
    fn final_unpin_of_dead_object_reports_destroyable() {
        let (mut cache, _dir) = cache(2, 2);
        cache.install(blank(4)).expect("install");
        cache.pin(Dbref(4)).expect("pin");
        cache
            .fetch(Dbref(4))
            .expect("fetch")
            .expect("exists")
            .dead = true;
        assert!(cache.unpin(Dbref(4)));
    }
}
