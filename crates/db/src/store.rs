//! The two-file binary backing store.
//!
//! `index` maps each dbref to an (offset, length) extent in `objects`, which
//! holds packed object images back to back. Writes append; the index is
//! rewritten atomically on sync, and a dump rewrites both files compactly
//! through temporaries. Object names persist alongside as `names`.

use crate::error::{DbError, DbResult};
use cmm_io::{Reader, Writer};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INDEX_MAGIC: &[u8] = b"CMMIX";
const NAMES_MAGIC: &[u8] = b"CMMNM";
const FORMAT_VERSION: i64 = 1;

const INDEX_FILE: &str = "index";
const DATA_FILE: &str = "objects";
const NAMES_FILE: &str = "names";

pub struct Store {
    dir: PathBuf,
    index: HashMap<i64, (u64, u64)>,
    data: File,
    data_len: u64,
    db_top: i64,
}

impl Store {
    /// Opens the store under `dir`, creating a fresh empty database when no
    /// index exists.
    pub fn open(dir: &Path) -> DbResult<Store> {
        fs::create_dir_all(dir).map_err(|e| DbError::file(dir, e))?;
        let index_path = dir.join(INDEX_FILE);
        let data_path = dir.join(DATA_FILE);

        let (index, db_top) = if index_path.exists() {
            read_index(&index_path)?
        } else {
            info!(dir = %dir.display(), "creating fresh object store");
            (HashMap::new(), 0)
        };

        let data = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&data_path)
            .map_err(|e| DbError::file(&data_path, e))?;
        let data_len = data
            .metadata()
            .map_err(|e| DbError::file(&data_path, e))?
            .len();

        Ok(Store {
            dir: dir.to_owned(),
            index,
            data,
            data_len,
            db_top,
        })
    }

    /// Next dbref to allocate.
    pub fn db_top(&self) -> i64 {
        self.db_top
    }

    pub fn set_db_top(&mut self, db_top: i64) {
        if db_top > self.db_top {
            self.db_top = db_top;
        }
    }

    /// Index probe; does not touch the data file.
    pub fn contains(&self, dbref: i64) -> bool {
        self.index.contains_key(&dbref)
    }

    pub fn dbrefs(&self) -> impl Iterator<Item = i64> + '_ {
        self.index.keys().copied()
    }

    /// Reads the packed image of `dbref`.
    pub fn read(&mut self, dbref: i64) -> DbResult<Vec<u8>> {
        let &(offset, len) = self.index.get(&dbref).ok_or(DbError::Missing { dbref })?;
        let mut image = vec![0u8; len as usize];
        self.data
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.data.read_exact(&mut image))
            .map_err(|e| DbError::file(self.dir.join(DATA_FILE), e))?;
        Ok(image)
    }

    /// Appends a fresh image for `dbref` and points the index at it. The
    /// superseded extent is reclaimed by the next dump.
    pub fn write(&mut self, dbref: i64, image: &[u8]) -> DbResult<()> {
        self.data
            .seek(SeekFrom::End(0))
            .and_then(|_| self.data.write_all(image))
            .map_err(|e| DbError::file(self.dir.join(DATA_FILE), e))?;
        self.index
            .insert(dbref, (self.data_len, image.len() as u64));
        self.data_len += image.len() as u64;
        Ok(())
    }

    /// Drops `dbref` from the index.
    pub fn remove(&mut self, dbref: i64) {
        self.index.remove(&dbref);
    }

    /// Atomically rewrites the index file to match memory.
    pub fn sync_index(&mut self) -> DbResult<()> {
        self.data
            .sync_data()
            .map_err(|e| DbError::file(self.dir.join(DATA_FILE), e))?;
        let mut w = Writer::new();
        w.write_bytes(INDEX_MAGIC);
        w.write_int(FORMAT_VERSION);
        w.write_int(self.db_top);
        w.write_int(self.index.len() as i64);
        let mut entries: Vec<_> = self.index.iter().collect();
        entries.sort();
        for (&dbref, &(offset, len)) in entries {
            w.write_int(dbref);
            w.write_int(offset as i64);
            w.write_int(len as i64);
        }
        write_atomically(&self.dir.join(INDEX_FILE), w.as_bytes())
    }

    /// Rewrites the data file compactly, dropping superseded extents, and
    /// fsync-renames both files to their canonical names.
    pub fn compact(&mut self) -> DbResult<()> {
        let tmp_path = self.dir.join(format!("{DATA_FILE}.tmp"));
        let mut tmp = File::create(&tmp_path).map_err(|e| DbError::file(&tmp_path, e))?;

        let mut dbrefs: Vec<i64> = self.index.keys().copied().collect();
        dbrefs.sort_unstable();
        let mut new_index = HashMap::with_capacity(self.index.len());
        let mut at = 0u64;
        for dbref in dbrefs {
            let image = self.read(dbref)?;
            tmp.write_all(&image)
                .map_err(|e| DbError::file(&tmp_path, e))?;
            new_index.insert(dbref, (at, image.len() as u64));
            at += image.len() as u64;
        }
        tmp.sync_all().map_err(|e| DbError::file(&tmp_path, e))?;
        drop(tmp);

        let data_path = self.dir.join(DATA_FILE);
        fs::rename(&tmp_path, &data_path).map_err(|e| DbError::file(&data_path, e))?;
        self.data = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&data_path)
            .map_err(|e| DbError::file(&data_path, e))?;
        self.data_len = at;
        self.index = new_index;
        self.sync_index()?;
        debug!(objects = self.index.len(), bytes = at, "store compacted");
        Ok(())
    }

    /// Copies the canonical files under `backup_dir`.
    pub fn backup(&mut self, backup_dir: &Path) -> DbResult<()> {
        fs::create_dir_all(backup_dir).map_err(|e| DbError::file(backup_dir, e))?;
        for name in [INDEX_FILE, DATA_FILE, NAMES_FILE] {
            let from = self.dir.join(name);
            if from.exists() {
                let to = backup_dir.join(name);
                fs::copy(&from, &to).map_err(|e| DbError::file(&to, e))?;
            }
        }
        Ok(())
    }

    /// Loads the persisted name bindings.
    pub fn load_names(&self) -> DbResult<Vec<(String, i64)>> {
        let path = self.dir.join(NAMES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).map_err(|e| DbError::file(&path, e))?;
        let mut r = Reader::new(&bytes);
        if r.read_bytes(NAMES_MAGIC.len(), "names magic")? != NAMES_MAGIC {
            return Err(DbError::format("bad names-file magic"));
        }
        let version = r.read_int()?;
        if version != FORMAT_VERSION {
            return Err(DbError::format(format!(
                "unsupported names-file version {version}"
            )));
        }
        let count = r.read_len(1 << 24, "name count")?;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r
                .read_str("name")?
                .ok_or_else(|| DbError::format("blank name binding"))?;
            let dbref = r.read_int()?;
            names.push((name, dbref));
        }
        Ok(names)
    }

    /// Atomically rewrites the name bindings.
    pub fn save_names(&self, names: &[(String, i64)]) -> DbResult<()> {
        let mut w = Writer::new();
        w.write_bytes(NAMES_MAGIC);
        w.write_int(FORMAT_VERSION);
        w.write_int(names.len() as i64);
        for (name, dbref) in names {
            w.write_str(Some(name));
            w.write_int(*dbref);
        }
        write_atomically(&self.dir.join(NAMES_FILE), w.as_bytes())
    }
}

fn read_index(path: &Path) -> DbResult<(HashMap<i64, (u64, u64)>, i64)> {
    let bytes = fs::read(path).map_err(|e| DbError::file(path, e))?;
    let mut r = Reader::new(&bytes);
    if r.read_bytes(INDEX_MAGIC.len(), "index magic")? != INDEX_MAGIC {
        return Err(DbError::format("bad index magic"));
    }
    let version = r.read_int()?;
    if version != FORMAT_VERSION {
        return Err(DbError::format(format!(
            "unsupported index version {version}"
        )));
    }
    let db_top = r.read_int()?;
    let count = r.read_len(1 << 28, "index entry count")?;
    let mut index = HashMap::with_capacity(count);
    for _ in 0..count {
        let dbref = r.read_int()?;
        let offset = r.read_int()?;
        let len = r.read_int()?;
        if offset < 0 || len < 0 {
            return Err(DbError::format(format!("bad extent for #{dbref}")));
        }
        index.insert(dbref, (offset as u64, len as u64));
    }
    Ok((index, db_top))
}

fn write_atomically(path: &Path, bytes: &[u8]) -> DbResult<()> {
    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path).map_err(|e| DbError::file(&tmp_path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.sync_all())
        .map_err(|e| DbError::file(&tmp_path, e))?;
    drop(tmp);
    fs::rename(&tmp_path, path).map_err(|e| DbError::file(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let mut store = Store::open(dir.path()).expect("open");
            store.write(3, b"threeish").expect("write");
            store.write(7, b"sevenish").expect("write");
            store.set_db_top(8);
            store.sync_index().expect("sync");
        }
        let mut store = Store::open(dir.path()).expect("reopen");
        assert_eq!(store.db_top(), 8);
        assert!(store.contains(3));
        assert!(!store.contains(4));
        assert_eq!(store.read(7).expect("read"), b"sevenish");
    }

    #[test]
    fn rewrites_supersede_and_compact_reclaims() {
        let dir = tempdir().expect("tempdir");
        let mut store = Store::open(dir.path()).expect("open");
        store.write(1, b"old-old-old").expect("write");
        store.write(1, b"new").expect("write");
        store.sync_index().expect("sync");
        assert_eq!(store.read(1).expect("read"), b"new");

        let before = fs::metadata(dir.path().join(DATA_FILE)).expect("meta").len();
        store.compact().expect("compact");
        let after = fs::metadata(dir.path().join(DATA_FILE)).expect("meta").len();
        assert!(after < before);
        assert_eq!(store.read(1).expect("read"), b"new");
    }

    #[test]
    fn names_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open");
        store
            .save_names(&[("system".to_owned(), 0), ("root".to_owned(), 1)])
            .expect("save");
        let names = store.load_names().expect("load");
        assert_eq!(names, vec![("system".to_owned(), 0), ("root".to_owned(), 1)]);
    }

    #[test]
    fn backup_copies_canonical_files() {
        let dir = tempdir().expect("tempdir");
        let mut store = Store::open(dir.path()).expect("open");
        store.write(1, b"image").expect("write");
        store.sync_index().expect("sync");
        let backup = dir.path().join("backup");
        store.backup(&backup).expect("backup");
        assert!(backup.join(INDEX_FILE).exists());
        assert!(backup.join(DATA_FILE).exists());
    }
}
