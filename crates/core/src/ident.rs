//! The process-wide identifier table.
//!
//! Identifiers intern name strings to small ids. Each id carries a reference
//! count; the name storage is released when the count reaches zero. A fixed
//! set of well-known ids is seeded at startup and pinned for the life of the
//! process.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// An interned identifier id.
///
/// `Sym` itself is a plain index; reference counting is explicit through
/// [`dup`] and [`discard`]. Holders that store a `Sym` (values, objects,
/// method tables) are responsible for pairing every copy with a discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);

impl Sym {
    /// Raw table index, used by direct-indexed caches.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&name(*self))
    }
}

struct Entry {
    name: String,
    refs: usize,
}

#[derive(Default)]
struct Table {
    entries: Vec<Option<Entry>>,
    index: HashMap<String, u32>,
    blanks: Vec<u32>,
}

impl Table {
    fn get(&mut self, s: &str) -> Sym {
        if let Some(&id) = self.index.get(s) {
            let entry = self.entries[id as usize]
                .as_mut()
                .expect("indexed identifier must be live");
            entry.refs += 1;
            return Sym(id);
        }
        let entry = Entry {
            name: s.to_owned(),
            refs: 1,
        };
        let id = match self.blanks.pop() {
            Some(id) => {
                self.entries[id as usize] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        };
        self.index.insert(s.to_owned(), id);
        Sym(id)
    }

    fn dup(&mut self, id: Sym) {
        let entry = self.entries[id.0 as usize]
            .as_mut()
            .expect("dup of a freed identifier");
        entry.refs += 1;
    }

    fn discard(&mut self, id: Sym) {
        let slot = &mut self.entries[id.0 as usize];
        let entry = slot.as_mut().expect("discard of a freed identifier");
        entry.refs -= 1;
        if entry.refs == 0 {
            self.index.remove(&entry.name);
            *slot = None;
            self.blanks.push(id.0);
        }
    }
}

static TABLE: Lazy<Mutex<Table>> = Lazy::new(|| Mutex::new(Table::default()));

/// Interns `s`, incrementing its reference count.
pub fn get(s: &str) -> Sym {
    TABLE.lock().expect("ident table poisoned").get(s)
}

/// Increments the reference count of `id` and returns it.
pub fn dup(id: Sym) -> Sym {
    TABLE.lock().expect("ident table poisoned").dup(id);
    id
}

/// Decrements the reference count of `id`, freeing the name at zero.
pub fn discard(id: Sym) {
    TABLE.lock().expect("ident table poisoned").discard(id);
}

/// Returns the name bound to `id`.
pub fn name(id: Sym) -> String {
    let table = TABLE.lock().expect("ident table poisoned");
    table.entries[id.0 as usize]
        .as_ref()
        .expect("name of a freed identifier")
        .name
        .clone()
}

/// Current reference count of `id`, or zero if freed.
pub fn refs(id: Sym) -> usize {
    let table = TABLE.lock().expect("ident table poisoned");
    table.entries[id.0 as usize].as_ref().map_or(0, |e| e.refs)
}

/// Looks up an already-interned name without touching reference counts.
pub fn lookup(s: &str) -> Option<Sym> {
    let table = TABLE.lock().expect("ident table poisoned");
    table.index.get(s).map(|&id| Sym(id))
}

macro_rules! well_known {
    ($($field:ident => $name:expr),+ $(,)?) => {
        /// The well-known identifier ids, seeded once per process.
        #[allow(missing_docs)]
        pub struct WellKnown {
            $(pub $field: Sym),+
        }

        impl WellKnown {
            fn seed() -> Self {
                Self {
                    $($field: get($name)),+
                }
            }
        }
    };
}

well_known! {
    perm => "perm",
    type_ => "type",
    div => "div",
    integer => "integer",
    string => "string",
    dbref => "dbref",
    list => "list",
    symbol => "symbol",
    error => "error",
    frob => "frob",
    methodnf => "methodnf",
    methoderr => "methoderr",
    parent => "parent",
    maxdepth => "maxdepth",
    objnf => "objnf",
    numargs => "numargs",
    range => "range",
    paramnf => "paramnf",
    file => "file",
    ticks => "ticks",
    connect => "connect",
    disconnect => "disconnect",
    parse => "parse",
    startup => "startup",
    socket => "socket",
    bind => "bind",
    servnf => "servnf",
    paramexists => "paramexists",
    dictionary => "dictionary",
    keynf => "keynf",
    address => "address",
    refused => "refused",
    net => "net",
    timeout => "timeout",
    other => "other",
    failed => "failed",
    heartbeat => "heartbeat",
    regexp => "regexp",
    buffer => "buffer",
    namenf => "namenf",
    salt => "salt",
    function => "function",
    opcode => "opcode",
    method => "method",
    interpreter => "interpreter",
    catch => "catch",
    transmit => "transmit",
    name => "name",
}

static IDS: Lazy<WellKnown> = Lazy::new(WellKnown::seed);

/// The well-known ids. First use seeds the table.
pub fn ids() -> &'static WellKnown {
    &IDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = get("parent-graph-test");
        let b = get("parent-graph-test");
        assert_eq!(a, b);
        assert_eq!(refs(a), 2);
        discard(a);
        discard(b);
        assert_eq!(refs(a), 0);
    }

    #[test]
    fn freed_names_can_be_reinterned() {
        let a = get("ephemeral-test-name");
        discard(a);
        assert_eq!(refs(a), 0);
        let b = get("ephemeral-test-name");
        assert_eq!(name(b), "ephemeral-test-name");
        discard(b);
    }

    #[test]
    fn well_known_ids_are_pinned() {
        let ids = ids();
        assert_eq!(name(ids.methodnf), "methodnf");
        assert_eq!(name(ids.type_), "type");
        assert!(refs(ids.perm) >= 1);
        // The same name interned again is the same id.
        let perm = get("perm");
        assert_eq!(perm, ids.perm);
        discard(perm);
    }
}
