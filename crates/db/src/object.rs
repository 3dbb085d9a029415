//! Persistent objects: parent links, variable and method tables, and the
//! per-object string and identifier pools.

use crate::method::{Method, MethodRef};
use cmm_core::ident::{self, Sym};
use cmm_core::string::hash_str;
use cmm_core::{ArgType, CmmString, Dbref, List, Op, Value};
use std::rc::Rc;

const TABLE_STARTING_SIZE: usize = 7;

/// A variable slot: owned by `class`, holding one identifier reference on
/// `name`.
#[derive(Debug)]
pub struct Var {
    pub name: Sym,
    pub class: Dbref,
    pub value: Value,
}

impl Drop for Var {
    fn drop(&mut self) {
        ident::discard(self.name);
    }
}

#[derive(Debug)]
pub(crate) struct VarSlot {
    pub(crate) var: Option<Var>,
    pub(crate) next: i64,
}

/// Hash-threaded variable table: `hashtab[h]` heads a bucket chain linked
/// through `slots[i].next`; free slots thread from `blanks`.
#[derive(Debug)]
pub struct VarTable {
    pub(crate) slots: Vec<VarSlot>,
    pub(crate) hashtab: Vec<i64>,
    pub(crate) blanks: i64,
}

impl VarTable {
    pub fn new() -> Self {
        Self::with_size(TABLE_STARTING_SIZE)
    }

    pub(crate) fn with_size(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        for i in 0..size {
            slots.push(VarSlot {
                var: None,
                next: if i + 1 < size { i as i64 + 1 } else { -1 },
            });
        }
        VarTable {
            slots,
            hashtab: vec![-1; size],
            blanks: 0,
        }
    }

    fn bucket(&self, name: Sym) -> usize {
        (hash_str(&ident::name(name)) % self.slots.len() as u64) as usize
    }

    fn find_index(&self, class: Dbref, name: Sym) -> Option<usize> {
        let mut ind = self.hashtab[self.bucket(name)];
        while ind != -1 {
            let slot = &self.slots[ind as usize];
            if let Some(var) = &slot.var {
                if var.name == name && var.class == class {
                    return Some(ind as usize);
                }
            }
            ind = slot.next;
        }
        None
    }

    pub fn find(&self, class: Dbref, name: Sym) -> Option<&Var> {
        self.find_index(class, name)
            .and_then(|i| self.slots[i].var.as_ref())
    }

    pub fn find_mut(&mut self, class: Dbref, name: Sym) -> Option<&mut Var> {
        self.find_index(class, name)
            .and_then(|i| self.slots[i].var.as_mut())
    }

    /// Adds a slot for `(class, name)`, which must not already exist. Takes
    /// a new identifier reference on `name`; the value starts as zero.
    pub fn create(&mut self, class: Dbref, name: Sym) -> &mut Var {
        if self.blanks == -1 {
            self.grow();
        }
        let ind = self.blanks as usize;
        self.blanks = self.slots[ind].next;

        self.slots[ind].var = Some(Var {
            name: ident::dup(name),
            class,
            value: Value::Int(0),
        });
        let bucket = self.bucket(name);
        self.slots[ind].next = self.hashtab[bucket];
        self.hashtab[bucket] = ind as i64;
        self.slots[ind].var.as_mut().expect("slot was just filled")
    }

    /// Removes the `(class, name)` slot, returning false when absent.
    pub fn remove(&mut self, class: Dbref, name: Sym) -> bool {
        let bucket = self.bucket(name);
        let mut prev: Option<usize> = None;
        let mut ind = self.hashtab[bucket];
        while ind != -1 {
            let i = ind as usize;
            let matched = self.slots[i]
                .var
                .as_ref()
                .is_some_and(|var| var.name == name && var.class == class);
            if matched {
                let next = self.slots[i].next;
                match prev {
                    Some(p) => self.slots[p].next = next,
                    None => self.hashtab[bucket] = next,
                }
                self.slots[i].var = None;
                self.slots[i].next = self.blanks;
                self.blanks = i as i64;
                return true;
            }
            prev = Some(i);
            ind = self.slots[i].next;
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.slots.iter().filter_map(|slot| slot.var.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn grow(&mut self) {
        let new_size = self.slots.len() * 2 + 1;
        for i in self.slots.len()..new_size {
            self.slots.push(VarSlot {
                var: None,
                next: if i + 1 < new_size { i as i64 + 1 } else { -1 },
            });
        }
        self.blanks = (new_size / 2) as i64;
        self.rethread();
    }

    /// Rebuilds the bucket chains for the occupied slots.
    pub(crate) fn rethread(&mut self) {
        let size = self.slots.len();
        self.hashtab = vec![-1; size];
        for i in 0..size {
            if let Some(var) = &self.slots[i].var {
                let bucket = (hash_str(&ident::name(var.name)) % size as u64) as usize;
                self.slots[i].next = self.hashtab[bucket];
                self.hashtab[bucket] = i as i64;
            }
        }
    }
}

impl Default for VarTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub(crate) struct MethodSlot {
    pub(crate) method: Option<MethodRef>,
    pub(crate) next: i64,
}

/// Hash-threaded method table, keyed by method name.
#[derive(Debug)]
pub struct MethodTable {
    pub(crate) slots: Vec<MethodSlot>,
    pub(crate) hashtab: Vec<i64>,
    pub(crate) blanks: i64,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::with_size(TABLE_STARTING_SIZE)
    }

    pub(crate) fn with_size(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        for i in 0..size {
            slots.push(MethodSlot {
                method: None,
                next: if i + 1 < size { i as i64 + 1 } else { -1 },
            });
        }
        MethodTable {
            slots,
            hashtab: vec![-1; size],
            blanks: 0,
        }
    }

    fn bucket(&self, name: Sym) -> usize {
        (hash_str(&ident::name(name)) % self.slots.len() as u64) as usize
    }

    pub fn find(&self, name: Sym) -> Option<MethodRef> {
        let mut ind = self.hashtab[self.bucket(name)];
        while ind != -1 {
            let slot = &self.slots[ind as usize];
            if let Some(m) = &slot.method {
                if m.name == Some(name) {
                    return Some(Rc::clone(m));
                }
            }
            ind = slot.next;
        }
        None
    }

    /// Installs `method` at the first blank slot. The caller has removed any
    /// previous method with the same name.
    pub fn add(&mut self, method: MethodRef) {
        let name = method.name.expect("table methods are named");
        if self.blanks == -1 {
            self.grow();
        }
        let ind = self.blanks as usize;
        self.blanks = self.slots[ind].next;
        self.slots[ind].method = Some(method);
        let bucket = self.bucket(name);
        self.slots[ind].next = self.hashtab[bucket];
        self.hashtab[bucket] = ind as i64;
    }

    /// Removes the method named `name`, returning it for detachment.
    pub fn remove(&mut self, name: Sym) -> Option<MethodRef> {
        let bucket = self.bucket(name);
        let mut prev: Option<usize> = None;
        let mut ind = self.hashtab[bucket];
        while ind != -1 {
            let i = ind as usize;
            let matched = self.slots[i]
                .method
                .as_ref()
                .is_some_and(|m| m.name == Some(name));
            if matched {
                let next = self.slots[i].next;
                match prev {
                    Some(p) => self.slots[p].next = next,
                    None => self.hashtab[bucket] = next,
                }
                let removed = self.slots[i].method.take();
                self.slots[i].next = self.blanks;
                self.blanks = i as i64;
                return removed;
            }
            prev = Some(i);
            ind = self.slots[i].next;
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodRef> {
        self.slots.iter().filter_map(|slot| slot.method.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn grow(&mut self) {
        let new_size = self.slots.len() * 2 + 1;
        for i in self.slots.len()..new_size {
            self.slots.push(MethodSlot {
                method: None,
                next: if i + 1 < new_size { i as i64 + 1 } else { -1 },
            });
        }
        self.blanks = (new_size / 2) as i64;
        self.rethread();
    }

    pub(crate) fn rethread(&mut self) {
        let size = self.slots.len();
        self.hashtab = vec![-1; size];
        for i in 0..size {
            if let Some(m) = &self.slots[i].method {
                let name = m.name.expect("table methods are named");
                let bucket = (hash_str(&ident::name(name)) % size as u64) as usize;
                self.slots[i].next = self.hashtab[bucket];
                self.hashtab[bucket] = i as i64;
            }
        }
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub(crate) struct StringEntry {
    pub(crate) string: Option<CmmString>,
    pub(crate) refs: usize,
}

#[derive(Debug)]
pub(crate) struct IdentEntry {
    pub(crate) id: Option<Sym>,
    pub(crate) refs: usize,
}

/// An in-memory object image.
#[derive(Debug)]
pub struct Object {
    pub dbref: Dbref,
    /// Left-to-right method-resolution order.
    pub parents: List,
    /// Maintained coherent with other objects' parent lists.
    pub children: List,
    pub vars: VarTable,
    pub methods: MethodTable,
    pub(crate) strings: Vec<StringEntry>,
    pub(crate) idents: Vec<IdentEntry>,
    /// Generation marker for graph traversals.
    pub search: u64,
    /// Set on mutation; cleared only by cache writeback.
    pub dirty: bool,
    /// Set by the destroy operator; the cache finalizes destruction when the
    /// last holder releases.
    pub dead: bool,
}

impl Object {
    pub fn new(dbref: Dbref, parents: List) -> Object {
        Object {
            dbref,
            parents,
            children: List::new(),
            vars: VarTable::new(),
            methods: MethodTable::new(),
            strings: Vec::new(),
            idents: Vec::new(),
            search: 0,
            dirty: true,
            dead: false,
        }
    }

    /// Declares the variable `name` on this object. False if it already
    /// exists.
    pub fn add_param(&mut self, name: Sym) -> bool {
        if self.vars.find(self.dbref, name).is_some() {
            return false;
        }
        self.vars.create(self.dbref, name);
        self.dirty = true;
        true
    }

    /// Removes the variable `name` declared on this object. False if
    /// absent.
    pub fn del_param(&mut self, name: Sym) -> bool {
        let removed = self.vars.remove(self.dbref, name);
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Assigns `(class, name)` on this object, creating the per-instance
    /// slot on first write. The caller has verified the declaration on
    /// `class`.
    pub fn assign_var(&mut self, class: Dbref, name: Sym, value: Value) {
        self.dirty = true;
        match self.vars.find_mut(class, name) {
            Some(var) => var.value = value,
            None => {
                self.vars.create(class, name).value = value;
            }
        }
    }

    /// The locally assigned value of `(class, name)`, if any. An unassigned
    /// descendant slot falls back to the defining class's value at the
    /// database layer.
    pub fn local_var(&self, class: Dbref, name: Sym) -> Option<&Value> {
        self.vars.find(class, name).map(|var| &var.value)
    }

    /// Symbols of the variables declared on this object.
    pub fn parameters(&self) -> List {
        self.vars
            .iter()
            .filter(|var| var.class == self.dbref)
            .map(|var| Value::symbol(var.name))
            .collect()
    }

    /// Interns `s` into the string pool, sharing an existing entry.
    pub fn add_string(&mut self, s: &CmmString) -> usize {
        self.dirty = true;
        let mut blank = None;
        for (i, entry) in self.strings.iter_mut().enumerate() {
            match &entry.string {
                Some(existing) if existing == s => {
                    entry.refs += 1;
                    return i;
                }
                Some(_) => {}
                None => blank = Some(i),
            }
        }
        let entry = StringEntry {
            string: Some(s.clone()),
            refs: 1,
        };
        match blank {
            Some(i) => {
                self.strings[i] = entry;
                i
            }
            None => {
                self.strings.push(entry);
                self.strings.len() - 1
            }
        }
    }

    pub fn discard_string(&mut self, ind: usize) {
        self.dirty = true;
        let entry = &mut self.strings[ind];
        entry.refs -= 1;
        if entry.refs == 0 {
            entry.string = None;
        }
    }

    pub fn get_string(&self, ind: usize) -> Option<&CmmString> {
        self.strings.get(ind).and_then(|e| e.string.as_ref())
    }

    /// String-pool length, blanks included.
    pub fn strings_len(&self) -> usize {
        self.strings.len()
    }

    /// Identifier-pool length, blanks included.
    pub fn idents_len(&self) -> usize {
        self.idents.len()
    }

    /// Interns `name` into the identifier pool, sharing an existing entry.
    pub fn add_ident(&mut self, name: &str) -> usize {
        self.dirty = true;
        let id = ident::get(name);
        let mut blank = None;
        for (i, entry) in self.idents.iter_mut().enumerate() {
            match entry.id {
                Some(existing) if existing == id => {
                    entry.refs += 1;
                    ident::discard(id);
                    return i;
                }
                Some(_) => {}
                None => blank = Some(i),
            }
        }
        let entry = IdentEntry {
            id: Some(id),
            refs: 1,
        };
        match blank {
            Some(i) => {
                self.idents[i] = entry;
                i
            }
            None => {
                self.idents.push(entry);
                self.idents.len() - 1
            }
        }
    }

    pub fn discard_ident(&mut self, ind: usize) {
        self.dirty = true;
        let entry = &mut self.idents[ind];
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(id) = entry.id.take() {
                ident::discard(id);
            }
        }
    }

    pub fn get_ident(&self, ind: usize) -> Option<Sym> {
        self.idents.get(ind).and_then(|e| e.id)
    }

    /// Symbols live in the identifier pool.
    pub fn pool_idents(&self) -> List {
        self.idents
            .iter()
            .filter_map(|e| e.id)
            .map(Value::symbol)
            .collect()
    }

    /// Names of the methods defined here.
    pub fn method_names(&self) -> List {
        self.methods
            .iter()
            .filter_map(|m| m.name)
            .map(Value::symbol)
            .collect()
    }

    /// Releases the string- and identifier-pool references held by a
    /// method's formals and code. Called when the method leaves the table
    /// for good.
    pub fn discard_code_refs(&mut self, method: &Method) {
        for &ind in &method.argnames {
            self.discard_ident(ind);
        }
        if let Some(rest) = method.rest {
            self.discard_ident(rest);
        }
        for &ind in &method.varnames {
            self.discard_ident(ind);
        }

        let code = &method.code;
        let mut pc = 0;
        while pc < code.len() {
            let op = match Op::from_number(code[pc]) {
                Some(op) => op,
                None => break,
            };
            pc += 1;
            let (a1, a2) = op.args();
            for arg in [a1, a2] {
                match arg {
                    ArgType::None => break,
                    ArgType::Str => {
                        self.discard_string(code[pc] as usize);
                        pc += 1;
                    }
                    ArgType::Ident => {
                        self.discard_ident(code[pc] as usize);
                        pc += 1;
                    }
                    ArgType::Int | ArgType::Var | ArgType::Jump | ArgType::ErrList => {
                        pc += 1;
                    }
                }
            }
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        // Each live pool entry holds exactly one global identifier
        // reference, however many internal shares it counts.
        for entry in &mut self.idents {
            if let Some(id) = entry.id.take() {
                ident::discard(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::ident;

    fn sym(s: &str) -> Sym {
        ident::get(s)
    }

    #[test]
    fn params_declare_and_remove() {
        let mut obj = Object::new(Dbref(10), List::new());
        let position = sym("position");
        assert!(obj.add_param(position));
        assert!(!obj.add_param(position));
        obj.assign_var(Dbref(10), position, Value::Int(3));
        assert_eq!(obj.local_var(Dbref(10), position), Some(&Value::Int(3)));
        assert!(obj.del_param(position));
        assert!(!obj.del_param(position));
        assert!(obj.local_var(Dbref(10), position).is_none());
    }

    #[test]
    fn var_table_survives_growth() {
        let mut obj = Object::new(Dbref(1), List::new());
        let names: Vec<Sym> = (0..40).map(|i| sym(&format!("var{i}"))).collect();
        for &name in &names {
            assert!(obj.add_param(name));
        }
        for (i, &name) in names.iter().enumerate() {
            obj.assign_var(Dbref(1), name, Value::Int(i as i64));
        }
        for (i, &name) in names.iter().enumerate() {
            assert_eq!(obj.local_var(Dbref(1), name), Some(&Value::Int(i as i64)));
        }
        assert_eq!(obj.vars.len(), 40);
    }

    #[test]
    fn string_pool_shares_and_reclaims() {
        let mut obj = Object::new(Dbref(2), List::new());
        let a = obj.add_string(&"hello".into());
        let b = obj.add_string(&"hello".into());
        assert_eq!(a, b);
        let c = obj.add_string(&"world".into());
        assert_ne!(a, c);

        obj.discard_string(a);
        assert!(obj.get_string(a).is_some());
        obj.discard_string(b);
        assert!(obj.get_string(a).is_none());

        // The blank is reused.
        let d = obj.add_string(&"again".into());
        assert_eq!(d, a);
    }

    #[test]
    fn ident_pool_pairs_global_refcounts() {
        let mut obj = Object::new(Dbref(3), List::new());
        let id = ident::get("pooled-ident");
        let before = ident::refs(id);
        let ind = obj.add_ident("pooled-ident");
        assert_eq!(ident::refs(id), before + 1);
        assert_eq!(obj.get_ident(ind), Some(id));
        obj.discard_ident(ind);
        assert_eq!(ident::refs(id), before);
        ident::discard(id);
    }
}
