//! The tagged value type.
//!
//! Clone and drop are implemented by hand so that symbol and error values
//! keep their identifier reference counts paired, mirroring the container
//! discipline: every copy of a value owns one reference to everything it
//! holds.

use crate::buffer::Buffer;
use crate::dict::Dict;
use crate::error::{CoreError, CoreResult};
use crate::ident::{self, Sym};
use crate::list::List;
use crate::string::{self, CmmString};
use std::cmp::Ordering;
use std::fmt;

/// A persistent object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dbref(pub i64);

impl fmt::Display for Dbref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A lightweight per-class instance: a class dbref plus a representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frob {
    pub class: Dbref,
    pub rep: Value,
}

/// A C-- value.
#[derive(Debug)]
pub enum Value {
    Int(i64),
    Str(CmmString),
    Dbref(Dbref),
    List(List),
    Symbol(Sym),
    Error(Sym),
    Frob(Box<Frob>),
    Dict(Dict),
    Buffer(Buffer),
}

impl Value {
    /// Builds a symbol value, taking a new reference on `id`.
    pub fn symbol(id: Sym) -> Value {
        Value::Symbol(ident::dup(id))
    }

    /// Builds an error value, taking a new reference on `id`.
    pub fn error(id: Sym) -> Value {
        Value::Error(ident::dup(id))
    }

    /// The stable type tag, used for ordering and serialization.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Str(_) => 1,
            Value::Dbref(_) => 2,
            Value::List(_) => 3,
            Value::Symbol(_) => 4,
            Value::Error(_) => 5,
            Value::Frob(_) => 6,
            Value::Dict(_) => 7,
            Value::Buffer(_) => 8,
        }
    }

    /// The well-known id naming this value's type.
    pub fn type_id(&self) -> Sym {
        let ids = ident::ids();
        match self {
            Value::Int(_) => ids.integer,
            Value::Str(_) => ids.string,
            Value::Dbref(_) => ids.dbref,
            Value::List(_) => ids.list,
            Value::Symbol(_) => ids.symbol,
            Value::Error(_) => ids.error,
            Value::Frob(_) => ids.frob,
            Value::Dict(_) => ids.dictionary,
            Value::Buffer(_) => ids.buffer,
        }
    }

    /// Truth according to C-- conventions.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Dbref(_) => true,
            Value::List(l) => !l.is_empty(),
            Value::Symbol(_) => true,
            Value::Error(_) => false,
            Value::Frob(frob) => frob.rep.truthy(),
            Value::Dict(d) => !d.is_empty(),
            Value::Buffer(b) => !b.is_empty(),
        }
    }

    /// Structure hash, stable across aliasing.
    pub fn hash(&self) -> u64 {
        match self {
            Value::Int(n) => *n as u64,
            Value::Str(s) => s.hash_ci(),
            Value::Dbref(dbref) => dbref.0 as u64,
            Value::List(l) => match l.first() {
                Some(first) => first.hash(),
                None => 100,
            },
            Value::Symbol(id) => string::hash_ci(&ident::name(*id)),
            Value::Error(id) => string::hash_ci(&ident::name(*id)),
            Value::Frob(frob) => (frob.class.0 as u64).wrapping_add(frob.rep.hash()),
            Value::Dict(d) => match d.values().first() {
                Some(first) => first.hash(),
                None => 200,
            },
            Value::Buffer(b) => {
                if b.is_empty() {
                    300
                } else {
                    b.retrieve(0) as u64 + b.retrieve(b.len() - 1) as u64
                }
            }
        }
    }

    /// Canonical total order across all value types: type tag first, then
    /// the type-specific comparator. Always a saturating three-valued
    /// result.
    pub fn order(&self, other: &Value) -> Ordering {
        let tag = self.type_tag().cmp(&other.type_tag());
        if tag != Ordering::Equal {
            return tag;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp_ci(b),
            (Value::Dbref(a), Value::Dbref(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.order(b),
            (Value::Symbol(a), Value::Symbol(b)) => {
                string::cmp_ci(&ident::name(*a), &ident::name(*b))
            }
            (Value::Error(a), Value::Error(b)) => {
                string::cmp_ci(&ident::name(*a), &ident::name(*b))
            }
            (Value::Frob(a), Value::Frob(b)) => {
                a.class.cmp(&b.class).then_with(|| a.rep.order(&b.rep))
            }
            (Value::Dict(a), Value::Dict(b)) => a.order(b),
            (Value::Buffer(a), Value::Buffer(b)) => {
                let shorter = a.len().min(b.len());
                a.as_bytes()[..shorter]
                    .cmp(&b.as_bytes()[..shorter])
                    .then_with(|| a.len().cmp(&b.len()))
            }
            _ => unreachable!("type tags matched"),
        }
    }

    /// The `tostr` form: strings verbatim, scalars printed, composites as
    /// placeholders.
    pub fn to_display(&self) -> CmmString {
        match self {
            Value::Int(n) => n.to_string().into(),
            Value::Str(s) => s.clone(),
            Value::Dbref(dbref) => dbref.to_string().into(),
            Value::List(_) => "<list>".into(),
            Value::Symbol(id) => ident::name(*id).into(),
            Value::Error(id) => ident::name(*id).into(),
            Value::Frob(_) => "<frob>".into(),
            Value::Dict(_) => "<dict>".into(),
            Value::Buffer(_) => "<buffer>".into(),
        }
    }

    /// The full literal form.
    pub fn to_literal(&self) -> CmmString {
        let mut out = CmmString::new();
        self.add_literal_to(&mut out);
        out
    }

    /// Appends the literal form to `out`.
    pub fn add_literal_to(&self, out: &mut CmmString) {
        match self {
            Value::Int(n) => out.add(&n.to_string()),
            Value::Str(s) => out.add_unparsed(s.as_str()),
            Value::Dbref(dbref) => out.add(&dbref.to_string()),
            Value::List(l) => {
                out.add_char('[');
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        out.add(", ");
                    }
                    v.add_literal_to(out);
                }
                out.add_char(']');
            }
            Value::Symbol(id) => {
                out.add_char('\'');
                let name = ident::name(*id);
                if string::is_valid_ident(&name) {
                    out.add(&name);
                } else {
                    out.add_unparsed(&name);
                }
            }
            Value::Error(id) => {
                out.add_char('~');
                let name = ident::name(*id);
                if string::is_valid_ident(&name) {
                    out.add(&name);
                } else {
                    out.add_unparsed(&name);
                }
            }
            Value::Frob(frob) => {
                out.add("<#");
                out.add(&frob.class.0.to_string());
                out.add(", ");
                frob.rep.add_literal_to(out);
                out.add_char('>');
            }
            Value::Dict(d) => d.add_literal_to(out),
            Value::Buffer(b) => {
                out.add("`[");
                for (i, byte) in b.as_bytes().iter().enumerate() {
                    if i > 0 {
                        out.add(", ");
                    }
                    out.add(&byte.to_string());
                }
                out.add_char(']');
            }
        }
    }

    /// Parses a literal, returning the value and the unconsumed remainder.
    /// Dollar-name dbref literals are resolved through `resolve_name`
    /// (unbound names become `#-1`).
    pub fn from_literal<'a>(
        s: &'a str,
        resolve_name: &dyn Fn(&str) -> Option<Dbref>,
    ) -> CoreResult<(Value, &'a str)> {
        let parser = Parser { resolve_name };
        parser.parse(s)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_dbref(&self) -> Option<Dbref> {
        match self {
            Value::Dbref(dbref) => Some(*dbref),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&CmmString> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Sym> {
        match self {
            Value::Symbol(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Int(n) => Value::Int(*n),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Dbref(dbref) => Value::Dbref(*dbref),
            Value::List(l) => Value::List(l.clone()),
            Value::Symbol(id) => Value::Symbol(ident::dup(*id)),
            Value::Error(id) => Value::Error(ident::dup(*id)),
            Value::Frob(frob) => Value::Frob(frob.clone()),
            Value::Dict(d) => Value::Dict(d.clone()),
            Value::Buffer(b) => Value::Buffer(b.clone()),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        match self {
            Value::Symbol(id) | Value::Error(id) => ident::discard(*id),
            _ => {}
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Dbref(a), Value::Dbref(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Frob(a), Value::Frob(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

struct Parser<'r> {
    resolve_name: &'r dyn Fn(&str) -> Option<Dbref>,
}

fn literal_error(at: &str) -> CoreError {
    CoreError::Literal {
        pos: 0,
        text: at.chars().take(24).collect(),
    }
}

fn parse_ident(s: &str) -> CoreResult<(String, &str)> {
    if s.starts_with('"') {
        let (parsed, rest) = CmmString::parse(s);
        return Ok((parsed.as_str().to_owned(), rest));
    }
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    if end == 0 {
        return Err(literal_error(s));
    }
    Ok((s[..end].to_owned(), &s[end..]))
}

impl Parser<'_> {
    fn parse<'a>(&self, s: &'a str) -> CoreResult<(Value, &'a str)> {
        let s = s.trim_start();

        if s.starts_with(|c: char| c.is_ascii_digit())
            || (s.starts_with('-') && s[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            let end = s
                .char_indices()
                .skip(1)
                .find(|(_, c)| !c.is_ascii_digit())
                .map_or(s.len(), |(i, _)| i);
            let n: i64 = s[..end].parse().map_err(|_| literal_error(s))?;
            return Ok((Value::Int(n), &s[end..]));
        }

        if s.starts_with('"') {
            let (parsed, rest) = CmmString::parse(s);
            return Ok((Value::Str(parsed), rest));
        }

        if s.starts_with("#[") {
            // Dictionary: a list of [key, value] associations.
            let (assocs, rest) = self.parse(&s[1..])?;
            let pairs = assocs.as_list().ok_or_else(|| literal_error(s))?;
            let dict = Dict::from_slices(pairs).ok_or_else(|| literal_error(s))?;
            return Ok((Value::Dict(dict), rest));
        }

        if s.starts_with('#') {
            let body = &s[1..];
            let negative = body.starts_with('-');
            let digits = if negative { &body[1..] } else { body };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            if end == 0 {
                return Err(literal_error(s));
            }
            let n: i64 = body[..end + usize::from(negative)]
                .parse()
                .map_err(|_| literal_error(s))?;
            return Ok((Value::Dbref(Dbref(n)), &digits[end..]));
        }

        if let Some(body) = s.strip_prefix('$') {
            let (name, rest) = parse_ident(body)?;
            let dbref = (self.resolve_name)(&name).unwrap_or(Dbref(-1));
            return Ok((Value::Dbref(dbref), rest));
        }

        if s.starts_with("`[") {
            let (bytes, rest) = self.parse(&s[1..])?;
            let list = bytes.as_list().ok_or_else(|| literal_error(s))?;
            let mut buf = Buffer::new();
            for v in list.iter() {
                match v {
                    Value::Int(n) => buf.add(*n),
                    _ => return Err(literal_error(s)),
                }
            }
            return Ok((Value::Buffer(buf), rest));
        }

        if let Some(body) = s.strip_prefix('[') {
            let mut rest = body.trim_start();
            let mut list = List::new();
            loop {
                if let Some(after) = rest.strip_prefix(']') {
                    return Ok((Value::List(list), after));
                }
                if rest.is_empty() {
                    return Err(literal_error(s));
                }
                let (elem, next) = self.parse(rest)?;
                list.add(elem);
                rest = next.trim_start();
                if let Some(after) = rest.strip_prefix(',') {
                    rest = after.trim_start();
                }
            }
        }

        if let Some(body) = s.strip_prefix('\'') {
            let (name, rest) = parse_ident(body)?;
            return Ok((Value::Symbol(ident::get(&name)), rest));
        }

        if let Some(body) = s.strip_prefix('~') {
            let (name, rest) = parse_ident(body)?;
            return Ok((Value::Error(ident::get(&name)), rest));
        }

        if let Some(body) = s.strip_prefix('<') {
            let (class, rest) = self.parse(body)?;
            let class = class.as_dbref().ok_or_else(|| literal_error(s))?;
            let mut rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix(',') {
                rest = after;
            }
            let (rep, rest) = self.parse(rest)?;
            let rest = rest.trim_start();
            let rest = rest.strip_prefix('>').ok_or_else(|| literal_error(s))?;
            return Ok((Value::Frob(Box::new(Frob { class, rep })), rest));
        }

        Err(literal_error(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident;

    fn no_names(_: &str) -> Option<Dbref> {
        None
    }

    fn parse(s: &str) -> Value {
        let (v, rest) = Value::from_literal(s, &no_names).expect("literal should parse");
        assert_eq!(rest, "");
        v
    }

    #[test]
    fn truthiness_follows_conventions() {
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-3).truthy());
        assert!(!Value::Str("".into()).truthy());
        assert!(Value::Dbref(Dbref(0)).truthy());
        assert!(!Value::error(ident::ids().perm).truthy());
        assert!(Value::symbol(ident::ids().perm).truthy());
        assert!(!Value::List(List::new()).truthy());
    }

    #[test]
    fn order_is_total_across_types() {
        let mixed = vec![
            Value::Str("b".into()),
            Value::Int(5),
            Value::Dbref(Dbref(2)),
            Value::Int(-1),
            Value::Str("A".into()),
        ];
        let mut sorted = mixed.clone();
        sorted.sort_by(Value::order);
        assert_eq!(
            sorted,
            vec![
                Value::Int(-1),
                Value::Int(5),
                Value::Str("A".into()),
                Value::Str("b".into()),
                Value::Dbref(Dbref(2)),
            ]
        );
    }

    #[test]
    fn buffer_order_is_prefix_then_length() {
        let a = Value::Buffer(Buffer::from_bytes(b"abc"));
        let b = Value::Buffer(Buffer::from_bytes(b"abcd"));
        let c = Value::Buffer(Buffer::from_bytes(b"abd"));
        assert_eq!(a.order(&b), Ordering::Less);
        assert_eq!(b.order(&c), Ordering::Less);
    }

    #[test]
    fn symbol_clone_and_drop_pair_refcounts() {
        let id = ident::get("refcount-pairing");
        let before = ident::refs(id);
        {
            let v = Value::symbol(id);
            assert_eq!(ident::refs(id), before + 1);
            let w = v.clone();
            assert_eq!(ident::refs(id), before + 2);
            drop(v);
            drop(w);
        }
        assert_eq!(ident::refs(id), before);
        ident::discard(id);
    }

    #[test]
    fn literals_round_trip() {
        for text in [
            "0",
            "-42",
            "\"hello \\\"there\\\"\"",
            "#17",
            "['foo, 2, [3, \"x\"]]",
            "#[[1, \"one\"], ['two, 2]]",
            "`[1, 2, 255]",
            "<#5, [1, 2]>",
            "~perm",
        ] {
            let v = parse(text);
            let printed = v.to_literal();
            assert_eq!(parse(printed.as_str()), v, "round-trip of {text}");
        }
    }

    #[test]
    fn dollar_names_resolve_through_the_table() {
        let resolver = |name: &str| (name == "system").then_some(Dbref(0));
        let (v, _) = Value::from_literal("$system", &resolver).expect("should parse");
        assert_eq!(v, Value::Dbref(Dbref(0)));
        let (unbound, _) = Value::from_literal("$nowhere", &resolver).expect("should parse");
        assert_eq!(unbound, Value::Dbref(Dbref(-1)));
    }
}
