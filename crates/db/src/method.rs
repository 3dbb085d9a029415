//! Compiled methods.

use cmm_core::ident::{self, Sym};
use cmm_core::Dbref;
use std::cell::Cell;
use std::rc::Rc;

/// A compiled method: formal arguments, locals, word code, and the error
/// lists referenced by `CATCH` operands.
///
/// Argument, rest, and local names are indices into the defining object's
/// identifier pool; the code vector likewise indexes the defining object's
/// string and identifier pools through its immediate operands.
#[derive(Debug)]
pub struct Method {
    /// Bound name, or `None` for an anonymous eval frame. The method owns
    /// one identifier reference.
    pub name: Option<Sym>,
    /// Defining object, set when the method is added to a table.
    pub object: Dbref,
    /// Identifier-pool indices of the formal arguments.
    pub argnames: Vec<usize>,
    /// Identifier-pool index of the rest parameter, if declared.
    pub rest: Option<usize>,
    /// Identifier-pool indices of the local variables.
    pub varnames: Vec<usize>,
    /// Word code: opcode numbers interleaved with immediate operands.
    pub code: Vec<i64>,
    /// Error-id sets referenced by `CATCH` operands.
    pub error_lists: Vec<Vec<Sym>>,
    /// False blocks descendants from overriding this method.
    pub overridable: bool,
    /// Set when the method has been removed from its table while frames may
    /// still be running it; the last frame to return discards its
    /// pool references.
    detached: Cell<bool>,
}

/// Shared handle on a method. Frames and method tables hold clones.
pub type MethodRef = Rc<Method>;

impl Method {
    /// An anonymous method with the given code and no formals.
    pub fn anonymous(object: Dbref, code: Vec<i64>) -> Method {
        Method {
            name: None,
            object,
            argnames: Vec::new(),
            rest: None,
            varnames: Vec::new(),
            code,
            error_lists: Vec::new(),
            overridable: true,
            detached: Cell::new(false),
        }
    }

    pub fn new(
        name: Option<Sym>,
        object: Dbref,
        argnames: Vec<usize>,
        rest: Option<usize>,
        varnames: Vec<usize>,
        code: Vec<i64>,
        error_lists: Vec<Vec<Sym>>,
        overridable: bool,
    ) -> Method {
        Method {
            name,
            object,
            argnames,
            rest,
            varnames,
            code,
            error_lists,
            overridable,
            detached: Cell::new(false),
        }
    }

    pub fn num_args(&self) -> usize {
        self.argnames.len()
    }

    pub fn num_vars(&self) -> usize {
        self.varnames.len()
    }

    /// Marks the method as removed from its table.
    pub fn detach(&self) {
        self.detached.set(true);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }
}

impl Drop for Method {
    fn drop(&mut self) {
        if let Some(name) = self.name {
            ident::discard(name);
        }
        for list in &self.error_lists {
            for &id in list {
                ident::discard(id);
            }
        }
    }
}
