//! Functions acting on the current object: parameters, variables, methods
//! and the parent graph.

use crate::compile;
use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_config::DEFAULT_INDENT;
use cmm_core::{ident, List, Value};

impl Vm {
    pub(crate) fn op_add_parameter(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        let added = match self.db.fetch(obj)? {
            Some(object) => object.add_param(name),
            None => false,
        };
        if !added {
            return self.throw(
                ident::ids().paramexists,
                format!("Parameter {} already exists.", ident::name(name)),
            );
        }
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_parameters(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let params = match self.db.fetch(obj)? {
            Some(object) => object.parameters(),
            None => List::new(),
        };
        self.push(Value::List(params));
        Ok(())
    }

    pub(crate) fn op_del_parameter(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        let removed = match self.db.fetch(obj)? {
            Some(object) => object.del_param(name),
            None => false,
        };
        if !removed {
            return self.data_handler(
                start,
                ident::ids().paramnf,
                format!("Parameter {} does not exist.", ident::name(name)),
            );
        }
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// set_var(name, value): assign the defining class's variable on the
    /// current object; evaluates to the assigned value.
    pub(crate) fn op_set_var(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol, Ty::Any], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let value = self.stack[start + 1].clone();
        let obj = self.cur_frame().object;
        let class = self.cur_frame().definer();
        if !self.db.assign_var(obj, class, name, value.clone())? {
            return self.data_handler(
                start,
                ident::ids().paramnf,
                format!("No such parameter {}.", ident::name(name)),
            );
        }
        self.pop_n(2);
        self.push(value);
        Ok(())
    }

    pub(crate) fn op_get_var(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        let class = self.cur_frame().definer();
        match self.db.retrieve_var(obj, class, name)? {
            Some(value) => {
                self.pop_n(1);
                self.push(value);
                Ok(())
            }
            None => self.data_handler(
                start,
                ident::ids().paramnf,
                format!("No such parameter {}.", ident::name(name)),
            ),
        }
    }

    /// compile(lines, name): feed source to the compiler collaborator and
    /// install the result; evaluates to the (possibly empty) error list.
    pub(crate) fn op_compile(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List, Ty::Symbol], &[])? else {
            return Ok(());
        };
        let code = self.stack[start].as_list().expect("checked").clone();
        let name = self.stack[start + 1].as_symbol().expect("checked");

        let mut lines = Vec::with_capacity(code.len());
        for (i, line) in code.iter().enumerate() {
            match line.as_str() {
                Some(s) => lines.push(s.as_str().to_owned()),
                None => {
                    let shown = line.to_literal();
                    return self.throw(
                        ident::ids().type_,
                        format!("Line {i} ({shown}) is not a string."),
                    );
                }
            }
        }

        let obj = self.cur_frame().object;
        let Some(compiler) = self.compiler.take() else {
            let errors: List =
                std::iter::once(Value::Str("No compiler is available.".into())).collect();
            self.pop_n(2);
            self.push(Value::List(errors));
            return Ok(());
        };
        let outcome = match self.db.fetch(obj)? {
            Some(object) => compiler.compile(object, &lines),
            None => Err(vec!["Current object is gone.".to_owned()]),
        };
        self.compiler = Some(compiler);

        let errors: List = match outcome {
            Ok(method) => {
                self.db.add_method(obj, name, method)?;
                List::new()
            }
            Err(messages) => messages
                .into_iter()
                .map(|m| Value::Str(m.into()))
                .collect(),
        };
        self.pop_n(2);
        self.push(Value::List(errors));
        Ok(())
    }

    pub(crate) fn op_methods(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let methods = match self.db.fetch(obj)? {
            Some(object) => object.method_names(),
            None => List::new(),
        };
        self.push(Value::List(methods));
        Ok(())
    }

    pub(crate) fn op_find_method(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        match self.db.find_method(obj, name)? {
            Some((_, definer)) => {
                self.pop_n(1);
                self.push(Value::Dbref(definer));
                Ok(())
            }
            None => self.throw(
                ident::ids().methodnf,
                format!("Method {} not found.", ident::name(name)),
            ),
        }
    }

    pub(crate) fn op_find_next_method(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol, Ty::Dbref], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let after = self.stack[start + 1].as_dbref().expect("checked");
        let obj = self.cur_frame().object;
        match self.db.find_next_method(obj, name, after)? {
            Some((_, definer)) => {
                self.pop_n(2);
                self.push(Value::Dbref(definer));
                Ok(())
            }
            None => self.throw(
                ident::ids().methodnf,
                format!("Method {} not found.", ident::name(name)),
            ),
        }
    }

    /// list_method(name[, indent[, parens]]): the method's source through
    /// the decompiler collaborator, or disassembly without one.
    pub(crate) fn op_list_method(&mut self) -> VmResult<()> {
        let Some((start, num_args)) =
            self.func_args(&[Ty::Symbol], &[Ty::Int, Ty::Int])?
        else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let indent = if num_args >= 2 {
            self.stack[start + 1].as_int().expect("checked").max(0) as usize
        } else {
            DEFAULT_INDENT as usize
        };
        let parens = num_args == 3 && self.stack[start + 2].as_int().expect("checked") != 0;

        let obj = self.cur_frame().object;
        let decompiler = self.decompiler.take();
        let lines = match self.db.fetch(obj)? {
            Some(object) => match object.methods.find(name) {
                Some(method) => Some(match &decompiler {
                    Some(d) => d.list(&method, object, indent, parens),
                    None => compile::disassemble_lines(&method, object),
                }),
                None => None,
            },
            None => None,
        };
        self.decompiler = decompiler;

        match lines {
            Some(lines) => {
                let listing: List = lines.into_iter().map(|l| Value::Str(l.into())).collect();
                self.pop_n(num_args);
                self.push(Value::List(listing));
                Ok(())
            }
            None => self.throw(
                ident::ids().methodnf,
                format!("Method {} not found.", ident::name(name)),
            ),
        }
    }

    pub(crate) fn op_del_method(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        if !self.db.del_method(obj, name)? {
            return self.throw(
                ident::ids().methodnf,
                format!("No method named {} was found.", ident::name(name)),
            );
        }
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_parents(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let parents = match self.db.fetch(obj)? {
            Some(object) => object.parents.clone(),
            None => List::new(),
        };
        self.push(Value::List(parents));
        Ok(())
    }

    pub(crate) fn op_children(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let children = match self.db.fetch(obj)? {
            Some(object) => object.children.clone(),
            None => List::new(),
        };
        self.push(Value::List(children));
        Ok(())
    }

    pub(crate) fn op_ancestors(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let ancestors = self.db.ancestors(obj)?;
        self.push(Value::List(ancestors));
        Ok(())
    }

    pub(crate) fn op_has_ancestor(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dbref], &[])? else {
            return Ok(());
        };
        let ancestor = self.stack[start].as_dbref().expect("checked");
        let obj = self.cur_frame().object;
        let has = self.db.has_ancestor(obj, ancestor)?;
        self.pop_n(1);
        self.push(Value::Int(i64::from(has)));
        Ok(())
    }

    /// size(): the current object's packed image size in bytes.
    pub(crate) fn op_size(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let size = self.db.object_size(obj)?.unwrap_or(0);
        self.push(Value::Int(size as i64));
        Ok(())
    }

    /// idents(): the current object's identifier pool.
    pub(crate) fn op_idents(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        let obj = self.cur_frame().object;
        let idents = match self.db.fetch(obj)? {
            Some(object) => object.pool_idents(),
            None => List::new(),
        };
        self.push(Value::List(idents));
        Ok(())
    }
}
