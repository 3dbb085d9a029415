//! Administrative operators, restricted to the system object.

use crate::compile;
use crate::error::VmResult;
use crate::interp::{Ty, Vm};
use cmm_config::{ROOT_DBREF, SYSTEM_DBREF};
use cmm_core::{ident, List, Value};
use std::net::ToSocketAddrs;
use tracing::info;

impl Vm {
    /// create(parents): a new object linked under each parent.
    pub(crate) fn op_create(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::List], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let parents = self.stack[start].as_list().expect("checked").clone();
        for parent in parents.iter() {
            match parent.as_dbref() {
                None => {
                    let shown = parent.to_literal();
                    return self.type_error(
                        start,
                        ident::ids().dbref,
                        format!("Parent {shown} is not a dbref."),
                    );
                }
                Some(dbref) => {
                    if !self.db.check(dbref) {
                        let shown = parent.to_literal();
                        return self.system_handler(
                            start,
                            ident::ids().objnf,
                            format!("Parent {shown} does not refer to an object."),
                        );
                    }
                }
            }
        }
        let created = self.db.create(parents)?;
        self.pop_n(1);
        self.push(Value::Dbref(created));
        Ok(())
    }

    /// chparents(obj, parents): replace an object's parent list.
    pub(crate) fn op_chparents(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dbref, Ty::List], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let target = self.stack[start].as_dbref().expect("checked");
        let parents = self.stack[start + 1].as_list().expect("checked").clone();

        if target.0 == ROOT_DBREF {
            return self.throw(
                ident::ids().perm,
                "You cannot change the root object's parents.".to_owned(),
            );
        }
        if !self.db.check(target) {
            return self.system_handler(
                start,
                ident::ids().objnf,
                format!("Object {target} not found."),
            );
        }
        if parents.is_empty() {
            return self.throw(
                ident::ids().perm,
                "You must specify at least one parent.".to_owned(),
            );
        }

        match self.db.change_parents(target, &parents)? {
            Ok(()) => {
                self.pop_n(2);
                self.push(Value::Int(1));
                Ok(())
            }
            Err(wrong) => {
                let bad = parents.get(wrong).clone();
                let shown = bad.to_literal();
                match bad.as_dbref() {
                    None => self.throw(
                        ident::ids().type_,
                        format!("New parent {shown} is not a dbref."),
                    ),
                    Some(dbref) if dbref == target => self.throw(
                        ident::ids().parent,
                        format!("New parent {shown} is the same as {target}."),
                    ),
                    Some(dbref) if !self.db.check(dbref) => self.throw(
                        ident::ids().objnf,
                        format!("New parent {shown} does not exist."),
                    ),
                    Some(_) => self.throw(
                        ident::ids().parent,
                        format!("New parent {shown} is a descendent of {target}."),
                    ),
                }
            }
        }
    }

    /// destroy(obj): mark dead; the cache completes removal on the last
    /// release.
    pub(crate) fn op_destroy(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let target = self.stack[start].as_dbref().expect("checked");
        if target.0 == ROOT_DBREF {
            return self.throw(
                ident::ids().perm,
                "You can't destroy the root object.".to_owned(),
            );
        }
        if target.0 == SYSTEM_DBREF {
            return self.throw(
                ident::ids().perm,
                "You can't destroy the system object.".to_owned(),
            );
        }
        if !self.db.check(target) {
            return self.throw(ident::ids().objnf, format!("Object {target} not found."));
        }
        self.bridge.boot(target);
        self.db.destroy(target)?;
        self.boot_pending()?;
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// Boots connections for objects the database destroyed as a side
    /// effect (reparenting, last-release destruction).
    pub(crate) fn boot_pending(&mut self) -> VmResult<()> {
        for dbref in self.db.take_pending_boots() {
            self.bridge.boot(dbref);
        }
        Ok(())
    }

    /// log(string): write a line through the server log.
    pub(crate) fn op_log(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let line = self.stack[start].as_str().expect("checked").clone();
        info!("> {line}");
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// conn_assign(dbref): reassign the current connection's owner.
    pub(crate) fn op_conn_assign(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let target = self.stack[start].as_dbref().expect("checked");
        let assigned = match self.cur_conn {
            Some(conn) => self.bridge.set_owner(conn, target),
            None => false,
        };
        self.pop_n(1);
        self.push(Value::Int(i64::from(assigned)));
        Ok(())
    }

    pub(crate) fn op_binary_dump(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        self.db.dump()?;
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_binary_backup(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        self.db.backup()?;
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_text_dump(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let decompiler = self.decompiler.take();
        let result = self.db.text_dump(&|method, obj| match &decompiler {
            Some(d) => d.list(method, obj, cmm_config::DEFAULT_INDENT as usize, true),
            None => compile::disassemble_lines(method, obj),
        });
        self.decompiler = decompiler;
        result?;
        self.push(Value::Int(1));
        Ok(())
    }

    /// run_script(name, args[, nowait]): run a host script from the
    /// scripts directory.
    pub(crate) fn op_run_script(&mut self) -> VmResult<()> {
        let Some((start, num_args)) =
            self.func_args(&[Ty::Str, Ty::List], &[Ty::Int])?
        else {
            return Ok(());
        };
        let script_args = self.stack[start + 1].as_list().expect("checked").clone();
        for (i, arg) in script_args.iter().enumerate() {
            if arg.as_str().is_none() {
                let shown = arg.to_literal();
                return self.throw(
                    ident::ids().type_,
                    format!("Script argument {} ({shown}) is not a string.", i + 1),
                );
            }
        }
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_str().expect("checked").clone();
        if name.as_str().contains("../") {
            let shown = Value::Str(name).to_literal();
            return self.throw(
                ident::ids().perm,
                format!("Filename {shown} is not legal."),
            );
        }
        let path = self.dirs.scripts.join(name.as_str());
        let mut command = std::process::Command::new(&path);
        for arg in script_args.iter() {
            command.arg(arg.as_str().expect("checked just above").as_str());
        }
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null());

        let nowait =
            num_args == 3 && self.stack[start + 2].as_int().is_some_and(|flag| flag != 0);
        let status = match command.spawn() {
            Err(err) => {
                info!(script = %path.display(), %err, "script failed to start");
                -1
            }
            Ok(mut child) => {
                if nowait {
                    0
                } else {
                    child
                        .wait()
                        .ok()
                        .and_then(|status| status.code())
                        .unwrap_or(-1) as i64
                }
            }
        };
        self.pop_n(num_args);
        self.push(Value::Int(status));
        Ok(())
    }

    /// shutdown(): stop the main loop after this iteration.
    pub(crate) fn op_shutdown(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        info!("shutdown requested");
        self.running = false;
        self.push(Value::Int(1));
        Ok(())
    }

    /// bind(port, dbref): listen on a port, delivering connections to an
    /// object.
    pub(crate) fn op_bind(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int, Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let port = self.stack[start].as_int().expect("checked");
        let owner = self.stack[start + 1].as_dbref().expect("checked");
        if !(0..=u16::MAX as i64).contains(&port) {
            return self.throw(
                ident::ids().bind,
                format!("Couldn't bind to port {port}."),
            );
        }
        match self.bridge.add_server(port as u16, owner) {
            Ok(()) => {
                self.pop_n(2);
                self.push(Value::Int(1));
                Ok(())
            }
            Err(cmm_net::NetError::Socket { .. }) => self.throw(
                ident::ids().socket,
                "Couldn't create server socket.".to_owned(),
            ),
            Err(cmm_net::NetError::Bind { .. }) => self.throw(
                ident::ids().bind,
                format!("Couldn't bind to port {port}."),
            ),
        }
    }

    pub(crate) fn op_unbind(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let port = self.stack[start].as_int().expect("checked");
        let removed =
            (0..=u16::MAX as i64).contains(&port) && self.bridge.remove_server(port as u16);
        if !removed {
            return self.throw(
                ident::ids().servnf,
                format!("No server socket on port {port}."),
            );
        }
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// connect(address, port, dbref): start an outbound connection whose
    /// completion is reported against this task's id.
    pub(crate) fn op_connect(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str, Ty::Int, Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let address = self.stack[start].as_str().expect("checked").clone();
        let port = self.stack[start + 1].as_int().expect("checked").clamp(0, 65535) as u16;
        let receiver = self.stack[start + 2].as_dbref().expect("checked");
        match self
            .bridge
            .make_connection(address.as_str(), port, receiver, self.task_id)
        {
            Ok(()) => {
                self.pop_n(3);
                self.push(Value::Int(1));
                Ok(())
            }
            Err(cmm_net::ConnectError::Address) => self.throw(
                ident::ids().address,
                format!("Invalid address: {address}"),
            ),
            Err(_) => self.throw(
                ident::ids().socket,
                "Couldn't create socket for connection.".to_owned(),
            ),
        }
    }

    /// set_heartbeat_freq(seconds): non-positive disables the heartbeat.
    pub(crate) fn op_set_heartbeat_freq(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let freq = self.stack[start].as_int().expect("checked");
        self.heartbeat_freq = (freq > 0).then_some(freq as u64);
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    /// data(obj): every variable on an object as class -> name -> value.
    pub(crate) fn op_data(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let target = self.stack[start].as_dbref().expect("checked");
        let vars: Vec<(Value, Value, Value)> = match self.db.fetch(target)? {
            Some(obj) => obj
                .vars
                .iter()
                .map(|var| {
                    (
                        Value::Dbref(var.class),
                        Value::symbol(var.name),
                        var.value.clone(),
                    )
                })
                .collect(),
            None => {
                return self.throw(
                    ident::ids().objnf,
                    format!("No such object {target}"),
                );
            }
        };
        let mut by_class = cmm_core::Dict::new();
        for (class, name, value) in vars {
            let mut inner = match by_class.find(&class) {
                Some(Value::Dict(d)) => d.clone(),
                _ => cmm_core::Dict::new(),
            };
            inner.add(name, value);
            by_class.add(class, Value::Dict(inner));
        }
        self.pop_n(1);
        self.push(Value::Dict(by_class));
        Ok(())
    }

    pub(crate) fn op_set_name(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol, Ty::Dbref], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_symbol().expect("checked");
        let target = self.stack[start + 1].as_dbref().expect("checked");
        self.db.set_name(name, target);
        self.pop_n(2);
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_del_name(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_symbol().expect("checked");
        if !self.db.del_name(name) {
            return self.throw(
                ident::ids().namenf,
                format!("Can't find object name {}.", ident::name(name)),
            );
        }
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_tick(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        self.push(Value::Int(self.tick));
        Ok(())
    }

    /// hostname(address): reverse resolution is an external collaborator;
    /// without one the address echoes back, the documented fallback.
    pub(crate) fn op_hostname(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let addr = self.stack[start].clone();
        self.pop_n(1);
        self.push(addr);
        Ok(())
    }

    /// ip(name): forward resolution through the host resolver.
    pub(crate) fn op_ip(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Str], &[])? else {
            return Ok(());
        };
        let name = self.stack[start].as_str().expect("checked").clone();
        let resolved = if name.as_str().parse::<std::net::IpAddr>().is_ok() {
            name.as_str().to_owned()
        } else {
            (name.as_str(), 0u16)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "-1".to_owned())
        };
        self.pop_n(1);
        self.push(Value::Str(resolved.into()));
        Ok(())
    }

    pub(crate) fn op_db_top(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        self.push(Value::Int(self.db.db_top()));
        Ok(())
    }

    // --- task control ---------------------------------------------------

    pub(crate) fn op_suspend(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        // The resuming task pushes this task's result.
        self.task_suspend();
        Ok(())
    }

    pub(crate) fn op_resume(&mut self) -> VmResult<()> {
        let Some((start, num_args)) = self.func_args(&[Ty::Int], &[Ty::Any])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let tid = self.stack[start].as_int().expect("checked");
        if !self.tasks.iter().any(|t| t.task_id == tid) {
            return self.throw(ident::ids().type_, "No such task".to_owned());
        }
        let value = (num_args == 2).then(|| self.stack[start + 1].clone());
        self.task_resume(tid, value)?;
        self.pop_n(num_args);
        self.push(Value::Int(0));
        Ok(())
    }

    pub(crate) fn op_cancel(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let tid = self.stack[start].as_int().expect("checked");
        if !self.task_exists(tid) {
            return self.throw(ident::ids().type_, "No such task".to_owned());
        }
        self.task_cancel(tid)?;
        self.pop_n(1);
        self.push(Value::Int(1));
        Ok(())
    }

    pub(crate) fn op_pause(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        // The heartbeat continues this task; zero is what pause() yields.
        self.push(Value::Int(0));
        self.task_pause();
        Ok(())
    }

    pub(crate) fn op_tasks(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let list = self.task_list();
        self.push(Value::List(list));
        Ok(())
    }

    pub(crate) fn op_callers(&mut self) -> VmResult<()> {
        let Some(_) = self.func_args(&[], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let callers = self.task_callers();
        self.push(Value::List(callers));
        Ok(())
    }

    /// disassemble(name): `[pc, opcode, operands...]` rows for a method
    /// visible from the current object.
    pub(crate) fn op_disassemble(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Symbol], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let name = self.stack[start].as_symbol().expect("checked");
        let obj = self.cur_frame().object;
        let Some((method, definer)) = self.db.find_method(obj, name)? else {
            return self.throw(
                ident::ids().methodnf,
                format!("Method {} not found.", ident::name(name)),
            );
        };
        let rows = match self.db.fetch(definer)? {
            Some(object) => compile::disassemble(&method, object),
            None => List::new(),
        };
        self.pop_n(1);
        self.push(Value::List(rows));
        Ok(())
    }

    /// debug(flags): record the debug bitmask; diagnostics flow through
    /// the tracing subscriber.
    pub(crate) fn op_debug(&mut self) -> VmResult<()> {
        let Some((start, _)) = self.func_args(&[Ty::Int], &[])? else {
            return Ok(());
        };
        if self.check_perms()? {
            return Ok(());
        }
        let flags = self.stack[start].as_int().expect("checked");
        info!(flags, "debug flags set");
        self.pop_n(1);
        self.push(Value::Int(flags));
        Ok(())
    }
}
