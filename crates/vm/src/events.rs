//! Turning bridge events into interpreter tasks.
//!
//! The daemon pumps the bridge once per loop iteration and feeds each event
//! here, preserving report order. A message the owner does not implement is
//! simply dropped, like any other undeliverable task.

use crate::error::VmResult;
use crate::interp::Vm;
use cmm_config::SYSTEM_DBREF;
use cmm_core::{ident, Dbref, Value};
use cmm_net::IoEvent;
use tracing::debug;

impl Vm {
    /// Delivers one bridge event as a task.
    pub fn handle_io_event(&mut self, event: IoEvent) -> VmResult<()> {
        let ids = ident::ids();
        let outcome = match event {
            IoEvent::Parse { conn, owner, data } => {
                self.task(Some(conn), owner, ids.parse, vec![Value::Buffer(data)])?
            }
            IoEvent::Accepted {
                conn,
                owner,
                addr,
                port,
            } => self.task(
                Some(conn),
                owner,
                ids.connect,
                vec![Value::Str(addr.into()), Value::Int(port as i64)],
            )?,
            IoEvent::ConnectDone {
                conn,
                owner,
                task_id,
            } => self.task(Some(conn), owner, ids.connect, vec![Value::Int(task_id)])?,
            IoEvent::ConnectFailed {
                owner,
                task_id,
                error,
            } => {
                let error_id = ident::get(error.name());
                self.task(
                    None,
                    owner,
                    ids.failed,
                    vec![Value::Int(task_id), Value::Error(error_id)],
                )?
            }
            IoEvent::Transmit { conn, owner } => {
                self.task(Some(conn), owner, ids.transmit, vec![])?
            }
            IoEvent::Disconnect { conn, owner } => {
                self.task(Some(conn), owner, ids.disconnect, vec![])?
            }
        };
        if let Some(error) = outcome {
            debug!(error = %ident::name(error), "event task not delivered");
        }
        self.boot_pending()?;
        Ok(())
    }

    /// One timer heartbeat: tell the system object, then run the paused
    /// tasks with their reduced budget.
    pub fn heartbeat(&mut self) -> VmResult<()> {
        let heartbeat = ident::ids().heartbeat;
        self.task(None, Dbref(SYSTEM_DBREF), heartbeat, vec![])?;
        self.run_paused_tasks()?;
        self.boot_pending()?;
        Ok(())
    }
}
