//! The cooperative task scheduler.
//!
//! A task is a saved interpreter state: its data stack, argument-boundary
//! stack, and frame chain. Suspended tasks sit on the runnable list until a
//! `resume`; paused tasks run once per heartbeat with a smaller tick
//! budget. Stack storage recycles through a free pool.

use crate::error::VmResult;
use crate::frame::Frame;
use crate::interp::Vm;
use cmm_core::{List, Value};
use cmm_net::ConnId;
use tracing::debug;

/// A task off the interpreter: everything needed to re-enter it.
pub struct SavedTask {
    pub task_id: i64,
    pub conn: Option<ConnId>,
    pub stack: Vec<Value>,
    pub arg_starts: Vec<usize>,
    pub frames: Vec<Frame>,
}

impl Vm {
    /// Swaps the live interpreter state out into a task record, installing
    /// fresh (pooled) stacks.
    pub(crate) fn save_state(&mut self) -> SavedTask {
        let (mut stack, mut arg_starts) = self.stack_pool.pop().unwrap_or_default();
        stack.clear();
        arg_starts.clear();
        SavedTask {
            task_id: self.task_id,
            conn: self.cur_conn,
            stack: std::mem::replace(&mut self.stack, stack),
            arg_starts: std::mem::replace(&mut self.arg_starts, arg_starts),
            frames: std::mem::take(&mut self.frames),
        }
    }

    /// Installs a task as the live interpreter state; the displaced stacks
    /// return to the pool.
    pub(crate) fn restore_state(&mut self, task: SavedTask) {
        let SavedTask {
            task_id,
            conn,
            stack,
            arg_starts,
            frames,
        } = task;
        self.task_id = task_id;
        self.cur_conn = conn;
        let old_stack = std::mem::replace(&mut self.stack, stack);
        let old_args = std::mem::replace(&mut self.arg_starts, arg_starts);
        self.frames = frames;
        self.recycle(old_stack, old_args);
    }

    fn recycle(&mut self, mut stack: Vec<Value>, mut arg_starts: Vec<usize>) {
        stack.clear();
        arg_starts.clear();
        if self.stack_pool.len() < 8 {
            self.stack_pool.push((stack, arg_starts));
        }
    }

    pub(crate) fn task_exists(&self, tid: i64) -> bool {
        self.tasks.iter().any(|t| t.task_id == tid)
            || self.paused.iter().any(|t| t.task_id == tid)
    }

    /// Suspends the current task onto the runnable list. The suspend
    /// site's result is pushed by the resuming task.
    pub(crate) fn task_suspend(&mut self) {
        debug!(task_id = self.task_id, "suspending");
        let task = self.save_state();
        self.tasks.push(task);
    }

    /// Pauses the current task until the next heartbeat. The pause
    /// operator has already pushed its own result.
    pub(crate) fn task_pause(&mut self) {
        debug!(task_id = self.task_id, "pausing");
        let task = self.save_state();
        self.paused.push(task);
    }

    /// Resumes task `tid`, pushing `value` as the result of its suspend
    /// site, and runs it until it completes or suspends again. The calling
    /// task's state is preserved around the switch.
    pub(crate) fn task_resume(&mut self, tid: i64, value: Option<Value>) -> VmResult<()> {
        let Some(at) = self.tasks.iter().position(|t| t.task_id == tid) else {
            return Ok(());
        };
        let target = self.tasks.remove(at);
        let caller = self.save_state();
        self.restore_state(target);
        self.cur_frame_mut().ticks = self.method_ticks;
        self.push(value.unwrap_or(Value::Int(0)));
        self.execute()?;
        let finished = self.save_state();
        self.recycle(finished.stack, finished.arg_starts);
        self.restore_state(caller);
        Ok(())
    }

    /// Cancels task `tid`: unwinds every frame, releasing holders and
    /// specifier-held data, then discards its stacks. No notification
    /// reaches the cancelled side.
    pub(crate) fn task_cancel(&mut self, tid: i64) -> VmResult<()> {
        let target = if let Some(at) = self.tasks.iter().position(|t| t.task_id == tid) {
            self.tasks.remove(at)
        } else if let Some(at) = self.paused.iter().position(|t| t.task_id == tid) {
            self.paused.remove(at)
        } else {
            return Ok(());
        };
        debug!(task_id = tid, "cancelling");

        let caller = self.save_state();
        self.restore_state(target);
        while !self.frames.is_empty() {
            self.frame_return()?;
        }
        let finished = self.save_state();
        self.recycle(finished.stack, finished.arg_starts);
        self.restore_state(caller);
        Ok(())
    }

    /// Runs every paused task once with the paused tick budget. Tasks that
    /// pause again land on the next heartbeat's list.
    pub fn run_paused_tasks(&mut self) -> VmResult<()> {
        if self.paused.is_empty() {
            return Ok(());
        }
        let caller = self.save_state();
        // Tasks pausing while we run must not extend this heartbeat.
        let batch = std::mem::take(&mut self.paused);
        for task in batch {
            self.restore_state(task);
            self.cur_frame_mut().ticks = self.paused_method_ticks;
            self.execute()?;
            let finished = self.save_state();
            self.recycle(finished.stack, finished.arg_starts);
        }
        self.restore_state(caller);
        Ok(())
    }

    /// Task ids on the runnable and paused lists.
    pub(crate) fn task_list(&self) -> List {
        self.tasks
            .iter()
            .chain(self.paused.iter())
            .map(|t| Value::Int(t.task_id))
            .collect()
    }

    /// `[object, definer, method, pc]` rows for the current frame chain,
    /// innermost first.
    pub(crate) fn task_callers(&self) -> List {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let name = match frame.method.name {
                    Some(name) => Value::symbol(name),
                    None => Value::Int(0),
                };
                Value::List(List::from_vec(vec![
                    Value::Dbref(frame.object),
                    Value::Dbref(frame.definer()),
                    name,
                    Value::Int(frame.pc as i64),
                ]))
            })
            .collect()
    }
}
