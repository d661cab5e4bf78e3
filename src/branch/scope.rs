//! The handle a branch body uses to add children.

use super::{wrong_state, Branch, BranchState, ChildRecord};
use crate::config;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::debug;
use crate::types::TaskId;
use std::fmt;
use std::thread::{self, Scope};

fn spawn_failed() -> Error {
    Error::new(ErrorKind::SpawnFailed).with_message("branch.add can't spawn new thread")
}

/// Adds children to an open [`Branch`].
///
/// Cloning is cheap; a clone moved into a child lets that child add siblings
/// while the branch is still open.
pub struct BranchScope<'scope, 'env: 'scope, T> {
    branch: &'env Branch<T>,
    scope: &'scope Scope<'scope, 'env>,
    cx: Cx,
}

impl<'scope, 'env, T> BranchScope<'scope, 'env, T> {
    pub(super) fn new(branch: &'env Branch<T>, scope: &'scope Scope<'scope, 'env>, cx: Cx) -> Self {
        Self { branch, scope, cx }
    }

    /// Returns the body's context.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    /// Returns the branch state.
    #[must_use]
    pub fn state(&self) -> BranchState {
        self.branch.state()
    }

    /// Drains the values of `add_result` children that have finished so far.
    pub fn get_results(&self) -> Vec<T> {
        self.branch.get_results()
    }
}

impl<'scope, 'env, T: Send + 'env> BranchScope<'scope, 'env, T> {
    /// Spawns a child; its value is discarded and its error recorded.
    ///
    /// Returns the child's task id.
    pub fn add<U, F>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce(&Cx) -> Result<U> + Send + 'scope,
    {
        self.spawn(move |cx| f(cx).map(|_| None))
    }

    /// Spawns a child whose value is kept for [`get_results`](Self::get_results).
    pub fn add_result<F>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce(&Cx) -> Result<T> + Send + 'scope,
    {
        self.spawn(move |cx| f(cx).map(Some))
    }

    fn spawn<F>(&self, job: F) -> Result<TaskId>
    where
        F: FnOnce(&Cx) -> Result<Option<T>> + Send + 'scope,
    {
        let cfg = config::current();
        let branch = self.branch;
        let (index, cx) = {
            let mut core = branch.core.lock();
            if !core.state.can_spawn() {
                return Err(wrong_state());
            }
            if cfg.max_branch_children != 0 && core.children.len() >= cfg.max_branch_children {
                return Err(spawn_failed());
            }
            let cx = Cx::with_token(self.cx.token().child());
            core.children.push(ChildRecord {
                task: cx.task_id(),
                thread: None,
                finished: false,
            });
            core.alive += 1;
            (core.children.len() - 1, cx)
        };
        let task = cx.task_id();

        let mut builder =
            thread::Builder::new().name(format!("{}-{index}", cfg.branch_thread_name_prefix));
        if let Some(size) = cfg.branch_stack_size {
            builder = builder.stack_size(size);
        }

        match builder.spawn_scoped(self.scope, move || branch.run_child(index, &cx, job)) {
            Ok(_) => {
                debug!(task = %task, index, parent = %self.cx.task_id(), "branch child spawned");
                Ok(task)
            }
            Err(e) => {
                let mut core = branch.core.lock();
                core.children[index].finished = true;
                core.alive -= 1;
                branch.changed.notify_all();
                drop(core);
                Err(spawn_failed().with_source(e))
            }
        }
    }
}

impl<T> Clone for BranchScope<'_, '_, T> {
    fn clone(&self) -> Self {
        Self {
            branch: self.branch,
            scope: self.scope,
            cx: self.cx.clone(),
        }
    }
}

impl<T> fmt::Debug for BranchScope<'_, '_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchScope")
            .field("task", &self.cx.task_id())
            .field("state", &self.state())
            .finish()
    }
}
