//! Session executor: serializes all view-affecting work onto one logical
//! thread. Backend completions arriving on arbitrary threads are re-marshaled
//! here as boxed tasks before they may touch the position model.

use crate::view::{DisassemblyView, DocumentCallback};
use std::sync::mpsc::{channel, Receiver, Sender};

pub type ViewTask<D> = Box<dyn FnOnce(&mut DisassemblyView<D>) + Send>;

/// Sending half, cloneable and `Send`; owned by backend completions.
pub struct SessionHandle<D: DocumentCallback> {
    tasks: Sender<ViewTask<D>>,
}

impl<D: DocumentCallback> Clone for SessionHandle<D> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
        }
    }
}

impl<D: DocumentCallback> SessionHandle<D> {
    /// Queue a task for execution on the view-owning executor. Delivery is
    /// best-effort: a task sent after the executor is gone is dropped, which
    /// is exactly the behavior wanted for late completions.
    pub fn submit(&self, task: impl FnOnce(&mut DisassemblyView<D>) + Send + 'static) {
        _ = self.tasks.send(Box::new(task));
    }
}

/// Receiving half, owned by whichever thread owns the view.
pub struct SessionExecutor<D: DocumentCallback> {
    tasks: Receiver<ViewTask<D>>,
}

impl<D: DocumentCallback> SessionExecutor<D> {
    /// Drain and run every queued task. Returns the number of tasks executed.
    /// Tasks may queue further tasks (retry attempts do); those are picked up
    /// within the same drain.
    pub fn run_until_idle(&self, view: &mut DisassemblyView<D>) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.tasks.try_recv() {
            task(view);
            executed += 1;
        }
        executed
    }

    /// Block on the task queue until every [`SessionHandle`] is dropped.
    pub fn run(&self, view: &mut DisassemblyView<D>) {
        while let Ok(task) = self.tasks.recv() {
            task(view);
        }
    }
}

pub fn session_channel<D: DocumentCallback>() -> (SessionExecutor<D>, SessionHandle<D>) {
    let (task_tx, task_rx) = channel::<ViewTask<D>>();
    (
        SessionExecutor { tasks: task_rx },
        SessionHandle { tasks: task_tx },
    )
}
