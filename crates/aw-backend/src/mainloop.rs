//! Cooperative event loop
//!
//! One mutex-guarded state value driven by a dedicated named thread. Tasks
//! queued by event sources run on the loop thread while holding the state
//! mutex; application threads lock the same mutex to read the state, and
//! `wait`/`signal` implement the suspension points. This mirrors the
//! threading model of the server's client library: every callback for a
//! connection executes on that connection's loop thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};

enum Task<S> {
    Invoke(Box<dyn FnOnce(&mut S) + Send>),
    Stop,
}

struct Shared<S> {
    state: Mutex<S>,
    cond: Condvar,
}

/// A cooperative loop owning state of type `S`.
pub struct ThreadLoop<S> {
    name: String,
    shared: Arc<Shared<S>>,
    tx: Sender<Task<S>>,
    rx: Option<Receiver<Task<S>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> ThreadLoop<S> {
    /// Create the loop without starting its thread. Tasks queued before
    /// `start` are processed once the thread runs.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
            tx,
            rx: Some(rx),
            thread: None,
        }
    }

    /// Start the loop thread.
    pub fn start(&mut self) -> std::io::Result<()> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| std::io::Error::other("loop already started"))?;
        let shared = Arc::clone(&self.shared);
        let thread = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    match task {
                        Task::Invoke(f) => {
                            let mut state = shared.state.lock();
                            f(&mut state);
                            drop(state);
                            shared.cond.notify_all();
                        }
                        Task::Stop => break,
                    }
                }
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Acquire the loop mutex. Callbacks do not run while the guard is held.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.shared.state.lock()
    }

    /// Release the mutex and block until the loop signals. The mutex is
    /// re-acquired before returning.
    pub fn wait(&self, guard: &mut MutexGuard<'_, S>) {
        self.shared.cond.wait(guard);
    }

    /// Wake all threads blocked in [`wait`](Self::wait).
    pub fn signal(&self) {
        self.shared.cond.notify_all();
    }

    /// A cloneable handle for queueing tasks onto the loop thread.
    pub fn sender(&self) -> LoopSender<S> {
        LoopSender(self.tx.clone())
    }
}

impl<S> Drop for ThreadLoop<S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Task::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Queues closures to run on the loop thread, in order.
pub struct LoopSender<S>(Sender<Task<S>>);

impl<S> Clone for LoopSender<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S> LoopSender<S> {
    /// Returns false if the loop has shut down.
    pub fn invoke(&self, f: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.0.send(Task::Invoke(Box::new(f))).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_order() {
        let mut loop_ = ThreadLoop::new("test-loop", Vec::<u32>::new());
        let sender = loop_.sender();
        for i in 0..10u32 {
            sender.invoke(move |state| state.push(i));
        }
        loop_.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let guard = loop_.lock();
            if guard.len() == 10 {
                assert_eq!(*guard, (0..10).collect::<Vec<_>>());
                break;
            }
            drop(guard);
            assert!(std::time::Instant::now() < deadline, "tasks never ran");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wait_wakes_on_task() {
        let mut loop_ = ThreadLoop::new("test-wake", false);
        loop_.start().unwrap();
        let sender = loop_.sender();

        let mut guard = loop_.lock();
        sender.invoke(|state| *state = true);
        while !*guard {
            loop_.wait(&mut guard);
        }
        drop(guard);
    }
}
