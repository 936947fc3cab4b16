//! Cooperative single-CPU thread model the memory manager suspends and
//! resumes threads through. Only one thread runs at a time; the rest are
//! ready, waiting on a [`WaitQueue`], or killed.

use std::collections::VecDeque;

use log::{debug, info};

use crate::common::{TaskId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Waiting,
    Killed,
}

#[derive(Debug, Clone)]
struct ThreadControl {
    task: TaskId,
    status: ThreadStatus,
}

/// Set of parked entries released together. Release order is not part of
/// the contract, only that everything parked gets released.
#[derive(Debug, Clone)]
pub struct WaitQueue<T> {
    waiters: Vec<T>,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    pub fn push(&mut self, waiter: T) {
        self.waiters.push(waiter);
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.waiters.iter()
    }

    pub fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.waiters)
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    threads: Vec<ThreadControl>,
    ready: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    dispatches: usize,
}

impl Scheduler {
    pub fn init() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, task: TaskId) -> ThreadId {
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(ThreadControl {
            task,
            status: ThreadStatus::Ready,
        });
        self.ready.push_back(id);
        info!("Spawned {} for {}", id, task);
        id
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        (thread.0 as usize) < self.threads.len()
    }

    pub fn task_of(&self, thread: ThreadId) -> Option<TaskId> {
        self.threads.get(thread.0 as usize).map(|t| t.task)
    }

    pub fn status(&self, thread: ThreadId) -> Option<ThreadStatus> {
        self.threads.get(thread.0 as usize).map(|t| t.status)
    }

    pub fn is_killed(&self, thread: ThreadId) -> bool {
        self.status(thread) == Some(ThreadStatus::Killed)
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    pub fn threads_of(&self, task: TaskId) -> Vec<ThreadId> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.task == task)
            .map(|(i, _)| ThreadId(i as u32))
            .collect()
    }

    /// Parks the thread. The caller is responsible for putting it on the
    /// wait queue it will be released from.
    pub fn suspend(&mut self, thread: ThreadId) {
        if let Some(control) = self.threads.get_mut(thread.0 as usize) {
            if control.status == ThreadStatus::Killed {
                return;
            }
            control.status = ThreadStatus::Waiting;
            self.ready.retain(|t| *t != thread);
            if self.current == Some(thread) {
                self.current = None;
            }
            debug!("Suspended {}", thread);
        }
    }

    /// Makes a waiting thread ready again. Killed threads stay killed.
    pub fn resume(&mut self, thread: ThreadId) {
        if let Some(control) = self.threads.get_mut(thread.0 as usize) {
            if control.status == ThreadStatus::Waiting {
                control.status = ThreadStatus::Ready;
                self.ready.push_back(thread);
                debug!("Resumed {}", thread);
            }
        }
    }

    pub fn kill(&mut self, thread: ThreadId) {
        if let Some(control) = self.threads.get_mut(thread.0 as usize) {
            if control.status != ThreadStatus::Killed {
                control.status = ThreadStatus::Killed;
                self.ready.retain(|t| *t != thread);
                if self.current == Some(thread) {
                    self.current = None;
                }
                info!("Killed {}", thread);
            }
        }
    }

    /// Hands the CPU to the next ready thread, rotating the one that was
    /// running to the back of the ready queue.
    pub fn dispatch(&mut self) -> Option<ThreadId> {
        self.dispatches += 1;
        if let Some(running) = self.current.take() {
            if let Some(control) = self.threads.get_mut(running.0 as usize) {
                if control.status == ThreadStatus::Running {
                    control.status = ThreadStatus::Ready;
                    self.ready.push_back(running);
                }
            }
        }
        let next = self.ready.pop_front()?;
        if let Some(control) = self.threads.get_mut(next.0 as usize) {
            control.status = ThreadStatus::Running;
        }
        self.current = Some(next);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rotates_ready_threads() {
        let mut scheduler = Scheduler::init();
        let a = scheduler.spawn(TaskId(0));
        let b = scheduler.spawn(TaskId(0));
        assert_eq!(scheduler.dispatch(), Some(a));
        assert_eq!(scheduler.status(a), Some(ThreadStatus::Running));
        assert_eq!(scheduler.dispatch(), Some(b));
        assert_eq!(scheduler.dispatch(), Some(a));
        assert_eq!(scheduler.dispatch_count(), 3);
    }

    #[test]
    fn suspended_thread_is_not_dispatched_until_resumed() {
        let mut scheduler = Scheduler::init();
        let a = scheduler.spawn(TaskId(0));
        let b = scheduler.spawn(TaskId(0));
        scheduler.suspend(a);
        assert_eq!(scheduler.dispatch(), Some(b));
        assert_eq!(scheduler.dispatch(), Some(b));
        scheduler.resume(a);
        assert_eq!(scheduler.dispatch(), Some(a));
    }

    #[test]
    fn killed_thread_stays_killed() {
        let mut scheduler = Scheduler::init();
        let a = scheduler.spawn(TaskId(0));
        scheduler.suspend(a);
        scheduler.kill(a);
        scheduler.resume(a);
        scheduler.suspend(a);
        assert!(scheduler.is_killed(a));
        assert_eq!(scheduler.dispatch(), None);
    }

    #[test]
    fn wait_queue_releases_everything() {
        let mut queue = WaitQueue::new();
        queue.push(ThreadId(1));
        queue.push(ThreadId(2));
        assert_eq!(queue.len(), 2);
        let released = queue.take_all();
        assert_eq!(released.len(), 2);
        assert!(queue.is_empty());
    }
}
