//! Single-threaded cooperative task queue
//!
//! A [`Scheduler`] is drained by exactly one owner, which passes its state into
//! every task. Any thread may enqueue through a [`SchedulerHandle`]; tasks never
//! run on the enqueuing thread.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::trace;

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

struct ScheduledTask<S> {
    due: Option<Instant>,
    task: Task<S>,
}

/// Cloneable, thread-safe producer side of a [`Scheduler`].
pub struct SchedulerHandle<S> {
    tx: Sender<ScheduledTask<S>>,
}

impl<S> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> SchedulerHandle<S> {
    /// Enqueue a task for the next update. Returns `false` if the scheduler is gone.
    pub fn add<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(ScheduledTask {
                due: None,
                task: Box::new(task),
            })
            .is_ok()
    }

    /// Enqueue a task that runs on the first update after `delay` has elapsed.
    pub fn add_delayed<F>(&self, task: F, delay: Duration) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(ScheduledTask {
                due: Some(Instant::now() + delay),
                task: Box::new(task),
            })
            .is_ok()
    }
}

/// Consumer side, owned by the thread that holds `S`.
pub struct Scheduler<S> {
    tx: Sender<ScheduledTask<S>>,
    rx: Receiver<ScheduledTask<S>>,
    delayed: Vec<ScheduledTask<S>>,
}

impl<S> Scheduler<S> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            delayed: Vec::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle<S> {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn add<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        // Can't fail: we own the receiver.
        let _ = self.handle().add(task);
    }

    /// Number of tasks waiting, delayed ones included.
    pub fn pending(&self) -> usize {
        self.rx.len() + self.delayed.len()
    }

    /// Run every task that was due when the call started, in enqueue order.
    ///
    /// Tasks enqueued while running are left for the next update.
    pub fn update(&mut self, state: &mut S) -> usize {
        let now = Instant::now();
        let queued = self.rx.len();
        let mut ready = Vec::with_capacity(queued);

        for scheduled in self.rx.try_iter().take(queued) {
            match scheduled.due {
                Some(due) if due > now => self.delayed.push(scheduled),
                _ => ready.push(scheduled.task),
            }
        }

        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].due.is_some_and(|due| due <= now) {
                ready.push(self.delayed.remove(i).task);
            } else {
                i += 1;
            }
        }

        let count = ready.len();
        for task in ready {
            task(state);
        }

        if count > 0 {
            trace!("Scheduler ran {} tasks", count);
        }
        count
    }
}

impl<S> Default for Scheduler<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let mut scheduler: Scheduler<Vec<u32>> = Scheduler::new();
        let handle = scheduler.handle();
        handle.add(|log| log.push(1));
        handle.add(|log| log.push(2));
        scheduler.add(|log| log.push(3));

        let mut log = Vec::new();
        assert_eq!(scheduler.update(&mut log), 3);
        assert_eq!(log, vec![1, 2, 3]);
    }

    #[test]
    fn test_tasks_enqueued_during_update_wait_for_next_tick() {
        let mut scheduler: Scheduler<Vec<u32>> = Scheduler::new();
        let handle = scheduler.handle();
        let inner = handle.clone();
        handle.add(move |log| {
            log.push(1);
            inner.add(|log| log.push(2));
        });

        let mut log = Vec::new();
        scheduler.update(&mut log);
        assert_eq!(log, vec![1]);
        scheduler.update(&mut log);
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn test_delayed_task_waits() {
        let mut scheduler: Scheduler<Vec<u32>> = Scheduler::new();
        scheduler
            .handle()
            .add_delayed(|log| log.push(1), Duration::from_millis(20));

        let mut log = Vec::new();
        scheduler.update(&mut log);
        assert!(log.is_empty());
        assert_eq!(scheduler.pending(), 1);

        std::thread::sleep(Duration::from_millis(30));
        scheduler.update(&mut log);
        assert_eq!(log, vec![1]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_handle_reports_dropped_scheduler() {
        let scheduler: Scheduler<()> = Scheduler::new();
        let handle = scheduler.handle();
        drop(scheduler);
        assert!(!handle.add(|_| {}));
    }

    #[test]
    fn test_tasks_from_other_threads() {
        let mut scheduler: Scheduler<Vec<u32>> = Scheduler::new();
        let handle = scheduler.handle();
        std::thread::spawn(move || {
            handle.add(|log| log.push(7));
        })
        .join()
        .unwrap();

        let mut log = Vec::new();
        scheduler.update(&mut log);
        assert_eq!(log, vec![7]);
    }
}
