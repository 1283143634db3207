//! One long-lived worker thread per slot.
//!
//! Each worker owns the environment of its slot and executes jobs sent over
//! its channel one at a time, so a slot's environment is never touched by two
//! tasks at once. A batched call sends one job per targeted slot and then
//! collects exactly that many results before returning.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::core::{GymError, Result};
use crate::vector::runner::panic_message;

type Job<E> = Box<dyn FnOnce(&mut E) + Send>;

/// A unit of work for one slot.
pub(crate) type SlotTask<E, T> = Box<dyn FnOnce(&mut E) -> Result<T> + Send>;

/// Why a slot stopped accepting regular work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    /// Environment code panicked; the worker itself is still alive.
    Panicked,
    /// A job missed the deadline; the worker may be stuck inside it.
    TimedOut,
}

struct Worker<E> {
    jobs: Sender<Job<E>>,
    handle: Option<JoinHandle<()>>,
    fault: Option<Fault>,
}

pub(crate) struct SlotPool<E> {
    workers: Vec<Worker<E>>,
    timeout: Option<Duration>,
}

impl<E: Send + 'static> SlotPool<E> {
    /// Move every environment onto its own worker thread; `envs[i]` becomes slot `i`.
    pub(crate) fn spawn(envs: Vec<E>, timeout: Option<Duration>) -> Result<Self> {
        let mut workers = Vec::with_capacity(envs.len());
        for (slot, env) in envs.into_iter().enumerate() {
            let (jobs, inbox) = unbounded::<Job<E>>();
            let handle = thread::Builder::new()
                .name(format!("env-slot-{slot}"))
                .spawn(move || worker_loop(env, inbox))?;
            workers.push(Worker { jobs, handle: Some(handle), fault: None });
        }
        debug!(slots = workers.len(), "spawned slot workers");
        Ok(Self { workers, timeout })
    }

    /// Slots whose worker still drains its queue: every slot except those
    /// that missed a deadline. Slots faulted by a panic are included.
    pub(crate) fn live_slots(&self) -> Vec<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.fault != Some(Fault::TimedOut))
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Run `tasks` (slot, job) concurrently and return their outputs in task order.
    ///
    /// All tasks are awaited before returning. If any task fails, the failure of
    /// the lowest task position is returned as `InstanceTaskFailure`. If the
    /// deadline passes, every slot still running is marked faulted and
    /// `InstanceTimeout` names the first of them. Faulted slots are refused.
    pub(crate) fn run<T: Send + 'static>(&mut self, tasks: Vec<(usize, SlotTask<E, T>)>) -> Result<Vec<T>> {
        self.check(&tasks, |fault| fault.is_none())?;
        self.dispatch(tasks)
    }

    /// Like [`run`](Self::run) but also reaches slots faulted by a panic.
    /// Used for teardown, where the environment must still be closed.
    pub(crate) fn run_on_live<T: Send + 'static>(&mut self, tasks: Vec<(usize, SlotTask<E, T>)>) -> Result<Vec<T>> {
        self.check(&tasks, |fault| fault != Some(Fault::TimedOut))?;
        self.dispatch(tasks)
    }

    fn check<T>(&self, tasks: &[(usize, SlotTask<E, T>)], accepts: impl Fn(Option<Fault>) -> bool) -> Result<()> {
        for (slot, _) in tasks {
            match self.workers.get(*slot) {
                None => return Err(GymError::Other(format!("slot {slot} out of range"))),
                Some(w) if !accepts(w.fault) => return Err(GymError::SlotFaulted(*slot)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn dispatch<T: Send + 'static>(&mut self, tasks: Vec<(usize, SlotTask<E, T>)>) -> Result<Vec<T>> {
        let count = tasks.len();
        let slots: Vec<usize> = tasks.iter().map(|(slot, _)| *slot).collect();
        let (done_tx, done_rx) = bounded::<(usize, Result<T>)>(count);
        for (pos, (slot, task)) in tasks.into_iter().enumerate() {
            let done_tx = done_tx.clone();
            let job: Job<E> = Box::new(move |env: &mut E| {
                let out = catch_unwind(AssertUnwindSafe(|| task(env)))
                    .unwrap_or_else(|payload| Err(GymError::Panicked(panic_message(payload.as_ref()))));
                let _ = done_tx.send((pos, out));
            });
            if self.workers[slot].jobs.send(job).is_err() {
                // The worker thread is gone; its job was dropped with the channel.
                self.workers[slot].fault = Some(Fault::Panicked);
            }
        }
        drop(done_tx);

        let outputs = self.collect(&slots, done_rx)?;

        let mut values = Vec::with_capacity(count);
        let mut first_err = None;
        for (pos, out) in outputs.into_iter().enumerate() {
            match out {
                Ok(v) => values.push(v),
                Err(e) => {
                    let slot = slots[pos];
                    if matches!(e, GymError::Panicked(_)) && self.workers[slot].fault.is_none() {
                        self.workers[slot].fault = Some(Fault::Panicked);
                    }
                    warn!(slot, error = %e, "environment task failed");
                    if first_err.is_none() {
                        first_err = Some(GymError::in_slot(slot, e));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    fn collect<T>(&mut self, slots: &[usize], done_rx: Receiver<(usize, Result<T>)>) -> Result<Vec<Result<T>>> {
        let mut outputs: Vec<Option<Result<T>>> = slots.iter().map(|_| None).collect();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        for _ in 0..slots.len() {
            let received = match deadline {
                Some(d) => done_rx.recv_deadline(d),
                None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((pos, out)) => outputs[pos] = Some(out),
                Err(RecvTimeoutError::Timeout) => {
                    let pending: Vec<usize> = outputs
                        .iter()
                        .zip(slots)
                        .filter(|(out, _)| out.is_none())
                        .map(|(_, &slot)| slot)
                        .collect();
                    for &slot in &pending {
                        self.workers[slot].fault = Some(Fault::TimedOut);
                    }
                    let timeout = self.timeout.unwrap_or_default();
                    warn!(?pending, ?timeout, "slots missed the batch deadline");
                    return Err(GymError::InstanceTimeout { slot: pending[0], timeout });
                }
                // Every sender is gone: the remaining jobs were dropped unrun.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(outputs
            .into_iter()
            .map(|out| out.unwrap_or_else(|| Err(GymError::NotReady("worker exited before running the task".into()))))
            .collect())
    }

    /// Stop all workers. Live workers are joined; workers that missed a
    /// deadline are detached since they may be stuck inside their environment.
    pub(crate) fn shutdown(&mut self) {
        for (slot, worker) in self.workers.drain(..).enumerate() {
            let Worker { jobs, handle, fault } = worker;
            drop(jobs);
            match handle {
                Some(handle) if fault != Some(Fault::TimedOut) => {
                    if handle.join().is_err() {
                        warn!(slot, "slot worker panicked during shutdown");
                    }
                }
                _ => warn!(slot, "detaching timed out slot worker"),
            }
        }
    }
}

fn worker_loop<E>(mut env: E, inbox: Receiver<Job<E>>) {
    while let Ok(job) = inbox.recv() {
        job(&mut env);
    }
}
