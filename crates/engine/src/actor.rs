//! Actors, their cells, and the handles external threads use to reach them
//!
//! An actor's state is only ever touched during its own turn. Other threads
//! interact through an [`ActorControl`]: they enqueue jobs, signal that new
//! input is available, or request close. Each request schedules a turn.
//!
//! One turn runs, in order:
//! 1. `on_starting` (first turn only)
//! 2. every job that was queued when the turn began
//! 3. `on_consume`, if input was signalled or the actor yielded
//! 4. the transition to `Closing` if close was requested
//! 5. the transition to `Closed` once closing and no work is pending
//!
//! Any callback returning an error, or panicking, fails the actor.

use crate::clock::ActorClock;
use crate::lifecycle::{ActorState, CompletionSignal};
use crate::scheduler::{Schedulable, SchedulerInner};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tidelog_core::{Clock, Error, FailureListener, HealthMonitorable, HealthStatus, Result};
use tracing::{debug, error, warn};

/// A cooperative unit of work
///
/// Callbacks must not block: data that is not yet available should end the
/// turn, and the actor is woken by [`ActorControl::signal_consume`] or a job.
pub trait Actor: Send + Sized + 'static {
    /// Name used in logs and errors
    fn name(&self) -> String {
        "actor".to_string()
    }

    /// First turn
    fn on_starting(&mut self, _ctx: &mut ActorContext<Self>) -> Result<()> {
        Ok(())
    }

    /// Input is available, or the actor yielded on its previous turn
    fn on_consume(&mut self, ctx: &mut ActorContext<Self>) -> Result<()>;

    /// Close was requested; stop taking new input
    fn on_closing(&mut self, _ctx: &mut ActorContext<Self>) {}

    /// Last callback of a clean close
    fn on_closed(&mut self) {}

    /// The actor failed with `error`
    fn on_failed(&mut self, _error: &Error) {}

    /// Whether side effects the actor owns are still outstanding.
    /// `Closing` does not complete while this returns true.
    fn has_pending_work(&self) -> bool {
        false
    }
}

type Job<A> = Box<dyn FnOnce(&mut A, &mut ActorContext<A>) -> Result<()> + Send>;

pub(crate) struct ActorCell<A: Actor> {
    name: String,
    actor: Mutex<A>,
    inbox: Mutex<VecDeque<Job<A>>>,
    scheduled: AtomicBool,
    consume_requested: AtomicBool,
    close_requested: AtomicBool,
    state: AtomicU8,
    failure_listeners: Mutex<Vec<Box<dyn FailureListener>>>,
    started: CompletionSignal,
    closed: CompletionSignal,
    scheduler: Weak<SchedulerInner>,
    clock: Arc<dyn Clock>,
}

impl<A: Actor> ActorCell<A> {
    pub(crate) fn new(actor: A, scheduler: &Arc<SchedulerInner>) -> Arc<Self> {
        Arc::new(ActorCell {
            name: actor.name(),
            actor: Mutex::new(actor),
            inbox: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            consume_requested: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            state: AtomicU8::new(ActorState::Starting as u8),
            failure_listeners: Mutex::new(Vec::new()),
            started: CompletionSignal::new(),
            closed: CompletionSignal::new(),
            scheduler: Arc::downgrade(scheduler),
            clock: scheduler.clock(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Enqueue a turn unless one is already queued or running
    pub(crate) fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let enqueued = match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.enqueue(Arc::clone(self) as Arc<dyn Schedulable>),
            None => Err(Error::ActorClosed(self.name.clone())),
        };
        if let Err(e) = enqueued {
            self.scheduled.store(false, Ordering::SeqCst);
            warn!(actor = %self.name, error = %e, "Scheduler is gone, turn dropped");
        }
    }

    fn has_runnable_work(&self) -> bool {
        match self.state() {
            ActorState::Closed | ActorState::Failed => false,
            ActorState::Starting => true,
            ActorState::Started => {
                !self.inbox.lock().is_empty()
                    || self.consume_requested.load(Ordering::SeqCst)
                    || self.close_requested.load(Ordering::SeqCst)
            }
            ActorState::Closing => !self.inbox.lock().is_empty(),
        }
    }

    fn turn(self: &Arc<Self>, actor: &mut A, ctx: &mut ActorContext<A>) -> Result<()> {
        if self.state() == ActorState::Starting {
            actor.on_starting(ctx)?;
            self.set_state(ActorState::Started);
            self.started.complete(ActorState::Started);
            self.consume_requested.store(true, Ordering::SeqCst);
            debug!(actor = %self.name, "Actor started");
        }

        let jobs: Vec<Job<A>> = self.inbox.lock().drain(..).collect();
        for job in jobs {
            job(actor, ctx)?;
        }

        if self.state() == ActorState::Started {
            if self.consume_requested.swap(false, Ordering::SeqCst) {
                actor.on_consume(ctx)?;
            }
            if self.close_requested.load(Ordering::SeqCst) {
                self.set_state(ActorState::Closing);
                debug!(actor = %self.name, "Actor closing");
                actor.on_closing(ctx);
            }
        }

        if self.state() == ActorState::Closing && !actor.has_pending_work() {
            {
                let inbox = self.inbox.lock();
                if !inbox.is_empty() {
                    return Ok(());
                }
                self.set_state(ActorState::Closed);
            }
            actor.on_closed();
            self.closed.complete(ActorState::Closed);
            debug!(actor = %self.name, "Actor closed");
        }
        Ok(())
    }

    fn fail(&self, actor: &mut A, error: Error) {
        if self.state().is_terminal() {
            return;
        }
        // Under the inbox lock so `run` cannot slip a job in after the clear
        let dropped = {
            let mut inbox = self.inbox.lock();
            self.set_state(ActorState::Failed);
            std::mem::take(&mut *inbox)
        };
        error!(
            actor = %self.name,
            error = %error,
            dropped_jobs = dropped.len(),
            "Actor failed"
        );
        actor.on_failed(&error);
        drop(dropped);

        self.started.complete(ActorState::Failed);
        self.closed.complete(ActorState::Failed);

        let listeners = std::mem::take(&mut *self.failure_listeners.lock());
        for listener in listeners {
            listener.on_failure();
        }
    }
}

impl<A: Actor> Schedulable for ActorCell<A> {
    fn run_turn(self: Arc<Self>) {
        {
            let _clock = ActorClock::install(Arc::clone(&self.clock));
            let mut actor = self.actor.lock();
            if !self.state().is_terminal() {
                let mut ctx = ActorContext {
                    cell: Arc::clone(&self),
                };
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| self.turn(&mut actor, &mut ctx)));
                let result = outcome.unwrap_or_else(|payload| {
                    Err(Error::ActorPanicked {
                        actor: self.name.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                });
                if let Err(e) = result {
                    self.fail(&mut actor, e);
                }
            }
        }

        // Requests that arrived while we ran saw `scheduled` set and did not
        // enqueue; pick them up here.
        self.scheduled.store(false, Ordering::SeqCst);
        if self.has_runnable_work() {
            self.schedule();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

/// Passed to every actor callback
pub struct ActorContext<A: Actor> {
    cell: Arc<ActorCell<A>>,
}

impl<A: Actor> ActorContext<A> {
    /// Handle to this actor, for handing to other threads
    pub fn control(&self) -> ActorControl<A> {
        ActorControl {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Run `on_consume` again after other actors had a turn
    pub fn yield_now(&mut self) {
        self.cell.consume_requested.store(true, Ordering::SeqCst);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActorState {
        self.cell.state()
    }

    /// Name of the running actor
    pub fn name(&self) -> &str {
        &self.cell.name
    }
}

/// Thread-safe handle to a running actor
pub struct ActorControl<A: Actor> {
    cell: Arc<ActorCell<A>>,
}

impl<A: Actor> Clone for ActorControl<A> {
    fn clone(&self) -> Self {
        ActorControl {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: Actor> ActorControl<A> {
    pub(crate) fn new(cell: Arc<ActorCell<A>>) -> Self {
        ActorControl { cell }
    }

    /// Run `job` on the actor's next turn
    ///
    /// This is how callbacks arriving on foreign threads hand control back
    /// to the actor. Fails if the actor already closed or failed. A job
    /// accepted here is dropped unrun if an earlier job fails the actor, so
    /// anything that must happen regardless belongs outside the job.
    pub fn run<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut A, &mut ActorContext<A>) -> Result<()> + Send + 'static,
    {
        {
            let mut inbox = self.cell.inbox.lock();
            if self.cell.state().is_terminal() {
                return Err(Error::ActorClosed(self.cell.name.clone()));
            }
            inbox.push_back(Box::new(job));
        }
        self.cell.schedule();
        Ok(())
    }

    /// Tell the actor input is available. No-op once it stopped consuming.
    pub fn signal_consume(&self) {
        if self.cell.state() == ActorState::Closing || self.cell.state().is_terminal() {
            return;
        }
        self.cell.consume_requested.store(true, Ordering::SeqCst);
        self.cell.schedule();
    }

    /// Request close. Every call returns the same signal, which completes
    /// with `Closed`, or with `Failed` if the actor fails first.
    pub fn close(&self) -> CompletionSignal {
        if !self.cell.state().is_terminal()
            && !self.cell.close_requested.swap(true, Ordering::SeqCst)
        {
            self.cell.schedule();
        }
        self.cell.closed.clone()
    }

    /// Completes once `on_starting` returned, or with `Failed`
    pub fn started(&self) -> CompletionSignal {
        self.cell.started.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActorState {
        self.cell.state()
    }

    /// Actor name
    pub fn name(&self) -> &str {
        &self.cell.name
    }
}

impl<A: Actor> HealthMonitorable for ActorControl<A> {
    fn health_status(&self) -> HealthStatus {
        if self.cell.state().is_terminal() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    /// A listener added after the failure is notified immediately
    fn add_failure_listener(&self, listener: Box<dyn FailureListener>) {
        let mut listeners = self.cell.failure_listeners.lock();
        if self.cell.state() == ActorState::Failed {
            drop(listeners);
            listener.on_failure();
        } else {
            listeners.push(listener);
        }
    }
}

impl<A: Actor> fmt::Debug for ActorControl<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorControl")
            .field("name", &self.cell.name)
            .field("state", &self.cell.state())
            .finish()
    }
}
