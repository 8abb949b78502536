//! Scheduled sync task
//!
//! One abstraction for both ways of driving cycles:
//! - `Schedule::Once`: the caller invokes [`SyncTask::run`] (or
//!   [`SyncTask::tick`]) whenever it wants a cycle
//! - `Schedule::Every`: [`SyncTask::spawn`] loops on a dedicated thread,
//!   sleeping between cycles until stopped
//!
//! Both shapes run the exact same cycle code.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::cycle::{CycleError, CycleOptions, CyclePhase, CycleReport, run_cycle};
use super::timing::{cooldown_elapsed, next_backoff};
use crate::classify::Classifier;
use crate::service::TriageService;
use crate::source::MailboxSource;

/// Cooperative stop flag with an interruptible wait
///
/// Clones share the same flag.
#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until stopped; returns whether stop was requested
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        if self.rx.recv_timeout(timeout).is_ok() {
            // Wake any other waiter too
            let _ = self.tx.send(());
        }
        self.is_stopped()
    }
}

/// When cycles run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One cycle per invocation
    Once,
    /// Repeat with this interval until stopped
    Every(Duration),
}

impl Schedule {
    fn interval(&self) -> Duration {
        match self {
            Schedule::Once => Duration::ZERO,
            Schedule::Every(interval) => *interval,
        }
    }
}

/// What a repeating task does after a connect, auth or listing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop monitoring
    Stop,
    /// Keep going, doubling the delay up to `max`
    Backoff { max: Duration },
}

/// Progress notifications for presentation consumers
#[derive(Debug, Clone)]
pub enum TaskEvent {
    CycleFinished(CycleReport),
    CycleFailed(CycleError),
    /// The task loop exited
    Stopped,
}

/// A sync loop bound to one service
pub struct SyncTask {
    source: Arc<dyn MailboxSource>,
    classifier: Arc<dyn Classifier>,
    service: Arc<TriageService>,
    options: CycleOptions,
    schedule: Schedule,
    failure_policy: FailurePolicy,
    events: Option<flume::Sender<TaskEvent>>,
    /// Start of the most recent cycle attempt, successful or not
    last_attempt: Mutex<Option<DateTime<Utc>>>,
}

impl SyncTask {
    pub fn new(
        source: Arc<dyn MailboxSource>,
        classifier: Arc<dyn Classifier>,
        service: Arc<TriageService>,
        options: CycleOptions,
        schedule: Schedule,
    ) -> Self {
        Self {
            source,
            classifier,
            service,
            options,
            schedule,
            failure_policy: FailurePolicy::Stop,
            events: None,
            last_attempt: Mutex::new(None),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Subscribe to cycle events
    pub fn events(&mut self) -> flume::Receiver<TaskEvent> {
        let (tx, rx) = flume::unbounded();
        self.events = Some(tx);
        rx
    }

    pub fn service(&self) -> &Arc<TriageService> {
        &self.service
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening
            let _ = tx.send(event);
        }
    }

    /// Run exactly one cycle now
    pub fn run_once(&self, stop: &StopSignal) -> Result<CycleReport, CycleError> {
        *self.last_attempt.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        let result = run_cycle(
            self.source.as_ref(),
            self.classifier.as_ref(),
            &self.service,
            &self.options,
            stop,
        );

        match &result {
            Ok(report) => self.emit(TaskEvent::CycleFinished(report.clone())),
            Err(e) => self.emit(TaskEvent::CycleFailed(e.clone())),
        }
        result
    }

    /// Run a cycle only if the schedule's interval has passed since the last one
    ///
    /// Failed and empty cycles count as attempts. Before this task has
    /// attempted anything, the last committed cycle of the identity is used.
    /// Returns `None` while still in cooldown. Meant for callers that drive
    /// the task from their own loop.
    pub fn tick(&self, stop: &StopSignal) -> Option<Result<CycleReport, CycleError>> {
        let attempted = *self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        let last = attempted.max(self.service.cursor().last_cycle_at);
        if !cooldown_elapsed(last, self.schedule.interval()) {
            return None;
        }
        Some(self.run_once(stop))
    }

    /// Run on the caller's thread according to the schedule
    ///
    /// `Once` runs a single cycle. `Every` repeats until the stop signal
    /// fires, or until a cycle fails under `FailurePolicy::Stop`.
    pub fn run(&self, stop: &StopSignal) -> Result<(), CycleError> {
        let result = match self.schedule {
            Schedule::Once => self.run_once(stop).map(|_| ()),
            Schedule::Every(interval) => self.run_every(interval, stop),
        };
        self.emit(TaskEvent::Stopped);
        result
    }

    fn run_every(&self, interval: Duration, stop: &StopSignal) -> Result<(), CycleError> {
        let identity = self.service.identity().clone();
        info!("[{}] monitoring every {:?}", identity, interval);
        let mut delay = interval;

        while !stop.is_stopped() {
            delay = match self.run_once(stop) {
                Ok(_) | Err(CycleError::AlreadyRunning) => interval,
                Err(e) => match self.failure_policy {
                    FailurePolicy::Stop => {
                        error!("[{}] monitoring stopped: {}", identity, e);
                        return Err(e);
                    }
                    FailurePolicy::Backoff { max } => {
                        let next = next_backoff(delay, interval, max);
                        warn!("[{}] retrying in {:?}", identity, next);
                        next
                    }
                },
            };

            self.service.set_phase(CyclePhase::Sleeping);
            if stop.wait(delay) {
                break;
            }
        }

        self.service.set_phase(CyclePhase::Idle);
        info!("[{}] monitoring stopped", identity);
        Ok(())
    }

    /// Run the schedule on a dedicated thread
    pub fn spawn(self) -> std::io::Result<TaskHandle> {
        let stop = StopSignal::new();
        let thread_stop = stop.clone();
        let name = format!("triage-sync-{}", &self.service.identity().key()[..8]);

        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&thread_stop))?;

        Ok(TaskHandle { stop, join })
    }
}

/// Handle to a spawned sync task
pub struct TaskHandle {
    stop: StopSignal,
    join: JoinHandle<Result<(), CycleError>>,
}

impl TaskHandle {
    /// Ask the task to stop; an in-flight message finishes first
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task thread to exit
    pub fn join(self) -> Result<(), CycleError> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => {
                error!("Sync thread panicked");
                Ok(())
            }
        }
    }
}
