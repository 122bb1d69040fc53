//! Per-timeline trigger scheduler.
//!
//! A [`Trigger`] owns an ordered list of [`Timeslice`]s. Once started it walks
//! them in order on a background task, runs every timer of a timeslice to
//! completion before starting the next one, and forwards each firing onto a
//! single ready channel. Consumers therefore see one total order of firings per
//! trigger.

mod timer;
mod timeslice;

pub use timer::{DelayPolicy, FiringId, Firings, TimerTask};
pub use timeslice::Timeslice;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::TriggerError;

/// Capacity of the ready channel handed out by [`Trigger::start`].
pub const READY_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Running,
    Stopped,
}

pub struct Trigger {
    name: String,
    continuous: bool,
    rng: fastrand::Rng,
    timeslices: Vec<Timeslice>,
    stop: CancellationToken,
    runner: Option<JoinHandle<()>>,
    state: TriggerState,
}

impl Trigger {
    pub fn new(name: impl Into<String>, continuous: bool) -> Self {
        Self::with_rng(name, continuous, fastrand::Rng::new())
    }

    /// Same as [`Trigger::new`] but every dynamic delay is drawn from a
    /// generator seeded with `seed`, so runs are reproducible.
    pub fn with_seed(name: impl Into<String>, continuous: bool, seed: u64) -> Self {
        Self::with_rng(name, continuous, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(name: impl Into<String>, continuous: bool, rng: fastrand::Rng) -> Self {
        Self {
            name: name.into(),
            continuous,
            rng,
            timeslices: Vec::new(),
            stop: CancellationToken::new(),
            runner: None,
            state: TriggerState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Configured timeslices. Empty once the trigger has been started since
    /// they move onto the runner task.
    pub fn timeslices(&self) -> &[Timeslice] {
        &self.timeslices
    }

    /// Appends a timeslice and returns its index for use with the `add_*`
    /// methods.
    pub fn new_timeslice(&mut self, name: impl Into<String>, repeat: u32, single_use: bool) -> usize {
        self.timeslices.push(Timeslice::new(name, repeat, single_use));
        self.timeslices.len() - 1
    }

    pub fn add_static_trigger(
        &mut self,
        timeslice: usize,
        id: impl Into<FiringId>,
        millis: u64,
        repeat: u32,
    ) -> Result<(), TriggerError> {
        self.add_timer(timeslice, id, DelayPolicy::Static { millis }, repeat)
    }

    pub fn add_dynamic_trigger(
        &mut self,
        timeslice: usize,
        id: impl Into<FiringId>,
        min_millis: u64,
        vary_millis: u64,
        repeat: u32,
    ) -> Result<(), TriggerError> {
        self.add_timer(
            timeslice,
            id,
            DelayPolicy::Dynamic {
                min_millis,
                vary_millis,
            },
            repeat,
        )
    }

    pub fn add_timer(
        &mut self,
        timeslice: usize,
        id: impl Into<FiringId>,
        policy: DelayPolicy,
        repeat: u32,
    ) -> Result<(), TriggerError> {
        match self.state {
            TriggerState::Idle => {}
            TriggerState::Running => return Err(TriggerError::AlreadyStarted(self.name.clone())),
            TriggerState::Stopped => return Err(TriggerError::Stopped(self.name.clone())),
        }
        let rng = self.rng.fork();
        let slice = self
            .timeslices
            .get_mut(timeslice)
            .ok_or_else(|| TriggerError::UnknownTimeslice {
                trigger: self.name.clone(),
                index: timeslice,
            })?;
        slice.push(TimerTask::new(id, policy, repeat, rng));
        Ok(())
    }

    /// Moves the timeslices onto a background task and returns the ready
    /// channel. The channel closes once the trigger stops, either because it
    /// ran out of work or because [`Trigger::stop`] was called.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FiringId>, TriggerError> {
        match self.state {
            TriggerState::Idle => {}
            TriggerState::Running => return Err(TriggerError::AlreadyStarted(self.name.clone())),
            TriggerState::Stopped => return Err(TriggerError::Stopped(self.name.clone())),
        }
        if self.timeslices.iter().all(|t| t.timers().is_empty()) {
            return Err(TriggerError::NoTimers(self.name.clone()));
        }

        let (ready_tx, ready_rx) = mpsc::channel(READY_CAPACITY);
        let runner = Runner {
            name: self.name.clone(),
            continuous: self.continuous,
            timeslices: std::mem::take(&mut self.timeslices),
            stop: self.stop.clone(),
            ready: ready_tx,
        };

        info!(trigger = %self.name, continuous = self.continuous, "Starting trigger");
        self.runner = Some(tokio::spawn(runner.run()));
        self.state = TriggerState::Running;
        Ok(ready_rx)
    }

    /// Requests a stop and waits for the runner to exit. Calling it again is a
    /// no-op.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(runner) = self.runner.take() {
            if let Err(e) = runner.await {
                warn!(trigger = %self.name, "Trigger runner ended abnormally: {}", e);
            }
        }
        if self.state != TriggerState::Stopped {
            debug!(trigger = %self.name, "Trigger stopped");
        }
        self.state = TriggerState::Stopped;
    }

    pub fn state(&self) -> TriggerState {
        match (&self.runner, self.state) {
            (Some(runner), TriggerState::Running) if runner.is_finished() => TriggerState::Stopped,
            (_, state) => state,
        }
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Runner {
    name: String,
    continuous: bool,
    timeslices: Vec<Timeslice>,
    stop: CancellationToken,
    ready: mpsc::Sender<FiringId>,
}

impl Runner {
    async fn run(self) {
        let Runner {
            name,
            continuous,
            mut timeslices,
            stop,
            ready,
        } = self;

        let mut fired: u64 = 0;
        'run: loop {
            if stop.is_cancelled() {
                break;
            }
            if !timeslices.iter().any(Timeslice::has_work) {
                debug!(trigger = %name, "Nothing left to run");
                break;
            }

            for timeslice in timeslices.iter_mut() {
                if !timeslice.is_allowed_to_run() {
                    continue;
                }
                trace!(trigger = %name, "Running {}", timeslice);
                for _ in 0..timeslice.repeat() {
                    for timer in timeslice.timers_mut() {
                        match forward(&stop, &ready, timer.invoke()).await {
                            Some(count) => fired += count,
                            None => break 'run,
                        }
                    }
                }
                timeslice.finish_pass();
            }

            if !continuous {
                break;
            }
        }

        info!(trigger = %name, fired, "Trigger finished");
        // Dropping `ready` closes the channel for the consumer.
    }
}

/// Drains one timer run into the ready channel. Returns the number of
/// firings forwarded, or `None` when the trigger has to stop.
async fn forward(stop: &CancellationToken, ready: &mpsc::Sender<FiringId>, mut firings: Firings) -> Option<u64> {
    let mut count = 0;
    loop {
        let id = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            next = firings.next() => match next {
                Some(id) => id,
                None => return Some(count),
            },
        };
        tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            sent = ready.send(id) => {
                if sent.is_err() {
                    debug!("Ready channel closed by its consumer");
                    return None;
                }
            }
        }
        count += 1;
    }
}
