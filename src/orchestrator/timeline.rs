use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::EventType;
use crate::error::TriggerError;
use crate::shipper::Ship;
use crate::trigger::{DelayPolicy, FiringId, Trigger};

/// What happens when a firing id comes off the trigger.
#[derive(Clone)]
pub struct EventAction {
    kind: EventType,
    sink: Option<Arc<dyn Ship>>,
    metric: String,
}

impl EventAction {
    /// Ships a pre-rendered metric to `sink` on every firing.
    pub fn ship(kind: EventType, sink: Arc<dyn Ship>, metric: impl Into<String>) -> Self {
        Self {
            kind,
            sink: Some(sink),
            metric: metric.into(),
        }
    }

    /// Only occupies time on the timeline.
    pub fn sleeper() -> Self {
        Self {
            kind: EventType::Sleeper,
            sink: None,
            metric: String::new(),
        }
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    async fn fire(&self, id: &FiringId) {
        let Some(sink) = &self.sink else {
            trace!("Sleeper {} done", id);
            return;
        };
        debug!("Firing {} to {}", id, sink.kind());
        if let Err(e) = sink.ship(self.metric.clone()).await {
            warn!("Failed to ship {}: {}", id, e);
        }
    }
}

/// One trigger plus the actions bound to its firing ids.
pub struct Timeline {
    name: String,
    trigger: Trigger,
    actions: HashMap<FiringId, EventAction>,
    firing: Option<JoinHandle<u64>>,
    fired: Option<u64>,
}

impl Timeline {
    pub fn new(name: impl Into<String>, continuous: bool) -> Self {
        Self::with_trigger(Trigger::new(name, continuous))
    }

    pub fn with_seed(name: impl Into<String>, continuous: bool, seed: u64) -> Self {
        Self::with_trigger(Trigger::with_seed(name, continuous, seed))
    }

    fn with_trigger(trigger: Trigger) -> Self {
        Self {
            name: trigger.name().to_string(),
            trigger,
            actions: HashMap::new(),
            firing: None,
            fired: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable id of the `index`th event of the timeslice at position `slice`.
    /// The position keeps ids unique when timeslice names repeat.
    pub fn event_id(&self, slice: usize, timeslice: &str, index: usize) -> FiringId {
        FiringId::new(format!(
            "{:?} timeslice {} {:?} event {}",
            self.name, slice, timeslice, index
        ))
    }

    pub fn add_timeslice(&mut self, name: &str, repeat: u32, single_use: bool) -> usize {
        self.trigger.new_timeslice(name, repeat, single_use)
    }

    /// Registers a timer in `timeslice` and binds its firings to `action`.
    pub fn bind(
        &mut self,
        timeslice: usize,
        id: FiringId,
        policy: DelayPolicy,
        repeat: u32,
        action: EventAction,
    ) -> Result<(), TriggerError> {
        if self.actions.contains_key(&id) {
            return Err(TriggerError::DuplicateFiringId {
                trigger: self.name.clone(),
                id: id.to_string(),
            });
        }
        self.trigger.add_timer(timeslice, id.clone(), policy, repeat)?;
        self.actions.insert(id, action);
        Ok(())
    }

    /// Starts the trigger and the task that runs each firing's action in order.
    pub fn start(&mut self) -> Result<(), TriggerError> {
        let ready = self.trigger.start()?;
        let actions = std::mem::take(&mut self.actions);
        self.firing = Some(tokio::spawn(run_actions(self.name.clone(), ready, actions)));
        info!(timeline = %self.name, "Timeline started");
        Ok(())
    }

    /// Waits until the trigger ran out of work and every action finished.
    /// Returns the number of firings handled.
    pub async fn wait_finished(&mut self) -> u64 {
        if let Some(firing) = self.firing.as_mut() {
            let result = firing.await;
            self.firing = None;
            match result {
                Ok(fired) => self.fired = Some(fired),
                Err(e) => {
                    warn!(timeline = %self.name, "Firing task ended abnormally: {}", e);
                    self.fired = Some(0);
                }
            }
        }
        self.fired.unwrap_or(0)
    }

    /// Stops the trigger, then waits for the in-flight action to complete.
    pub async fn shutdown(&mut self) -> u64 {
        self.trigger.stop().await;
        let fired = self.wait_finished().await;
        debug!(timeline = %self.name, fired, "Timeline shut down");
        fired
    }
}

async fn run_actions(
    timeline: String,
    mut ready: mpsc::Receiver<FiringId>,
    actions: HashMap<FiringId, EventAction>,
) -> u64 {
    let mut fired = 0;
    while let Some(id) = ready.recv().await {
        match actions.get(&id) {
            Some(action) => action.fire(&id).await,
            None => warn!(timeline = %timeline, "No action bound to {}", id),
        }
        fired += 1;
    }
    info!(timeline = %timeline, fired, "Timeline finished");
    fired
}
