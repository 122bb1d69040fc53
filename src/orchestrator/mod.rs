//! Wires a story together: one shipper per connection, one timeline per
//! configured timeline, and the shutdown sequence that tears them down in
//! order (timelines, then statsd, then influx).

mod timeline;

pub use timeline::{EventAction, Timeline};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{self, Event, EventType, Story};
use crate::error::{StartError, ValidationError};
use crate::metric::Metric;
use crate::shipper::{InfluxShipper, Ship, StatsdShipper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineReport {
    pub name: String,
    pub fired: u64,
}

/// Firing counts per timeline, in story order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub timelines: Vec<TimelineReport>,
}

impl RunReport {
    pub fn total_fired(&self) -> u64 {
        self.timelines.iter().map(|t| t.fired).sum()
    }
}

pub struct Orchestrator {
    story: Story,
    seed: Option<u64>,
    influx: BTreeMap<String, InfluxShipper>,
    statsd: BTreeMap<String, StatsdShipper>,
    timelines: Vec<Timeline>,
    started: bool,
}

impl Orchestrator {
    pub fn new(story: Story) -> Self {
        Self {
            story,
            seed: None,
            influx: BTreeMap::new(),
            statsd: BTreeMap::new(),
            timelines: Vec::new(),
            started: false,
        }
    }

    /// Seeds every random source (timer jitter and flush jitter) so a run
    /// can be reproduced.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    /// Connects and starts every shipper, then every timeline. On failure
    /// whatever was already running is stopped before the error is returned.
    pub async fn start(&mut self) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        self.started = true;
        config::validate(&self.story)?;

        info!(story = %self.story.story_name, "Starting story");
        if let Err(e) = self.start_shippers().await {
            self.shutdown().await;
            return Err(e);
        }
        if let Err(e) = self.start_timelines() {
            self.shutdown().await;
            return Err(e);
        }
        info!(
            timelines = self.timelines.len(),
            influx = self.influx.len(),
            statsd = self.statsd.len(),
            "Story running"
        );
        Ok(())
    }

    async fn start_shippers(&mut self) -> Result<(), StartError> {
        for (index, connection) in self.story.influx.iter().enumerate() {
            let mut shipper = match self.seed {
                Some(seed) => InfluxShipper::with_rng(
                    connection.into(),
                    fastrand::Rng::with_seed(seed.wrapping_add(index as u64)),
                ),
                None => InfluxShipper::new(connection.into()),
            };
            shipper.connect().await?;
            shipper.start()?;
            self.influx.insert(connection.id.clone(), shipper);
        }

        for connection in &self.story.statsd {
            let mut shipper = StatsdShipper::new(connection.into());
            shipper.connect().await?;
            shipper.start()?;
            self.statsd.insert(connection.id.clone(), shipper);
        }
        Ok(())
    }

    fn start_timelines(&mut self) -> Result<(), StartError> {
        let continuous = self.story.continuous;
        for (index, configured) in self.story.timelines.iter().enumerate() {
            let name = configured.timeline_name.as_str();
            let mut timeline = match self.seed {
                Some(seed) => Timeline::with_seed(name, continuous, seed.wrapping_add(index as u64)),
                None => Timeline::new(name, continuous),
            };

            for timeslice in &configured.time_slices {
                let slice = timeline.add_timeslice(&timeslice.time_slice_name, timeslice.repeat, timeslice.single_use);
                for (event_index, event) in timeslice.events.iter().enumerate() {
                    let id = timeline.event_id(slice, &timeslice.time_slice_name, event_index);
                    let policy = event.time_between.policy().ok_or_else(|| ValidationError {
                        problems: vec![format!("{id} needs exactly one timer")],
                    })?;
                    let action = self.action_for(&id.to_string(), event)?;
                    timeline.bind(slice, id, policy, event.repeat, action)?;
                }
            }

            timeline.start()?;
            self.timelines.push(timeline);
        }
        Ok(())
    }

    fn action_for(&self, id: &str, event: &Event) -> Result<EventAction, StartError> {
        let unknown = |kind| StartError::UnknownConnection {
            event: id.to_string(),
            kind,
            id: event.connection_id.clone(),
        };
        let metric = Metric::new(&event.metric_name, &event.tags, &event.fields);

        match event.event_type {
            EventType::Sleeper => Ok(EventAction::sleeper()),
            EventType::Influx => {
                let shipper = self.influx.get(&event.connection_id).ok_or_else(|| unknown("influx"))?;
                let sink: Arc<dyn Ship> = if event.timestamp {
                    Arc::new(shipper.timestamped_handle())
                } else {
                    Arc::new(shipper.handle())
                };
                Ok(EventAction::ship(EventType::Influx, sink, metric.influx()))
            }
            EventType::Statsd => {
                let shipper = self.statsd.get(&event.connection_id).ok_or_else(|| unknown("statsd"))?;
                let rendered = metric.statsd(event.statsd_tagging_format.unwrap_or_default())?;
                Ok(EventAction::ship(EventType::Statsd, Arc::new(shipper.handle()), rendered))
            }
        }
    }

    /// Runs until `shutdown` resolves. A story that is not continuous also
    /// ends once every timeline has finished its single pass. Either way the
    /// full shutdown sequence runs before the report is returned.
    pub async fn run_until<F>(&mut self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        if self.story.continuous {
            shutdown.await;
            info!("Shutdown requested");
        } else {
            tokio::select! {
                _ = shutdown => info!("Shutdown requested"),
                _ = Self::wait_timelines(&mut self.timelines) => info!("All timelines finished"),
            }
        }
        self.shutdown().await
    }

    async fn wait_timelines(timelines: &mut [Timeline]) {
        for timeline in timelines.iter_mut() {
            timeline.wait_finished().await;
        }
    }

    /// Stops every timeline, then every statsd shipper, then every influx
    /// shipper, waiting for each to finish. Safe to call more than once.
    pub async fn shutdown(&mut self) -> RunReport {
        let mut report = RunReport::default();
        for timeline in self.timelines.iter_mut() {
            let fired = timeline.shutdown().await;
            report.timelines.push(TimelineReport {
                name: timeline.name().to_string(),
                fired,
            });
        }
        for shipper in self.statsd.values_mut() {
            shipper.stop().await;
        }
        for shipper in self.influx.values_mut() {
            shipper.stop().await;
        }
        if !self.is_finished() {
            warn!("Shutdown finished with shippers still running");
        }
        info!(fired = report.total_fired(), "Story finished");
        report
    }

    /// True once every shipper has reported finished.
    pub fn is_finished(&self) -> bool {
        self.influx.values().all(InfluxShipper::is_finished)
            && self.statsd.values().all(StatsdShipper::is_finished)
    }
}
