use std::fmt;

use thiserror::Error;

/// Errors raised while configuring or starting a trigger scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("there are no timers to run in trigger {0}")]
    NoTimers(String),

    #[error("trigger {0} was already started")]
    AlreadyStarted(String),

    #[error("trigger {0} has been stopped")]
    Stopped(String),

    #[error("timeslice index {index} does not exist in trigger {trigger}")]
    UnknownTimeslice { trigger: String, index: usize },

    #[error("firing id {id} is already bound in trigger {trigger}")]
    DuplicateFiringId { trigger: String, id: String },
}

/// Errors returned to callers submitting metrics to a shipper.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShipError {
    #[error("input is closed for shipper {0}")]
    Stopped(String),
}

/// Errors raised while establishing a sink connection. These are fatal to startup.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("failed to build http client for {id}: {source}")]
    Client {
        id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("influx writer {writer} of {id} failed to ping {url}: {source}")]
    Ping {
        id: String,
        writer: usize,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("influx writer {writer} of {id} got status {status} from {url}")]
    BadStatus {
        id: String,
        writer: usize,
        url: String,
        status: u16,
    },

    #[error("statsd shipper {id} failed to dial {transport} {address}: {source}")]
    Dial {
        id: String,
        transport: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shipper {0} has already been stopped")]
    Stopped(String),

    #[error("shipper {0} must connect before it starts")]
    NotConnected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("unknown statsd tagging format {0:?}, expected datadog or influx")]
    InvalidTaggingFormat(String),

    #[error("unknown statsd metric type {0:?}")]
    InvalidMetricType(String),

    #[error("statsd metrics need a {0:?} tag")]
    MissingMetricType(&'static str),
}

/// Every problem found while validating a story, collected in one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn push(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "story has {} problem(s)", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  - {problem}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read story file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("story file {0} is empty")]
    Empty(String),

    #[error("failed to parse json story: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse yaml story: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse toml story: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Anything that stops the orchestrator from coming up.
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("event {event} references unknown {kind} connection {id:?}")]
    UnknownConnection {
        event: String,
        kind: &'static str,
        id: String,
    },

    #[error("orchestrator was already started")]
    AlreadyStarted,
}
