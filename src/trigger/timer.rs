use std::borrow::Borrow;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

/// Identifier emitted each time a timer fires. Cheap to clone and stable for
/// the life of the timeline that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiringId(Arc<str>);

impl FiringId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FiringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FiringId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FiringId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for FiringId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// One invocation of a timer: a finite stream of firing ids, each yielded
/// after its sleep elapsed.
pub type Firings = Pin<Box<dyn Stream<Item = FiringId> + Send>>;

/// How long a timer sleeps before each firing. All values are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    Static { millis: u64 },
    /// Uniform over `[min_millis, min_millis + vary_millis)`.
    Dynamic { min_millis: u64, vary_millis: u64 },
}

impl DelayPolicy {
    pub fn draw(&self, rng: &mut fastrand::Rng) -> Duration {
        match *self {
            DelayPolicy::Static { millis } => Duration::from_millis(millis),
            DelayPolicy::Dynamic {
                min_millis,
                vary_millis,
            } => {
                let offset = if vary_millis == 0 {
                    0
                } else {
                    rng.u64(0..vary_millis)
                };
                Duration::from_millis(min_millis.saturating_add(offset))
            }
        }
    }
}

impl fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayPolicy::Static { millis } => write!(f, "static {millis}ms"),
            DelayPolicy::Dynamic {
                min_millis,
                vary_millis,
            } => write!(f, "dynamic {min_millis}ms + [0, {vary_millis})ms"),
        }
    }
}

/// A timer that fires `repeat` times per invocation.
#[derive(Debug)]
pub struct TimerTask {
    id: FiringId,
    policy: DelayPolicy,
    repeat: u32,
    rng: fastrand::Rng,
}

impl TimerTask {
    pub fn new(id: impl Into<FiringId>, policy: DelayPolicy, repeat: u32, rng: fastrand::Rng) -> Self {
        Self {
            id: id.into(),
            policy,
            repeat,
            rng,
        }
    }

    pub fn id(&self) -> &FiringId {
        &self.id
    }

    pub fn policy(&self) -> DelayPolicy {
        self.policy
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Draws the sleeps for one invocation. Dynamic policies get fresh values
    /// on every call.
    pub fn delays(&mut self) -> Vec<Duration> {
        (0..self.repeat)
            .map(|_| self.policy.draw(&mut self.rng))
            .collect()
    }

    /// Starts a fresh run of this timer. The stream ends after `repeat`
    /// firings; dropping it abandons whatever sleep is in flight.
    pub fn invoke(&mut self) -> Firings {
        let id = self.id.clone();
        stream::iter(self.delays())
            .then(move |delay| {
                let id = id.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    id
                }
            })
            .boxed()
    }
}
