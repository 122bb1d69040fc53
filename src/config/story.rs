use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::metric::TaggingFormat;
use crate::shipper::{Precision, Transport};
use crate::trigger::DelayPolicy;

/// A complete description of what to send, where and when.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Story {
    pub story_name: String,
    pub continuous: bool,
    pub debug_logging: bool,
    pub global_tags: HashMap<String, String>,
    pub influx: Vec<InfluxConnection>,
    pub statsd: Vec<StatsdConnection>,
    pub timelines: Vec<Timeline>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    pub timeline_name: String,
    pub time_slices: Vec<Timeslice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeslice {
    pub time_slice_name: String,
    pub events: Vec<Event>,
    pub repeat: u32,
    pub single_use: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Influx,
    Statsd,
    Sleeper,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Influx => "influx",
            EventType::Statsd => "statsd",
            EventType::Sleeper => "sleeper",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub metric_name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub connection_id: String,
    pub repeat: u32,
    pub fields: HashMap<String, Value>,
    pub tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsd_tagging_format: Option<TaggingFormat>,
    /// Influx only: append a send time timestamp in the connection precision.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timestamp: bool,
    pub time_between: TimeBetween,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeBetween {
    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_timer: Option<StaticTimer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicTimer>,
}

/// Milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticTimer {
    pub time: u64,
}

/// Milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicTimer {
    pub minimum_time: u64,
    pub vary: u64,
}

impl TimeBetween {
    pub fn fixed(millis: u64) -> Self {
        Self {
            static_timer: Some(StaticTimer { time: millis }),
            dynamic: None,
        }
    }

    pub fn jittered(minimum_time: u64, vary: u64) -> Self {
        Self {
            static_timer: None,
            dynamic: Some(DynamicTimer { minimum_time, vary }),
        }
    }

    /// The delay policy, if exactly one timer is configured.
    pub fn policy(&self) -> Option<DelayPolicy> {
        match (&self.static_timer, &self.dynamic) {
            (Some(s), None) => Some(DelayPolicy::Static { millis: s.time }),
            (None, Some(d)) => Some(DelayPolicy::Dynamic {
                min_millis: d.minimum_time,
                vary_millis: d.vary,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConnection {
    pub id: String,
    pub host: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub precision: Precision,
    pub batch_size: usize,
    /// Seconds.
    pub flush_interval: u64,
    /// Seconds.
    pub http_timeout: u64,
    pub number_of_writers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConnection {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub buffer_depth: usize,
}

impl Story {
    /// A story exercising every event type, printed by `teller --example`.
    pub fn example() -> Self {
        let field = |name: &str, value: Value| HashMap::from([(name.to_string(), value)]);
        let tags = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };

        Story {
            story_name: "example story".to_string(),
            continuous: false,
            debug_logging: false,
            global_tags: tags(&[("environment", "load-test")]),
            influx: vec![InfluxConnection {
                id: "influx_local".to_string(),
                host: "http://localhost:8086".to_string(),
                username: "teller".to_string(),
                password: "teller".to_string(),
                database: "teller".to_string(),
                precision: Precision::S,
                batch_size: 100,
                flush_interval: 5,
                http_timeout: 2,
                number_of_writers: 2,
            }],
            statsd: vec![StatsdConnection {
                id: "statsd_local".to_string(),
                host: "localhost".to_string(),
                port: 8125,
                transport: Transport::Udp,
                buffer_depth: 1000,
            }],
            timelines: vec![
                Timeline {
                    timeline_name: "web traffic".to_string(),
                    time_slices: vec![
                        Timeslice {
                            time_slice_name: "warm up".to_string(),
                            repeat: 1,
                            single_use: true,
                            events: vec![Event {
                                metric_name: "deploys".to_string(),
                                event_type: EventType::Influx,
                                connection_id: "influx_local".to_string(),
                                repeat: 1,
                                fields: field("count", json!(1)),
                                tags: tags(&[("service", "web")]),
                                timestamp: true,
                                time_between: TimeBetween::fixed(500),
                                ..Event::default()
                            }],
                        },
                        Timeslice {
                            time_slice_name: "steady".to_string(),
                            repeat: 10,
                            single_use: false,
                            events: vec![
                                Event {
                                    metric_name: "requests".to_string(),
                                    event_type: EventType::Statsd,
                                    connection_id: "statsd_local".to_string(),
                                    repeat: 5,
                                    fields: field("total", json!(1)),
                                    tags: tags(&[("metric_type", "counter"), ("sample_rate", "0.5")]),
                                    statsd_tagging_format: Some(TaggingFormat::Datadog),
                                    time_between: TimeBetween::jittered(100, 50),
                                    ..Event::default()
                                },
                                Event {
                                    metric_name: "pause".to_string(),
                                    event_type: EventType::Sleeper,
                                    repeat: 1,
                                    time_between: TimeBetween::fixed(1000),
                                    ..Event::default()
                                },
                            ],
                        },
                    ],
                },
                Timeline {
                    timeline_name: "database".to_string(),
                    time_slices: vec![Timeslice {
                        time_slice_name: "queries".to_string(),
                        repeat: 20,
                        single_use: false,
                        events: vec![Event {
                            metric_name: "query_time".to_string(),
                            event_type: EventType::Influx,
                            connection_id: "influx_local".to_string(),
                            repeat: 3,
                            fields: field("ms", json!(12.5)),
                            tags: tags(&[("table", "users")]),
                            time_between: TimeBetween::jittered(200, 300),
                            ..Event::default()
                        }],
                    }],
                },
            ],
        }
    }
}
