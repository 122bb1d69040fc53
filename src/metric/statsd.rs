use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{plain_value, Metric};
use crate::error::MetricError;

/// Tag that selects the statsd type suffix. Never emitted as a regular tag.
pub const METRIC_TYPE_TAG: &str = "metric_type";
/// Tag that selects the optional `|@rate` suffix. Never emitted as a regular tag.
pub const SAMPLE_RATE_TAG: &str = "sample_rate";

/// Where statsd tags go on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaggingFormat {
    /// `name:value|type[|@rate][|#tag:value,...]`
    #[default]
    Datadog,
    /// `name[,tag=value...]:value|type[|@rate]`
    Influx,
}

impl FromStr for TaggingFormat {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datadog" => Ok(TaggingFormat::Datadog),
            "influx" => Ok(TaggingFormat::Influx),
            other => Err(MetricError::InvalidTaggingFormat(other.to_string())),
        }
    }
}

impl fmt::Display for TaggingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggingFormat::Datadog => f.write_str("datadog"),
            TaggingFormat::Influx => f.write_str("influx"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsdType {
    Gauge,
    Set,
    Counter,
    Timing,
    Histogram,
}

impl StatsdType {
    pub const NAMES: [&'static str; 5] = ["gauge", "set", "counter", "timing", "histogram"];

    pub fn suffix(&self) -> &'static str {
        match self {
            StatsdType::Gauge => "g",
            StatsdType::Set => "s",
            StatsdType::Counter => "c",
            StatsdType::Timing => "ms",
            StatsdType::Histogram => "h",
        }
    }
}

impl FromStr for StatsdType {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(StatsdType::Gauge),
            "set" => Ok(StatsdType::Set),
            "counter" => Ok(StatsdType::Counter),
            "timing" => Ok(StatsdType::Timing),
            "histogram" => Ok(StatsdType::Histogram),
            other => Err(MetricError::InvalidMetricType(other.to_string())),
        }
    }
}

struct Digested<'a> {
    tags: BTreeMap<&'a str, &'a str>,
    kind: StatsdType,
    sample_rate: Option<&'a str>,
}

fn digest(metric: &Metric) -> Result<Digested<'_>, MetricError> {
    let mut tags = BTreeMap::new();
    let mut kind = None;
    let mut sample_rate = None;
    for (key, value) in metric.tags() {
        match key.as_str() {
            METRIC_TYPE_TAG => kind = Some(value.parse::<StatsdType>()?),
            SAMPLE_RATE_TAG => sample_rate = Some(value.as_str()),
            _ => {
                tags.insert(key.as_str(), value.as_str());
            }
        }
    }
    let kind = kind.ok_or(MetricError::MissingMetricType(METRIC_TYPE_TAG))?;
    Ok(Digested {
        tags,
        kind,
        sample_rate,
    })
}

fn pair_tags(tags: &BTreeMap<&str, &str>, separator: &str) -> String {
    tags.iter()
        .map(|(key, value)| format!("{key}{separator}{value}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub(super) fn render(metric: &Metric, format: TaggingFormat) -> Result<String, MetricError> {
    let digested = digest(metric)?;

    let mut metadata = vec![digested.kind.suffix().to_string()];
    if let Some(rate) = digested.sample_rate {
        metadata.push(format!("@{rate}"));
    }

    let tags = match format {
        TaggingFormat::Datadog => pair_tags(&digested.tags, ":"),
        TaggingFormat::Influx => pair_tags(&digested.tags, "="),
    };
    if format == TaggingFormat::Datadog && !tags.is_empty() {
        metadata.push(format!("#{tags}"));
    }
    let metadata = metadata.join("|");

    let lines: Vec<String> = metric
        .fields()
        .iter()
        .map(|(field, value)| {
            let mut measurement = format!("{}_{}", metric.name(), field);
            if format == TaggingFormat::Influx && !tags.is_empty() {
                measurement.push(',');
                measurement.push_str(&tags);
            }
            format!("{measurement}:{}|{metadata}", plain_value(value))
        })
        .collect();

    Ok(lines.join("\n"))
}
