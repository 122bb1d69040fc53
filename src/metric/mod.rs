//! Builds wire strings from a metric name, tags and fields.

mod statsd;

pub use statsd::{StatsdType, TaggingFormat, METRIC_TYPE_TAG, SAMPLE_RATE_TAG};

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use serde_json::Value;

use crate::error::MetricError;

/// A metric description. Tags and fields are kept sorted so the output is
/// stable from one firing to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metric {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, Value>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            tags: tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            fields: fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Influx line protocol without a timestamp:
    /// `measurement[,tag=value...] field=value[,field=value...]`.
    pub fn influx(&self) -> String {
        let mut line = escape(&self.name, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), influx_value(value)))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line
    }

    /// StatsD lines, one per field, joined with `\n`.
    pub fn statsd(&self, format: TaggingFormat) -> Result<String, MetricError> {
        statsd::render(self, format)
    }
}

fn escape(raw: &str, specials: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || specials.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn influx_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Null => "\"\"".to_string(),
        other => other.to_string(),
    }
}

/// Plain rendering used by the statsd formats, strings are not quoted.
pub(crate) fn plain_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
