use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::story::{
    Event, EventType, InfluxConnection, StatsdConnection, Story, TimeBetween, Timeline, Timeslice,
};
use crate::error::ValidationError;
use crate::metric::{StatsdType, METRIC_TYPE_TAG};

static INFLUX_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[a-z0-9\-_.]+(?::[0-9]+)?/?$").expect("influx host pattern is valid")
});

/// Checks the whole story and returns every problem found.
pub fn validate(story: &Story) -> Result<(), ValidationError> {
    let mut problems = ValidationError::default();

    if story.story_name.trim().is_empty() {
        problems.push("story_name can not be blank");
    }
    if story.timelines.is_empty() {
        problems.push("story has no timelines");
    }

    duplicate_ids(story, &mut problems);
    for influx in &story.influx {
        influx_connection(influx, &mut problems);
    }
    for statsd in &story.statsd {
        statsd_connection(statsd, &mut problems);
    }
    for timeline in &story.timelines {
        validate_timeline(timeline, &mut problems);
    }
    event_links(story, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn validate_timeline(timeline: &Timeline, problems: &mut ValidationError) {
    let name = timeline.timeline_name.trim();
    if name.is_empty() {
        problems.push("timelines must have a timeline_name");
    }
    if timeline.time_slices.is_empty() {
        problems.push(format!("timeline {name:?} has no time_slices"));
    }
    for timeslice in &timeline.time_slices {
        validate_timeslice(name, timeslice, problems);
    }
}

fn validate_timeslice(timeline: &str, timeslice: &Timeslice, problems: &mut ValidationError) {
    let name = timeslice.time_slice_name.trim();
    if name.is_empty() {
        problems.push(format!("timeline {timeline:?} has a timeslice without a time_slice_name"));
    }
    if timeslice.events.is_empty() {
        problems.push(format!("timeslice {name:?} has no events"));
    }
    for event in &timeslice.events {
        validate_event(event, problems);
    }
}

fn validate_event(event: &Event, problems: &mut ValidationError) {
    let name = event.metric_name.trim();
    if name.is_empty() {
        problems.push("event metric_name can not be blank");
    }

    if event.event_type != EventType::Sleeper {
        if event.connection_id.trim().is_empty() {
            problems.push(format!("event {name:?} needs a connection_id"));
        }
        if event.fields.is_empty() {
            problems.push(format!("event {name:?} must have at least 1 field"));
        }
        for (field, value) in &event.fields {
            if matches!(value, Value::Array(_) | Value::Object(_) | Value::Null) {
                problems.push(format!(
                    "event {name:?} field {field:?} must be a number, string or bool"
                ));
            }
        }
    }

    match event.event_type {
        EventType::Statsd => match event.tags.get(METRIC_TYPE_TAG) {
            None => problems.push(format!(
                "statsd event {name:?} needs a {METRIC_TYPE_TAG} tag, one of {}",
                StatsdType::NAMES.join(", ")
            )),
            Some(kind) if kind.parse::<StatsdType>().is_err() => problems.push(format!(
                "statsd event {name:?} has metric_type {kind:?}, expected one of {}",
                StatsdType::NAMES.join(", ")
            )),
            Some(_) => {}
        },
        EventType::Influx | EventType::Sleeper => {
            if event.statsd_tagging_format.is_some() {
                problems.push(format!("event {name:?} sets statsd_tagging_format but is not a statsd event"));
            }
        }
    }

    if event.timestamp && event.event_type != EventType::Influx {
        problems.push(format!("event {name:?} sets timestamp but only influx events support it"));
    }
    if event.repeat < 1 {
        problems.push(format!("event {name:?} repeat must be at least 1"));
    }
    time_between(name, &event.time_between, problems);
}

fn time_between(event: &str, timing: &TimeBetween, problems: &mut ValidationError) {
    match (&timing.static_timer, &timing.dynamic) {
        (None, None) => problems.push(format!("event {event:?} time_between must have a timer")),
        (Some(_), Some(_)) => problems.push(format!(
            "event {event:?} time_between can not have both a static and a dynamic timer"
        )),
        (Some(fixed), None) if fixed.time == 0 => {
            problems.push(format!("event {event:?} static time must be a positive number"))
        }
        (None, Some(dynamic)) if dynamic.vary == 0 => {
            problems.push(format!("event {event:?} dynamic vary must be a positive number"))
        }
        _ => {}
    }
}

fn influx_connection(influx: &InfluxConnection, problems: &mut ValidationError) {
    let id = influx.id.trim();
    if id.is_empty() {
        problems.push("influx connection id can not be blank");
    }
    if influx.host.is_empty() {
        problems.push(format!("influx connection {id:?} host can not be blank"));
    } else if !INFLUX_HOST.is_match(&influx.host) {
        problems.push(format!(
            "influx connection {id:?} host {:?} is not http[s]://host[:port]",
            influx.host
        ));
    }
    if influx.username.is_empty() != influx.password.is_empty() {
        problems.push(format!(
            "influx connection {id:?} needs both username and password or neither"
        ));
    }
    if influx.database.trim().is_empty() {
        problems.push(format!("influx connection {id:?} database can not be blank"));
    }
    for (key, value) in [
        ("batch_size", influx.batch_size as u64),
        ("flush_interval", influx.flush_interval),
        ("http_timeout", influx.http_timeout),
        ("number_of_writers", influx.number_of_writers as u64),
    ] {
        if value == 0 {
            problems.push(format!("influx connection {id:?} {key} must be a positive number"));
        }
    }
}

fn statsd_connection(statsd: &StatsdConnection, problems: &mut ValidationError) {
    let id = statsd.id.trim();
    if id.is_empty() {
        problems.push("statsd connection id can not be blank");
    }
    if statsd.host.trim().is_empty() {
        problems.push(format!("statsd connection {id:?} host can not be blank"));
    }
    if statsd.port == 0 {
        problems.push(format!("statsd connection {id:?} port must be a positive number"));
    }
    if statsd.buffer_depth == 0 {
        problems.push(format!("statsd connection {id:?} buffer_depth must be a positive number"));
    }
}

fn duplicate_ids(story: &Story, problems: &mut ValidationError) {
    let mut seen = BTreeSet::new();
    for influx in &story.influx {
        if !seen.insert(influx.id.as_str()) {
            problems.push(format!("influx connection id {:?} is duplicated", influx.id));
        }
    }
    let mut seen = BTreeSet::new();
    for statsd in &story.statsd {
        if !seen.insert(statsd.id.as_str()) {
            problems.push(format!("statsd connection id {:?} is duplicated", statsd.id));
        }
    }
}

/// Every event must point at a configured connection of its type and every
/// connection must be used by at least one event.
fn event_links(story: &Story, problems: &mut ValidationError) {
    let mut influx: BTreeMap<&str, usize> = story.influx.iter().map(|c| (c.id.as_str(), 0)).collect();
    let mut statsd: BTreeMap<&str, usize> = story.statsd.iter().map(|c| (c.id.as_str(), 0)).collect();

    let events = story
        .timelines
        .iter()
        .flat_map(|t| &t.time_slices)
        .flat_map(|ts| &ts.events);
    for event in events {
        let links = match event.event_type {
            EventType::Sleeper => continue,
            EventType::Influx => &mut influx,
            EventType::Statsd => &mut statsd,
        };
        match links.get_mut(event.connection_id.as_str()) {
            Some(count) => *count += 1,
            None => problems.push(format!(
                "event {:?} uses unknown {} connection {:?}",
                event.metric_name,
                event.event_type.as_str(),
                event.connection_id
            )),
        }
    }

    for (id, _) in influx.iter().filter(|(_, count)| **count == 0) {
        problems.push(format!("influx connection {id:?} has no events linked to it"));
    }
    for (id, _) in statsd.iter().filter(|(_, count)| **count == 0) {
        problems.push(format!("statsd connection {id:?} has no events linked to it"));
    }
}
