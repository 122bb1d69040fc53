//! Story files: loading, validation and the global tag shim.

mod story;
mod validation;

pub use story::{
    DynamicTimer, Event, EventType, InfluxConnection, StaticTimer, StatsdConnection, Story,
    TimeBetween, Timeline, Timeslice,
};
pub use validation::validate;

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::shipper::{InfluxConfig, StatsdConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryFormat {
    Json,
    Yaml,
    Toml,
}

impl StoryFormat {
    /// Picks the format from the file extension, json when there is none.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => StoryFormat::Yaml,
            Some("toml") => StoryFormat::Toml,
            _ => StoryFormat::Json,
        }
    }
}

impl Story {
    /// Reads, parses and validates a story file, then applies global tags.
    pub fn load(path: impl AsRef<Path>) -> Result<Story, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Err(ConfigError::Empty(path.display().to_string()));
        }
        debug!("Loading story from {}", path.display());
        Story::parse(&contents, StoryFormat::from_path(path))
    }

    pub fn parse(contents: &str, format: StoryFormat) -> Result<Story, ConfigError> {
        let mut story: Story = match format {
            StoryFormat::Json => serde_json::from_str(contents)?,
            StoryFormat::Yaml => serde_yaml::from_str(contents)?,
            StoryFormat::Toml => toml::from_str(contents)?,
        };
        validate(&story)?;
        story.apply_global_tags();
        Ok(story)
    }

    /// Copies every global tag onto every event. Global values win over the
    /// event's own tag of the same name.
    pub fn apply_global_tags(&mut self) {
        if self.global_tags.is_empty() {
            return;
        }
        let events = self
            .timelines
            .iter_mut()
            .flat_map(|t| t.time_slices.iter_mut())
            .flat_map(|ts| ts.events.iter_mut());
        for event in events {
            for (key, value) in &self.global_tags {
                event.tags.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<&InfluxConnection> for InfluxConfig {
    fn from(connection: &InfluxConnection) -> Self {
        let mut config = InfluxConfig::new(&connection.id, &connection.host, &connection.database);
        config.username = connection.username.clone();
        config.password = connection.password.clone();
        config.precision = connection.precision;
        config.batch_size = connection.batch_size;
        config.flush_interval = Duration::from_secs(connection.flush_interval);
        config.http_timeout = Duration::from_secs(connection.http_timeout);
        config.writers = connection.number_of_writers;
        config
    }
}

impl From<&StatsdConnection> for StatsdConfig {
    fn from(connection: &StatsdConnection) -> Self {
        let mut config = StatsdConfig::new(
            &connection.id,
            &connection.host,
            connection.port,
            connection.transport,
        );
        config.queue_depth = connection.buffer_depth;
        config
    }
}
