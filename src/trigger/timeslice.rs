use std::fmt;

use super::timer::TimerTask;

/// An ordered group of timers that run one after another, `repeat` times per
/// scheduler pass.
#[derive(Debug)]
pub struct Timeslice {
    name: String,
    repeat: u32,
    single_use: bool,
    allowed_to_run: bool,
    timers: Vec<TimerTask>,
}

impl Timeslice {
    pub fn new(name: impl Into<String>, repeat: u32, single_use: bool) -> Self {
        Self {
            name: name.into(),
            repeat,
            single_use,
            allowed_to_run: true,
            timers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    pub fn is_single_use(&self) -> bool {
        self.single_use
    }

    pub fn is_allowed_to_run(&self) -> bool {
        self.allowed_to_run
    }

    pub fn timers(&self) -> &[TimerTask] {
        &self.timers
    }

    pub(crate) fn timers_mut(&mut self) -> &mut [TimerTask] {
        &mut self.timers
    }

    pub(crate) fn push(&mut self, timer: TimerTask) {
        self.timers.push(timer);
    }

    /// Whether another pass over this timeslice would fire anything.
    pub fn has_work(&self) -> bool {
        self.allowed_to_run && self.repeat > 0 && self.timers.iter().any(|t| t.repeat() > 0)
    }

    /// Called once all repeats of a pass completed.
    pub(crate) fn finish_pass(&mut self) {
        if self.single_use {
            self.allowed_to_run = false;
        }
    }
}

impl fmt::Display for Timeslice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeslice {} (repeat {}, single use {}, {} timers)",
            self.name,
            self.repeat,
            self.single_use,
            self.timers.len()
        )
    }
}
