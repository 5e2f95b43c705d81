// Repeating break reminder, driven by the host's one-second timer tick

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 20-20-20 rule: a break every 20 minutes
pub const DEFAULT_INTERVAL_SECS: u64 = 20 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub interval_seconds: u64,
    pub enabled: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_INTERVAL_SECS,
            enabled: false,
        }
    }
}

impl ReminderConfig {
    pub fn interval(&self) -> Result<Duration> {
        if self.interval_seconds == 0 {
            bail!("Reminder interval must be at least one second");
        }
        Ok(Duration::from_secs(self.interval_seconds))
    }
}

/// Armed/disarmed timer that calls `on_due` every `interval`
pub struct ReminderScheduler {
    interval: Duration,
    next_due: Option<Instant>,
    fired: u32,
    on_due: Box<dyn FnMut()>,
}

impl ReminderScheduler {
    pub fn new(interval: Duration, on_due: impl FnMut() + 'static) -> Result<Self> {
        if interval.is_zero() {
            bail!("Reminder interval must be at least one second");
        }
        Ok(Self {
            interval,
            next_due: None,
            fired: 0,
            on_due: Box::new(on_due),
        })
    }

    /// Start counting a full interval from `now`
    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
        info!("Break reminder armed, every {}s", self.interval.as_secs());
    }

    pub fn disarm(&mut self) {
        if self.next_due.take().is_some() {
            info!("Break reminder disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval. An armed timer restarts with the new value.
    pub fn set_interval(&mut self, interval: Duration, now: Instant) -> Result<()> {
        if interval.is_zero() {
            bail!("Reminder interval must be at least one second");
        }
        self.interval = interval;
        if self.is_armed() {
            self.arm(now);
        }
        Ok(())
    }

    /// Fire the callback if the interval has elapsed. Returns whether it fired.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        self.fired += 1;
        debug!("Break reminder due (#{})", self.fired);
        (self.on_due)();

        // After a long stall (sleep, suspended tick) fire once, not once per missed interval
        let next = due + self.interval;
        self.next_due = Some(if next <= now { now + self.interval } else { next });
        true
    }

    /// Time left until the next reminder, `None` when disarmed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_due.map(|due| due.saturating_duration_since(now))
    }

    /// Reminders shown since start
    pub fn fired(&self) -> u32 {
        self.fired
    }
}

/// `MM:SS`, or `H:MM:SS` past an hour
pub fn format_remaining(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}
