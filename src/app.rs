// Application state shared by the tray host and the one-shot CLI commands.
// OS access goes through the gamma/brightness device traits, so everything
// here runs the same against real monitors and test fakes.

use crate::brightness::{BrightnessController, BrightnessDevice};
use crate::config::{self, AppConfig};
use crate::display::{clamp_temperature, DisplaySetting, NEUTRAL_TEMPERATURE, TEMPERATURE_STEP};
use crate::gamma::{GammaController, GammaDevice};
use crate::hotkeys::HotkeyAction;
use crate::reminder::{self, ReminderConfig, ReminderScheduler};
use crate::stats;
use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const FADE_STEPS: u32 = 10;

/// Where settings and usage statistics are persisted
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub settings: PathBuf,
    pub stats: PathBuf,
}

impl DataFiles {
    pub fn user() -> Self {
        Self {
            settings: config::config_path(),
            stats: stats::stats_path(),
        }
    }
}

pub struct App<G: GammaDevice, B: BrightnessDevice> {
    config: AppConfig,
    files: DataFiles,
    gamma: GammaController<G>,
    brightness: BrightnessController<B>,
    reminder: ReminderScheduler,
    started: Instant,
    status: String,
}

impl<G: GammaDevice, B: BrightnessDevice> App<G, B> {
    /// `on_reminder` runs from [`App::tick`] each time a break is due
    pub fn new(
        config: AppConfig,
        files: DataFiles,
        gamma: GammaController<G>,
        brightness: BrightnessController<B>,
        on_reminder: impl FnMut() + 'static,
        now: Instant,
    ) -> Result<Self> {
        let interval = config.reminder.interval().unwrap_or_else(|e| {
            warn!("{:#}; using {}s", e, reminder::DEFAULT_INTERVAL_SECS);
            Duration::from_secs(reminder::DEFAULT_INTERVAL_SECS)
        });
        let mut scheduler = ReminderScheduler::new(interval, on_reminder)?;
        if config.reminder.enabled {
            scheduler.arm(now);
        }

        Ok(Self {
            config,
            files,
            gamma,
            brightness,
            reminder: scheduler,
            started: now,
            status: String::from("Ready"),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Last status message, shown in the tray tooltip
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.config.profiles.keys().cloned().collect()
    }

    pub fn reminder_enabled(&self) -> bool {
        self.reminder.is_armed()
    }

    /// Apply the stored display setting, typically once at startup
    pub fn restore_display(&mut self) {
        let setting = self.config.display;
        self.apply_display(setting);
    }

    /// Apply temperature and brightness together. Each half is attempted
    /// even if the other fails; whatever succeeded is saved.
    pub fn apply_display(&mut self, setting: DisplaySetting) -> bool {
        let setting = setting.clamped();
        let mut parts = Vec::new();
        let mut applied = false;

        match self.gamma.apply(setting.temperature) {
            Ok(()) => {
                self.config.display.temperature = setting.temperature;
                parts.push(format!("{}K", setting.temperature));
                applied = true;
            }
            Err(e) => {
                warn!("{:#}", e);
                parts.push(format!("colour unavailable: {:#}", e));
            }
        }

        if self.brightness.is_supported() {
            match self.brightness.apply(setting.brightness as i64) {
                Ok(percent) => {
                    self.config.display.brightness = percent;
                    parts.push(format!("{}%", percent));
                    applied = true;
                }
                Err(e) => {
                    warn!("{:#}", e);
                    parts.push(format!("brightness unavailable: {:#}", e));
                }
            }
        } else {
            self.config.display.brightness = setting.brightness;
        }

        self.set_status(parts.join(", "));
        if applied {
            self.save();
        }
        applied
    }

    pub fn apply_profile(&mut self, name: &str) -> Result<()> {
        let setting = self
            .config
            .profile(name)
            .with_context(|| format!("No display profile named '{}'", name))?;
        info!("Applying profile '{}'", name);
        if self.apply_display(setting) {
            self.status = format!("{}: {}", name, self.status);
        }
        Ok(())
    }

    /// Change only the colour temperature
    pub fn apply_temperature(&mut self, kelvin: u32) -> bool {
        let kelvin = clamp_temperature(kelvin);
        match self.gamma.apply(kelvin) {
            Ok(()) => {
                self.config.display.temperature = kelvin;
                self.set_status(format!("{}K", kelvin));
                self.save();
                true
            }
            Err(e) => {
                warn!("{:#}", e);
                self.set_status(format!("colour unavailable: {:#}", e));
                false
            }
        }
    }

    /// Shift colour temperature by `delta` Kelvin, keeping brightness
    pub fn adjust_temperature(&mut self, delta: i64) {
        let current = self
            .gamma
            .temperature()
            .unwrap_or(self.config.display.temperature) as i64;
        self.apply_temperature((current + delta).clamp(0, u32::MAX as i64) as u32);
    }

    /// Stepped brightness change spread over `duration`
    pub fn fade_brightness(&mut self, percent: u8, duration: Duration) -> Result<u8> {
        let step_delay = duration / FADE_STEPS;
        let reached = self.brightness.fade_to(percent as i64, FADE_STEPS, step_delay)?;
        self.config.display.brightness = reached;
        self.set_status(format!("{}%", reached));
        self.save();
        Ok(reached)
    }

    /// Put the gamma ramp back to linear. Brightness is left as it is.
    pub fn reset_display(&mut self) -> Result<()> {
        if let Err(e) = self.gamma.reset() {
            self.status = format!("Reset failed: {:#}", e);
            return Err(e);
        }
        self.config.display.temperature = NEUTRAL_TEMPERATURE;
        self.set_status("Display reset".to_string());
        self.save();
        Ok(())
    }

    pub fn toggle_reminder(&mut self, now: Instant) {
        if self.reminder.is_armed() {
            self.reminder.disarm();
            self.config.reminder.enabled = false;
            self.set_status("Reminders paused".to_string());
        } else {
            self.reminder.arm(now);
            self.config.reminder.enabled = true;
            self.set_status(format!(
                "Next break in {}",
                reminder::format_remaining(self.reminder.interval())
            ));
        }
        self.save();
    }

    pub fn set_reminder_interval(&mut self, seconds: u64, now: Instant) -> Result<()> {
        let wanted = ReminderConfig {
            interval_seconds: seconds,
            ..self.config.reminder
        };
        self.reminder.set_interval(wanted.interval()?, now)?;
        self.config.reminder = wanted;
        self.save();
        Ok(())
    }

    pub fn handle_hotkey(&mut self, action: &HotkeyAction, now: Instant) {
        info!("Hotkey: {}", action);
        match action {
            HotkeyAction::Profile(name) => {
                if let Err(e) = self.apply_profile(name) {
                    warn!("{:#}", e);
                    self.set_status(format!("{:#}", e));
                }
            }
            HotkeyAction::ToggleReminder => self.toggle_reminder(now),
            HotkeyAction::ResetDisplay => {
                if let Err(e) = self.reset_display() {
                    warn!("{:#}", e);
                }
            }
            HotkeyAction::Warmer => self.adjust_temperature(-(TEMPERATURE_STEP as i64)),
            HotkeyAction::Cooler => self.adjust_temperature(TEMPERATURE_STEP as i64),
        }
    }

    /// Drive the reminder from the host's periodic timer
    pub fn tick(&mut self, now: Instant) -> bool {
        let fired = self.reminder.poll(now);
        if fired {
            self.set_status("Time for a break".to_string());
        }
        fired
    }

    /// Tooltip text: last status plus the reminder countdown
    pub fn tooltip(&self, now: Instant) -> String {
        match self.reminder.remaining(now) {
            Some(left) => format!(
                "{} | break in {}",
                self.status,
                reminder::format_remaining(left)
            ),
            None => format!("{} | reminders off", self.status),
        }
    }

    /// Leave the screen untinted and record today's usage
    pub fn shutdown(&mut self, now: Instant) -> Result<()> {
        if let Err(e) = self.gamma.reset() {
            warn!("{:#}", e);
        }
        let used = now.saturating_duration_since(self.started).as_secs();
        stats::record(
            &self.files.stats,
            Local::now().date_naive(),
            used,
            self.reminder.fired(),
        )
        .context("Failed to record usage statistics")?;
        Ok(())
    }

    fn set_status(&mut self, status: String) {
        info!("{}", status);
        self.status = status;
    }

    fn save(&self) {
        if let Err(e) = config::save_to(&self.files.settings, &self.config) {
            warn!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brightness::tests::FakeMonitor;
    use crate::gamma::tests::FakeGamma;
    use crate::gamma::GammaRamp;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    type TestApp = App<FakeGamma, FakeMonitor>;

    fn files(dir: &TempDir) -> DataFiles {
        DataFiles {
            settings: dir.path().join("settings.json"),
            stats: dir.path().join("stats.json"),
        }
    }

    fn app_with(config: AppConfig, dir: &TempDir, now: Instant) -> TestApp {
        App::new(
            config,
            files(dir),
            GammaController::new(FakeGamma::default()),
            BrightnessController::new(FakeMonitor::new(0, 50, 100)),
            || {},
            now,
        )
        .unwrap()
    }

    #[test]
    fn restore_applies_stored_setting_to_both_devices() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.display = DisplaySetting::new(4000, 30);
        let mut app = app_with(config, &dir, Instant::now());

        app.restore_display();
        assert_eq!(app.gamma.temperature(), Some(4000));
        assert_eq!(app.brightness.device_ref().unwrap().writes, vec![30]);
        assert_eq!(app.status(), "4000K, 30%");
    }

    #[test]
    fn profile_is_applied_and_persisted() {
        let dir = TempDir::new().unwrap();
        let mut app = app_with(AppConfig::default(), &dir, Instant::now());

        app.apply_profile("Night Mode").unwrap();
        assert_eq!(app.config().display, DisplaySetting::new(3500, 40));
        assert!(app.status().starts_with("Night Mode"));

        let saved = config::load_from(&dir.path().join("settings.json"));
        assert_eq!(saved.display, DisplaySetting::new(3500, 40));
    }

    #[test]
    fn unknown_profile_from_hotkey_only_sets_status() {
        let dir = TempDir::new().unwrap();
        let mut app = app_with(AppConfig::default(), &dir, Instant::now());

        app.handle_hotkey(&HotkeyAction::Profile("Cinema".into()), Instant::now());
        assert!(app.status().contains("Cinema"));
        assert_eq!(app.gamma.temperature(), None);
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn missing_brightness_monitor_still_applies_temperature() {
        let dir = TempDir::new().unwrap();
        let mut app: TestApp = App::new(
            AppConfig::default(),
            files(&dir),
            GammaController::new(FakeGamma::default()),
            BrightnessController::unsupported(),
            || {},
            Instant::now(),
        )
        .unwrap();

        assert!(app.apply_display(DisplaySetting::new(3000, 20)));
        assert_eq!(app.gamma.temperature(), Some(3000));
        assert_eq!(app.config().display, DisplaySetting::new(3000, 20));
    }

    #[test]
    fn rejected_ramp_keeps_previous_temperature() {
        let dir = TempDir::new().unwrap();
        let mut app: TestApp = App::new(
            AppConfig::default(),
            files(&dir),
            GammaController::new(FakeGamma {
                reject: true,
                ..Default::default()
            }),
            BrightnessController::new(FakeMonitor::new(0, 50, 100)),
            || {},
            Instant::now(),
        )
        .unwrap();

        app.apply_display(DisplaySetting::new(3000, 60));
        assert_eq!(app.config().display.temperature, NEUTRAL_TEMPERATURE);
        assert_eq!(app.config().display.brightness, 60);
        assert!(app.status().contains("colour unavailable"));
    }

    #[test]
    fn fade_walks_to_target_and_saves() {
        let dir = TempDir::new().unwrap();
        let mut app = app_with(AppConfig::default(), &dir, Instant::now());

        assert_eq!(app.fade_brightness(70, Duration::ZERO).unwrap(), 70);
        let writes = &app.brightness.device_ref().unwrap().writes;
        assert_eq!(writes.len(), FADE_STEPS as usize);
        assert_eq!(*writes.last().unwrap(), 70);
        assert_eq!(app.config().display.brightness, 70);
    }

    #[test]
    fn warmer_and_cooler_step_and_clamp() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.display.temperature = 9900;
        let mut app = app_with(config, &dir, Instant::now());
        let now = Instant::now();

        app.handle_hotkey(&HotkeyAction::Cooler, now);
        assert_eq!(app.config().display.temperature, 10000);

        app.handle_hotkey(&HotkeyAction::Warmer, now);
        app.handle_hotkey(&HotkeyAction::Warmer, now);
        assert_eq!(app.config().display.temperature, 9500);
    }

    #[test]
    fn reset_restores_linear_ramp() {
        let dir = TempDir::new().unwrap();
        let mut app = app_with(AppConfig::default(), &dir, Instant::now());

        app.apply_profile("Reading").unwrap();
        app.handle_hotkey(&HotkeyAction::ResetDisplay, Instant::now());

        let applied = &app.gamma.device_ref().unwrap().applied;
        assert_eq!(*applied.last().unwrap(), GammaRamp::linear());
        assert_eq!(app.config().display.temperature, NEUTRAL_TEMPERATURE);
    }

    #[test]
    fn display_without_any_device_reports_nothing_applied() {
        let dir = TempDir::new().unwrap();
        let mut app: TestApp = App::new(
            AppConfig::default(),
            files(&dir),
            GammaController::unsupported(),
            BrightnessController::unsupported(),
            || {},
            Instant::now(),
        )
        .unwrap();

        assert!(!app.apply_display(DisplaySetting::new(3000, 40)));
        assert!(app.status().contains("colour unavailable"));
        assert!(app.reset_display().is_err());
        assert!(app.status().starts_with("Reset failed"));
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn reminder_fires_after_interval_until_toggled_off() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.reminder = ReminderConfig {
            interval_seconds: 60,
            enabled: true,
        };
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let start = Instant::now();
        let mut app: TestApp = App::new(
            config,
            files(&dir),
            GammaController::new(FakeGamma::default()),
            BrightnessController::new(FakeMonitor::new(0, 50, 100)),
            move || counter.set(counter.get() + 1),
            start,
        )
        .unwrap();

        assert!(!app.tick(start + Duration::from_secs(59)));
        assert!(app.tick(start + Duration::from_secs(60)));
        assert!(app.tick(start + Duration::from_secs(120)));
        assert_eq!(count.get(), 2);
        assert_eq!(app.status(), "Time for a break");

        app.toggle_reminder(start + Duration::from_secs(121));
        assert!(!app.reminder_enabled());
        assert!(!app.tick(start + Duration::from_secs(600)));
        assert_eq!(count.get(), 2);

        let saved = config::load_from(&dir.path().join("settings.json"));
        assert!(!saved.reminder.enabled);
    }

    #[test]
    fn zero_interval_in_settings_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.reminder.interval_seconds = 0;
        let mut app = app_with(config, &dir, Instant::now());

        let now = Instant::now();
        app.toggle_reminder(now);
        assert_eq!(
            app.reminder.remaining(now),
            Some(Duration::from_secs(reminder::DEFAULT_INTERVAL_SECS))
        );
        assert!(app.set_reminder_interval(0, now).is_err());
    }

    #[test]
    fn tooltip_shows_countdown() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let mut app = app_with(AppConfig::default(), &dir, start);

        assert_eq!(app.tooltip(start), "Ready | reminders off");
        app.set_reminder_interval(300, start).unwrap();
        app.toggle_reminder(start);
        assert!(app.tooltip(start + Duration::from_secs(60)).ends_with("break in 04:00"));
    }

    #[test]
    fn shutdown_resets_gamma_and_records_usage() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let mut app = app_with(AppConfig::default(), &dir, start);

        app.apply_profile("Night Mode").unwrap();
        app.shutdown(start + Duration::from_secs(90)).unwrap();

        let applied = &app.gamma.device_ref().unwrap().applied;
        assert_eq!(*applied.last().unwrap(), GammaRamp::linear());

        let log = stats::load(&dir.path().join("stats.json")).unwrap();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(log[&today].usage_seconds, 90);
    }
}
