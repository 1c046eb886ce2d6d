use super::uptime::Monitor;
use crate::models::{Settings, UptimeAlertLog};
use crate::state::normalize::{DEFAULT_ALERT_INTERVAL_MINUTES, MAX_ALERT_LOGS, MAX_ALERT_INTERVAL_MINUTES};
use chrono::{DateTime, SecondsFormat};
use std::collections::HashMap;

/// Remembers, per monitor, the last observed status and when it last alerted.
/// Lives for one surface session and is never persisted.
#[derive(Debug, Default)]
pub struct UptimeAlertTracker {
    last_status: HashMap<String, i64>,
    last_alert_at: HashMap<String, i64>,
}

fn interval_ms(settings: &Settings) -> i64 {
    let minutes = match settings.uptime_alert_interval_minutes {
        0 => DEFAULT_ALERT_INTERVAL_MINUTES,
        minutes => minutes.min(MAX_ALERT_INTERVAL_MINUTES),
    };
    i64::from(minutes) * 60 * 1000
}

fn iso_from_secs(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl UptimeAlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one poll result for a monitor. When the monitor is down and an
    /// alert is due (status changed, or the interval passed since the later of
    /// the outage start and the previous alert), the entry is prepended to the
    /// settings log and returned. Nothing is recorded while alerts are off.
    pub fn observe(&mut self, monitor: &Monitor, settings: &mut Settings, now_ms: i64) -> Option<UptimeAlertLog> {
        let id = monitor.alert_id()?.to_string();
        let previous = self.last_status.insert(id.clone(), monitor.status);
        if monitor.is_up() {
            return None;
        }

        let down_log = monitor.latest_down_log()?;
        let date_time_down = iso_from_secs(down_log.datetime)?;
        if !settings.uptime_alerts_enabled {
            return None;
        }

        let down_ms = down_log.datetime * 1000;
        let last_alert_at = self.last_alert_at.get(&id).copied().unwrap_or(down_ms);
        let anchor = last_alert_at.max(down_ms);
        let status_changed = previous != Some(monitor.status);
        if !status_changed && now_ms - anchor < interval_ms(settings) {
            return None;
        }

        self.last_alert_at.insert(id, now_ms);
        let entry = UptimeAlertLog {
            monitor_name: monitor.display_name().to_string(),
            ip_or_url: monitor.url.clone(),
            status: "down".to_string(),
            date_time_down,
        };
        tracing::info!(monitor = %entry.monitor_name, down_at = %entry.date_time_down, "uptime monitor down");
        push_alert_log(settings, entry.clone());
        Some(entry)
    }
}

/// Prepends an entry, keeps the log newest first and bounded.
pub fn push_alert_log(settings: &mut Settings, entry: UptimeAlertLog) {
    settings.uptime_alert_logs.insert(0, entry);
    settings
        .uptime_alert_logs
        .sort_by(|a, b| b.date_time_down.cmp(&a.date_time_down));
    settings.uptime_alert_logs.truncate(MAX_ALERT_LOGS);
}
