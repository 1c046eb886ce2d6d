use super::ExportFile;
use crate::dashboard::{Dashboard, Durability};
use crate::errors::{AppError, AppResult};
use crate::i18n::t;
use crate::models::{Settings, UptimeAlertLog};
use crate::state::normalize::normalize_settings;
use chrono::Utc;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Txt,
}

impl LogFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Txt => "txt",
        }
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

fn logs_as_text(logs: &[UptimeAlertLog]) -> String {
    logs.iter()
        .map(|log| {
            format!(
                "{}\nEndpoint: {}\nStatus: down\nDown at: {}\n",
                or_placeholder(&log.monitor_name, "Monitor"),
                log.ip_or_url,
                log.date_time_down
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Overlays a partial patch on the current settings. Unknown keys are dropped
/// and invalid values fall back to defaults, exactly as on load.
fn apply_patch(current: &Settings, patch: &Value) -> AppResult<Settings> {
    let Some(patch) = patch.as_object() else {
        return Err(AppError::Validation("settings patch must be an object".to_string()));
    };
    let mut merged = serde_json::to_value(current)?;
    if let Some(fields) = merged.as_object_mut() {
        fields.extend(patch.clone());
    }
    Ok(normalize_settings(Some(&merged)))
}

impl Dashboard {
    pub async fn update_settings(&self, patch: Value) -> AppResult<Settings> {
        let mut doc = self.document.lock().await;
        let settings = apply_patch(&doc.settings, &patch)?;
        doc.settings = settings.clone();
        self.commit(doc, Durability::Debounced).await;
        Ok(settings)
    }

    pub async fn clear_uptime_logs(&self) {
        let mut doc = self.document.lock().await;
        if doc.settings.uptime_alert_logs.is_empty() {
            return;
        }
        doc.settings.uptime_alert_logs.clear();
        self.commit(doc, Durability::Debounced).await;
    }

    pub async fn export_uptime_logs(&self, format: LogFormat) -> AppResult<ExportFile> {
        let doc = self.document.lock().await;
        let language = doc.settings.interface_language;
        let logs = &doc.settings.uptime_alert_logs;
        if logs.is_empty() {
            return Err(AppError::Validation(t(language, "No log entries to export.")));
        }
        let contents = match format {
            LogFormat::Json => serde_json::to_string_pretty(logs)?,
            LogFormat::Txt => logs_as_text(logs),
        };
        Ok(ExportFile {
            filename: format!(
                "uptime-logs-{}.{}",
                Utc::now().format("%Y-%m-%d-%H-%M-%S"),
                format.extension()
            ),
            contents,
            warning: None,
        })
    }
}
