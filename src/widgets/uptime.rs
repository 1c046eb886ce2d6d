use super::http::{HttpClient, HttpRequest};
use super::WidgetDisplay;
use crate::urls::encode_component;
use serde::Serialize;
use serde_json::Value;

pub const UPTIME_ENDPOINT: &str = "https://api.uptimerobot.com/v2/getMonitors";

/// The direct endpoint first, then CORS relays in order of preference.
pub fn proxy_chain() -> Vec<String> {
    vec![
        UPTIME_ENDPOINT.to_string(),
        format!("https://cors.isomorphic-git.org/{UPTIME_ENDPOINT}"),
        format!("https://corsproxy.io/?{UPTIME_ENDPOINT}"),
        format!("https://api.allorigins.win/raw?url={}", encode_component(UPTIME_ENDPOINT)),
    ]
}

fn form(api_key: &str) -> Vec<(String, String)> {
    [
        ("api_key", api_key),
        ("format", "json"),
        ("logs", "1"),
        ("logs_limit", "5"),
        ("custom_uptime_ratios", "1"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Data(Value),
    RateLimited,
    Exhausted,
}

/// Walks the proxy chain until one answers with `stat: ok`. A 429 from any hop
/// stops the walk, since every relay forwards to the same quota.
pub async fn fetch_monitors(http: &dyn HttpClient, api_key: &str) -> FetchOutcome {
    for url in proxy_chain() {
        let Some(response) = http.execute(HttpRequest::post_form(url.clone(), form(api_key))).await else {
            continue;
        };
        if response.status == 429 {
            tracing::info!(url = %url, "uptime API rate limited");
            return FetchOutcome::RateLimited;
        }
        if !response.is_success() {
            continue;
        }
        match response.json() {
            Some(data) if data.get("stat").and_then(Value::as_str) == Some("ok") => {
                return FetchOutcome::Data(data);
            }
            _ => tracing::debug!(url = %url, "uptime response not ok, trying next hop"),
        }
    }
    tracing::warn!("uptime monitors unavailable through every hop");
    FetchOutcome::Exhausted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLog {
    pub log_type: i64,
    pub datetime: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub id: String,
    pub friendly_name: String,
    pub url: String,
    pub status: i64,
    pub custom_uptime_ratio: Option<f64>,
    pub logs: Vec<MonitorLog>,
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|value| value as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl Monitor {
    pub fn from_value(raw: &Value) -> Option<Self> {
        let map = raw.as_object()?;
        let custom_uptime_ratio = match map.get("custom_uptime_ratio") {
            Some(Value::String(text)) => text.split('-').next().and_then(|first| first.trim().parse().ok()),
            Some(Value::Number(number)) => number.as_f64(),
            _ => None,
        };
        let logs = map
            .get("logs")
            .and_then(Value::as_array)
            .map(|logs| {
                logs.iter()
                    .filter_map(|log| {
                        Some(MonitorLog {
                            log_type: integer(log.get("type"))?,
                            datetime: integer(log.get("datetime")).unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            id: text(map.get("id")),
            friendly_name: text(map.get("friendly_name")),
            url: text(map.get("url")),
            status: integer(map.get("status")).unwrap_or(0),
            custom_uptime_ratio,
            logs,
        })
    }

    pub fn is_up(&self) -> bool {
        self.status == 2
    }

    /// Stable identity used to track alert state across polls.
    pub fn alert_id(&self) -> Option<&str> {
        [&self.id, &self.url, &self.friendly_name]
            .into_iter()
            .map(String::as_str)
            .find(|candidate| !candidate.is_empty())
    }

    pub fn display_name(&self) -> &str {
        [&self.friendly_name, &self.url, &self.id]
            .into_iter()
            .map(String::as_str)
            .find(|candidate| !candidate.is_empty())
            .unwrap_or("Monitor")
    }

    /// Most recent "down" log entry (type 1) with a timestamp.
    pub fn latest_down_log(&self) -> Option<&MonitorLog> {
        let mut logs: Vec<&MonitorLog> = self.logs.iter().collect();
        logs.sort_by(|a, b| b.datetime.cmp(&a.datetime));
        logs.into_iter().find(|log| log.log_type == 1 && log.datetime != 0)
    }
}

pub fn monitors(data: &Value) -> Vec<Monitor> {
    if data.get("stat").and_then(Value::as_str) != Some("ok") {
        return Vec::new();
    }
    data.get("monitors")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Monitor::from_value).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UptimeTier {
    Good,
    Warn,
    Degraded,
    Bad,
}

pub fn tier_for(ratio: f64) -> UptimeTier {
    if ratio < 90.0 {
        UptimeTier::Bad
    } else if ratio < 97.0 {
        UptimeTier::Degraded
    } else if ratio < 99.5 {
        UptimeTier::Warn
    } else {
        UptimeTier::Good
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub name: String,
    pub ratio_label: String,
    pub tier: UptimeTier,
    pub is_up: bool,
}

pub fn monitor_view(monitor: &Monitor) -> MonitorView {
    let ratio = monitor
        .custom_uptime_ratio
        .filter(|ratio| ratio.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let is_up = monitor.is_up();
    let (ratio_label, tier) = if is_up {
        (format!("{ratio:.2}%"), tier_for(ratio))
    } else {
        ("100%".to_string(), UptimeTier::Bad)
    };
    MonitorView {
        name: monitor.display_name().to_string(),
        ratio_label,
        tier,
        is_up,
    }
}

/// Response handed to each uptime widget by the shared request manager.
#[derive(Debug, Clone, PartialEq)]
pub enum UptimeResponse {
    Data(Value),
    RateLimited,
    Error,
}

/// Picks the widget's monitor and projects it. Returns the monitor as well so
/// the caller can run down-alert tracking on it.
pub fn display_for(response: &UptimeResponse, monitor_index: usize) -> (WidgetDisplay, Option<Monitor>) {
    match response {
        UptimeResponse::RateLimited => (WidgetDisplay::RateLimited, None),
        UptimeResponse::Error => (WidgetDisplay::Empty, None),
        UptimeResponse::Data(data) => {
            let monitors = monitors(data);
            if monitors.is_empty() {
                return (WidgetDisplay::Empty, None);
            }
            let chosen = monitors[monitor_index % monitors.len()].clone();
            (WidgetDisplay::Uptime(monitor_view(&chosen)), Some(chosen))
        }
    }
}
