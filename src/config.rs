use crate::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub data_dir: PathBuf,
    pub debounce_ms: u64,
    pub http_timeout_secs: u64,
    pub image_probe_timeout_ms: u64,
    pub native_host_path: Option<PathBuf>,
    pub repair_timeout_secs: u64,
    pub log_file: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".stackdash"),
            debounce_ms: 150,
            http_timeout_secs: 15,
            image_probe_timeout_ms: 2_500,
            native_host_path: None,
            repair_timeout_secs: 600,
            log_file: "stackdash.log".to_string(),
        }
    }
}

impl DashboardConfig {
    /// Reads a YAML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str::<Self>(&raw)?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("stackdash.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn image_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.image_probe_timeout_ms)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::DashboardConfig;
    use std::fs;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DashboardConfig::load(&dir.path().join("absent.yaml")).expect("config");
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.debounce_ms, 150);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stackdash.yaml");
        fs::write(&path, "debounceMs: 300\nnativeHostPath: /opt/stackdash/native\n").expect("write");
        let config = DashboardConfig::load(&path).expect("config");
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.http_timeout_secs, 15);
        assert!(config.native_host_path.is_some());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stackdash.yaml");
        fs::write(&path, "debounceMs: [not, a, number]\n").expect("write");
        let err = DashboardConfig::load(&path).expect_err("should fail");
        assert!(err.to_string().starts_with("CONFIG_INVALID"));
    }
}
