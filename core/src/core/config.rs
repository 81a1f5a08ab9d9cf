use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for unary collaborator calls (credential resolution, send,
    /// modify, delete, search fetch, mark-read, upload). Absent means the
    /// default; `0` disables the deadline. Subscriptions are never timed out.
    pub call_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Read `tandem_config.json` from `data_dir`. A missing or malformed
    /// file silently yields defaults.
    pub fn load(data_dir: &str) -> Self {
        let path = Path::new(data_dir).join("tandem_config.json");
        let Ok(bytes) = std::fs::read(&path) else {
            return Self::default();
        };
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    pub(super) fn call_timeout(&self) -> Option<Duration> {
        match self.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(dir.path().to_str().unwrap());
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn explicit_zero_disables_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tandem_config.json"),
            br#"{"call_timeout_secs": 0}"#,
        )
        .unwrap();
        let config = ClientConfig::load(dir.path().to_str().unwrap());
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tandem_config.json"), b"not json").unwrap();
        let config = ClientConfig::load(dir.path().to_str().unwrap());
        assert_eq!(config.call_timeout_secs, None);
    }
}
