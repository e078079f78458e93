//! Extension de pmoconfig pour le superviseur de stations
//!
//! Toutes les clés vivent sous la section `stations` :
//!
//! ```yaml
//! stations:
//!   directory: stations          # relatif au répertoire de configuration
//!   streaming_mode: mock         # mock | simulated | real | ffmpeg
//!   ffmpeg_path: ffmpeg
//!   librespot_path: librespot
//!   stop_timeout_secs: 10
//!   reconcile_interval_secs: 30  # 0 désactive la réconciliation périodique
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_yaml::Value;

use crate::supervisor::{StreamingMode, SupervisorConfig, DEFAULT_STOP_TIMEOUT};

const STATIONS_FILE_NAME: &str = "stations.json";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

/// Trait d'extension pour pmoconfig::Config
pub trait StationConfigExt {
    /// Chemin du document JSON des stations (répertoire créé si besoin)
    fn stations_file_path(&self) -> Result<PathBuf>;

    fn get_streaming_mode(&self) -> Result<StreamingMode>;

    fn set_streaming_mode(&self, mode: StreamingMode) -> Result<()>;

    fn get_ffmpeg_path(&self) -> Result<PathBuf>;

    fn get_librespot_path(&self) -> Result<PathBuf>;

    /// Délai d'attente après SIGTERM
    fn get_stop_timeout(&self) -> Duration;

    /// Période de réconciliation ; `None` si désactivée
    fn get_reconcile_interval(&self) -> Option<Duration>;

    /// Assemble la configuration complète du superviseur
    fn supervisor_config(&self) -> Result<SupervisorConfig>;
}

impl StationConfigExt for pmoconfig::Config {
    fn stations_file_path(&self) -> Result<PathBuf> {
        let dir = self.get_managed_dir(&["stations", "directory"], "stations")?;
        Ok(PathBuf::from(dir).join(STATIONS_FILE_NAME))
    }

    fn get_streaming_mode(&self) -> Result<StreamingMode> {
        match self.get_value(&["stations", "streaming_mode"]) {
            Ok(Value::String(s)) => s.parse().map_err(|e: String| anyhow!(e)),
            Ok(Value::Null) | Err(_) => {
                self.set_streaming_mode(StreamingMode::Simulated)?;
                Ok(StreamingMode::Simulated)
            }
            Ok(other) => Err(anyhow!(
                "stations.streaming_mode must be a string, got {:?}",
                other
            )),
        }
    }

    fn set_streaming_mode(&self, mode: StreamingMode) -> Result<()> {
        let value = match mode {
            StreamingMode::Simulated => "mock",
            StreamingMode::Real => "real",
        };
        self.set_value(&["stations", "streaming_mode"], Value::String(value.into()))
    }

    fn get_ffmpeg_path(&self) -> Result<PathBuf> {
        self.get_string_or(&["stations", "ffmpeg_path"], "ffmpeg")
            .map(PathBuf::from)
    }

    fn get_librespot_path(&self) -> Result<PathBuf> {
        self.get_string_or(&["stations", "librespot_path"], "librespot")
            .map(PathBuf::from)
    }

    fn get_stop_timeout(&self) -> Duration {
        let secs = self.get_u64_or(
            &["stations", "stop_timeout_secs"],
            DEFAULT_STOP_TIMEOUT.as_secs(),
        );
        Duration::from_secs(secs.max(1))
    }

    fn get_reconcile_interval(&self) -> Option<Duration> {
        match self.get_u64_or(
            &["stations", "reconcile_interval_secs"],
            DEFAULT_RECONCILE_INTERVAL_SECS,
        ) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn supervisor_config(&self) -> Result<SupervisorConfig> {
        Ok(SupervisorConfig::new(self.stations_file_path()?)
            .with_streaming_mode(self.get_streaming_mode()?)
            .with_ffmpeg_path(self.get_ffmpeg_path()?)
            .with_librespot_path(self.get_librespot_path()?)
            .with_stop_timeout(self.get_stop_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> (tempfile::TempDir, pmoconfig::Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = pmoconfig::Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults() {
        let (dir, config) = config();
        let supervisor = config.supervisor_config().unwrap();

        assert_eq!(supervisor.streaming_mode, StreamingMode::Simulated);
        assert_eq!(supervisor.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(supervisor.librespot_path, PathBuf::from("librespot"));
        assert_eq!(supervisor.stop_timeout, Duration::from_secs(10));
        assert_eq!(
            supervisor.stations_file,
            dir.path().join("stations").join("stations.json")
        );
        assert_eq!(config.get_reconcile_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_overrides() {
        let (_dir, config) = config();
        config.set_streaming_mode(StreamingMode::Real).unwrap();
        config
            .set_value(&["stations", "stop_timeout_secs"], Value::String("3".into()))
            .unwrap();
        config
            .set_value(
                &["stations", "reconcile_interval_secs"],
                Value::Number(0.into()),
            )
            .unwrap();

        assert_eq!(config.get_streaming_mode().unwrap(), StreamingMode::Real);
        assert_eq!(config.get_stop_timeout(), Duration::from_secs(3));
        assert_eq!(config.get_reconcile_interval(), None);
    }

    #[test]
    fn test_invalid_streaming_mode() {
        let (_dir, config) = config();
        config
            .set_value(&["stations", "streaming_mode"], Value::String("vinyl".into()))
            .unwrap();
        assert!(config.get_streaming_mode().is_err());
    }
}
