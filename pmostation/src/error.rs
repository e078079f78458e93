//! Types d'erreurs pour pmostation

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Un champ rejeté lors de la validation d'une définition de station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct FieldIssue {
    /// Chemin du champ (`port`, `shoutcast.host`, ...)
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "missing")
    }
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Erreurs du superviseur de stations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid station definition: {}", format_issues(.0))]
    Validation(Vec<FieldIssue>),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Corrupt station store {}: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist stations to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start stream for station {station_id}: {source}")]
    StreamStart {
        station_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream for station {station_id} did not exit within {timeout:?} after SIGTERM")]
    StreamStopTimeout {
        station_id: String,
        timeout: Duration,
    },

    #[error("Failed to stop stream for station {station_id}: {source}")]
    StreamStop {
        station_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A process is already registered for station {0}")]
    ProcessAlreadyRegistered(String),
}

impl Error {
    pub(crate) fn invalid(issues: Vec<FieldIssue>) -> Self {
        Self::Validation(issues)
    }

    /// Champs en cause pour une erreur de validation
    pub fn field_issues(&self) -> Option<&[FieldIssue]> {
        match self {
            Self::Validation(issues) => Some(issues),
            _ => None,
        }
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type Result spécialisé pour pmostation
pub type Result<T> = std::result::Result<T, Error>;
