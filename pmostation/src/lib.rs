//! # pmostation - Superviseur de stations de diffusion
//!
//! Une station associe une playlist à un point de montage Icecast. Cette
//! crate fournit :
//! - La validation des définitions de station (tous les champs rejetés sont rapportés)
//! - La persistance JSON de toutes les stations (écriture atomique)
//! - Le lancement et l'arrêt d'un encodeur par station, avec arrêt borné
//! - La réconciliation des statuts quand un encodeur s'arrête seul
//! - Une API REST optionnelle (feature `api`)
//!
//! # Architecture
//!
//! - **StationSupervisor** : point d'entrée, sérialise toutes les mutations
//! - **StationStore** : document JSON des stations
//! - **ProcessRegistry** : encodeurs vivants, en mémoire uniquement
//! - **StreamCommand** : ligne de commande de l'encodeur
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use pmostation::{PortValue, ShoutcastDefinition, StationDefinition, StationSupervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> pmostation::Result<()> {
//! let supervisor = StationSupervisor::load(SupervisorConfig::new("/tmp/stations.json")).await?;
//!
//! let station = supervisor
//!     .add(StationDefinition {
//!         name: Some("Lounge".into()),
//!         playlist_id: Some("pl-42".into()),
//!         playlist_name: Some("Lounge classics".into()),
//!         port: Some(PortValue::from(8000)),
//!         mountpoint: Some("/lounge".into()),
//!         shoutcast: Some(ShoutcastDefinition {
//!             user: Some("source".into()),
//!             password: Some("hackme".into()),
//!             host: Some("localhost".into()),
//!             bitrate: Some("128k".into()),
//!         }),
//!     })
//!     .await?;
//!
//! supervisor.start(&station.id).await?;
//! supervisor.stop(&station.id).await?;
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
mod registry;
mod station;
mod store;
mod supervisor;

#[cfg(feature = "pmoconfig")]
mod config_ext;

#[cfg(feature = "api")]
pub mod api;

#[cfg(feature = "api")]
pub mod openapi;

// Réexports publics
pub use command::StreamCommand;
pub use error::{Error, FieldIssue, Result};
pub use registry::{ExitedProcess, ProcessRegistry, StreamProcess, Termination};
pub use station::{
    PortValue, ShoutcastConfig, ShoutcastDefinition, Station, StationDefinition, StationStatus,
};
pub use store::StationStore;
pub use supervisor::{StationSupervisor, StreamingMode, SupervisorConfig, DEFAULT_STOP_TIMEOUT};

#[cfg(feature = "pmoconfig")]
pub use config_ext::StationConfigExt;

#[cfg(feature = "api")]
pub use api::station_api_router;

#[cfg(feature = "api")]
pub use openapi::ApiDoc;
