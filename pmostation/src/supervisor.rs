//! StationSupervisor : cycle de vie des encodeurs, un par station.
//!
//! Le superviseur possède le [`StationStore`] et le [`ProcessRegistry`]
//! derrière un unique `RwLock`. Chaque opération mutante (ajout, démarrage,
//! arrêt, réconciliation) garde le verrou en écriture pendant toute la
//! séquence {mutation du store, mutation du registre, sauvegarde}.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::command::StreamCommand;
use crate::error::{Error, Result};
use crate::registry::{ProcessRegistry, StreamProcess, Termination};
use crate::station::{Station, StationDefinition};
use crate::store::StationStore;

/// Default bound on the wait after SIGTERM.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether stations are backed by real encoder processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Status transitions only, nothing is spawned (no audio tooling installed).
    #[default]
    Simulated,
    /// One encoder process per running station.
    Real,
}

impl StreamingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingMode::Simulated => "simulated",
            StreamingMode::Real => "real",
        }
    }
}

impl FromStr for StreamingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "simulated" => Ok(StreamingMode::Simulated),
            "real" | "ffmpeg" => Ok(StreamingMode::Real),
            other => Err(format!("unknown streaming mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor settings, independent from the YAML configuration layer.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub stations_file: PathBuf,
    pub streaming_mode: StreamingMode,
    /// Encoder binary (ffmpeg)
    pub ffmpeg_path: PathBuf,
    /// Playback source binary (librespot), feeds the encoder outside this crate
    pub librespot_path: PathBuf,
    pub stop_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(stations_file: impl Into<PathBuf>) -> Self {
        Self {
            stations_file: stations_file.into(),
            streaming_mode: StreamingMode::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            librespot_path: PathBuf::from("librespot"),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_streaming_mode(mut self, mode: StreamingMode) -> Self {
        self.streaming_mode = mode;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_librespot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.librespot_path = path.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

struct SupervisorState {
    store: StationStore,
    registry: ProcessRegistry,
}

/// Public control API over stations and their encoder processes.
pub struct StationSupervisor {
    config: SupervisorConfig,
    state: RwLock<SupervisorState>,
}

impl StationSupervisor {
    /// Charge le store et démarre avec un registre vide.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptStore`] si le document est illisible : l'erreur
    /// remonte telle quelle, les données ne sont jamais réinitialisées.
    pub async fn load(config: SupervisorConfig) -> Result<Self> {
        let store = StationStore::load(&config.stations_file).await?;

        info!(
            mode = %config.streaming_mode,
            ffmpeg = %config.ffmpeg_path.display(),
            librespot = %config.librespot_path.display(),
            stop_timeout = ?config.stop_timeout,
            stations = store.len(),
            "Station supervisor ready"
        );

        Ok(Self {
            config,
            state: RwLock::new(SupervisorState {
                store,
                registry: ProcessRegistry::new(),
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Creates a station. Invalid definitions are rejected before any mutation.
    pub async fn add(&self, definition: StationDefinition) -> Result<Station> {
        let mut state = self.state.write().await;
        state.store.add(definition).await
    }

    /// Snapshot of one station; `None` for an unknown id.
    pub async fn get(&self, id: &str) -> Option<Station> {
        let state = self.state.read().await;
        state.store.get(id).cloned()
    }

    /// All stations, after a reconciliation pass.
    pub async fn list(&self) -> Result<Vec<Station>> {
        let mut state = self.state.write().await;
        self.reconcile_locked(&mut state).await?;
        Ok(state.store.stations().to_vec())
    }

    /// Corrige le statut des stations dont l'encodeur s'est arrêté seul.
    ///
    /// Ne démarre jamais de processus. Retourne le nombre de stations corrigées.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        self.reconcile_locked(&mut state).await
    }

    /// Number of live processes held by the registry.
    pub async fn running_processes(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Builds the encoder invocation for a station without spawning it.
    pub fn build_command(&self, station: &Station) -> Result<StreamCommand> {
        StreamCommand::build(&self.config.ffmpeg_path, station)
    }

    /// Démarre la station. Sans effet si elle tourne déjà.
    ///
    /// # Errors
    ///
    /// - [`Error::StationNotFound`] pour un identifiant inconnu (aucune écriture)
    /// - [`Error::Validation`] si les champs de la station sont inutilisables
    /// - [`Error::StreamStart`] si l'encodeur ne peut pas être lancé ; la
    ///   station reste arrêtée
    pub async fn start(&self, id: &str) -> Result<Station> {
        let mut state = self.state.write().await;
        let SupervisorState { store, registry } = &mut *state;

        let station = store
            .get(id)
            .ok_or_else(|| Error::StationNotFound(id.to_string()))?;
        if station.is_running() {
            return Ok(station.clone());
        }

        let started_at = crate::station::now();

        let pid = match self.config.streaming_mode {
            StreamingMode::Simulated => None,
            StreamingMode::Real => {
                let command = self.build_command(station)?;
                let child = command
                    .to_command()
                    .spawn()
                    .map_err(|source| Error::StreamStart {
                        station_id: id.to_string(),
                        source,
                    })?;

                let process = StreamProcess::new(child);
                let pid = process.pid();
                registry.register(id, process)?;
                pid
            }
        };

        let station = store
            .get_mut(id)
            .ok_or_else(|| Error::StationNotFound(id.to_string()))?;
        station.mark_running(pid, started_at);
        let snapshot = station.clone();

        store.save().await?;

        info!(
            station_id = %id,
            name = %snapshot.name,
            pid = ?pid,
            mode = %self.config.streaming_mode,
            "Station started"
        );
        Ok(snapshot)
    }

    /// Arrête la station. Sans effet si elle ne tourne pas.
    ///
    /// L'encodeur reçoit SIGTERM puis dispose de `stop_timeout` pour sortir.
    /// Au-delà il est tué, la station est tout de même marquée arrêtée et
    /// persistée, et [`Error::StreamStopTimeout`] est retournée. Un échec de
    /// signal ou d'attente suit le même chemin avec [`Error::StreamStop`].
    pub async fn stop(&self, id: &str) -> Result<Station> {
        let mut state = self.state.write().await;
        let SupervisorState { store, registry } = &mut *state;

        let station = store
            .get(id)
            .ok_or_else(|| Error::StationNotFound(id.to_string()))?;
        if !station.is_running() {
            return Ok(station.clone());
        }

        let mut failure = None;
        if let Some(process) = registry.remove(id) {
            let pid = process.pid();
            match process.terminate(self.config.stop_timeout).await {
                Ok(Termination::Graceful(status)) | Ok(Termination::AlreadyExited(status)) => {
                    info!(station_id = %id, pid = ?pid, %status, "Encoder exited");
                }
                Ok(Termination::Killed) => {
                    warn!(
                        station_id = %id,
                        pid = ?pid,
                        timeout = ?self.config.stop_timeout,
                        "Encoder did not stop in time and was killed"
                    );
                    failure = Some(Error::StreamStopTimeout {
                        station_id: id.to_string(),
                        timeout: self.config.stop_timeout,
                    });
                }
                Err(source) => {
                    warn!(station_id = %id, pid = ?pid, error = %source, "Failed to terminate encoder");
                    failure = Some(Error::StreamStop {
                        station_id: id.to_string(),
                        source,
                    });
                }
            }
        }

        let station = store
            .get_mut(id)
            .ok_or_else(|| Error::StationNotFound(id.to_string()))?;
        station.mark_stopped();
        let snapshot = station.clone();

        store.save().await?;

        if let Some(error) = failure {
            return Err(error);
        }

        info!(station_id = %id, name = %snapshot.name, "Station stopped");
        Ok(snapshot)
    }

    /// Stops every running station, logging failures instead of aborting.
    pub async fn shutdown(&self) -> Result<()> {
        let running: Vec<String> = {
            let state = self.state.read().await;
            state
                .store
                .stations()
                .iter()
                .filter(|s| s.is_running())
                .map(|s| s.id.clone())
                .collect()
        };

        if !running.is_empty() {
            info!(count = running.len(), "Stopping running stations");
        }

        for id in running {
            match self.stop(&id).await {
                Ok(_) | Err(Error::StationNotFound(_)) => {}
                // Déjà journalisé par stop(), la station est marquée arrêtée
                Err(Error::StreamStopTimeout { .. }) | Err(Error::StreamStop { .. }) => {}
                Err(e @ Error::Persistence { .. }) => return Err(e),
                Err(e) => warn!(station_id = %id, error = %e, "Failed to stop station"),
            }
        }
        Ok(())
    }

    async fn reconcile_locked(&self, state: &mut SupervisorState) -> Result<usize> {
        if self.config.streaming_mode == StreamingMode::Simulated {
            return Ok(0);
        }

        let exited = state.registry.reap_exited();
        if exited.is_empty() {
            return Ok(0);
        }

        let mut corrected = 0;
        for process in &exited {
            if let Some(station) = state.store.get_mut(&process.station_id) {
                warn!(
                    station_id = %process.station_id,
                    pid = ?process.pid,
                    status = %process.status,
                    "Encoder exited on its own, marking station stopped"
                );
                station.mark_stopped();
                corrected += 1;
            }
        }

        state.store.save().await?;
        Ok(corrected)
    }
}
