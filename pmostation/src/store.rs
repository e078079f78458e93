//! Persistance des stations dans un document JSON unique.
//!
//! Le document est la seule source de vérité entre deux exécutions du
//! superviseur. Chaque mutation se termine par un [`StationStore::save`]
//! complet : pas de batching, la cohérence prime sur le débit.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::station::{Station, StationDefinition};

/// Station definitions backed by a pretty-printed JSON document.
#[derive(Debug)]
pub struct StationStore {
    path: PathBuf,
    stations: Vec<Station>,
}

impl StationStore {
    /// Charge le document (ou le crée vide s'il n'existe pas).
    ///
    /// Toutes les stations sont remises à `stopped` sans PID : aucun handle
    /// de processus ne survit à un redémarrage.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptStore`] si le document ne peut pas être décodé,
    /// [`Error::Persistence`] pour les erreurs d'entrée/sortie.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Persistence {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Station store not found, creating an empty one");
                let store = Self {
                    path,
                    stations: Vec::new(),
                };
                store.save().await?;
                return Ok(store);
            }
            Err(source) => return Err(Error::Persistence { path, source }),
        };

        let mut stations: Vec<Station> =
            serde_json::from_str(&content).map_err(|source| Error::CorruptStore {
                path: path.clone(),
                source,
            })?;

        for station in &mut stations {
            station.reset_for_restart();
        }

        info!(
            path = %path.display(),
            count = stations.len(),
            "Loaded station store"
        );

        Ok(Self { path, stations })
    }

    /// Réécrit le document complet de façon atomique (fichier temporaire
    /// synchronisé sur disque, puis rename).
    ///
    /// En cas d'échec, le fichier temporaire est supprimé et le document
    /// précédent reste intact.
    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.stations).map_err(|e| Error::Persistence {
            path: self.path.clone(),
            source: e.into(),
        })?;

        let tmp_path = self.tmp_path();
        if let Err(source) = self.replace_with(&tmp_path, json.as_bytes()).await {
            if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %e, "Failed to remove temporary store file");
                }
            }
            return Err(Error::Persistence {
                path: self.path.clone(),
                source,
            });
        }

        debug!(path = %self.path.display(), count = self.stations.len(), "Saved station store");
        Ok(())
    }

    async fn replace_with(&self, tmp_path: &Path, content: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(tmp_path, &self.path).await
    }

    /// Valide puis ajoute une station, et persiste.
    ///
    /// Rien n'est modifié si la définition est invalide.
    pub async fn add(&mut self, definition: StationDefinition) -> Result<Station> {
        let station = Station::create(definition.validate()?);

        self.stations.push(station.clone());
        if let Err(e) = self.save().await {
            self.stations.pop();
            return Err(e);
        }

        info!(station_id = %station.id, name = %station.name, "Station created");
        Ok(station)
    }

    pub fn get(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Station> {
        self.stations.iter_mut().find(|s| s.id == id)
    }

    /// Stations dans l'ordre de création. Le statut n'est pas rafraîchi ici.
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "stations.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
