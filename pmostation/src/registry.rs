//! In-memory registry of live encoder processes.
//!
//! The registry only exists while the supervisor runs: it is built empty at
//! startup and never persisted. Entries are added by `start` and removed
//! when a process is terminated or observed to have exited.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A spawned encoder process owned by the registry.
#[derive(Debug)]
pub struct StreamProcess {
    child: Child,
    pid: Option<u32>,
}

/// Outcome of [`StreamProcess::terminate`].
#[derive(Debug)]
pub enum Termination {
    /// Le processus était déjà terminé avant l'envoi du signal.
    AlreadyExited(ExitStatus),
    /// Sortie dans le délai après SIGTERM.
    Graceful(ExitStatus),
    /// Délai dépassé : SIGKILL envoyé puis processus récolté.
    Killed,
}

impl StreamProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }

    /// PID recorded at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check. `Some(status)` once the process has exited.
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Sends SIGTERM and waits at most `grace` for the process to exit.
    ///
    /// When the grace period elapses the process is killed and reaped so no
    /// orphan encoder outlives its registry entry.
    pub async fn terminate(mut self, grace: Duration) -> std::io::Result<Termination> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(Termination::AlreadyExited(status));
        }

        self.send_sigterm()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(Termination::Graceful(status?)),
            Err(_) => {
                warn!(pid = ?self.pid, ?grace, "Encoder ignored SIGTERM, killing it");
                self.child.kill().await?;
                Ok(Termination::Killed)
            }
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&mut self) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Déjà récolté
            return Ok(());
        };

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    // Pas de SIGTERM hors unix : arrêt direct
    #[cfg(not(unix))]
    fn send_sigterm(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// A registry entry whose process was found to have exited.
#[derive(Debug)]
pub struct ExitedProcess {
    pub station_id: String,
    pub pid: Option<u32>,
    pub status: ExitStatus,
}

/// Station id → live encoder process.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, StreamProcess>,
}

impl ProcessRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the process backing `station_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessAlreadyRegistered`] if the station already has a
    /// process; the new process is handed back to the caller's drop, which
    /// kills it.
    pub fn register(&mut self, station_id: &str, process: StreamProcess) -> Result<()> {
        if self.processes.contains_key(station_id) {
            return Err(Error::ProcessAlreadyRegistered(station_id.to_string()));
        }

        debug!(station_id, pid = ?process.pid(), "Registering encoder process");
        self.processes.insert(station_id.to_string(), process);
        Ok(())
    }

    /// Detach the process of a station, if any.
    pub fn remove(&mut self, station_id: &str) -> Option<StreamProcess> {
        let removed = self.processes.remove(station_id);
        if removed.is_some() {
            debug!(station_id, "Removed encoder process from registry");
        }
        removed
    }

    pub fn contains(&self, station_id: &str) -> bool {
        self.processes.contains_key(station_id)
    }

    pub fn pid(&self, station_id: &str) -> Option<u32> {
        self.processes.get(station_id).and_then(StreamProcess::pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Polls every process without blocking and drops the ones that exited.
    ///
    /// A process whose status cannot be read is kept: liveness is only
    /// revised on positive evidence of exit.
    pub fn reap_exited(&mut self) -> Vec<ExitedProcess> {
        let mut exited = Vec::new();

        self.processes.retain(|station_id, process| {
            match process.try_exit_status() {
                Ok(Some(status)) => {
                    exited.push(ExitedProcess {
                        station_id: station_id.clone(),
                        pid: process.pid(),
                        status,
                    });
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(station_id = %station_id, error = %e, "Failed to poll encoder process");
                    true
                }
            }
        });

        for process in &exited {
            debug!(
                station_id = %process.station_id,
                pid = ?process.pid,
                status = %process.status,
                "Encoder process exited"
            );
        }

        exited
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> StreamProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        StreamProcess::new(child)
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let mut registry = ProcessRegistry::new();
        registry.register("a", spawn_sh("sleep 5")).unwrap();

        let err = registry.register("a", spawn_sh("sleep 5")).unwrap_err();
        assert!(matches!(err, Error::ProcessAlreadyRegistered(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reap_exited_removes_only_finished() {
        let mut registry = ProcessRegistry::new();
        registry.register("done", spawn_sh("exit 3")).unwrap();
        registry.register("alive", spawn_sh("sleep 5")).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut exited = Vec::new();
        while exited.is_empty() && tokio::time::Instant::now() < deadline {
            exited = registry.reap_exited();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].station_id, "done");
        assert_eq!(exited[0].status.code(), Some(3));
        assert!(registry.contains("alive"));
        assert!(!registry.contains("done"));
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let process = spawn_sh("exec sleep 30");
        let outcome = process.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, Termination::Graceful(_)));
    }

    #[tokio::test]
    async fn test_terminate_escalates_when_sigterm_ignored() {
        let process = spawn_sh("trap '' TERM; exec sleep 30");
        // Laisser le shell installer le trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = process
            .terminate(Duration::from_millis(300))
            .await
            .unwrap();
        assert!(matches!(outcome, Termination::Killed));
    }
}
