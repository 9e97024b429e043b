use crate::error::{Result, WebchatError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Snapshot of an in-flight CLI process for `GET /api/chat/running`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningProcess {
    pub request_id: String,
    pub session_id: Option<String>,
    pub working_directory: String,
    pub started_at: String,
}

struct Entry {
    info: RunningProcess,
    aborted: Arc<AtomicBool>,
    kill: oneshot::Sender<()>,
}

/// In-flight CLI processes keyed by the caller-supplied request id.
#[derive(Default)]
pub struct ProcessRegistry {
    running: Mutex<HashMap<String, Entry>>,
}

/// Held by the task running a process; dropping it removes the registry entry.
pub struct ProcessHandle {
    registry: Arc<ProcessRegistry>,
    request_id: String,
    aborted: Arc<AtomicBool>,
    pub(crate) kill_rx: oneshot::Receiver<()>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process about to start. A request id that is still running is rejected.
    pub fn register(self: &Arc<Self>, info: RunningProcess) -> Result<ProcessHandle> {
        let request_id = info.request_id.clone();
        let aborted = Arc::new(AtomicBool::new(false));
        let (kill, kill_rx) = oneshot::channel();

        {
            let mut running = self.lock();
            if running.contains_key(&request_id) {
                return Err(WebchatError::AlreadyRunning { request_id });
            }
            running.insert(
                request_id.clone(),
                Entry {
                    info,
                    aborted: aborted.clone(),
                    kill,
                },
            );
        }

        debug!(request_id = %request_id, "process registered");
        Ok(ProcessHandle {
            registry: self.clone(),
            request_id,
            aborted,
            kill_rx,
        })
    }

    /// Flag the request as aborted and tell its runner to terminate the child.
    pub fn abort(&self, request_id: &str) -> Result<()> {
        let entry = self
            .lock()
            .remove(request_id)
            .ok_or_else(|| WebchatError::ProcessNotFound {
                request_id: request_id.to_string(),
            })?;

        entry.aborted.store(true, Ordering::SeqCst);
        let _ = entry.kill.send(());
        info!(request_id = %request_id, "abort requested");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }

    pub fn list(&self) -> Vec<RunningProcess> {
        let mut processes: Vec<RunningProcess> =
            self.lock().values().map(|entry| entry.info.clone()).collect();
        processes.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        processes
    }

    fn finish(&self, request_id: &str, aborted: &Arc<AtomicBool>) {
        let mut running = self.lock();
        // Only remove our own registration, not a newer one reusing the id
        let ours = running
            .get(request_id)
            .map(|entry| Arc::ptr_eq(&entry.aborted, aborted))
            .unwrap_or(false);
        if ours {
            running.remove(request_id);
            debug!(request_id = %request_id, "process finished");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Mark aborted without going through the registry (e.g. the client went away).
    pub(crate) fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.registry.finish(&self.request_id, &self.aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(request_id: &str) -> RunningProcess {
        RunningProcess {
            request_id: request_id.to_string(),
            session_id: None,
            working_directory: "/tmp".to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn register_and_finish_on_drop() {
        let registry = Arc::new(ProcessRegistry::new());
        let handle = registry.register(info("r1")).unwrap();
        assert!(registry.is_running("r1"));
        assert_eq!(registry.list().len(), 1);

        drop(handle);
        assert!(!registry.is_running("r1"));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn duplicate_request_id_is_rejected() {
        let registry = Arc::new(ProcessRegistry::new());
        let _handle = registry.register(info("r1")).unwrap();

        let err = registry.register(info("r1")).err().unwrap();
        assert!(matches!(err, WebchatError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn abort_sets_flag_and_signals_runner() {
        let registry = Arc::new(ProcessRegistry::new());
        let mut handle = registry.register(info("r1")).unwrap();

        registry.abort("r1").unwrap();

        assert!(handle.is_aborted());
        assert!(!registry.is_running("r1"));
        assert!((&mut handle.kill_rx).await.is_ok());
    }

    #[test]
    fn abort_unknown_request_is_not_found() {
        let registry = Arc::new(ProcessRegistry::new());
        let err = registry.abort("nope").unwrap_err();
        assert!(matches!(err, WebchatError::ProcessNotFound { .. }));

        // Second abort finds nothing either
        let _handle = registry.register(info("r2")).unwrap();
        registry.abort("r2").unwrap();
        assert!(registry.abort("r2").is_err());
    }

    #[test]
    fn stale_handle_does_not_remove_newer_registration() {
        let registry = Arc::new(ProcessRegistry::new());
        let old = registry.register(info("r1")).unwrap();
        registry.abort("r1").unwrap();

        let _new = registry.register(info("r1")).unwrap();
        drop(old);

        assert!(registry.is_running("r1"));
    }
}
