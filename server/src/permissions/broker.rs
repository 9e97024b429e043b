use super::types::{
    PendingPermission, PermissionDecision, PermissionEvent, PermissionMode, PermissionResponse,
    REASON_BYPASS, REASON_CANCELLED, REASON_SESSION_APPROVED, REASON_TIMED_OUT,
};
use crate::error::{Result, WebchatError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Default wait for a human decision before denying.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(300);

const EVENT_CAPACITY: usize = 64;

struct PendingEntry {
    request: PendingPermission,
    /// Distinguishes this registration from a later one reusing the same id
    token: u64,
    responder: oneshot::Sender<PermissionDecision>,
}

/// Matches a blocking hook call with a later operator decision.
///
/// The hook side calls [`request_decision`](Self::request_decision) and is
/// suspended until [`submit_decision`](Self::submit_decision) is called for
/// the same id or the timeout elapses. Whoever removes the map entry first
/// wins; the other side becomes a no-op.
pub struct PermissionBroker {
    pending: Mutex<HashMap<String, PendingEntry>>,
    /// (session id, tool name) pairs approved for the rest of the session.
    /// Kept for the life of the process: follow-up messages resume the same
    /// CLI session, so no single chat request marks a session as finished.
    session_approved: Mutex<HashSet<(String, String)>>,
    next_token: AtomicU64,
    timeout: Duration,
    events: broadcast::Sender<PermissionEvent>,
}

impl PermissionBroker {
    pub fn new(timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pending: Mutex::new(HashMap::new()),
            session_approved: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(1),
            timeout,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.events.subscribe()
    }

    /// Register a request and wait for the operator's decision.
    ///
    /// Bypass mode and session-approved tools resolve immediately without
    /// ever appearing in [`list_pending`](Self::list_pending). A second
    /// request under an id that is still outstanding is rejected.
    pub async fn request_decision(
        &self,
        request: PendingPermission,
        mode: PermissionMode,
    ) -> Result<PermissionDecision> {
        if mode.is_bypass() {
            debug!(id = %request.id, tool = %request.tool_name, "bypass mode, allowing");
            return Ok(PermissionDecision::allow(REASON_BYPASS));
        }

        if self.is_session_approved(&request) {
            debug!(id = %request.id, tool = %request.tool_name, "tool approved for session, allowing");
            return Ok(PermissionDecision::allow(REASON_SESSION_APPROVED));
        }

        let id = request.id.clone();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();

        {
            let mut pending = self.lock_pending();
            if pending.contains_key(&id) {
                warn!(id = %id, "duplicate permission request rejected");
                return Err(WebchatError::AlreadyPending { id });
            }
            pending.insert(
                id.clone(),
                PendingEntry {
                    request: request.clone(),
                    token,
                    responder: tx,
                },
            );
        }

        info!(id = %id, tool = %request.tool_name, session = ?request.session_id, "permission requested");
        let _ = self.events.send(PermissionEvent::Requested { request });

        // Removes the entry if the caller goes away before resolution
        let _guard = RegistrationGuard {
            broker: self,
            id: &id,
            token,
        };

        let decision = match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => {
                debug!(id = %id, "permission channel dropped");
                PermissionDecision::deny(REASON_CANCELLED)
            }
            Err(_) => {
                if self.take_registration(&id, token).is_some() {
                    warn!(id = %id, timeout_secs = self.timeout.as_secs(), "permission request timed out");
                    let decision = PermissionDecision::deny(REASON_TIMED_OUT);
                    self.emit_resolved(&id, &decision);
                    decision
                } else {
                    // A response removed the entry first and sent under the lock
                    rx.try_recv()
                        .unwrap_or_else(|_| PermissionDecision::deny(REASON_CANCELLED))
                }
            }
        };

        Ok(decision)
    }

    /// Resolve a pending request. Unknown or already-resolved ids report not found.
    pub fn submit_decision(&self, response: &PermissionResponse) -> Result<()> {
        let decision = PermissionDecision::from_response(response);

        let request = {
            let mut pending = self.lock_pending();
            let entry = pending
                .remove(&response.id)
                .ok_or_else(|| WebchatError::PermissionNotFound {
                    id: response.id.clone(),
                })?;
            // Sent while holding the lock so a racing timeout can still read it
            entry
                .responder
                .send(decision.clone())
                .map_err(|_| WebchatError::PermissionNotFound {
                    id: response.id.clone(),
                })?;
            entry.request
        };

        if response.allow && response.allow_for_session {
            if let Some(session_id) = request.session_id.clone() {
                self.lock_session_approved()
                    .insert((session_id, request.tool_name.clone()));
                info!(tool = %request.tool_name, "tool approved for session");
            }
        }

        info!(id = %response.id, allow = response.allow, "permission resolved");
        self.emit_resolved(&response.id, &decision);
        Ok(())
    }

    /// Snapshot of outstanding requests, oldest first.
    pub fn list_pending(&self) -> Vec<PendingPermission> {
        let mut requests: Vec<PendingPermission> = self
            .lock_pending()
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        requests
    }

    fn is_session_approved(&self, request: &PendingPermission) -> bool {
        match request.session_id {
            Some(ref session_id) => self
                .lock_session_approved()
                .contains(&(session_id.clone(), request.tool_name.clone())),
            None => false,
        }
    }

    fn take_registration(&self, id: &str, token: u64) -> Option<PendingEntry> {
        let mut pending = self.lock_pending();
        match pending.get(id) {
            Some(entry) if entry.token == token => pending.remove(id),
            _ => None,
        }
    }

    fn emit_resolved(&self, id: &str, decision: &PermissionDecision) {
        let _ = self.events.send(PermissionEvent::Resolved {
            id: id.to_string(),
            allowed: decision.is_allowed(),
            reason: decision.reason().to_string(),
        });
    }

    // Map contents stay consistent even if a holder panicked.
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_session_approved(&self) -> MutexGuard<'_, HashSet<(String, String)>> {
        self.session_approved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PermissionBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PERMISSION_TIMEOUT)
    }
}

struct RegistrationGuard<'a> {
    broker: &'a PermissionBroker,
    id: &'a str,
    token: u64,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if self.broker.take_registration(self.id, self.token).is_some() {
            debug!(id = %self.id, "permission caller went away, dropping request");
            self.broker
                .emit_resolved(self.id, &PermissionDecision::deny(REASON_CANCELLED));
        }
    }
}
