use crate::auth::types::{
    AuthCallback, AuthError, AuthId, AuthSocket, PendingAuthInfo, REASON_CANCELLED,
    REASON_CONNECTION_CLOSED, REASON_DELIVERY_FAILED, REASON_REJECTED, REASON_SUPERSEDED,
    REASON_TIMED_OUT, generate_auth_id, validate_auth_id,
};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timeout applied when none is configured
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Every attempt gets a real timer, even with a zero timeout
const MIN_AUTH_TIMEOUT: Duration = Duration::from_millis(1);

/// An in-flight authentication attempt
struct PendingAuth {
    socket_id: Uuid,
    callback: AuthCallback,
    started_at: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Pending attempts, indexed by auth id and by socket
#[derive(Default)]
struct PendingTable {
    by_id: HashMap<AuthId, PendingAuth>,
    by_socket: HashMap<Uuid, AuthId>,
}

impl PendingTable {
    fn take(&mut self, auth_id: &str) -> Option<PendingAuth> {
        let entry = self.by_id.remove(auth_id)?;
        if self
            .by_socket
            .get(&entry.socket_id)
            .is_some_and(|id| id == auth_id)
        {
            self.by_socket.remove(&entry.socket_id);
        }
        Some(entry)
    }

    fn take_for_socket(&mut self, socket_id: Uuid) -> Option<(AuthId, PendingAuth)> {
        let auth_id = self.by_socket.remove(&socket_id)?;
        let entry = self.by_id.remove(&auth_id)?;
        Some((auth_id, entry))
    }
}

/// Auth manager: tracks pending authentications and resolves each exactly once
///
/// An attempt is resolved by whichever happens first: [`complete_auth`],
/// its timeout, a newer attempt for the same socket, the socket closing,
/// or [`clear`]. The entry leaves the table under the lock before its
/// callback runs, so callbacks never fire twice and never run while the
/// lock is held.
///
/// [`complete_auth`]: AuthManager::complete_auth
/// [`clear`]: AuthManager::clear
pub struct AuthManager {
    pending_auth: Arc<Mutex<PendingTable>>,
    auth_timeout: Duration,
}

impl AuthManager {
    pub fn new(auth_timeout: Option<Duration>) -> Self {
        let auth_timeout = auth_timeout
            .unwrap_or(DEFAULT_AUTH_TIMEOUT)
            .max(MIN_AUTH_TIMEOUT);

        Self {
            pending_auth: Arc::new(Mutex::new(PendingTable::default())),
            auth_timeout,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }

    /// Begin authenticating `socket`
    ///
    /// Sends the challenge to the socket and returns the new auth id. A
    /// previous attempt still pending for the same socket is superseded.
    pub async fn start_auth<S, F>(&self, socket: &S, callback: F) -> AuthId
    where
        S: AuthSocket + ?Sized,
        F: FnOnce(bool, Option<String>) + Send + 'static,
    {
        counter!("authgate_auth_started_total").increment(1);
        let socket_id = socket.id();

        let (auth_id, superseded) = {
            let mut table = self.pending_auth.lock().await;
            let superseded = table.take_for_socket(socket_id);

            let mut auth_id = generate_auth_id();
            while table.by_id.contains_key(&auth_id) {
                auth_id = generate_auth_id();
            }

            let timer = self.spawn_timer(auth_id.clone());
            table.by_id.insert(
                auth_id.clone(),
                PendingAuth {
                    socket_id,
                    callback: Box::new(callback),
                    started_at: Instant::now(),
                    timer: Some(timer),
                },
            );
            table.by_socket.insert(socket_id, auth_id.clone());

            (auth_id, superseded)
        };

        if let Some((old_id, entry)) = superseded {
            info!(
                "Auth {} for socket {} superseded by {}",
                old_id, socket_id, auth_id
            );
            counter!("authgate_auth_cancelled_total", "reason" => "superseded").increment(1);
            resolve(&old_id, entry, false, Some(REASON_SUPERSEDED));
        }

        match socket.send_auth_request(&auth_id, self.auth_timeout).await {
            Ok(()) => {
                debug!(
                    "Auth {} started for socket {} (timeout {:?})",
                    auth_id, socket_id, self.auth_timeout
                );
            }
            Err(e) => {
                warn!("Auth {} for socket {}: {}", auth_id, socket_id, e);
                let entry = self.pending_auth.lock().await.take(&auth_id);
                if let Some(entry) = entry {
                    counter!("authgate_auth_cancelled_total", "reason" => "delivery_failed")
                        .increment(1);
                    resolve(&auth_id, entry, false, Some(REASON_DELIVERY_FAILED));
                }
            }
        }

        auth_id
    }

    /// Resolve a pending authentication by id
    pub async fn complete_auth(&self, auth_id: &str, success: bool) -> Result<(), AuthError> {
        if !validate_auth_id(auth_id) {
            return Err(AuthError::InvalidAuthId(auth_id.to_string()));
        }

        let entry = self.pending_auth.lock().await.take(auth_id);
        let Some(entry) = entry else {
            warn!("Completion for unknown auth id {}", auth_id);
            return Err(AuthError::UnknownAuthId(auth_id.to_string()));
        };

        let result = if success { "approved" } else { "rejected" };
        counter!("authgate_auth_completed_total", "result" => result).increment(1);
        info!("Auth {} for socket {} {}", auth_id, entry.socket_id, result);

        resolve(auth_id, entry, success, (!success).then_some(REASON_REJECTED));
        Ok(())
    }

    /// Cancel every pending authentication, failing each callback
    pub async fn clear(&self) {
        let drained: Vec<(AuthId, PendingAuth)> = {
            let mut table = self.pending_auth.lock().await;
            table.by_socket.clear();
            table.by_id.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        info!("Clearing {} pending authentications", drained.len());
        counter!("authgate_auth_cancelled_total", "reason" => "cleared")
            .increment(drained.len() as u64);

        for (auth_id, entry) in drained {
            resolve(&auth_id, entry, false, Some(REASON_CANCELLED));
        }
    }

    /// Cancel the pending authentication of a closed socket
    ///
    /// Returns whether the socket had one.
    pub async fn cancel_for_socket(&self, socket_id: Uuid) -> bool {
        let taken = self.pending_auth.lock().await.take_for_socket(socket_id);
        match taken {
            Some((auth_id, entry)) => {
                debug!("Socket {} closed with auth {} pending", socket_id, auth_id);
                counter!("authgate_auth_cancelled_total", "reason" => "connection_closed")
                    .increment(1);
                resolve(&auth_id, entry, false, Some(REASON_CONNECTION_CLOSED));
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, auth_id: &str) -> bool {
        self.pending_auth.lock().await.by_id.contains_key(auth_id)
    }

    /// Auth id currently pending for a socket
    pub async fn pending_for_socket(&self, socket_id: Uuid) -> Option<AuthId> {
        self.pending_auth
            .lock()
            .await
            .by_socket
            .get(&socket_id)
            .cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending_auth.lock().await.by_id.len()
    }

    /// Pending authentications, oldest first
    pub async fn pending_snapshot(&self) -> Vec<PendingAuthInfo> {
        let table = self.pending_auth.lock().await;

        let mut entries: Vec<_> = table
            .by_id
            .iter()
            .map(|(auth_id, entry)| (entry.started_at, auth_id, entry.socket_id))
            .collect();
        entries.sort_by_key(|(started_at, _, _)| *started_at);

        entries
            .into_iter()
            .map(|(started_at, auth_id, socket_id)| {
                let elapsed = started_at.elapsed();
                PendingAuthInfo {
                    auth_id: auth_id.clone(),
                    socket_id,
                    elapsed_ms: elapsed.as_millis() as u64,
                    remaining_ms: self.auth_timeout.saturating_sub(elapsed).as_millis() as u64,
                }
            })
            .collect()
    }

    fn spawn_timer(&self, auth_id: AuthId) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending_auth);
        let timeout = self.auth_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let entry = pending.lock().await.take(&auth_id);
            if let Some(mut entry) = entry {
                // Running inside this timer; nothing to abort
                entry.timer = None;
                warn!(
                    "Auth {} for socket {} timed out after {:?}",
                    auth_id, entry.socket_id, timeout
                );
                counter!("authgate_auth_timeouts_total").increment(1);
                resolve(&auth_id, entry, false, Some(REASON_TIMED_OUT));
            }
        })
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Stop the entry's timer and fire its callback
fn resolve(auth_id: &str, mut entry: PendingAuth, success: bool, reason: Option<&str>) {
    if let Some(timer) = entry.timer.take() {
        timer.abort();
    }

    histogram!("authgate_auth_duration_seconds").record(entry.started_at.elapsed());
    debug!(
        "Resolving auth {}: success={}, reason={:?}",
        auth_id, success, reason
    );

    (entry.callback)(success, reason.map(str::to_string));
}
