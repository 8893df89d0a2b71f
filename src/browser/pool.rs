//! Render session pool
//!
//! One Chrome instance per relay client, keyed by the relay session cookie.
//! Launches are exactly-once per key: concurrent requests for the same key
//! await a single launch, while different keys launch in parallel. Sessions
//! idle past the configured window are swept out and closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info, warn};

use super::{BrowserError, RenderSession, RenderSessionConfig};
use crate::secrets::SecretStore;

/// Upper bound on a single Chrome launch
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Pool slot for one relay client
struct PoolEntry {
    /// Launched session, or empty while a launch is in flight
    cell: Arc<OnceCell<Arc<RenderSession>>>,
    /// Last time a relay request touched this session
    last_access: Instant,
}

impl PoolEntry {
    fn new() -> Self {
        Self { cell: Arc::new(OnceCell::new()), last_access: Instant::now() }
    }

    fn is_expired(&self, now: Instant, max_idle: Duration) -> bool {
        now.duration_since(self.last_access) > max_idle
    }
}

/// Pool of render sessions keyed by relay client id
pub struct RenderPool {
    /// All live entries
    entries: Arc<RwLock<HashMap<String, PoolEntry>>>,
    /// Template for new sessions (headless mode, Chrome path)
    default_config: RenderSessionConfig,
    /// Consulted at launch time for the outbound proxy
    secrets: Arc<SecretStore>,
    /// Idle window before a session is evicted
    max_idle: Duration,
}

impl RenderPool {
    /// Create a new pool
    pub fn new(secrets: Arc<SecretStore>, max_idle: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_config: RenderSessionConfig::default(),
            secrets,
            max_idle,
        }
    }

    /// Set default configuration for new sessions
    pub fn with_config(mut self, config: RenderSessionConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Config for a fresh session: isolated data dir, pool defaults, and
    /// whatever proxy is stored right now
    fn build_config(&self, session_id: &str) -> RenderSessionConfig {
        let proxy = self.secrets.load_outbound_proxy().map(|p| p.to_url());
        RenderSessionConfig::for_session(session_id)
            .headless(self.default_config.headless)
            .chrome_path(self.default_config.chrome_path.clone())
            .proxy(proxy)
    }

    /// Get the session for `session_id`, launching Chrome if needed.
    ///
    /// A session whose Chrome has exited is replaced with a fresh launch.
    /// A failed launch leaves the slot empty, so the next request retries
    /// through the same cell; a slot nobody retries ages out with the idle
    /// sweep.
    pub async fn acquire(&self, session_id: &str) -> Result<Arc<RenderSession>, BrowserError> {
        let mut relaunched = false;
        loop {
            let cell = {
                let mut entries = self.entries.write().await;
                let entry =
                    entries.entry(session_id.to_string()).or_insert_with(PoolEntry::new);
                entry.last_access = Instant::now();
                entry.cell.clone()
            };

            // Launch outside the map lock so other clients stay unblocked
            let result = cell
                .get_or_try_init(|| async {
                    info!("Launching render session for client {}", session_id);
                    let config = self.build_config(session_id);
                    let session = tokio::time::timeout(
                        LAUNCH_TIMEOUT,
                        RenderSession::launch(session_id, config),
                    )
                    .await
                    .map_err(|_| {
                        BrowserError::Timeout("Browser launch timed out".to_string())
                    })??;
                    Ok::<_, BrowserError>(Arc::new(session))
                })
                .await;

            // The entry stays on failure: the cell is still uninitialized, so
            // the next acquire runs the launch again. Removing it here could
            // orphan a concurrent waiter's launch that lands in the same cell.
            let session = match result {
                Ok(session) => session.clone(),
                Err(e) => {
                    error!("Session {} launch failed: {}", session_id, e);
                    return Err(e);
                }
            };

            if session.is_alive() {
                return Ok(session);
            }

            if relaunched {
                return Err(BrowserError::ConnectionLost(
                    "Chrome exited immediately after relaunch".to_string(),
                ));
            }
            relaunched = true;

            warn!("Session {} Chrome is gone, relaunching", session_id);
            {
                let mut entries = self.entries.write().await;
                // Another task may already have replaced the entry
                if let Some(entry) = entries.get(session_id) {
                    let holds_dead = entry
                        .cell
                        .get()
                        .map(|s| Arc::ptr_eq(s, &session))
                        .unwrap_or(false);
                    if holds_dead {
                        entries.remove(session_id);
                    }
                }
            }
            let _ = session.close().await;
        }
    }

    /// Look up an already-launched session without creating one
    pub async fn peek(&self, session_id: &str) -> Option<Arc<RenderSession>> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(session_id)?;
        let session = entry.cell.get()?.clone();
        entry.last_access = Instant::now();
        Some(session)
    }

    /// Get session count
    pub async fn session_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Evict and close sessions idle past the configured window
    pub async fn sweep_idle(&self) {
        let expired: Vec<(String, PoolEntry)> = {
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now, self.max_idle))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in expired {
            info!("Evicting idle render session {}", id);
            if let Some(session) = entry.cell.get() {
                if let Err(e) = session.close().await {
                    warn!("Error closing idle session {}: {}", id, e);
                }
            }
        }
    }

    /// Close all sessions
    pub async fn close_all(&self) {
        let entries: Vec<(String, PoolEntry)> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        for (id, entry) in entries {
            if let Some(session) = entry.cell.get() {
                if let Err(e) = session.close().await {
                    warn!("Error closing session {}: {}", id, e);
                }
            }
        }

        info!("All render sessions closed");
    }
}
