//! Page actions for render sessions
//!
//! Every action ends with a fresh viewport snapshot, so the client always
//! sees the page as it stands after the action took effect. Actions against
//! one session run one at a time; different sessions run in parallel.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{BrowserError, RenderSession};

/// How long navigation waits for `document.readyState` to reach complete
const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Settle time after a click, enough for page JS or a navigation to start
const CLICK_SETTLE: Duration = Duration::from_secs(1);
/// Settle time after typing
const TYPE_SETTLE: Duration = Duration::from_millis(500);

/// Where the page ended up and what it looks like
pub struct ActionOutcome {
    /// URL the page is on after the action
    pub url: String,
    /// PNG bytes of the viewport
    pub snapshot: Vec<u8>,
}

/// Actions dispatched against a pooled render session
pub struct PageActions;

impl PageActions {
    /// Navigate to a URL, wait for the document, and snapshot it.
    ///
    /// A page that never reaches readyState=complete is snapshotted anyway;
    /// partially rendered output beats an error here.
    pub async fn navigate(
        session: &Arc<RenderSession>,
        url: &str,
    ) -> Result<ActionOutcome, BrowserError> {
        let _gate = session.action_gate.lock().await;
        info!("Session {} rendering: {}", session.id, url);
        session.goto(url).await?;
        session.wait_for_ready(READY_TIMEOUT).await;
        Self::outcome(session).await
    }

    /// Click at viewport coordinates, let the page settle, and snapshot
    pub async fn click(
        session: &Arc<RenderSession>,
        x: f64,
        y: f64,
    ) -> Result<ActionOutcome, BrowserError> {
        let _gate = session.action_gate.lock().await;
        debug!("Session {} click at ({}, {})", session.id, x, y);
        session.click_at(x, y).await?;
        tokio::time::sleep(CLICK_SETTLE).await;
        Self::outcome(session).await
    }

    /// Type into whatever element holds focus, then snapshot
    pub async fn type_text(
        session: &Arc<RenderSession>,
        text: &str,
    ) -> Result<ActionOutcome, BrowserError> {
        let _gate = session.action_gate.lock().await;
        debug!("Session {} typing {} character(s)", session.id, text.chars().count());
        session.type_text(text).await?;
        tokio::time::sleep(TYPE_SETTLE).await;
        Self::outcome(session).await
    }

    /// Snapshot the page as it currently stands, no action
    pub async fn snapshot(session: &Arc<RenderSession>) -> Result<ActionOutcome, BrowserError> {
        let _gate = session.action_gate.lock().await;
        Self::outcome(session).await
    }

    async fn outcome(session: &Arc<RenderSession>) -> Result<ActionOutcome, BrowserError> {
        let url = session.current_url().await?;
        let snapshot = session.screenshot_png().await?;
        Ok(ActionOutcome { url, snapshot })
    }
}
