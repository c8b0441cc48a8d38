//! Browser session seam and the scoped guard that always closes it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;
use tplfetch_core::{BrowserSettings, Error, Result};
use tracing::{debug, warn};

use crate::types::{FrameCandidate, ProbeOutcome, ProbeRequest, RenderContext};

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a fresh, isolated browser with one configured page.
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>>;
}

/// One live browser process with a single page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page and wait until the DOM is usable.
    ///
    /// Failures are reported as `Error::Navigation`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Embedded frames of the page, excluding the main frame.
    async fn frames(&self) -> Result<Vec<FrameCandidate>>;

    /// Run the selector probe inside one rendering context.
    ///
    /// Script failures inside the context are `Error::Evaluation`.
    async fn probe(&self, context: &RenderContext, request: &ProbeRequest)
        -> Result<ProbeOutcome>;

    /// Terminate the browser process.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Owns a session and its concurrency permit.
///
/// `release` closes the session in place. If the guard is dropped instead
/// (early return, panic, or the request future being cancelled by a
/// timeout) the close is spawned onto the current runtime. Either way the
/// session is closed exactly once and the permit is held until it is.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            session: Some(session),
            permit,
        }
    }

    pub fn session(&self) -> Result<&dyn BrowserSession> {
        self.session
            .as_deref()
            .ok_or_else(|| Error::Session("browser session already released".into()))
    }

    /// Close the session and give back the permit.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session).await;
        }
        self.permit.take();
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session guard dropped, closing browser in background");
                handle.spawn(async move {
                    close_session(session).await;
                    drop(permit);
                });
            }
            Err(_) => {
                warn!("Session guard dropped outside a runtime; browser left to process teardown");
            }
        }
    }
}

async fn close_session(session: Box<dyn BrowserSession>) {
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
}
