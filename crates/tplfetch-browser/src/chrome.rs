//! Chromium backend over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{FrameId, NavigateParams};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tplfetch_core::{BrowserSettings, Error, Result};
use tracing::{debug, info, warn};

use crate::script::{
    dom_ready, probe_expression, readiness, Readiness, BODY_PRESENT_EXPR, READY_STATE_EXPR,
};
use crate::session::{BrowserLauncher, BrowserSession};
use crate::types::{FrameCandidate, ProbeOutcome, ProbeRequest, RenderContext};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Extra Chromium flags. Site isolation is off so cross-origin preview
/// frames stay in the page's process and get an execution context there.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-features=IsolateOrigins,site-per-process",
    "--disable-site-isolation-trials",
];

/// Launches a headless Chromium per session.
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>> {
        let config = browser_config(settings)?;

        let (browser, mut handler) =
            tokio::time::timeout(settings.navigation_timeout, Browser::launch(config))
                .await
                .map_err(|_| Error::Session("browser launch timed out".into()))?
                .map_err(|e| Error::Session(format!("failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
        });

        let page = match open_page(&browser, settings).await {
            Ok(page) => page,
            Err(e) => {
                // The open error is the one worth reporting; shutdown logs its own.
                let _ = shutdown(browser, handler_task).await;
                return Err(e);
            }
        };

        info!("Browser launched");

        Ok(Box::new(ChromeSession {
            browser,
            page,
            handler_task,
        }))
    }
}

/// A Chromium process and its single page.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        match self.page.execute(NavigateParams::new(url)).await {
            Ok(response) => {
                if let Some(error_text) = response.result.error_text.as_deref() {
                    return Err(Error::navigation(
                        format!("navigation failed: {}", error_text),
                        url,
                    ));
                }
            }
            // The load event never fired. The DOM may still be usable.
            Err(CdpError::Timeout) => {
                warn!("Load event not observed for {}, checking DOM readiness", url)
            }
            Err(e) => {
                return Err(Error::navigation(format!("navigation failed: {}", e), url));
            }
        }

        let mut last_state = None;
        loop {
            match self.evaluate::<String>(READY_STATE_EXPR, None).await {
                Ok(state) if dom_ready(&state) => return Ok(()),
                Ok(state) => last_state = Some(state),
                // The context is swapped out mid-navigation; keep polling.
                Err(e) => debug!("readyState poll failed: {}", e),
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        let body_present = self
            .evaluate::<bool>(BODY_PRESENT_EXPR, None)
            .await
            .unwrap_or(false);
        match readiness(last_state.as_deref(), body_present) {
            Readiness::Ready => Ok(()),
            Readiness::Partial => {
                warn!(
                    "DOMContentLoaded not observed within {:?}, continuing with partial DOM",
                    timeout
                );
                Ok(())
            }
            Readiness::NotReady => Err(Error::navigation(
                format!("page did not become ready within {:?}", timeout),
                url,
            )),
        }
    }

    async fn frames(&self) -> Result<Vec<FrameCandidate>> {
        let main = self.page.mainframe().await.map_err(cdp_error)?;
        let ids = self.page.frames().await.map_err(cdp_error)?;

        let mut frames = Vec::with_capacity(ids.len());
        for id in ids {
            if main.as_ref() == Some(&id) {
                continue;
            }
            let url = self
                .page
                .frame_url(id.clone())
                .await
                .map_err(cdp_error)?
                .unwrap_or_default();
            frames.push(FrameCandidate::new(id.inner().clone(), url));
        }
        Ok(frames)
    }

    async fn probe(
        &self,
        context: &RenderContext,
        request: &ProbeRequest,
    ) -> Result<ProbeOutcome> {
        let expression = probe_expression(request)?;
        let context_id = match context {
            RenderContext::MainDocument => None,
            RenderContext::Frame(frame) => {
                let id = self
                    .page
                    .frame_execution_context(FrameId::new(frame.handle.clone()))
                    .await
                    .map_err(cdp_error)?;
                match id {
                    Some(id) => Some(id),
                    None => {
                        return Err(Error::Evaluation(format!(
                            "frame {} has no execution context",
                            frame.url
                        )))
                    }
                }
            }
        };
        self.evaluate(&expression, context_id).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromeSession {
            browser,
            page,
            handler_task,
        } = *self;
        drop(page);
        shutdown(browser, handler_task).await
    }
}

impl ChromeSession {
    async fn evaluate<T: DeserializeOwned>(
        &self,
        expression: &str,
        context_id: Option<ExecutionContextId>,
    ) -> Result<T> {
        let mut builder = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true);
        if let Some(id) = context_id {
            builder = builder.context_id(id);
        }
        let params = builder.build().map_err(Error::Evaluation)?;

        self.page
            .evaluate_expression(params)
            .await
            .map_err(cdp_error)?
            .into_value()
            .map_err(|e| Error::Evaluation(format!("unexpected probe result: {}", e)))
    }
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(settings.navigation_timeout)
        .window_size(settings.viewport_width, settings.viewport_height)
        .viewport(Viewport {
            width: settings.viewport_width,
            height: settings.viewport_height,
            ..Default::default()
        });
    for arg in LAUNCH_ARGS {
        builder = builder.arg(*arg);
    }
    if settings.no_sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(path) = &settings.chrome_path {
        builder = builder.chrome_executable(path);
    }
    builder.build().map_err(Error::Session)
}

async fn open_page(browser: &Browser, settings: &BrowserSettings) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| Error::Session(format!("failed to open page: {}", e)))?;
    page.execute(SetUserAgentOverrideParams::new(settings.user_agent.clone()))
        .await
        .map_err(|e| Error::Session(format!("failed to set user agent: {}", e)))?;
    Ok(page)
}

async fn shutdown(mut browser: Browser, handler_task: JoinHandle<()>) -> Result<()> {
    let closed = browser.close().await;
    if let Err(e) = &closed {
        warn!("Graceful browser close failed ({}), killing process", e);
        if let Some(Err(e)) = browser.kill().await {
            warn!("Failed to kill browser process: {}", e);
        }
    }
    if tokio::time::timeout(EXIT_WAIT, browser.wait()).await.is_err() {
        warn!("Browser process did not exit within {:?}", EXIT_WAIT);
    }
    handler_task.abort();
    debug!("Browser session closed");

    closed
        .map(|_| ())
        .map_err(|e| Error::Session(format!("failed to close browser: {}", e)))
}

/// Sort protocol errors into the error taxonomy.
fn cdp_error(err: CdpError) -> Error {
    match err {
        CdpError::JavascriptException(details) => {
            Error::Evaluation(format!("script exception: {:?}", details))
        }
        CdpError::Serde(e) => Error::Evaluation(e.to_string()),
        CdpError::Chrome(e) => Error::Evaluation(e.to_string()),
        CdpError::Timeout => Error::navigation("browser operation timed out", String::new()),
        other => Error::Session(other.to_string()),
    }
}
