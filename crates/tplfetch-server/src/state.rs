//! Shared application state.

use tplfetch_browser::Extractor;
use tplfetch_core::FetcherConfig;

/// Application context built once at startup and handed to every handler.
pub struct AppState {
    pub config: FetcherConfig,
    pub extractor: Extractor,
}

impl AppState {
    /// State backed by headless Chromium.
    pub fn new(config: FetcherConfig) -> Self {
        let extractor = Extractor::chrome(&config);
        Self { config, extractor }
    }

    #[cfg(test)]
    pub fn with_extractor(config: FetcherConfig, extractor: Extractor) -> Self {
        Self { config, extractor }
    }
}
