//! Template extraction — headless Chromium lifecycle, selector probing,
//! frame fallback.
//!
//! Each request launches its own browser, renders the template preview
//! page, and returns the outer HTML of the best-matching content element.

pub mod chrome;
pub mod extractor;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod script;
pub mod session;
pub mod types;

pub use chrome::ChromeLauncher;
pub use extractor::Extractor;
pub use session::{BrowserLauncher, BrowserSession, SessionGuard};
pub use types::*;
