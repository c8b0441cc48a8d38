//! tplfetch core — configuration and error taxonomy.

pub mod config;
pub mod error;

pub use config::{BrowserSettings, ExtractionSettings, FetcherConfig, SelectorProfile};
pub use error::{Error, ErrorKind, Result};
