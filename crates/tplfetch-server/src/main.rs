//! tplfetch — renders template preview pages and serves their HTML.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;
mod state;

use state::AppState;
use tplfetch_browser::{Extractor, TemplateId};
use tplfetch_core::FetcherConfig;

const USAGE: &str = "\
tplfetch — rendered template HTML fetcher

Usage: tplfetch [command]

Commands:
  (none)            Start the HTTP server
  fetch <id>        Fetch one template and print its HTML
  url <id>          Print the preview URL for a template id
  help              Show this help message

Environment:
  PORT                          HTTP port (default 10000)
  HOST                          Bind address (default 0.0.0.0)
  CHROME_PATH                   Chromium executable
  TPLFETCH_SOURCE_HOST          Template site host (default www.135editor.com)
  TPLFETCH_SELECTOR_PROFILE     editor-styles | article-preview
  TPLFETCH_SELECTORS            Comma-separated selectors, overrides the profile
  TPLFETCH_MIN_CONTENT_LEN      Minimum content length (default 300)
  TPLFETCH_SETTLE_MS            Wait after page load (default 2500)
  TPLFETCH_CONTEXT_SETTLE_MS    Wait before each probe (default 800)
  TPLFETCH_NAV_TIMEOUT_SECS     Navigation timeout (default 60)
  TPLFETCH_REQUEST_TIMEOUT_SECS Whole-request budget (default 90)
  TPLFETCH_MAX_SESSIONS         Concurrent browsers (default 4)
  TPLFETCH_NO_SANDBOX           Launch with --no-sandbox (default true)
  RUST_LOG                      Log filter (default info)
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `fetch` output stays clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = FetcherConfig::from_env()?;

    if args.len() > 1 {
        match args[1].as_str() {
            "fetch" => {
                let Some(raw_id) = args.get(2) else {
                    eprintln!("Usage: tplfetch fetch <template-id>");
                    std::process::exit(1);
                };
                let extractor = Extractor::chrome(&config);
                match extractor.fetch_template_html(raw_id).await {
                    Ok(found) => {
                        info!("Content source: {:?}", found.source);
                        println!("{}", found.html);
                        return Ok(());
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        if let Some(url) = e.target_url() {
                            eprintln!("Target URL: {}", url);
                        }
                        if let tplfetch_core::Error::Extraction {
                            iframe_url_tried: Some(frame),
                            ..
                        } = &e
                        {
                            eprintln!("Last frame tried: {}", frame);
                        }
                        std::process::exit(1);
                    }
                }
            }
            "url" => {
                let Some(raw_id) = args.get(2) else {
                    eprintln!("Usage: tplfetch url <template-id>");
                    std::process::exit(1);
                };
                let id = TemplateId::parse(raw_id)?;
                println!("{}", id.target_url(&config.extraction.source_host));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                print!("{}", USAGE);
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'tplfetch help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    info!(
        "Selectors: {:?}, threshold: {}, max sessions: {}",
        config.extraction.selectors,
        config.extraction.min_content_len,
        config.extraction.max_sessions
    );
    if let Some(path) = &config.browser.chrome_path {
        info!("Chrome executable: {}", path.display());
    }

    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(config));
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("tplfetch server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
