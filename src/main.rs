mod app;
mod backend;
mod config;
mod error;
mod logging;
mod metadata;
mod models;
mod provision;
mod queue;
mod ui;

use app::App;
use backend::YtDlp;
use color_eyre::Result;
use config::{ConfigLoad, ConfigStore};
use models::Notice;
use provision::Provisioner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let app_dir = config::app_dir().unwrap_or_else(|_| PathBuf::from(".").join(config::APP_NAME));
    let _log_guard = logging::init_tracing(&app_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "ytdx starting");

    let store = ConfigStore::default_location();
    info!(path = %store.path().display(), "loading settings");
    let mut notices = Vec::new();
    let config = match store.load() {
        ConfigLoad::Recovered { config, error } => {
            notices.push(Notice::warning(
                "Settings",
                format!("Settings could not be read, using defaults: {error}"),
            ));
            config
        }
        loaded => loaded.into_config(),
    };

    let provisioner = Provisioner::default_location();
    let provisioned = provisioner.ensure_present().await;
    if !provisioned.errors.is_empty() {
        let lines: Vec<String> = provisioned.errors.iter().map(|e| e.to_string()).collect();
        notices.push(Notice::warning("Missing tools", lines.join("; ")));
    }

    let backend = Arc::new(YtDlp::new(provisioned.toolchain));
    let mut app = App::new(config, store, backend);
    for notice in notices {
        app.notify(notice).await;
    }

    let mut terminal = ratatui::init();
    let result = app.run(&mut terminal).await;
    ratatui::restore();

    info!("ytdx exiting");
    result
}
