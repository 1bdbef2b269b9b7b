mod audio;
mod channel;
mod engine;
mod io;
mod state;
mod ui;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use engine::{PlayerConfig, Session};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    info!("Starting Aura player...");

    let config = PlayerConfig::from_env();
    info!(
        "Studio {} | backend {} | meter every {:?}",
        config.studio_url,
        config.backend_url.as_ref().map_or("none", Url::as_str),
        config.meter_interval
    );

    let session = Session::spawn(config)?;
    ui::console::run(&session)?;
    session.join()?;

    info!("Aura player stopped");
    Ok(())
}
