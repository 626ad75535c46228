use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::server::{shutdown_on, Server};
use std::path::PathBuf;

/// Command line arguments. Flags override values from the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, server::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!(
        "Starting server on {} at {}Hz (max {} clients)",
        config.address(),
        config.tick_rate,
        config.max_clients
    );

    let mut server = Server::new(&config).await?;

    let shutdown_rx = shutdown_on(tokio::signal::ctrl_c());

    server.run(shutdown_rx).await?;
    Ok(())
}
