use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command},
    client,
    listener::Listener,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = args.to_config();
            let listener = Listener::bind(config)
                .await
                .context("relay could not start")?;
            let addr = listener.local_addr()?;
            info!("relay listening on {}", addr);

            let handle = listener.handle();
            if let Err(err) = listener.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err.into());
            }
            let dropped = handle.disconnect_all().await;
            info!(sessions = dropped, "relay stopped");
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
