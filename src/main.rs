use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use feedbroker::auth::MemoryAuthenticator;
use feedbroker::client::Client;
use feedbroker::config::{Settings, load_config_from};
use feedbroker::transport::Server;
use feedbroker::utils::{BrokerError, ClientError, logging};

#[derive(Debug, Parser)]
#[command(name = "feedbroker", version, about = "Authenticated pub/sub broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the broker until Ctrl-C.
    Server {
        /// Config file to load instead of `config/default`.
        #[arg(long)]
        config: Option<String>,
    },
    /// Connect, subscribe to a channel and print deliveries.
    Client {
        #[arg(long, default_value = "127.0.0.1:10000")]
        addr: String,
        #[arg(long)]
        identity: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        channel: String,
        /// Publish this payload once after subscribing.
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Server { config } => {
            let settings = match load_config_from(config.as_deref()) {
                Ok(settings) => settings,
                Err(err) => {
                    logging::init("info");
                    error!(error = %err, "failed to load configuration");
                    std::process::exit(1);
                }
            };
            logging::init(&settings.logging.level);
            if let Err(err) = run_server(settings).await {
                error!(error = %err, "broker failed");
                std::process::exit(1);
            }
        }
        Command::Client {
            addr,
            identity,
            secret,
            channel,
            message,
        } => {
            logging::init("info");
            if let Err(err) = run_client(&addr, &identity, &secret, &channel, message).await {
                error!(error = %err, "client failed");
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), BrokerError> {
    let authenticator = MemoryAuthenticator::from_settings(&settings.auth)?;
    let server = Server::bind(
        settings.server.addr(),
        Arc::new(authenticator),
        settings.broker,
    )
    .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining connections");
            shutdown.shutdown().await;
        }
    });

    server.serve_forever().await
}

async fn run_client(
    addr: &str,
    identity: &str,
    secret: &str,
    channel: &str,
    message: Option<String>,
) -> Result<(), ClientError> {
    let mut client = Client::connect(addr, identity, secret).await?;
    info!(broker = %client.broker_name(), identity, "connected");

    client.subscribe(channel).await?;
    if let Some(message) = message {
        client.publish(channel, message).await?;
    }

    loop {
        let delivery = client.read().await?;
        println!(
            "[{}] {}: {}",
            delivery.channel,
            delivery.identity,
            String::from_utf8_lossy(&delivery.payload)
        );
    }
}
