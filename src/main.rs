use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;

use udp_auction::cli::{self, Session};
use udp_auction::common::User;
use udp_auction::config::{self, AppConfig};
use udp_auction::network::{AuctionServer, Auctioneer, Bidder, ClientAgent};
use udp_auction::storage::{self, AuctionDatabase};
use udp_auction::{AuctionError, AuctionResult};

#[derive(Parser)]
#[command(name = "udp_auction", version, about = "Live auction over UDP")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the auction server on the configured port
    Server,
    /// Join the auction as a bidder
    Bidder(Credentials),
    /// Run the auction: list lots and start the bidding
    Auctioneer(Credentials),
}

#[derive(clap::Args)]
struct Credentials {
    /// Account email
    #[arg(long, short)]
    username: String,
    #[arg(long, short)]
    password: String,
    /// Create the account before connecting
    #[arg(long)]
    register: bool,
}

#[tokio::main]
async fn main() -> AuctionResult<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    match cli.mode {
        Mode::Server => run_server(app_config).await,
        Mode::Bidder(credentials) => {
            let agent = open_session(&app_config, credentials).await?;
            cli::run(Session::Bidder(Bidder::new(agent))).await
        }
        Mode::Auctioneer(credentials) => {
            let agent = open_session(&app_config, credentials).await?;
            cli::run(Session::Auctioneer(Auctioneer::new(agent))).await
        }
    }
}

async fn run_server(app_config: AppConfig) -> AuctionResult<()> {
    let database_path = Path::new(&app_config.server.database_path);
    storage::ensure_data_dir(database_path)?;
    let store = Arc::new(AuctionDatabase::with_path(database_path)?);

    let server = AuctionServer::bind(app_config.server, store).await?;
    let (handle, running) = server.spawn();
    log::info!("Press Ctrl+C to stop the server on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    running
        .await
        .map_err(|err| AuctionError::Transport(std::io::Error::other(err)))?
}

async fn open_session(app_config: &AppConfig, credentials: Credentials) -> AuctionResult<ClientAgent> {
    let user = User::new(credentials.username, credentials.password);
    let agent = ClientAgent::start(&app_config.client, user).await?;
    if credentials.register {
        agent.register().await?;
        log::info!("Registered {}", agent.user().username);
    }
    agent.connect().await?;
    Ok(agent)
}
