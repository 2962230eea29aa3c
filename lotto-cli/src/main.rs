mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lotto")]
#[command(about = "Shared 6/45 lottery draw sessions")]
#[command(version)]
struct Cli {
    /// Data directory for the session database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Session key (defaults to LOTTO_SESSION_KEY or "current")
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Client id (defaults to LOTTO_CLIENT_ID or the id saved in the data directory)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a ticket with six numbers
    Issue {
        /// Player name
        name: String,
        /// Six numbers between 1 and 45
        #[arg(required = true, allow_negative_numbers = true)]
        numbers: Vec<i64>,
    },
    /// Issue a ticket, picking missing numbers at random
    Auto {
        /// Player name
        name: String,
        /// Numbers to keep (up to six)
        numbers: Vec<u8>,
    },
    /// Start a draw with this client as controller
    Start,
    /// Draw the next number now
    Step,
    /// Clear the draw and all tickets
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show tickets and the current draw
    Board,
    /// Follow ticket and draw changes until Ctrl-C
    Watch,
    /// Run the draw on a timer until it completes or Ctrl-C
    Host {
        /// Seconds between draws
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "lotto={},lotto_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match CliConfig::load(cli.data_dir, cli.session, cli.client_id).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Issue { name, numbers } => commands::issue_ticket(&config, &name, &numbers).await,
        Commands::Auto { name, numbers } => commands::issue_auto(&config, &name, &numbers).await,
        Commands::Start => commands::start_draw(&config).await,
        Commands::Step => commands::step_draw(&config).await,
        Commands::Reset { yes } => commands::reset_session(&config, yes).await,
        Commands::Board => commands::show_board(&config).await,
        Commands::Watch => commands::watch_session(&config).await,
        Commands::Host { interval } => commands::host_draw(&config, interval).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
