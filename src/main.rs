use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use mathrace_server::connection::handle_connection;
use mathrace_server::game::{Config, GameController};

/// Authoritative server for a multiplayer math-racing game.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the TCP listener to.
    #[arg(long, default_value = "localhost:54321")]
    bind: String,

    /// Maximum number of players allowed in a single lobby.
    #[arg(short = 'p', long = "max-players", default_value_t = 10)]
    max_players: usize,

    /// Number of correct-answer points needed to win a match.
    #[arg(short = 'r', long = "race-length", default_value_t = 10)]
    race_length: i64,

    /// Seconds players are given to submit an answer once a question is sent.
    #[arg(short = 't', long = "answer-time", default_value_t = 30)]
    answer_time: u64,

    /// Seconds given between rounds before the next question is sent.
    #[arg(long = "prepare-time", default_value_t = 10)]
    prepare_time: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = Config {
        max_players: args.max_players,
        race_length: args.race_length,
        answer_time_limit: Duration::from_secs(args.answer_time),
        prepare_time_limit: Duration::from_secs(args.prepare_time),
        ..Config::default()
    };

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!("listening on {}", args.bind);
    info!(
        "max players: {}, race length: {}, answer time: {}s, prepare time: {}s",
        config.max_players,
        config.race_length,
        config.answer_time_limit.as_secs(),
        config.prepare_time_limit.as_secs()
    );

    let controller = Arc::new(GameController::new(config));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {err}");
                continue;
            }
        };
        info!("accepted connection from {peer}");

        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            handle_connection(stream, controller, peer.to_string()).await;
        });
    }
}
