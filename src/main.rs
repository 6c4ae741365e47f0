// src/main.rs

use clap::Parser;
use std::process;
use tracing_subscriber::{fmt, EnvFilter};

/// User-space layer-3 packet relay.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.version {
        println!("tunrelay {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    // Initialise tracing subscriber - respects RUST_LOG and the -d flag.
    let filter = match args.debug {
        0 => EnvFilter::new("tunrelay=info"),
        1 => EnvFilter::new("tunrelay=debug"),
        _ => EnvFilter::new("tunrelay=trace"),
    };
    fmt::Subscriber::builder().with_env_filter(filter).init();

    if let Err(e) = tunrelay::run(&args.config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
