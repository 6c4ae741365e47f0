// src/lib.rs

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod packet;
pub mod policy;
pub mod port;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::engine::Engine;
pub use crate::error::{Error, Result};

/// Entry point called from `main.rs`. Loads the configuration, builds the
/// engine and runs it until a shutdown signal arrives.
pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    info!("configuration loaded from {}", config_path);

    let engine = Engine::new(config, Some(config_path.into())).await?;
    Arc::new(engine).run().await
}
