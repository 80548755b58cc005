//! meshwright - drive a 3D application from natural-language requests.
//!
//! Subcommands:
//! - `meshwright check` - probe the 3D application's command listener
//! - `meshwright classify <request>` - pick a strategy
//! - `meshwright plan <request>` - produce a tool plan without running it
//! - `meshwright run <request>` - classify and fulfil end to end
//! - `meshwright pipeline <request>` - run the hybrid pipeline directly
//! - `meshwright advise <request>` - propose a step-by-step workflow
//! - `meshwright providers` - neural provider configuration and health
//! - `meshwright config` - print the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use meshconf::MeshConfig;
use meshwright::telemetry;

mod commands;

#[derive(Parser)]
#[command(name = "meshwright")]
#[command(about = "Natural-language 3D content orchestration")]
#[command(version)]
struct Cli {
    /// Config file replacing ./meshwright.toml in the load order
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (or a full filter directive); RUST_LOG still wins
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the 3D application's command listener
    Check,

    /// Classify a request as procedural, neural or hybrid
    Classify {
        request: String,

        /// Skip classification and use this strategy
        #[arg(short, long)]
        strategy: Option<meshwright::Strategy>,

        /// Never fall back to the LLM
        #[arg(long)]
        keyword_only: bool,

        /// Description of the current scene, passed to the LLM
        #[arg(long)]
        scene: Option<String>,
    },

    /// Generate a tool plan for a request
    Plan { request: String },

    /// Classify and fulfil a request end to end
    Run {
        request: String,

        #[arg(short, long)]
        strategy: Option<meshwright::Strategy>,

        /// Identity passed to the entitlement gate
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Run the ten-stage hybrid pipeline
    Pipeline {
        request: String,

        /// Reference image for geometry and texturing
        #[arg(long)]
        image: Option<PathBuf>,

        /// Abort on the first failed stage
        #[arg(long)]
        no_degrade: bool,

        #[arg(long)]
        segment: bool,

        #[arg(long)]
        rig: bool,

        /// Animation preset: turntable, idle or bounce
        #[arg(long)]
        animate: Option<String>,

        /// Export format: glb, fbx or obj
        #[arg(long)]
        format: Option<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Propose a reviewable workflow for a request
    Advise {
        request: String,

        #[arg(short, long)]
        strategy: Option<meshwright::Strategy>,

        #[arg(long)]
        scene: Option<String>,
    },

    /// Show neural provider configuration and health
    Providers,

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = MeshConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.infra.telemetry.log_level.clone());
    telemetry::init(&log_level, Some(config.infra.telemetry.otlp_endpoint.as_str()))
        .context("Failed to initialize telemetry")?;
    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let result = commands::dispatch(cli.command, &config, &sources, &cancel).await;
    telemetry::shutdown();
    result
}
