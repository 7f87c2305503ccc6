//! Tenant core binary
//!
//! Starts the control core over the in-process engine, replays a node
//! manifest into it and reports what the engine would have been given.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::fs;
use std::sync::Arc;

use tenant_core::config::{CliArgs, CoreConfig, NodeManifest};
use tenant_core::core::MemoryLauncher;
use tenant_core::logger::{self, log, LogLevel};
use tenant_core::Controller;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = CliArgs::parse_args();
    cli.validate()?;

    let raw_config = match cli.config {
        Some(ref path) => fs::read(path)
            .with_context(|| format!("Failed to read core config {}", path.display()))?,
        None => Vec::new(),
    };

    // Initialize logger; the CLI wins over the core config's Log section
    let level = cli
        .log_mode
        .as_deref()
        .and_then(LogLevel::from_str)
        .or_else(|| {
            CoreConfig::from_slice(&raw_config)
                .ok()
                .and_then(|c| c.log_level())
        });
    logger::init_logger(level);

    let launcher = Arc::new(MemoryLauncher::new());
    let controller = Controller::new(launcher.clone());
    controller.start(&cli.data_dir, &raw_config)?;
    log::info!(
        core = controller.core_type(),
        protocols = ?controller.protocols(),
        "Core ready"
    );

    let manifest = match cli.nodes {
        Some(ref path) => NodeManifest::load(path)
            .with_context(|| format!("Failed to load node manifest {}", path.display()))?,
        None => NodeManifest::default(),
    };

    // Replay the manifest; a failing node does not stop the others
    let mut failed = 0usize;
    for node in &manifest.nodes {
        let name = node.params.info.name.as_str();
        if let Err(e) = controller.add_node(&node.params) {
            log::error!(node = name, error = %e, "Failed to add node");
            failed += 1;
            continue;
        }
        if node.users.is_empty() {
            continue;
        }
        if let Err(e) = controller.add_users(name, &node.users) {
            log::error!(node = name, error = %e, "Failed to add users");
            failed += 1;
        }
    }
    log::info!(
        nodes = controller.node_names().len(),
        users = manifest.user_count(),
        failed = failed,
        "Manifest replayed"
    );

    if cli.dump {
        if let Some(engine) = launcher.engine() {
            let dump = json!({
                "inbounds": engine.inbound_configs(),
                "outbounds": engine.outbound_configs(),
                "rules": engine.rules(),
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    controller.close()?;

    if failed > 0 {
        return Err(anyhow!("{} manifest entries failed", failed));
    }
    Ok(())
}
