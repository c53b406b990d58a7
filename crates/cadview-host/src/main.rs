// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless CadView viewer host.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cadview_app_core::ConfigService;
use cadview_config_fs::FsConfigStore;
use cadview_host::Host;
use cadview_proto::DEFAULT_PORT;
use cadview_session::PortRegistry;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PREFS_KEY: &str = "host";

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless CadView viewer host")]
struct Args {
    /// Port to listen on; defaults to the saved host preference.
    #[arg(long)]
    port: Option<u16>,
    /// Workspace root recorded in the port registry; defaults to the working directory.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Do not record this host in the port registry.
    #[arg(long)]
    no_register: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostPrefs {
    port: u16,
}

impl Default for HostPrefs {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Config (best-effort)
    let config: Option<ConfigService<FsConfigStore>> =
        FsConfigStore::new().map(ConfigService::new).ok();

    let prefs: HostPrefs = config
        .as_ref()
        .and_then(|c| c.load::<HostPrefs>(PREFS_KEY).ok().flatten())
        .unwrap_or_default();
    if let Some(cfg) = &config {
        if let Err(err) = cfg.save(PREFS_KEY, &prefs) {
            warn!(%err, "could not persist host preferences");
        }
    }

    let port = args.port.unwrap_or(prefs.port);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding 127.0.0.1:{port}"))?;
    let port = listener.local_addr()?.port();

    let registry = if args.no_register {
        None
    } else {
        FsConfigStore::new()
            .map(|store| PortRegistry::new(ConfigService::new(store)))
            .ok()
    };
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    if let Some(registry) = &registry {
        match registry.register(port, root.clone()) {
            Ok(()) => info!(port, root = %root.display(), "registered viewer"),
            Err(err) => warn!(%err, "could not register viewer port"),
        }
    }

    let host = Host::new();
    tokio::select! {
        res = host.serve(listener) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    if let Some(registry) = &registry {
        if let Err(err) = registry.unregister(port) {
            warn!(%err, "could not unregister viewer port");
        }
    }
    Ok(())
}
