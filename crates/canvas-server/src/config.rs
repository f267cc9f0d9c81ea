use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Debug, Parser)]
pub struct ServeArgs {
    #[arg(long, env = "CANVAS_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,
    /// Append one JSON line per request to this file.
    #[arg(long, env = "CANVAS_EVENTS")]
    pub events: Option<PathBuf>,
    #[arg(long, env = "CANVAS_UPSTREAM_TIMEOUT_SECS", default_value_t = 120)]
    pub upstream_timeout_secs: u64,
    /// Largest accepted request body; edit requests carry base64 images.
    #[arg(long, env = "CANVAS_MAX_BODY_MB", default_value_t = 25)]
    pub max_body_mb: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub events: Option<PathBuf>,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if args.upstream_timeout_secs == 0 {
            bail!("--upstream-timeout-secs must be at least 1");
        }
        if args.max_body_mb == 0 {
            bail!("--max-body-mb must be at least 1");
        }
        Ok(Self {
            bind: args.bind,
            events: args.events,
            upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
            max_body_bytes: args.max_body_mb.saturating_mul(1024 * 1024),
        })
    }
}
