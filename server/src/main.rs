//! Standalone muxd binary. `--port` overrides the default; otherwise reads
//! `MUXD_PORT`.

use std::net::SocketAddr;

const DEFAULT_PORT: u16 = 5182;

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn resolve_port() -> u16 {
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().unwrap_or(DEFAULT_PORT);
        }
        i += 1;
    }
    std::env::var("MUXD_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    setup_logging();
    let _ = muxcore::config::ensure_loaded();
    let port = resolve_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(muxd::run(addr))
}
