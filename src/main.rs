//! rps/src/main.rs
//! Binary entry point.

use rps::config::Config;
use rps::logging;
use rps::server::Server;
use rps::state::{SESSIONS, TOTAL_BYTES_RECV, TOTAL_BYTES_SENT, TOTAL_CONN};
use rps::upstream::Upstreams;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: rps <config.json>");
        std::process::exit(2);
    });

    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rps: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log.level);

    let upstreams = match Upstreams::new(&config.upstreams, &config.api) {
        Ok(upstreams) => Arc::new(upstreams),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    tokio::spawn(Arc::clone(&upstreams).refresh_loop());

    for server_cfg in config.servers {
        let server = Server::new(server_cfg, Arc::clone(&upstreams));
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("server failed: {e}");
            }
        });
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down, aborting {} active sessions", SESSIONS.len());
    for entry in SESSIONS.iter() {
        entry.value().abort();
    }
    info!(
        "served {} connections, {} bytes out, {} bytes in",
        TOTAL_CONN.load(Ordering::SeqCst),
        TOTAL_BYTES_SENT.load(Ordering::SeqCst),
        TOTAL_BYTES_RECV.load(Ordering::SeqCst)
    );
}
