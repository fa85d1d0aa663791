mod cache;
mod config;
mod db;
mod detect;
mod error;
mod ocr;
mod plate;
mod server;
mod types;

use crate::cache::MemoryCache;
use crate::config::Config;
use crate::detect::Detector;
use crate::ocr::{OcrEngine, RemoteOcr};
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::Filter;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-scanner");

    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), failure::Error> {
    let config = Config::from_env()?;
    let db_conn = Arc::new(Mutex::new(db::open(&config.db_path)?));
    // The OCR engine is created once here and shared by every request.
    let ocr: Arc<dyn OcrEngine> = Arc::new(RemoteOcr::new(&config.ocr_url));
    let detector = Arc::new(Detector::new(
        ocr,
        Arc::new(MemoryCache::new(config.cache_capacity)),
        db_conn.clone(),
        config.cache_ttl,
        config.utc_offset,
    ));

    let routes = server::routes(detector, db_conn).with(warp::log("plate_scanner"));
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(config.addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    });
    info!("Listening on {}", addr);
    server.await;
    Ok(())
}
