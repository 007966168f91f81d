use std::sync::Arc;

use tinyserve::config::Config;
use tinyserve::routing::Router;
use tinyserve::server::signal::{start_signal_handler, SignalHandler};
use tinyserve::server::Server;
use tinyserve::{handlers, logger};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load_from("config")?;
    logger::init(&cfg)?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let router = Arc::new(Router::new());
    handlers::register_routes(&router);

    // The config moves into the server, so take the grace period first
    let grace = cfg.performance.shutdown_deadline();
    let server = Arc::new(Server::new(cfg, router));

    let signals = Arc::new(SignalHandler::new());
    start_signal_handler(Arc::clone(&signals));

    let srv = Arc::clone(&server);
    let mut serve = tokio::spawn(async move { srv.start().await });

    tokio::select! {
        result = &mut serve => result??,
        () = signals.wait_for_shutdown() => {
            server.stop(grace).await?;
            serve.await??;
        }
    }

    Ok(())
}
