//! minerproxy binary: encrypted TCP relay for miner traffic.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minerproxy_core::{client_id, Config, Mode, SHUTDOWN_GRACE};
use minerproxy_client::{ClientListener, TunnelPool};
use minerproxy_server::{LoggingDisconnectSink, LoggingStatsSink, ServerListener};
use minerproxy_settings::{machine_id, RawArgs};

/// Unrelated URLs the client-mode cover-traffic task polls during idle
/// periods, to keep the process's outbound traffic pattern unremarkable.
const COVER_TRAFFIC_URLS: &[&str] = &[
    "https://www.wikipedia.org",
    "https://www.rust-lang.org",
    "https://example.com",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RawArgs::parse();
    let config = args.into_config().context("invalid configuration")?;

    minerproxy_logging::init(config.debug);

    let shutdown = CancellationToken::new();
    let mut tasks = match config.mode {
        Mode::Client => run_client(config, shutdown.clone()).await?,
        Mode::Server => run_server(config, shutdown.clone()).await?,
    };

    tokio::select! {
        _ = drain(&mut tasks) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, propagating cancellation and waiting up to {:?} for in-flight work", SHUTDOWN_GRACE);
            shutdown.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, drain(&mut tasks)).await.is_err() {
                warn!("shutdown grace period elapsed, hard-aborting {} remaining task(s)", tasks.len());
                tasks.abort_all();
                drain(&mut tasks).await;
            }
        }
    }

    Ok(())
}

/// Wait for every task in `tasks` to finish, discarding their results.
/// Panicking tasks are logged and otherwise ignored; the process
/// shutdown path doesn't need to propagate them.
async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            if !e.is_cancelled() {
                warn!("task panicked during shutdown: {e}");
            }
        }
    }
}

async fn run_client(config: Config, shutdown: CancellationToken) -> anyhow::Result<JoinSet<()>> {
    let machine = machine_id();
    let mut tasks = JoinSet::new();

    for (index, listen_addr) in config.listen_addrs.iter().enumerate() {
        let pool_addr = config.pool_addr_for(index);
        let id = client_id(
            &machine,
            &config.secret,
            &config.remote_addr.to_string(),
            &listen_addr.port().to_string(),
            &pool_addr.to_string(),
        );
        let pool_override = config.pool_overrides.get(index).copied();

        let pool = TunnelPool::connect(
            config.remote_addr,
            &config.secret,
            id,
            pool_override,
            config.tunnels_per_port,
            shutdown.clone(),
        )
        .await
        .with_context(|| format!("establishing tunnel pool for {listen_addr}"))?;

        let cipher = minerproxy_crypto::Cipher::from_secret(&config.secret);
        let listener = ClientListener::new(*listen_addr, pool, cipher, shutdown.clone());
        tasks.spawn(async move {
            if let Err(e) = listener.serve().await {
                warn!("client listener failed: {e}");
            }
        });
    }

    tasks.spawn(cover_traffic(shutdown));
    Ok(tasks)
}

async fn run_server(config: Config, shutdown: CancellationToken) -> anyhow::Result<JoinSet<()>> {
    let listen_addr = *config
        .listen_addrs
        .first()
        .context("server mode requires exactly one listen address")?;

    let listener = ServerListener::new(
        listen_addr,
        &config.secret,
        config.remote_addr,
        config.disconnect_threshold,
        std::sync::Arc::new(LoggingDisconnectSink),
        std::sync::Arc::new(LoggingStatsSink),
        shutdown,
    );

    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        if let Err(e) = listener.serve().await {
            warn!("server listener failed: {e}");
        }
    });
    Ok(tasks)
}

/// Issue a GET to a randomly chosen unrelated URL on a randomized 10-60s
/// interval, discarding the response. Runs for the lifetime of the
/// process in client mode only; never touches the tunnel data plane.
async fn cover_traffic(shutdown: CancellationToken) {
    let client = reqwest::Client::new();
    loop {
        let delay = Duration::from_secs(rand::thread_rng().gen_range(10..=60));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                debug!("cover traffic task stopping for shutdown");
                return;
            }
        }

        let url = COVER_TRAFFIC_URLS[rand::thread_rng().gen_range(0..COVER_TRAFFIC_URLS.len())];
        match client.get(url).send().await {
            Ok(_) => debug!("cover traffic request to {url} completed"),
            Err(e) => debug!("cover traffic request to {url} failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        RawArgs::command().debug_assert();
    }
}
