use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use minerproxy_core::{
    Config, ConfigError, Mode, DEFAULT_DISCONNECT_THRESHOLD, DEFAULT_TUNNELS_PER_PORT,
};

/// Command-line surface for the relay binary, parsed by `clap` into
/// [`RawArgs`] and then validated into an immutable [`Config`].
#[derive(Parser, Debug)]
#[command(name = "minerproxy")]
#[command(author, version, about = "Encrypted TCP relay for miner traffic", long_about = None)]
pub struct RawArgs {
    #[command(subcommand)]
    pub mode: ModeArgs,
}

#[derive(Subcommand, Debug)]
pub enum ModeArgs {
    /// Run as the client half: accept plaintext local connections and
    /// relay them through a pool of encrypted tunnels.
    Client(ClientArgs),
    /// Run as the server half: accept tunnels and relay their sessions to
    /// upstream mining pools.
    Server(ServerArgs),
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Local plaintext listen addresses, comma-separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub listen: Vec<SocketAddr>,

    /// The server's tunnel-accept address.
    #[arg(long)]
    pub remote: SocketAddr,

    /// Per-listen-address upstream pool override, comma-separated,
    /// positional against `--listen`. Omit for no overrides.
    #[arg(long, value_delimiter = ',')]
    pub pool_override: Vec<SocketAddr>,

    /// Shared secret, at most 32 bytes.
    #[arg(long)]
    pub secret: String,

    /// Tunnels maintained per listen address (effective minimum 2).
    #[arg(long, default_value_t = DEFAULT_TUNNELS_PER_PORT)]
    pub tunnels_per_port: usize,

    /// Seconds a tunnel must stay down before the disconnect sink fires.
    #[arg(long, default_value_t = DEFAULT_DISCONNECT_THRESHOLD.as_secs())]
    pub disconnect_threshold: u64,

    /// Raise logging to debug level.
    #[arg(long)]
    pub debug: bool,

    /// Optional address a stats sink listens on; absent means logging only.
    #[arg(long)]
    pub stats_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Single tunnel-accept address.
    #[arg(long)]
    pub listen: SocketAddr,

    /// Default upstream mining pool address.
    #[arg(long)]
    pub remote: SocketAddr,

    /// Shared secret, at most 32 bytes.
    #[arg(long)]
    pub secret: String,

    /// Seconds a tunnel must stay down before the disconnect sink fires.
    #[arg(long, default_value_t = DEFAULT_DISCONNECT_THRESHOLD.as_secs())]
    pub disconnect_threshold: u64,

    /// Raise logging to debug level.
    #[arg(long)]
    pub debug: bool,

    /// Optional address a stats sink listens on; absent means logging only.
    #[arg(long)]
    pub stats_addr: Option<SocketAddr>,
}

impl RawArgs {
    /// Validate parsed arguments into an immutable [`Config`]. Fails on the
    /// first violation: mismatched listen/pool arity, an oversized secret,
    /// or an empty listen list.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        match self.mode {
            ModeArgs::Client(a) => Config::new(
                Mode::Client,
                a.listen,
                a.remote,
                a.pool_override,
                a.secret,
                a.tunnels_per_port,
                Duration::from_secs(a.disconnect_threshold),
                a.debug,
                a.stats_addr,
            ),
            ModeArgs::Server(a) => Config::new(
                Mode::Server,
                vec![a.listen],
                a.remote,
                Vec::new(),
                a.secret,
                DEFAULT_TUNNELS_PER_PORT,
                Duration::from_secs(a.disconnect_threshold),
                a.debug,
                a.stats_addr,
            ),
        }
    }
}
