use clap::{Args, Parser, Subcommand, ValueEnum};

use cacheable::BackendKind;

#[derive(Parser)]
#[command(name = "cacheable")]
#[command(about = "Run cache scenarios against a configured cache stack")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to cacheable.toml when present)
    #[arg(short, long, global = true, env = "CACHEABLE_CONFIG")]
    pub config: Option<String>,

    /// Backend stack (overrides config)
    #[arg(short, long, global = true)]
    pub backend: Option<BackendArg>,

    /// Log level (overrides config; RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BackendArg {
    Memory,
    Redis,
    Tiered,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => BackendKind::Memory,
            BackendArg::Redis => BackendKind::Redis,
            BackendArg::Tiered => BackendKind::Tiered,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cached user lookups invalidated by updates
    Demo,
    /// Entry expiry with a short TTL
    Ttl(TtlArgs),
    /// Promotion from a shared slow tier into a local fast tier
    Tier,
    /// Check that the configured backend answers
    Ping,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct TtlArgs {
    /// Entry TTL in milliseconds
    #[arg(long, default_value_t = 50)]
    pub ttl_ms: u64,
}
