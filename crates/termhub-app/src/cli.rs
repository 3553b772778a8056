use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// CLI arguments for termhub
#[derive(Parser, Debug)]
#[command(name = "termhub")]
#[command(about = "Multiplexed terminal sessions over one resilient WebSocket")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a TOML config file (default: ./termhub.toml when present)
    #[arg(long, value_name = "PATH", env = "TERMHUB_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach to a terminal server and drive its sessions from this terminal
    Attach(AttachArgs),
    /// Serve PTY shells over WebSocket
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct AttachArgs {
    /// Server host and port (e.g. 127.0.0.1:8000)
    #[arg(long, env = "TERMHUB_HOST")]
    pub host: Option<String>,

    /// Use wss:// instead of ws://
    #[arg(long, env = "TERMHUB_SECURE")]
    pub secure: bool,

    /// Path prefix the socket endpoints are mounted under
    #[arg(long, value_name = "PREFIX", env = "TERMHUB_WS_PREFIX")]
    pub prefix: Option<String>,

    /// Endpoint of the shell, relative to the prefix
    #[arg(long, value_name = "PATH", env = "TERMHUB_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long, value_name = "N", env = "TERMHUB_RECONNECT_LIMIT")]
    pub reconnect_limit: Option<u32>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, value_name = "MS", env = "TERMHUB_RECONNECT_INTERVAL_MS")]
    pub reconnect_interval_ms: Option<u64>,

    /// Connect as soon as the client starts instead of on first session
    #[arg(long, env = "TERMHUB_AUTO_CONNECT")]
    pub auto_connect: bool,

    /// Maximum number of concurrent sessions
    #[arg(long, value_name = "N", env = "TERMHUB_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Window used to coalesce resize bursts, in milliseconds
    #[arg(long, value_name = "MS", env = "TERMHUB_RESIZE_DEBOUNCE_MS")]
    pub resize_debounce_ms: Option<u64>,

    /// JSON file remembering layout state between runs
    #[arg(long, value_name = "PATH", env = "TERMHUB_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Token appended to the socket URL
    #[arg(long, env = "TERMHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Treat inbound text as channel frames for command routing instead of shell output
    #[arg(long)]
    pub channel: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, value_name = "ADDR", env = "TERMHUB_BIND")]
    pub bind: Option<String>,

    /// Shell started for every connection
    #[arg(long, env = "TERMHUB_SHELL")]
    pub shell: Option<String>,

    /// Path prefix the socket endpoints are mounted under
    #[arg(long, value_name = "PREFIX", env = "TERMHUB_WS_PREFIX")]
    pub prefix: Option<String>,

    /// Require this token as the `token` query parameter
    #[arg(long, env = "TERMHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}
