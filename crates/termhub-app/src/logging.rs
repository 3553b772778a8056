use env_logger::Env;

/// Filter applied when RUST_LOG is unset
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialise the global logger once; later calls are ignored
pub fn init(verbosity: u8) {
    let env = Env::default().default_filter_or(default_filter(verbosity));
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialised");
    }
}
