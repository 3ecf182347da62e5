use log::SetLoggerError;

/// The environment variable that controls the log filter of the built-in logger, e.g.
/// `VMHEAP_LOG=vmheap::plan::shenandoah=debug`.
pub const LOG_FILTER_ENV: &str = "VMHEAP_LOG";

/// Attempt to init a env_logger for the heap.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            // By default, use info level logging. Occupancy lines are logged at info level.
            let env = env_logger::Env::default().filter_or(LOG_FILTER_ENV, "info");
            env_logger::Builder::from_env(env)
                .format_timestamp_millis()
                .try_init()
        } else {
            Ok(())
        }
    }
}
