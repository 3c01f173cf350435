//! Logging bootstrap for the `loopswarm-node` binary.
//!
//! The library crate only ever calls the `log` macros; this module is the
//! one place that wires a concrete sink ([`env_logger`]), so library code
//! stays decoupled from how a particular binary chooses to print.

use std::io::Write;

use log::LevelFilter;

/// Initializes `env_logger` with a `[time level target] message` format.
/// Safe to call at most once per process; a second call is a no-op
/// (logged at `debug!`, not an error — tests in the same binary may each
/// want logging initialized).
pub fn init(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if let Err(e) = result {
        log::debug!("logger already initialized: {}", e);
    }
}
