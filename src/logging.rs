//! Logger setup.

use env_logger::{Builder, Env};
use log::Level;
use std::io::Write;

/// Initialize the logger. `RUST_LOG` wins over the verbose flag.
pub fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = Env::default().filter_or("RUST_LOG", default);

    Builder::from_env(env)
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARN ",
                Level::Info => "INFO ",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            };
            writeln!(buf, "{} [{}] {}", level, record.target(), record.args())
        })
        .init();
}
