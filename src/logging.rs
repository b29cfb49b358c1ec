//! `fern`/`log` bootstrap (§10 Ambient stack "Logging").

use log::LevelFilter;

/// Maps a `-v` repeat count to a level, the usual CLI convention: silent by
/// default, `-v` for info, `-vv` for debug, `-vvv`+ for trace.
#[must_use]
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the process-wide logger. Call once, at the top of `main`.
pub fn init(verbosity: u8) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{:<5}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_for_verbosity(verbosity))
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}
