use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::{fmt::Arguments, io::stdout};

pub fn set_up_logging(base_log_level: LevelFilter) -> Result<(), log::SetLoggerError> {
    Dispatch::new()
        .format(move |out, message, record| formatter(out, message, record))
        .level(base_log_level)
        .level_for("hyper", LevelFilter::Info)
        .level_for("warp", LevelFilter::Info)
        .level_for("ethers_providers", LevelFilter::Info)
        .level_for("rustls", LevelFilter::Warn)
        .chain(stdout())
        .apply()
}

fn formatter(out: FormatCallback<'_>, message: &Arguments<'_>, record: &Record<'_>) {
    let line = record
        .line()
        .map(|line| format!(":{}", line))
        .unwrap_or_default();

    out.finish(format_args!(
        "[{date}][{level}][{path}{line}] {message}",
        date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        path = record.target(),
        line = line,
        level = record.level(),
        message = message,
    ))
}
