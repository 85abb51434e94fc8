//! log4rs setup for binaries, benches and test runs.
//!
//! The library itself only talks to the `log` facade.
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::path::Path;
use std::sync::Once;

const PATTERN: &str = "{d(%H:%M:%S%.3f)} {l} {t} - {m}{n}";

static INIT: Once = Once::new();

fn console_config(level: LevelFilter) -> Result<Config, log4rs::config::runtime::ConfigErrors> {
    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
}

/// Routes log records at or above `level` to stderr.
///
/// Only the first call in a process installs a logger; later calls are no-ops.
pub fn init_console(level: LevelFilter) {
    INIT.call_once(|| {
        if let Ok(config) = console_config(level) {
            let _log_res = log4rs::init_config(config);
        }
    });
}

fn file_config<P: AsRef<Path>>(path: P, level: LevelFilter) -> Result<Config, Box<dyn Error>> {
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build(path)?;
    Ok(Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(level))?)
}

/// Routes log records at or above `level` to a file, e.g. one per experiment.
///
/// # Errors
/// When the file cannot be opened or a logger is already installed.
pub fn init_file<P: AsRef<Path>>(path: P, level: LevelFilter) -> Result<(), Box<dyn Error>> {
    log4rs::init_config(file_config(path, level)?)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_console_config_builds() {
        assert!(console_config(LevelFilter::Debug).is_ok());
        init_console(LevelFilter::Warn);
        init_console(LevelFilter::Trace);
    }

    #[test]
    fn test_file_config_creates_log_file() {
        let path = std::env::temp_dir().join(format!("hopskip_log_{}.log", std::process::id()));
        assert!(file_config(&path, LevelFilter::Info).is_ok());
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }
}
