//! Logging setup plus the wire-dump helper used at trace level.

/// Classic offset/hex/ascii dump, one line per 16 bytes. Used for
/// trace-level dumps of raw input messages; rendered into a single string
/// so it travels as one event field.
pub fn hexdump(bytes: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
        use std::fmt::Write as _;
        let offset = i * WIDTH;
        let _ = write!(out, "{offset:08x}  ");
        for (j, byte) in chunk.iter().enumerate() {
            if j == WIDTH / 2 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02x} ");
        }
        for _ in chunk.len()..WIDTH {
            out.push_str("   ");
        }
        out.push(' ');
        for &byte in chunk {
            let ch = if (0x20..=0x7e).contains(&byte) {
                byte as char
            } else {
                '.'
            };
            out.push(ch);
        }
        out.push('\n');
    }
    out
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Calling again is a no-op, so the
    /// binary and an embedding test harness can both run through here.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }
        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let env_filter = build_env_filter(config.level.to_filter());

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        if let Ok(filter) = std::env::var("BOARDWALK_LOG_FILTER") {
            return EnvFilter::new(filter);
        }
        EnvFilter::new(default_filter_for(level))
    }

    /// Crate-scoped defaults. At trace level the runtime's own targets stay
    /// clamped to info; BOARDWALK_LOG_FILTER overrides everything.
    fn default_filter_for(level: LevelFilter) -> String {
        match level {
            LevelFilter::TRACE => "info,boardwalk=trace,tokio=info,mio=info".to_owned(),
            LevelFilter::DEBUG => "info,boardwalk=debug".to_owned(),
            LevelFilter::INFO => "info".to_owned(),
            LevelFilter::WARN => "warn".to_owned(),
            LevelFilter::ERROR => "error".to_owned(),
            LevelFilter::OFF => "off".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexdump_lines_up_short_tails() {
        let dump = hexdump(b"m1,0,\x00\xffABC");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("00000000  6d 31 2c 30 2c 00 ff 41  42 43"));
        assert!(lines[0].ends_with("m1,0,..ABC"));
    }

    #[test]
    fn hexdump_offsets_advance_by_sixteen() {
        let dump = hexdump(&[0u8; 33]);
        let offsets: Vec<&str> = dump
            .lines()
            .map(|line| line.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(offsets, vec!["00000000", "00000010", "00000020"]);
    }
}
