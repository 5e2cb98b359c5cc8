use chrono::Local;
use once_cell::sync::Lazy;
use std::fmt;

/// Severity of a log line, ordered from most to least verbose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Level> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }
}

// HYDRANT_LOG=debug|info|warn|error, read once per process
static THRESHOLD: Lazy<Level> = Lazy::new(|| {
    std::env::var("HYDRANT_LOG").ok().and_then(|v| Level::parse(&v)).unwrap_or(Level::Info)
});

pub fn enabled(level: Level) -> bool {
    level >= *THRESHOLD
}

pub fn log(level: Level, args: fmt::Arguments) {
    if !enabled(level) {
        return;
    }
    let now = Local::now();
    match level {
        Level::Error => eprintln!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level.label(), args),
        _ => println!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level.label(), args),
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Error, format_args!($($arg)*))
    };
}
