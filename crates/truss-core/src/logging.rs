//! Numeric log levels used at the script/host boundary.
//!
//! Scripts and capabilities log with the small integer levels below; the
//! host routes everything into the `log` facade.

use log::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum LogLevel {
    Critical = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    /// Decode a numeric level. Anything above `Debug` clamps to `Debug`.
    pub fn from_i64(level: i64) -> Self {
        match level {
            i64::MIN..=0 => LogLevel::Critical,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn to_level(self) -> Level {
        match self {
            LogLevel::Critical | LogLevel::Error => Level::Error,
            LogLevel::Warning => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
        }
    }
}

/// Emit `text` at a numeric level with a source tag.
pub fn log_at(level: LogLevel, source: &str, text: &str) {
    if level == LogLevel::Critical {
        log::error!(target: "truss", "[{}] CRITICAL: {}", source, text);
    } else {
        log::log!(target: "truss", level.to_level(), "[{}] {}", source, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::from_i64(0), LogLevel::Critical);
        assert_eq!(LogLevel::from_i64(-5), LogLevel::Critical);
        assert_eq!(LogLevel::from_i64(2), LogLevel::Warning);
        assert_eq!(LogLevel::from_i64(42), LogLevel::Debug);
        assert_eq!(LogLevel::Critical.to_level(), Level::Error);
        assert_eq!(LogLevel::Warning.to_level(), Level::Warn);
    }
}
