//! Shared types for ravenlogs
//!
//! This crate contains the log record model, its wire/file codec and the
//! filter and connection types used across the ravenlogs crates.

mod error;

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

pub use error::{Error, Result};

// ============================================================================
// Log Level
// ============================================================================

/// Log severity level, ordered from least to most severe
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Every level in ascending severity
    pub const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    /// Parse a level name, accepting the common short forms
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "trc" => Some(Self::Trace),
            "debug" | "dbg" => Some(Self::Debug),
            "info" | "inf" | "information" => Some(Self::Info),
            "warn" | "warning" | "wrn" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            "fatal" | "critical" | "ftl" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Level for a numeric ordinal (0 = Trace .. 5 = Fatal)
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Canonical name, as written to the wire and to stored files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::Format(format!("unknown log level: {s}")))
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct LevelVisitor;

        impl Visitor<'_> for LevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a log level name or ordinal")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<LogLevel, E> {
                LogLevel::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<LogLevel, E> {
                LogLevel::from_ordinal(v)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<LogLevel, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(LogLevel::from_ordinal)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

// ============================================================================
// Log Record
// ============================================================================

/// A single log event reported by the server
///
/// Field names on the wire and in stored files are PascalCase and map 1:1 to
/// the struct fields. Optional text fields decode `null` or absence as an
/// empty string and always serialize as strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRecord {
    #[serde(alias = "LogLevel")]
    pub level: LogLevel,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub database: String,

    #[serde(rename = "TimeStamp", default, deserialize_with = "empty_if_null")]
    pub timestamp: String,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub message: String,

    /// Dotted category path used for filtering
    pub logger_name: String,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub exception: String,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub stack_trace: String,
}

fn empty_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl LogRecord {
    /// Create a record with the required fields, all others empty
    pub fn new(level: LogLevel, logger_name: impl Into<String>) -> Self {
        Self {
            level,
            database: String::new(),
            timestamp: String::new(),
            message: String::new(),
            logger_name: logger_name.into(),
            exception: String::new(),
            stack_trace: String::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = exception.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// Serialize as an indented JSON object
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))
    }

    /// Parse a single JSON object
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Format(e.to_string()))
    }
}

/// Plain text rendering: `timestamp;LEVEL;database;logger;message+exception`
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{};{};{};{};{}{}",
            self.timestamp,
            self.level.as_str().to_uppercase(),
            self.database,
            self.logger_name,
            self.message,
            self.exception
        )?;
        if !self.stack_trace.is_empty() {
            write!(f, "{}\n\n", self.stack_trace)?;
        }
        Ok(())
    }
}

// ============================================================================
// Stream Frames
// ============================================================================

/// Value of the `Type` field on keep-alive frames
pub const HEARTBEAT_TYPE: &str = "Heartbeat";

/// A decoded inbound frame from the event stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive, carries no record
    Heartbeat,
    Record(LogRecord),
}

impl Frame {
    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::Format(e.to_string()))?;

        let Some(obj) = value.as_object() else {
            return Err(Error::Format("frame is not a JSON object".to_string()));
        };

        if obj.get("Type").and_then(|t| t.as_str()) == Some(HEARTBEAT_TYPE) {
            return Ok(Self::Heartbeat);
        }

        serde_json::from_value(value)
            .map(Self::Record)
            .map_err(|e| Error::Format(e.to_string()))
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Category used when nothing else is configured
pub const DEFAULT_CATEGORY: &str = "Raven.";

/// Minimum severity plus logger-name substring
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogFilter {
    pub min_level: LogLevel,
    /// Case-sensitive substring of the logger name; empty matches everything
    pub category: String,
}

impl LogFilter {
    pub fn new(min_level: LogLevel, category: impl Into<String>) -> Self {
        Self {
            min_level,
            category: category.into(),
        }
    }

    /// Filter that accepts every record
    pub fn all() -> Self {
        Self::new(LogLevel::Trace, "")
    }

    /// Check if a record passes this filter
    pub fn matches(&self, record: &LogRecord) -> bool {
        record.level >= self.min_level && record.logger_name.contains(self.category.as_str())
    }

    /// `category:Level` form used when registering a watch with the server
    pub fn watch_category(&self) -> String {
        format!("{}:{}", self.category, self.min_level)
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::new(LogLevel::Debug, DEFAULT_CATEGORY)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of the remote stream connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Watch registered, event stream being opened
    Configuring,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Configuring => "configuring",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
