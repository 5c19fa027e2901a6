use chrono::{DateTime, Utc};
use log::{debug, error, info, warn, LevelFilter};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Environment variable consulted when no level is given explicitly
pub const LOG_LEVEL_ENV: &str = "MUSICD_LOG_LEVEL";

/// Default number of events kept by [`EventLog`]
pub const DEFAULT_MAX_EVENTS: usize = 256;

fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    }
}

/// Initialize logging. `level` wins over `MUSICD_LOG_LEVEL`, which wins
/// over `fallback`.
pub fn init(level: Option<&str>, fallback: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = level
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_LEVEL_ENV).ok())
        .unwrap_or_else(|| fallback.to_string());

    let mut builder = env_logger::Builder::new();

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}:{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });
    builder.filter_level(parse_level(&log_level));
    builder.try_init()?;

    info!("musicd logging initialized with level: {}", log_level);
    Ok(())
}

/// Noteworthy things the worker threads did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    DecodeStarted,
    DecodeFinished,
    DecodeError,
    SeekCompleted,
    SeekFailed,
    TrackChanged,
    DeviceOpened,
    DeviceClosed,
    DeviceError,
    Underrun,
    CrossfadeStarted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DecodeStarted => "DECODE_STARTED",
            EventType::DecodeFinished => "DECODE_FINISHED",
            EventType::DecodeError => "DECODE_ERROR",
            EventType::SeekCompleted => "SEEK_COMPLETED",
            EventType::SeekFailed => "SEEK_FAILED",
            EventType::TrackChanged => "TRACK_CHANGED",
            EventType::DeviceOpened => "DEVICE_OPENED",
            EventType::DeviceClosed => "DEVICE_CLOSED",
            EventType::DeviceError => "DEVICE_ERROR",
            EventType::Underrun => "UNDERRUN",
            EventType::CrossfadeStarted => "CROSSFADE_STARTED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub details: String,
}

impl std::fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.event_type.as_str(),
            self.details
        )
    }
}

/// Bounded history of player events, shared between threads
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<PlayerEvent>>,
    max_events: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events: max_events.max(1),
        }
    }

    /// Record an event and forward it to the logger
    pub fn record(&self, event_type: EventType, details: impl Into<String>) {
        let details = details.into();

        match event_type {
            EventType::DecodeError | EventType::DeviceError => {
                error!("[{}] {}", event_type.as_str(), details)
            }
            EventType::Underrun | EventType::SeekFailed => {
                warn!("[{}] {}", event_type.as_str(), details)
            }
            EventType::TrackChanged | EventType::DeviceOpened | EventType::CrossfadeStarted => {
                info!("[{}] {}", event_type.as_str(), details)
            }
            _ => debug!("[{}] {}", event_type.as_str(), details),
        }

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(PlayerEvent {
            timestamp: Utc::now(),
            event_type,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// The last `count` events, oldest first
    pub fn recent(&self, count: usize) -> Vec<PlayerEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
