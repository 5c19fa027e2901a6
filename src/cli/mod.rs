use crate::config::{OutputTarget, ReplayGainMode};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub mod status;
pub use status::StatusDisplay;

/// Number of events shown when `events` has no argument
const DEFAULT_EVENT_COUNT: usize = 10;

/// Gapless music player daemon
#[derive(Debug, Parser)]
#[command(name = "musicd")]
#[command(about = "A gapless, cross-fading music player driven from stdin")]
#[command(version)]
pub struct CliApp {
    /// Files or directories to queue at startup
    pub files: Vec<PathBuf>,

    /// Configuration file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output device: "default", "null" or a device name
    #[arg(short, long)]
    pub output: Option<OutputTarget>,

    /// Cross-fade duration in seconds
    #[arg(short = 'x', long)]
    pub crossfade: Option<f32>,

    /// Ring buffer capacity in chunks
    #[arg(short, long)]
    pub buffer_chunks: Option<usize>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

/// Commands accepted on the interactive prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Commands {
    /// Start playback, optionally at a zero-based queue index
    Play { index: Option<usize> },
    Pause,
    Resume,
    Toggle,
    Stop,
    Next,
    Seek { position: Duration },
    Add { path: PathBuf },
    Clear,
    List,
    Status,
    Events { count: usize },
    Crossfade { seconds: f32 },
    Volume { level: u8 },
    ReplayGain { mode: ReplayGainMode },
    /// Show and acknowledge the latched player error
    Error,
    Devices,
    Quit,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(rest)
            } else {
                PathBuf::from(path)
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse one line typed at the prompt
    pub fn parse_command(input: &str) -> Result<Commands, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "play" => match args.get(1) {
                Some(value) => {
                    // Positions are shown and typed starting at 1
                    let position = parse_number(value, "queue position", "a position from 1")?;
                    match position.checked_sub(1) {
                        Some(index) => Ok(Commands::Play { index: Some(index) }),
                        None => Err(ParseError::InvalidArgument {
                            argument: "queue position".to_string(),
                            value: value.to_string(),
                            expected: "a position from 1".to_string(),
                        }),
                    }
                }
                None => Ok(Commands::Play { index: None }),
            },
            "pause" => Ok(Commands::Pause),
            "resume" => Ok(Commands::Resume),
            "toggle" => Ok(Commands::Toggle),
            "stop" => Ok(Commands::Stop),
            "next" | "skip" => Ok(Commands::Next),
            "seek" => {
                let value = required(&args, "seek", "position")?;
                Ok(Commands::Seek {
                    position: Self::parse_time(value)?,
                })
            }
            "add" => {
                if args.len() > 1 {
                    let path_str = args[1..].join(" ");
                    Ok(Commands::Add {
                        path: Self::expand_path(&path_str),
                    })
                } else {
                    Err(ParseError::MissingArgument {
                        command: "add".to_string(),
                        argument: "path".to_string(),
                    })
                }
            }
            "clear" => Ok(Commands::Clear),
            "list" | "ls" => Ok(Commands::List),
            "status" => Ok(Commands::Status),
            "events" => match args.get(1) {
                Some(value) => Ok(Commands::Events {
                    count: parse_number(value, "event count", "a number of events")?,
                }),
                None => Ok(Commands::Events {
                    count: DEFAULT_EVENT_COUNT,
                }),
            },
            "crossfade" | "xfade" => {
                let value = required(&args, "crossfade", "seconds")?;
                match value.parse::<f32>() {
                    Ok(seconds) if seconds >= 0.0 && seconds.is_finite() => {
                        Ok(Commands::Crossfade { seconds })
                    }
                    _ => Err(ParseError::InvalidArgument {
                        argument: "crossfade".to_string(),
                        value: value.to_string(),
                        expected: "a non-negative number of seconds".to_string(),
                    }),
                }
            }
            "volume" => {
                let value = required(&args, "volume", "level")?;
                match value.parse::<u8>() {
                    Ok(level) if level <= 100 => Ok(Commands::Volume { level }),
                    Ok(_) => Err(ParseError::InvalidArgument {
                        argument: "volume level".to_string(),
                        value: value.to_string(),
                        expected: "0-100".to_string(),
                    }),
                    Err(_) => Err(ParseError::InvalidArgument {
                        argument: "volume level".to_string(),
                        value: value.to_string(),
                        expected: "number 0-100".to_string(),
                    }),
                }
            }
            "replaygain" => {
                let value = required(&args, "replaygain", "mode")?;
                let mode = match value {
                    "off" => ReplayGainMode::Off,
                    "track" => ReplayGainMode::Track,
                    "album" => ReplayGainMode::Album,
                    _ => {
                        return Err(ParseError::InvalidArgument {
                            argument: "replay gain mode".to_string(),
                            value: value.to_string(),
                            expected: "off, track or album".to_string(),
                        })
                    }
                };
                Ok(Commands::ReplayGain { mode })
            }
            "error" => Ok(Commands::Error),
            "devices" => Ok(Commands::Devices),
            "help" | "?" => Err(ParseError::HelpRequested),
            "exit" | "quit" | "q" => Ok(Commands::Quit),
            other => Err(ParseError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    /// Display help information
    pub fn display_help() {
        println!("musicd - Available Commands:");
        println!();
        println!("Playback Control:");
        println!("  play [position]     - Start playback, optionally at a queue position");
        println!("  pause               - Pause playback");
        println!("  resume              - Resume playback");
        println!("  toggle              - Toggle pause");
        println!("  stop                - Stop playback and drop buffered audio");
        println!("  next                - Skip the song being heard");
        println!("  seek <time>         - Seek to position (e.g., '1:30', '90s')");
        println!();
        println!("Queue Management:");
        println!("  add <path>          - Add file/directory to queue");
        println!("  list                - List queue contents");
        println!("  clear               - Stop and clear the queue");
        println!();
        println!("Settings:");
        println!("  crossfade <seconds> - Set cross-fade duration (0 disables)");
        println!("  volume <0-100>      - Set software volume");
        println!("  replaygain <mode>   - Apply replay gain: off, track or album");
        println!();
        println!("Information:");
        println!("  status              - Show current player status");
        println!("  events [count]      - Show recent player events");
        println!("  error               - Show and clear the last player error");
        println!("  devices             - List audio output devices");
        println!();
        println!("General:");
        println!("  help                - Show this help message");
        println!("  exit, quit          - Exit the player");
    }

    /// Parse time string to Duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        // "1:30", "1:30.5", "90", "90s"
        let seconds = if let Some((minutes, seconds)) = trimmed.split_once(':') {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            minutes as f64 * 60.0 + seconds
        } else {
            let seconds: f64 = trimmed
                .trim_end_matches('s')
                .parse()
                .map_err(|_| invalid())?;
            if seconds < 0.0 || !seconds.is_finite() {
                return Err(invalid());
            }
            seconds
        };

        Ok(Duration::from_secs_f64(seconds))
    }

    /// Format duration for display
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn required<'a>(args: &[&'a str], command: &str, argument: &str) -> Result<&'a str, ParseError> {
    args.get(1).copied().ok_or_else(|| ParseError::MissingArgument {
        command: command.to_string(),
        argument: argument.to_string(),
    })
}

fn parse_number(value: &str, argument: &str, expected: &str) -> Result<usize, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidArgument {
        argument: argument.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    })
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Help requested")]
    HelpRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playback_commands() {
        assert_eq!(CliApp::parse_command("play").unwrap(), Commands::Play { index: None });
        assert_eq!(
            CliApp::parse_command("play 3").unwrap(),
            Commands::Play { index: Some(2) }
        );
        assert_eq!(CliApp::parse_command("  pause ").unwrap(), Commands::Pause);
        assert_eq!(CliApp::parse_command("toggle").unwrap(), Commands::Toggle);
        assert_eq!(CliApp::parse_command("skip").unwrap(), Commands::Next);
        assert_eq!(CliApp::parse_command("quit").unwrap(), Commands::Quit);
        assert_eq!(CliApp::parse_command("exit").unwrap(), Commands::Quit);
    }

    #[test]
    fn test_parse_play_rejects_bad_index() {
        let result = CliApp::parse_command("play first");
        assert!(matches!(result, Err(ParseError::InvalidArgument { .. })));
        let result = CliApp::parse_command("play 0");
        assert!(matches!(result, Err(ParseError::InvalidArgument { .. })));
    }

    #[test]
    fn test_parse_seek() {
        assert_eq!(
            CliApp::parse_command("seek 1:30").unwrap(),
            Commands::Seek {
                position: Duration::from_secs(90)
            }
        );
        assert!(matches!(
            CliApp::parse_command("seek"),
            Err(ParseError::MissingArgument { .. })
        ));
        assert!(matches!(
            CliApp::parse_command("seek soon"),
            Err(ParseError::InvalidTimeFormat { .. })
        ));
    }

    #[test]
    fn test_parse_add_joins_path() {
        assert_eq!(
            CliApp::parse_command("add /music/Some Album").unwrap(),
            Commands::Add {
                path: PathBuf::from("/music/Some Album")
            }
        );
        assert!(matches!(
            CliApp::parse_command("add"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!(
            CliApp::parse_command("crossfade 2.5").unwrap(),
            Commands::Crossfade { seconds: 2.5 }
        );
        assert!(CliApp::parse_command("crossfade -1").is_err());
        assert_eq!(
            CliApp::parse_command("volume 40").unwrap(),
            Commands::Volume { level: 40 }
        );
        assert!(CliApp::parse_command("volume 140").is_err());
        assert!(CliApp::parse_command("volume loud").is_err());
        assert_eq!(
            CliApp::parse_command("replaygain album").unwrap(),
            Commands::ReplayGain {
                mode: ReplayGainMode::Album
            }
        );
        assert!(CliApp::parse_command("replaygain loud").is_err());
    }

    #[test]
    fn test_parse_events_default_count() {
        assert_eq!(
            CliApp::parse_command("events").unwrap(),
            Commands::Events {
                count: DEFAULT_EVENT_COUNT
            }
        );
        assert_eq!(
            CliApp::parse_command("events 3").unwrap(),
            Commands::Events { count: 3 }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(CliApp::parse_command("   "), Err(ParseError::EmptyCommand)));
        assert!(matches!(CliApp::parse_command("help"), Err(ParseError::HelpRequested)));
        match CliApp::parse_command("rewind") {
            Err(ParseError::UnknownCommand { command }) => assert_eq!(command, "rewind"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(CliApp::parse_time("90").unwrap(), Duration::from_secs(90));
        assert_eq!(CliApp::parse_time("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(CliApp::parse_time("2:05").unwrap(), Duration::from_secs(125));
        assert_eq!(
            CliApp::parse_time("0:01.5").unwrap(),
            Duration::from_millis(1500)
        );
        assert!(CliApp::parse_time("1:75").is_err());
        assert!(CliApp::parse_time("1:2:3").is_err());
        assert!(CliApp::parse_time("-4").is_err());
        assert!(CliApp::parse_time("").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(CliApp::format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(CliApp::format_duration(Duration::from_secs(125)), "02:05");
        assert_eq!(CliApp::format_duration(Duration::from_millis(59_900)), "00:59");
    }

    #[test]
    fn test_args_parse() {
        let args = CliApp::try_parse_from([
            "musicd",
            "--output",
            "null",
            "-x",
            "1.5",
            "--buffer-chunks",
            "64",
            "/music/a.flac",
            "/music/b.flac",
        ])
        .unwrap();
        assert_eq!(args.output, Some(OutputTarget::Null));
        assert_eq!(args.crossfade, Some(1.5));
        assert_eq!(args.buffer_chunks, Some(64));
        assert_eq!(args.files.len(), 2);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_expand_path_tilde_home() {
        let expanded = CliApp::expand_path("~/Documents/Music");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("Documents/Music"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(CliApp::expand_path(path).to_string_lossy(), path);
        let path = "relative/path/to/file";
        assert_eq!(CliApp::expand_path(path).to_string_lossy(), path);
    }
}
