use std::time::Duration;

use crate::error::{ErrorSeverity, LatchedError, PlayerError};
use crate::logging::PlayerEvent;
use crate::models::{PlaybackState, PlayerStatus, Song};

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Display full player status: song, position, format and buffer
    pub fn display_full_status(status: &PlayerStatus) {
        println!("┌─ Player Status ─────────────────────────────────────────┐");
        println!("│ {}", Self::format_playback_state(status.state));

        match &status.song {
            Some(song) => {
                println!("│ Song: {}", Self::truncate(&song.display_name(), 50));
                println!("│ Artist: {}", Self::truncate(&song.artist_name(), 48));
                if let Some(position) = status.queue_position {
                    println!("│ Queue: {}/{}", position + 1, status.queue_length);
                }
                println!(
                    "│ [{}] {}/{}",
                    Self::create_progress_bar(status.progress(), 30),
                    Self::format_seconds(status.elapsed),
                    Self::format_seconds(status.total)
                );
                if let Some(format) = &status.audio_format {
                    println!(
                        "│ Format: {} ({})",
                        format.format_description(),
                        Self::channel_description(format.channels)
                    );
                }
                if status.bit_rate > 0 {
                    println!("│ Bitrate: {} kbps", status.bit_rate);
                }
            }
            None => {
                println!("│ No song playing");
                println!("│ Queue: {} songs", status.queue_length);
            }
        }

        println!("│");
        println!(
            "│ Volume: {}% | Cross-fade: {:.1}s",
            status.volume, status.crossfade
        );
        println!(
            "│ Buffer: {}/{} chunks ({:.0}%)",
            status.buffered_chunks,
            status.buffer_capacity,
            status.buffer_fill() * 100.0
        );
        if let Some(error) = &status.error {
            println!("│ Error: {}", Self::truncate(error, 50));
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// One-line status, printed whenever the audible song changes
    pub fn compact_status(status: &PlayerStatus) -> String {
        match &status.song {
            Some(song) => format!(
                "{} | {} - {} | {}/{}",
                status.state.as_str(),
                Self::truncate(&song.artist_name(), 25),
                Self::truncate(&song.display_name(), 30),
                Self::format_seconds(status.elapsed),
                Self::format_seconds(status.total)
            ),
            None => format!("{} | No song playing", status.state.as_str()),
        }
    }

    /// List the queue, marking the audible song
    pub fn display_queue(songs: &[Song], now_playing: Option<usize>) {
        if songs.is_empty() {
            println!("Queue is empty");
            return;
        }
        for (index, song) in songs.iter().enumerate() {
            let marker = if Some(index) == now_playing { ">" } else { " " };
            let duration = song
                .duration()
                .map(Self::format_seconds)
                .unwrap_or_else(|| "--:--".to_string());
            println!(
                "{} {:>3}. {} - {} [{}]",
                marker,
                index + 1,
                Self::truncate(&song.artist_name(), 25),
                Self::truncate(&song.display_name(), 40),
                duration
            );
        }
    }

    pub fn display_events(events: &[PlayerEvent]) {
        if events.is_empty() {
            println!("No events recorded");
        }
        for event in events {
            println!("{}", event);
        }
    }

    /// Display a latched player error
    pub fn display_latched_error(error: Option<&LatchedError>) {
        match error {
            Some(error) => eprintln!("[Error] {}", error),
            None => println!("No player error"),
        }
    }

    /// Display a command error with its severity
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "✗✗",
        };
        eprintln!("{} [{}] {}", icon, severity.as_str(), error.user_message());
    }

    /// Format duration as MM:SS or HH:MM:SS for longer songs
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    /// [`Self::format_duration`] for a position in seconds
    pub fn format_seconds(seconds: f32) -> String {
        if seconds.is_finite() && seconds > 0.0 {
            Self::format_duration(Duration::from_secs_f32(seconds))
        } else {
            Self::format_duration(Duration::ZERO)
        }
    }

    /// Get channel description from channel count
    pub fn channel_description(channels: u16) -> &'static str {
        match channels {
            1 => "Mono",
            2 => "Stereo",
            3 => "2.1",
            4 => "Quad",
            5 => "4.1",
            6 => "5.1 Surround",
            7 => "6.1 Surround",
            8 => "7.1 Surround",
            _ => "Multi-channel",
        }
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }

    /// Create a progress bar string
    pub fn create_progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    pub fn format_playback_state(state: PlaybackState) -> String {
        match state {
            PlaybackState::Playing => "▶ Playing".to_string(),
            PlaybackState::Paused => "⏸ Paused".to_string(),
            PlaybackState::Stopped => "⏹ Stopped".to_string(),
        }
    }
}
