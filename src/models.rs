use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a song inside the play queue
pub type SongId = u64;

/// A song the decoder can be asked to play
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub path: PathBuf,
    pub tag: Option<Tag>,
}

impl Song {
    pub fn new(id: SongId, path: PathBuf) -> Self {
        Self { id, path, tag: None }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Get the display name for this song (title or filename)
    pub fn display_name(&self) -> String {
        self.tag
            .as_ref()
            .and_then(|tag| tag.title.clone())
            .unwrap_or_else(|| {
                self.path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("Unknown")
                    .to_string()
            })
    }

    /// Get the artist name or "Unknown Artist"
    pub fn artist_name(&self) -> String {
        self.tag
            .as_ref()
            .and_then(|tag| tag.artist.clone())
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    /// Duration reported by the tag, if any
    pub fn duration(&self) -> Option<f32> {
        self.tag.as_ref().and_then(|tag| tag.duration)
    }
}

/// Metadata read from a song without decoding it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Tag {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f32>,
}

impl Tag {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.duration.is_none()
    }
}

/// Raw PCM sample encodings the pipeline carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 8-bit
    S8,
    /// Signed 16-bit little-endian
    S16,
    /// Signed 24-bit little-endian, packed in 3 bytes
    S24,
    /// Signed 32-bit little-endian
    S32,
    /// 32-bit float little-endian
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24 => 3,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }

    pub fn bits(&self) -> u16 {
        (self.bytes() * 8) as u16
    }

    /// Pick the integer format able to carry `bits` bits per sample
    pub fn for_bits(bits: u32) -> Option<Self> {
        match bits {
            1..=8 => Some(SampleFormat::S8),
            9..=16 => Some(SampleFormat::S16),
            17..=24 => Some(SampleFormat::S24),
            25..=32 => Some(SampleFormat::S32),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::S8 => "s8",
            SampleFormat::S16 => "s16le",
            SampleFormat::S24 => "s24le",
            SampleFormat::S32 => "s32le",
            SampleFormat::F32 => "f32le",
        }
    }
}

/// Audio format information
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, sample_format: SampleFormat, channels: u16) -> Self {
        Self {
            sample_rate,
            sample_format,
            channels,
        }
    }

    /// CD quality: 44.1 kHz, 16-bit, stereo
    pub fn cd() -> Self {
        Self::new(44_100, SampleFormat::S16, 2)
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Size of one interleaved frame in bytes
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes() * self.channels as usize
    }

    /// Bytes of PCM per second of audio
    pub fn byte_rate(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }

    /// Playback duration of `bytes` bytes of PCM in seconds
    pub fn duration_of(&self, bytes: usize) -> f32 {
        let rate = self.byte_rate();
        if rate == 0 {
            0.0
        } else {
            bytes as f32 / rate as f32
        }
    }

    /// Get a human-readable format description
    pub fn format_description(&self) -> String {
        format!(
            "{}-bit/{} Hz - {} channel{}",
            self.sample_format.bits(),
            self.sample_rate,
            self.channels,
            if self.channels == 1 { "" } else { "s" }
        )
    }
}

/// Replay gain values attached to a decode pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ReplayGainInfo {
    pub track_gain: f32,
    pub track_peak: f32,
    pub album_gain: f32,
    pub album_peak: f32,
}

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of everything the command layer may show
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub song: Option<Song>,
    pub queue_position: Option<usize>,
    pub queue_length: usize,
    pub elapsed: f32,
    pub total: f32,
    pub bit_rate: u32,
    pub audio_format: Option<AudioFormat>,
    pub crossfade: f32,
    pub volume: u8,
    pub buffered_chunks: usize,
    pub buffer_capacity: usize,
    pub error: Option<String>,
}

impl PlayerStatus {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            song: None,
            queue_position: None,
            queue_length: 0,
            elapsed: 0.0,
            total: 0.0,
            bit_rate: 0,
            audio_format: None,
            crossfade: 0.0,
            volume: 100,
            buffered_chunks: 0,
            buffer_capacity: 0,
            error: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, PlaybackState::Stopped)
    }

    /// Get progress as a fraction (0.0 to 1.0)
    pub fn progress(&self) -> f32 {
        if self.total > 0.0 {
            (self.elapsed / self.total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Buffer occupancy as a fraction (0.0 to 1.0)
    pub fn buffer_fill(&self) -> f32 {
        if self.buffer_capacity == 0 {
            0.0
        } else {
            self.buffered_chunks as f32 / self.buffer_capacity as f32
        }
    }
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self::new()
    }
}
