//! Format decoder plugins and the callback API they decode into.

use std::path::Path;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::models::{AudioFormat, ReplayGainInfo, Song, Tag};

pub mod symphonia_decoder;

pub use symphonia_decoder::SymphoniaDecoder;

/// What `push_chunk` tells the plugin to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderSignal {
    /// Keep decoding
    None,
    /// Abandon the stream and return
    Stop,
    /// A seek is waiting; call `is_seek_requested`
    SeekRequested,
}

/// The playback core as seen from inside a plugin's `decode`.
///
/// A plugin calls `start` once, then alternates between handling
/// `is_seek_requested` and pushing PCM until the stream ends or it is told
/// to stop.
pub trait DecoderContext {
    /// Announce the PCM format, the stream duration in seconds (0 when
    /// unknown) and any replay gain tags
    fn start(&mut self, format: AudioFormat, total_time: f32, replay_gain: Option<ReplayGainInfo>);

    /// Hand over interleaved PCM in the announced format. `time` is the
    /// stream position of its first frame, `bit_rate` in kbit/s.
    fn push_chunk(&mut self, pcm: &[u8], time: f32, bit_rate: u32) -> DecoderSignal;

    /// Whether a long-running operation should give up early
    fn should_interrupt(&mut self) -> bool;

    /// Target position in seconds of a pending seek
    fn is_seek_requested(&mut self) -> Option<f32>;

    /// Report the outcome of the pending seek: the position actually
    /// reached, or `None` if the stream could not seek
    fn seek_complete(&mut self, position: Option<f32>);
}

/// A decoder for one family of audio formats
pub trait FormatDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap check whether this plugin wants `song`
    fn try_decode(&self, song: &Song) -> bool;

    /// Decode `song` into `context` until end of stream or until told to stop
    fn decode(&self, context: &mut dyn DecoderContext, song: &Song) -> Result<(), DecodeError>;

    /// Read tags without decoding audio
    fn tag_read(&self, path: &Path) -> Option<Tag>;
}

/// Ordered plugin list; the first plugin accepting a song decodes it
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn FormatDecoder>>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in symphonia plugin
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SymphoniaDecoder::new()));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn FormatDecoder>) {
        self.plugins.push(plugin);
    }

    pub fn find(&self, song: &Song) -> Option<Arc<dyn FormatDecoder>> {
        self.plugins
            .iter()
            .find(|plugin| plugin.try_decode(song))
            .cloned()
    }

    /// Whether some plugin accepts the file at `path`
    pub fn supports(&self, path: &Path) -> bool {
        let probe = Song::new(0, path.to_path_buf());
        self.find(&probe).is_some()
    }

    pub fn tag_read(&self, path: &Path) -> Option<Tag> {
        let probe = Song::new(0, path.to_path_buf());
        self.find(&probe)?.tag_read(path)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
