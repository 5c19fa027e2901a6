use crate::models::{AudioFormat, ReplayGainInfo, Song};

/// Bytes of PCM per chunk. Divides evenly into frames of the common
/// 8/16/24/32-bit mono and stereo layouts.
pub const CHUNK_SIZE: usize = 2016;

/// Capacity of the per-pass metadata side channel
pub const SONG_INFO_SLOTS: usize = 8;

/// Unit of PCM handed from the decode thread to the output thread.
///
/// Plain data: consuming a chunk never frees anything, which is what lets
/// the output side roll back a cancelled flush.
#[derive(Clone, Copy)]
pub struct Chunk {
    data: [u8; CHUNK_SIZE],
    /// Valid bytes in `data`; 0 marks the chunk as empty and skippable
    pub length: usize,
    pub bit_rate: u32,
    /// Stream position in seconds at which this chunk was decoded
    pub time: f32,
    pub sequence: u8,
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            data: [0u8; CHUNK_SIZE],
            length: 0,
            bit_rate: 0,
            time: 0.0,
            sequence: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The valid PCM bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// Bytes still free at the end of the chunk
    pub fn space(&self) -> usize {
        CHUNK_SIZE - self.length
    }

    /// Copy as much of `pcm` as fits, returning the number of bytes taken
    pub fn append(&mut self, pcm: &[u8]) -> usize {
        let take = pcm.len().min(self.space());
        self.data[self.length..self.length + take].copy_from_slice(&pcm[..take]);
        self.length += take;
        take
    }

    /// Extend with silence up to `length` bytes
    pub fn pad_to(&mut self, length: usize) {
        let length = length.min(CHUNK_SIZE);
        if length > self.length {
            self.data[self.length..length].fill(0);
            self.length = length;
        }
    }

    /// Reset to an empty chunk tagged for `sequence`
    pub fn reset(&mut self, sequence: u8) {
        self.length = 0;
        self.bit_rate = 0;
        self.time = 0.0;
        self.sequence = sequence;
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("sequence", &self.sequence)
            .field("length", &self.length)
            .field("time", &self.time)
            .field("bit_rate", &self.bit_rate)
            .finish()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// What the output thread needs to know about a decode pass before its
/// first chunk becomes audible
#[derive(Debug, Clone, PartialEq)]
pub struct SongInfo {
    pub sequence: u8,
    pub song: Song,
    pub format: AudioFormat,
    pub total_time: f32,
    pub replay_gain: Option<ReplayGainInfo>,
}
