//! Decoder side of the pipeline: the shared [`DecoderControl`] handle and
//! the decode thread that runs format plugins into the chunk ring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::action::ActionChannel;
use crate::audio::sequence::SequenceCoordinator;
use crate::audio::sync::SyncSignal;
use crate::models::{AudioFormat, Song, SongId};

mod context;
pub mod worker;

pub use worker::DecodeWorker;

/// Songs remembered by decode pass sequence
const RECENT_PASSES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Stopped,
    Decoding,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecoderAction {
    /// Decode the playlist's queued song
    Start,
    /// Seek `song` to `target` seconds
    Seek { song: SongId, target: f32 },
    Stop,
    Quit,
}

/// Outcome of a seek request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekResult {
    /// Position actually reached, in seconds
    Done(f32),
    Failed,
    /// The decoder is not on the requested song
    Mismatch,
}

#[derive(Debug, Default)]
struct Stream {
    song: Option<Song>,
    format: Option<AudioFormat>,
    total_time: f32,
}

/// Shared handle to the decode thread's state machine
#[derive(Debug)]
pub struct DecoderControl {
    state: Mutex<DecoderState>,
    actions: ActionChannel<DecoderAction, SeekResult>,
    wake: Arc<SyncSignal<()>>,
    sequence: Arc<SequenceCoordinator>,
    stream: Mutex<Stream>,
    recent: Mutex<VecDeque<(u8, Song)>>,
}

impl DecoderControl {
    pub fn new(sequence: Arc<SequenceCoordinator>) -> Self {
        let wake = Arc::new(SyncSignal::new(()));
        Self {
            state: Mutex::new(DecoderState::Stopped),
            actions: ActionChannel::new("decoder", Arc::clone(&wake)),
            wake,
            sequence,
            stream: Mutex::new(Stream::default()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_PASSES)),
        }
    }

    /// Start decoding the queued song. Returns once decoding has begun, or
    /// right away when nothing is queued.
    pub fn start(&self) {
        self.actions.trigger(DecoderAction::Start);
    }

    /// Seek `song` to `target` seconds
    pub fn seek(&self, song: SongId, target: f32) -> SeekResult {
        self.actions
            .trigger(DecoderAction::Seek { song, target })
            .unwrap_or(SeekResult::Failed)
    }

    /// Abandon the current pass without advancing the playlist
    pub fn stop(&self) {
        self.actions.trigger(DecoderAction::Stop);
    }

    pub fn quit(&self) {
        self.actions.trigger(DecoderAction::Quit);
    }

    pub fn state(&self) -> DecoderState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == DecoderState::Stopped
    }

    pub(crate) fn set_state(&self, state: DecoderState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        if state != DecoderState::Decoding {
            *self.stream() = Stream::default();
        }
    }

    /// The song being decoded
    pub fn current_song(&self) -> Option<Song> {
        self.stream().song.clone()
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.stream().format
    }

    /// Duration of the song being decoded, 0 when unknown
    pub fn total_time(&self) -> f32 {
        self.stream().total_time
    }

    /// The song a recent decode pass was for
    pub fn song_for_sequence(&self, sequence: u8) -> Option<Song> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(tag, _)| *tag == sequence)
            .map(|(_, song)| song.clone())
    }

    pub fn sequence(&self) -> &Arc<SequenceCoordinator> {
        &self.sequence
    }

    /// Chunk space was freed. Never blocks.
    pub fn notify_space(&self) {
        self.wake.try_signal();
    }

    pub(crate) fn actions(&self) -> &ActionChannel<DecoderAction, SeekResult> {
        &self.actions
    }

    pub(crate) fn wake(&self) -> &SyncSignal<()> {
        &self.wake
    }

    fn stream(&self) -> MutexGuard<'_, Stream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a decode pass for `song`, returning its sequence tag
    pub(crate) fn begin(&self, song: &Song) -> u8 {
        let sequence = self.sequence.advance_decoder();
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == RECENT_PASSES {
                recent.pop_front();
            }
            recent.push_back((sequence, song.clone()));
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = DecoderState::Decoding;
        *self.stream() = Stream {
            song: Some(song.clone()),
            format: None,
            total_time: 0.0,
        };
        sequence
    }

    pub(crate) fn set_stream_format(&self, format: AudioFormat, total_time: f32) {
        let mut stream = self.stream();
        stream.format = Some(format);
        stream.total_time = total_time;
    }
}
