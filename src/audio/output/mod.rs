//! Output side of the pipeline: the shared [`OutputBuffer`] handle and the
//! output thread that drains the chunk ring into the audio device.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::action::ActionChannel;
use crate::audio::chunk::Chunk;
use crate::audio::ring::RingMonitor;
use crate::audio::sequence::SequenceCoordinator;
use crate::audio::sync::SyncSignal;
use crate::config::ReplayGainMode;
use crate::models::{AudioFormat, Song};

pub mod crossfade;
pub mod player;

pub use player::OutputWorker;

/// Output thread states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Stop,
    Play,
    Pause,
    /// Between `SeekStart` and `SeekFinish`
    Seek,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMode {
    Set,
    Unset,
    Flip,
}

/// Requests the output thread takes at the top of its loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputAction {
    Play,
    Pause(PauseMode),
    /// Excise every buffered chunk of this sequence
    Drop(u8),
    SeekStart,
    /// Position reached by the decoder, or `None` to roll back
    SeekFinish(Option<f32>),
    /// Discard buffered audio, close the device, go to `Stop`
    Reset,
    Stop,
    Quit,
}

/// What is audible right now
#[derive(Debug, Clone, Default)]
pub struct OutputStatus {
    pub song: Option<Song>,
    pub elapsed: f32,
    pub total: f32,
    pub bit_rate: u32,
    pub format: Option<AudioFormat>,
}

/// Shared handle to the output thread's state machine
#[derive(Debug)]
pub struct OutputBuffer {
    state: Mutex<OutputState>,
    actions: ActionChannel<OutputAction, ()>,
    wake: Arc<SyncSignal<()>>,
    ring: RingMonitor<Chunk>,
    sequence: Arc<SequenceCoordinator>,
    status: Mutex<OutputStatus>,
    crossfade_bits: AtomicU32,
    crossfading: AtomicBool,
    volume: AtomicU8,
    replay_gain: Mutex<ReplayGainMode>,
    bpp_max: usize,
    bpp_current: AtomicUsize,
}

impl OutputBuffer {
    pub fn new(ring: RingMonitor<Chunk>, sequence: Arc<SequenceCoordinator>, bpp_max: usize) -> Self {
        let wake = Arc::new(SyncSignal::new(()));
        let bpp_max = bpp_max.min(ring.capacity().saturating_sub(1));
        Self {
            state: Mutex::new(OutputState::Stop),
            actions: ActionChannel::new("output", Arc::clone(&wake)),
            wake,
            ring,
            sequence,
            status: Mutex::new(OutputStatus::default()),
            crossfade_bits: AtomicU32::new(0f32.to_bits()),
            crossfading: AtomicBool::new(false),
            volume: AtomicU8::new(100),
            replay_gain: Mutex::new(ReplayGainMode::Off),
            bpp_max,
            bpp_current: AtomicUsize::new(bpp_max),
        }
    }

    pub fn play(&self) {
        self.actions.trigger(OutputAction::Play);
    }

    pub fn pause(&self, mode: PauseMode) {
        self.actions.trigger(OutputAction::Pause(mode));
    }

    /// Discard buffered audio of `sequence`, e.g. when skipping a song
    pub fn drop_sequence(&self, sequence: u8) {
        self.actions.trigger(OutputAction::Drop(sequence));
    }

    /// Called by the decode thread before it seeks
    pub fn seek_start(&self) {
        self.actions.trigger(OutputAction::SeekStart);
    }

    /// Called by the decode thread after it seeked (or failed to)
    pub fn seek_finish(&self, position: Option<f32>) {
        self.actions.trigger(OutputAction::SeekFinish(position));
    }

    pub fn reset(&self) {
        self.actions.trigger(OutputAction::Reset);
    }

    pub fn stop(&self) {
        self.actions.trigger(OutputAction::Stop);
    }

    pub fn quit(&self) {
        self.actions.trigger(OutputAction::Quit);
    }

    pub fn state(&self) -> OutputState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: OutputState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn actions(&self) -> &ActionChannel<OutputAction, ()> {
        &self.actions
    }

    pub(crate) fn wake(&self) -> &SyncSignal<()> {
        &self.wake
    }

    /// New chunks are available. Never blocks.
    pub fn notify_data(&self) {
        self.wake.try_signal();
    }

    /// New chunks are available; blocks until the wakeup is delivered
    pub fn notify_data_sync(&self) {
        self.wake.signal_sync();
    }

    pub fn status(&self) -> OutputStatus {
        self.status_mut().clone()
    }

    pub(crate) fn status_mut(&self) -> MutexGuard<'_, OutputStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn elapsed(&self) -> f32 {
        self.status_mut().elapsed
    }

    pub fn total_time(&self) -> f32 {
        self.status_mut().total
    }

    pub fn bit_rate(&self) -> u32 {
        self.status_mut().bit_rate
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.status_mut().format
    }

    pub fn crossfade(&self) -> f32 {
        f32::from_bits(self.crossfade_bits.load(Ordering::Relaxed))
    }

    pub fn set_crossfade(&self, seconds: f32) {
        self.crossfade_bits
            .store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Whether a cross-fade is being mixed right now
    pub fn is_crossfading(&self) -> bool {
        self.crossfading.load(Ordering::Acquire)
    }

    pub(crate) fn set_crossfading(&self, active: bool) {
        self.crossfading.store(active, Ordering::Release);
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, percent: u8) {
        self.volume.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn replay_gain_mode(&self) -> ReplayGainMode {
        *self.replay_gain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        *self.replay_gain.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn buffered_chunks(&self) -> usize {
        self.ring.occupied()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn sequence(&self) -> &Arc<SequenceCoordinator> {
        &self.sequence
    }

    /// Chunks that must be buffered before playback (re)starts
    pub fn bpp_max(&self) -> usize {
        self.bpp_max
    }

    /// Chunks still awaited before playback starts; 0 once playing
    pub fn bpp_current(&self) -> usize {
        self.bpp_current.load(Ordering::Acquire)
    }

    pub(crate) fn set_bpp_current(&self, chunks: usize) {
        self.bpp_current.store(chunks, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(capacity: usize, bpp: usize) -> OutputBuffer {
        let (ring, _writer, _reader) = crate::audio::ring::split::<Chunk>(capacity);
        OutputBuffer::new(ring, Arc::new(SequenceCoordinator::new()), bpp)
    }

    #[test]
    fn test_initial_state() {
        let ob = output(16, 4);
        assert_eq!(ob.state(), OutputState::Stop);
        assert_eq!(ob.bpp_max(), 4);
        assert_eq!(ob.bpp_current(), 4);
        assert_eq!(ob.capacity(), 16);
        assert_eq!(ob.buffered_chunks(), 0);
        assert!(!ob.is_crossfading());
    }

    #[test]
    fn test_prebuffer_is_below_capacity() {
        let ob = output(16, 100);
        assert_eq!(ob.bpp_max(), 15);
    }

    #[test]
    fn test_settings_are_clamped() {
        let ob = output(16, 0);
        ob.set_volume(250);
        assert_eq!(ob.volume(), 100);
        ob.set_crossfade(-3.0);
        assert_eq!(ob.crossfade(), 0.0);
        ob.set_crossfade(2.5);
        assert_eq!(ob.crossfade(), 2.5);
    }
}
