//! The player facade: owns the decode and output threads and turns user
//! commands (play, stop, skip, seek) into their request handshakes.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use crate::audio::chunk::{Chunk, SongInfo, SONG_INFO_SLOTS};
use crate::audio::decode::{DecodeWorker, DecoderControl, SeekResult};
use crate::audio::decoders::PluginRegistry;
use crate::audio::device::DeviceFactory;
use crate::audio::output::{OutputBuffer, OutputState, OutputWorker, PauseMode};
use crate::audio::ring;
use crate::audio::sequence::SequenceCoordinator;
use crate::audio::Pipeline;
use crate::config::{PlayerConfig, ReplayGainMode};
use crate::error::{DecodeError, ErrorLatch, LatchedError, PlayerError, QueueError};
use crate::logging::EventLog;
use crate::models::{PlaybackState, PlayerStatus, Song};
use crate::queue::{PlayQueue, SongQueue};

/// Main-thread facade over the decode and output threads.
///
/// Every method is meant to be called from a single command thread.
pub struct Engine {
    pipeline: Pipeline,
    queue: Arc<PlayQueue>,
    decoder_thread: Option<JoinHandle<()>>,
    output_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build the shared state and spawn the `decoder` and `output` threads
    pub fn new(
        config: &PlayerConfig,
        device: DeviceFactory,
        registry: PluginRegistry,
        queue: Arc<PlayQueue>,
    ) -> Result<Self, PlayerError> {
        let (chunks, chunk_writer, chunk_reader) =
            ring::split::<Chunk>(config.effective_buffer_chunks());
        let (_, info_writer, info_reader) = ring::split::<SongInfo>(SONG_INFO_SLOTS);

        let sequence = Arc::new(SequenceCoordinator::new());
        let dc = Arc::new(DecoderControl::new(Arc::clone(&sequence)));
        let ob = Arc::new(OutputBuffer::new(chunks, sequence, config.prebuffer_chunks()));
        ob.set_crossfade(config.crossfade_seconds);
        ob.set_volume(config.software_volume);
        ob.set_replay_gain_mode(config.replay_gain);

        let pipeline = Pipeline {
            dc,
            ob,
            queue: Arc::clone(&queue) as Arc<dyn SongQueue>,
            errors: Arc::new(ErrorLatch::new()),
            events: Arc::new(EventLog::new()),
        };

        let decoder_thread = DecodeWorker::new(pipeline.clone(), registry, chunk_writer, info_writer)
            .spawn()
            .map_err(|e| PlayerError::System(format!("Failed to create decoder thread: {}", e)))?;
        let output_thread = OutputWorker::spawn(pipeline.clone(), chunk_reader, info_reader, device)
            .map_err(|e| PlayerError::System(format!("Failed to create output thread: {}", e)))?;

        info!(
            "Engine started: {} chunk buffer, prebuffer {} chunks",
            pipeline.ob.capacity(),
            pipeline.ob.bpp_max()
        );

        Ok(Self {
            pipeline,
            queue,
            decoder_thread: Some(decoder_thread),
            output_thread: Some(output_thread),
        })
    }

    /// Start or resume playback of the queue
    pub fn play(&self) -> Result<(), PlayerError> {
        if self.queue.is_empty() {
            return Err(QueueError::EmptyQueue.into());
        }
        let dc = &self.pipeline.dc;
        if dc.is_stopped() && self.queue.decode_position().is_none() {
            // Finished playlist: start over
            self.queue.set_decode_position(0)?;
        }

        self.pipeline.errors.clear();
        self.queue.set_playing(true);
        self.pipeline.ob.play();
        if dc.is_stopped() {
            dc.start();
        }
        Ok(())
    }

    /// Play the song at `index` of the queue
    pub fn play_index(&self, index: usize) -> Result<(), PlayerError> {
        if index >= self.queue.len() {
            return Err(QueueError::InvalidIndex { index }.into());
        }
        self.stop();
        self.queue.set_decode_position(index)?;
        self.play()
    }

    /// Stop playback and discard buffered audio. The audible song becomes
    /// the next one decoded.
    pub fn stop(&self) {
        let audible = self.audible_index();

        self.queue.set_playing(false);
        self.pipeline.dc.stop();
        self.pipeline.ob.reset();

        if let Some(index) = audible {
            let _ = self.queue.set_decode_position(index);
        }
        self.queue.set_now_playing(None);
    }

    pub fn pause(&self, mode: PauseMode) {
        self.pipeline.ob.pause(mode);
    }

    /// Skip the audible song
    pub fn next(&self) {
        let dc = &self.pipeline.dc;
        let sequence = self.pipeline.ob.sequence();
        let audible = sequence.player();

        if sequence.in_step() && !dc.is_stopped() {
            // The decoder is still on the audible song
            dc.stop();
            self.queue.advance();
        }
        self.pipeline.ob.drop_sequence(audible);

        if dc.is_stopped() && self.queue.is_playing() {
            dc.start();
        }
        debug!("Skipped sequence {}", audible);
    }

    /// Restart the decoder after songs were appended behind a finished pass
    pub fn resume_decoding(&self) {
        let dc = &self.pipeline.dc;
        let audible = matches!(self.pipeline.ob.state(), OutputState::Play | OutputState::Pause);
        if audible && dc.is_stopped() && self.queue.is_playing() {
            debug!("Decoding appended songs");
            dc.start();
        }
    }

    /// Seek the audible song to `seconds`, returning the position reached
    pub fn seek(&self, seconds: f32) -> Result<f32, PlayerError> {
        let Some(song) = self.pipeline.ob.status().song else {
            return Err(QueueError::EmptyQueue.into());
        };
        let target = seconds.max(0.0);

        match self.pipeline.dc.seek(song.id, target) {
            SeekResult::Done(position) => Ok(position),
            SeekResult::Failed => Err(not_seekable(&song)),
            SeekResult::Mismatch => self.restart_at(&song, target),
        }
    }

    /// The decoder already left `song`: decode it again from `target`
    fn restart_at(&self, song: &Song, target: f32) -> Result<f32, PlayerError> {
        debug!("Restarting {} at {:.2}s", song.display_name(), target);
        let index = self
            .queue
            .list()
            .iter()
            .position(|queued| queued.id == song.id)
            .ok_or(QueueError::EmptyQueue)?;
        let paused = self.pipeline.ob.state() == OutputState::Pause;

        self.pipeline.dc.stop();
        self.pipeline.ob.reset();
        self.queue.set_decode_position(index)?;
        self.queue.set_playing(true);
        self.pipeline.ob.play();
        if paused {
            self.pipeline.ob.pause(PauseMode::Set);
        }

        match self.pipeline.dc.seek(song.id, target) {
            SeekResult::Done(position) => Ok(position),
            result => {
                warn!("Seek after restart of {} gave {:?}", song.display_name(), result);
                Err(not_seekable(song))
            }
        }
    }

    pub fn set_crossfade(&self, seconds: f32) {
        self.pipeline.ob.set_crossfade(seconds);
    }

    pub fn set_volume(&self, percent: u8) {
        self.pipeline.ob.set_volume(percent);
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        self.pipeline.ob.set_replay_gain_mode(mode);
    }

    /// Record the audible song as "now playing" in the queue
    pub fn sync_now_playing(&self) -> Option<Song> {
        let song = self.pipeline.ob.status().song.or_else(|| {
            self.pipeline
                .dc
                .song_for_sequence(self.pipeline.ob.sequence().player())
        });
        let song = song.filter(|_| self.pipeline.ob.state() != OutputState::Stop);
        self.queue.set_now_playing(song.as_ref().map(|song| song.id));
        song
    }

    /// Block until the audible song changes or `timeout` passes
    pub fn wait_position_change(&self, seen: u64, timeout: Duration) -> u64 {
        self.queue.wait_position_change(seen, timeout)
    }

    pub fn status(&self) -> PlayerStatus {
        let ob = &self.pipeline.ob;
        let output = ob.status();
        let state = match ob.state() {
            OutputState::Play | OutputState::Seek => PlaybackState::Playing,
            OutputState::Pause => PlaybackState::Paused,
            OutputState::Stop | OutputState::Quit => PlaybackState::Stopped,
        };
        let queue_position = output.song.as_ref().and_then(|song| {
            self.queue
                .list()
                .iter()
                .position(|queued| queued.id == song.id)
        });

        PlayerStatus {
            state,
            song: output.song,
            queue_position,
            queue_length: self.queue.len(),
            elapsed: output.elapsed,
            total: output.total,
            bit_rate: output.bit_rate,
            audio_format: output.format,
            crossfade: ob.crossfade(),
            volume: ob.volume(),
            buffered_chunks: ob.buffered_chunks(),
            buffer_capacity: ob.capacity(),
            error: self.pipeline.errors.peek().map(|error| error.to_string()),
        }
    }

    /// Acknowledge and return the latched player error
    pub fn take_error(&self) -> Option<LatchedError> {
        self.pipeline.errors.take()
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.pipeline.events
    }

    pub fn queue(&self) -> &Arc<PlayQueue> {
        &self.queue
    }

    pub fn output(&self) -> &Arc<OutputBuffer> {
        &self.pipeline.ob
    }

    pub fn decoder(&self) -> &Arc<DecoderControl> {
        &self.pipeline.dc
    }

    fn audible_index(&self) -> Option<usize> {
        let song = self.pipeline.ob.status().song?;
        self.queue
            .list()
            .iter()
            .position(|queued| queued.id == song.id)
    }

    /// Stop both worker threads and wait for them
    pub fn shutdown(&mut self) {
        let (Some(decoder), Some(output)) = (self.decoder_thread.take(), self.output_thread.take())
        else {
            return;
        };

        self.pipeline.dc.quit();
        self.pipeline.ob.quit();
        if decoder.join().is_err() {
            warn!("Decoder thread panicked");
        }
        if output.join().is_err() {
            warn!("Output thread panicked");
        }
        info!("Engine shut down");
    }
}

fn not_seekable(song: &Song) -> PlayerError {
    DecodeError::Unsupported(format!("{} is not seekable", song.display_name())).into()
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{AudioDevice, NullDevice};

    fn engine(queue: Arc<PlayQueue>) -> Engine {
        let config = PlayerConfig {
            buffer_chunks: 32,
            ..PlayerConfig::default()
        };
        let factory: DeviceFactory = Box::new(|| Box::new(NullDevice::unpaced()) as Box<dyn AudioDevice>);
        Engine::new(&config, factory, PluginRegistry::with_defaults(), queue).unwrap()
    }

    #[test]
    fn test_engine_starts_stopped() {
        let engine = engine(Arc::new(PlayQueue::new()));
        let status = engine.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.buffer_capacity, 32);
        assert!(status.song.is_none());
        assert!(engine.take_error().is_none());
    }

    #[test]
    fn test_play_on_empty_queue() {
        let engine = engine(Arc::new(PlayQueue::new()));
        assert!(matches!(
            engine.play(),
            Err(PlayerError::Queue(QueueError::EmptyQueue))
        ));
        assert!(matches!(
            engine.play_index(3),
            Err(PlayerError::Queue(QueueError::InvalidIndex { index: 3 }))
        ));
    }

    #[test]
    fn test_seek_without_song() {
        let engine = engine(Arc::new(PlayQueue::new()));
        assert!(engine.seek(10.0).is_err());
    }

    #[test]
    fn test_settings_reach_output() {
        let engine = engine(Arc::new(PlayQueue::new()));
        engine.set_volume(40);
        engine.set_crossfade(1.5);
        let status = engine.status();
        assert_eq!(status.volume, 40);
        assert_eq!(status.crossfade, 1.5);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = engine(Arc::new(PlayQueue::new()));
        engine.shutdown();
        engine.shutdown();
    }
}
