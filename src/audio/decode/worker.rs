//! The decode thread: walks the play queue and runs one format plugin pass
//! per song, answering start/stop/seek requests between and during passes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::audio::chunk::{Chunk, SongInfo};
use crate::audio::decode::context::PassContext;
use crate::audio::decode::{DecoderAction, DecoderState, SeekResult};
use crate::audio::decoders::{FormatDecoder, PluginRegistry};
use crate::audio::ring::RingWriter;
use crate::audio::Pipeline;
use crate::error::{panic_message, DecodeError, PlayerErrorKind};
use crate::logging::EventType;
use crate::models::{Song, SongId};

/// Idle wait between polls of the action slot
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// The decode thread: runs format plugins over the playlist's queued songs
pub struct DecodeWorker {
    pipeline: Pipeline,
    registry: PluginRegistry,
    chunks: RingWriter<Chunk>,
    infos: RingWriter<SongInfo>,
}

impl DecodeWorker {
    pub fn new(
        pipeline: Pipeline,
        registry: PluginRegistry,
        chunks: RingWriter<Chunk>,
        infos: RingWriter<SongInfo>,
    ) -> Self {
        Self {
            pipeline,
            registry,
            chunks,
            infos,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("decoder".to_string())
            .spawn(move || self.run())
    }

    /// Serve requests until `Quit`. A panicking plugin ends the thread
    /// with a latched error instead of leaving requesters waiting.
    pub fn run(self) {
        let pipeline = self.pipeline.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.serve())) {
            let message = panic_message(payload.as_ref());
            error!("Decoder thread panicked: {}", message);
            pipeline
                .errors
                .latch(PlayerErrorKind::SystemError, format!("decoder failed: {}", message));
            pipeline
                .events
                .record(EventType::DecodeError, format!("decoder failed: {}", message));
            pipeline.dc.set_state(DecoderState::Quit);
        }
        pipeline.dc.actions().close();
    }

    fn serve(mut self) {
        info!("Decoder thread started with plugins {:?}", self.registry.names());
        let dc = Arc::clone(&self.pipeline.dc);

        loop {
            match dc.actions().peek() {
                Some(DecoderAction::Quit) => {
                    dc.set_state(DecoderState::Quit);
                    dc.actions().acknowledge(None);
                    break;
                }
                Some(DecoderAction::Stop) => {
                    dc.set_state(DecoderState::Stopped);
                    dc.actions().acknowledge(None);
                }
                Some(DecoderAction::Start) => self.decode_queue(true),
                Some(DecoderAction::Seek { song, target }) => self.seek_from_stopped(song, target),
                None => {
                    let wake = dc.wake();
                    let guard = wake.enter();
                    if !dc.actions().is_pending() {
                        let _ = wake.timed_wait(guard, IDLE_WAIT);
                    }
                }
            }
        }

        info!("Decoder thread finished");
    }

    /// Decode queued songs back to back while the playlist is playing.
    /// With `acknowledge_start`, releases the pending `Start` once the first
    /// pass has begun (or nothing could be started).
    fn decode_queue(&mut self, mut acknowledge_start: bool) {
        let dc = Arc::clone(&self.pipeline.dc);

        loop {
            if !acknowledge_start && dc.actions().is_pending() {
                break;
            }
            let Some(song) = self.pipeline.queue.queued_song() else {
                debug!("Nothing queued to decode");
                break;
            };
            let Some(plugin) = self.prepare(&song) else {
                self.pipeline.queue.advance();
                continue;
            };

            let sequence = dc.begin(&song);
            if std::mem::take(&mut acknowledge_start) {
                dc.actions().acknowledge(None);
            }
            if !self.run_pass(plugin.as_ref(), &song, sequence) {
                break;
            }
            if !self.pipeline.queue.is_playing() {
                break;
            }
        }

        if acknowledge_start {
            dc.actions().acknowledge(None);
        }
    }

    /// A seek arrived while no pass was running: restart the queued song
    /// and let the plugin seek right away
    fn seek_from_stopped(&mut self, id: SongId, target: f32) {
        let dc = Arc::clone(&self.pipeline.dc);
        let song = match self.pipeline.queue.queued_song() {
            Some(song) if song.id == id => song,
            _ => {
                debug!("Seek to {:.2}s of song {} which is not queued", target, id);
                dc.actions().acknowledge(Some(SeekResult::Mismatch));
                return;
            }
        };
        let Some(plugin) = self.prepare(&song) else {
            self.pipeline.queue.advance();
            dc.actions().acknowledge(Some(SeekResult::Failed));
            return;
        };

        let sequence = dc.begin(&song);
        let finished = self.run_pass(plugin.as_ref(), &song, sequence);
        if finished && self.pipeline.queue.is_playing() {
            self.decode_queue(false);
        }
    }

    /// Find a plugin for `song`, latching the error if there is none
    fn prepare(&self, song: &Song) -> Option<Arc<dyn FormatDecoder>> {
        let path = song.path.to_string_lossy().to_string();
        let err = if !song.path.exists() {
            DecodeError::FileNotFound { path }
        } else if let Some(plugin) = self.registry.find(song) {
            return Some(plugin);
        } else {
            DecodeError::UnknownFileType { path }
        };

        self.pipeline.errors.latch(err.kind(), err.to_string());
        self.pipeline
            .events
            .record(EventType::DecodeError, err.to_string());
        None
    }

    /// Run one pass. Returns false if a stop request ended it.
    fn run_pass(&mut self, plugin: &dyn FormatDecoder, song: &Song, sequence: u8) -> bool {
        self.pipeline.events.record(
            EventType::DecodeStarted,
            format!("{} with {} (sequence {})", song.display_name(), plugin.name(), sequence),
        );

        let mut context = PassContext::new(
            &self.pipeline,
            &mut self.chunks,
            &mut self.infos,
            song,
            sequence,
        );
        let result = plugin
            .decode(&mut context, song)
            .and_then(|()| context.take_failure().map_or(Ok(()), Err));
        context.abandon_seek();

        let stopped = context.stopped();
        if stopped {
            context.discard_staged();
        } else {
            context.flush();
        }
        drop(context);

        match result {
            Ok(()) => self
                .pipeline
                .events
                .record(EventType::DecodeFinished, song.display_name()),
            Err(err) if !stopped => {
                warn!("Decoding {} failed: {}", song.path.display(), err);
                self.pipeline.errors.latch(err.kind(), err.to_string());
                self.pipeline
                    .events
                    .record(EventType::DecodeError, err.to_string());
            }
            Err(err) => debug!("Decoding {} interrupted: {}", song.display_name(), err),
        }

        if stopped {
            return false;
        }
        self.pipeline.queue.advance();
        self.pipeline.dc.set_state(DecoderState::Stopped);
        true
    }
}
