//! The plugin-facing side of one decode pass: fills chunks in whole frames,
//! publishes the pass's song info and drives the seek handshake with the
//! output thread.

use std::time::Duration;

use log::{debug, warn};

use crate::audio::chunk::{Chunk, SongInfo, CHUNK_SIZE};
use crate::audio::decode::{DecoderAction, SeekResult};
use crate::audio::decoders::{DecoderContext, DecoderSignal};
use crate::audio::ring::RingWriter;
use crate::audio::Pipeline;
use crate::error::DecodeError;
use crate::logging::EventType;
use crate::models::{AudioFormat, ReplayGainInfo, Song};

/// Bound on one wait for ring space; the output thread never blocks to wake us
const SPACE_WAIT: Duration = Duration::from_millis(20);

/// One decode pass as seen by a plugin.
///
/// The chunk being filled is staged here and pushed to the ring once it is
/// full, flushed at the end of the pass, or discarded.
pub(crate) struct PassContext<'a> {
    pipeline: &'a Pipeline,
    chunks: &'a mut RingWriter<Chunk>,
    infos: &'a mut RingWriter<SongInfo>,
    song: &'a Song,
    sequence: u8,
    format: Option<AudioFormat>,
    staged: Option<Chunk>,
    seek_started: bool,
    stopped: bool,
    failure: Option<DecodeError>,
}

impl<'a> PassContext<'a> {
    pub(crate) fn new(
        pipeline: &'a Pipeline,
        chunks: &'a mut RingWriter<Chunk>,
        infos: &'a mut RingWriter<SongInfo>,
        song: &'a Song,
        sequence: u8,
    ) -> Self {
        Self {
            pipeline,
            chunks,
            infos,
            song,
            sequence,
            format: None,
            staged: None,
            seek_started: false,
            stopped: false,
            failure: None,
        }
    }

    /// Whether a stop or quit request ended the pass
    pub(crate) fn stopped(&self) -> bool {
        self.stopped
    }

    /// Why the pass was refused, if the plugin misbehaved
    pub(crate) fn take_failure(&mut self) -> Option<DecodeError> {
        self.failure.take()
    }

    fn fail(&mut self, err: DecodeError) {
        warn!("Rejecting {}: {}", self.song.display_name(), err);
        self.staged = None;
        self.failure.get_or_insert(err);
    }

    /// Push the partial chunk and make sure the output thread sees it
    pub(crate) fn flush(&mut self) {
        while !self.commit() {
            if self.pipeline.dc.actions().is_pending() {
                debug!("Dropping the tail of sequence {}: ring full", self.sequence);
                self.staged = None;
                break;
            }
            self.wait_for_space();
        }
        self.pipeline.ob.notify_data_sync();
    }

    /// Forget the partial chunk
    pub(crate) fn discard_staged(&mut self) {
        self.staged = None;
    }

    /// Fail a seek the plugin started but never completed
    pub(crate) fn abandon_seek(&mut self) {
        if self.seek_started {
            warn!("{} returned during a seek", self.song.display_name());
            self.seek_complete(None);
        }
    }

    /// Push the staged chunk. False when the ring has no room for it yet.
    fn commit(&mut self) -> bool {
        let Some(chunk) = self.staged.take() else {
            return true;
        };
        if chunk.is_empty() {
            return true;
        }
        match self.chunks.push(chunk) {
            Ok(()) => {
                self.pipeline.ob.notify_data();
                true
            }
            Err(chunk) => {
                self.staged = Some(chunk);
                false
            }
        }
    }

    /// Look at the pending action. Acknowledges the ones that need no work
    /// from the plugin.
    fn check_action(&mut self) -> Option<DecoderSignal> {
        let actions = self.pipeline.dc.actions();
        match actions.peek()? {
            DecoderAction::Stop | DecoderAction::Quit => {
                self.stopped = true;
                Some(DecoderSignal::Stop)
            }
            DecoderAction::Start => {
                actions.acknowledge(None);
                None
            }
            DecoderAction::Seek { song, .. } if song == self.song.id => {
                Some(DecoderSignal::SeekRequested)
            }
            DecoderAction::Seek { song, .. } => {
                debug!("Seek for song {} while decoding {}", song, self.song.id);
                actions.acknowledge(Some(SeekResult::Mismatch));
                None
            }
        }
    }

    fn wait_for_space(&self) {
        let wake = self.pipeline.dc.wake();
        let guard = wake.enter();
        if !self.pipeline.dc.actions().is_pending() {
            self.pipeline.ob.notify_data();
            let _ = wake.timed_wait(guard, SPACE_WAIT);
        }
    }
}

impl DecoderContext for PassContext<'_> {
    fn start(&mut self, format: AudioFormat, total_time: f32, replay_gain: Option<ReplayGainInfo>) {
        if self.format.is_some() {
            warn!("{} announced its format twice", self.song.display_name());
            return;
        }
        if !format.is_valid() || format.frame_size() > CHUNK_SIZE {
            self.fail(DecodeError::Unsupported(format!(
                "cannot play {} Hz, {} channel(s) of {}",
                format.sample_rate,
                format.channels,
                format.sample_format.name()
            )));
            return;
        }
        self.format = Some(format);
        self.pipeline.dc.set_stream_format(format, total_time);
        debug!(
            "Decoding {} as {} ({:.1}s, sequence {})",
            self.song.display_name(),
            format.format_description(),
            total_time,
            self.sequence
        );

        while self.infos.write_space() == 0 {
            if self.check_action() == Some(DecoderSignal::Stop) {
                warn!("Dropping song info for sequence {}", self.sequence);
                return;
            }
            let wake = self.pipeline.dc.wake();
            let guard = wake.enter();
            let _ = wake.timed_wait(guard, SPACE_WAIT);
        }
        let info = SongInfo {
            sequence: self.sequence,
            song: self.song.clone(),
            format,
            total_time,
            replay_gain,
        };
        if self.infos.push(info).is_err() {
            warn!("Song info ring full for sequence {}", self.sequence);
        }
    }

    fn push_chunk(&mut self, pcm: &[u8], time: f32, bit_rate: u32) -> DecoderSignal {
        if self.failure.is_some() {
            return DecoderSignal::Stop;
        }
        let Some(format) = self.format else {
            self.fail(DecodeError::Malformed(
                "audio pushed before the format was announced".to_string(),
            ));
            return DecoderSignal::Stop;
        };
        if self.seek_started {
            return DecoderSignal::SeekRequested;
        }

        let usable = CHUNK_SIZE - CHUNK_SIZE % format.frame_size();
        let mut offset = 0;
        let mut position = time;

        loop {
            if let Some(signal) = self.check_action() {
                return signal;
            }
            if self.staged.as_ref().is_some_and(|chunk| chunk.length >= usable) {
                if !self.commit() {
                    self.wait_for_space();
                }
                continue;
            }
            if offset >= pcm.len() {
                break;
            }

            let sequence = self.sequence;
            let chunk = self.staged.get_or_insert_with(|| {
                let mut chunk = Chunk::new();
                chunk.reset(sequence);
                chunk.time = position;
                chunk.bit_rate = bit_rate;
                chunk
            });
            let room = usable - chunk.length;
            let end = (offset + room).min(pcm.len());
            let taken = chunk.append(&pcm[offset..end]);
            offset += taken;
            position += format.duration_of(taken);
        }

        DecoderSignal::None
    }

    fn should_interrupt(&mut self) -> bool {
        self.failure.is_some() || matches!(self.check_action(), Some(DecoderSignal::Stop))
    }

    fn is_seek_requested(&mut self) -> Option<f32> {
        if self.check_action() != Some(DecoderSignal::SeekRequested) {
            return None;
        }
        let Some(DecoderAction::Seek { target, .. }) = self.pipeline.dc.actions().peek() else {
            return None;
        };
        if !self.seek_started {
            self.pipeline.ob.seek_start();
            self.seek_started = true;
        }
        Some(target)
    }

    fn seek_complete(&mut self, position: Option<f32>) {
        if !self.seek_started {
            warn!("{} completed a seek nobody asked for", self.song.display_name());
            return;
        }
        self.seek_started = false;

        let result = match position {
            Some(position) => {
                self.discard_staged();
                self.pipeline.ob.seek_finish(Some(position));
                self.pipeline.events.record(
                    EventType::SeekCompleted,
                    format!("{} to {:.2}s", self.song.display_name(), position),
                );
                SeekResult::Done(position)
            }
            None => {
                self.pipeline.ob.seek_finish(None);
                self.pipeline.events.record(
                    EventType::SeekFailed,
                    format!("{} is not seekable", self.song.display_name()),
                );
                SeekResult::Failed
            }
        };
        self.pipeline.dc.actions().acknowledge(Some(result));
    }
}
