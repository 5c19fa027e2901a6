//! The output thread: prebuffers, adopts decode passes as they become
//! audible, cross-fades and feeds the device, and serves the output
//! action requests in between.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::audio::chunk::{Chunk, SongInfo, CHUNK_SIZE};
use crate::audio::device::{AudioDevice, DeviceFactory};
use crate::audio::output::crossfade::{self, Crossfade};
use crate::audio::output::{OutputAction, OutputState, PauseMode};
use crate::audio::pcm;
use crate::audio::ring::{RingCursors, RingReader};
use crate::audio::Pipeline;
use crate::config::ReplayGainMode;
use crate::error::{panic_message, DeviceError, PlayerErrorKind};
use crate::logging::EventType;
use crate::models::{AudioFormat, ReplayGainInfo};

/// Idle wait when there is nothing to play
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Wait for the decoder to deliver more chunks
const DATA_WAIT: Duration = Duration::from_millis(10);

/// Read side as it was when a seek began
#[derive(Debug)]
struct SeekSnapshot {
    cursors: RingCursors,
    lengths: Vec<usize>,
    resume: OutputState,
    crossfade: Option<Crossfade>,
}

/// The output thread: drains the chunk ring into the audio device
pub struct OutputWorker {
    pipeline: Pipeline,
    chunks: RingReader<Chunk>,
    infos: RingReader<SongInfo>,
    device: Box<dyn AudioDevice>,
    open_format: Option<AudioFormat>,
    current: Option<SongInfo>,
    crossfade: Option<Crossfade>,
    /// Next pass we already decided not to fade into
    no_fade_into: Option<u8>,
    seek: Option<SeekSnapshot>,
    underrun: bool,
    silence: Vec<u8>,
}

impl OutputWorker {
    pub fn new(
        pipeline: Pipeline,
        chunks: RingReader<Chunk>,
        infos: RingReader<SongInfo>,
        device: Box<dyn AudioDevice>,
    ) -> Self {
        Self {
            pipeline,
            chunks,
            infos,
            device,
            open_format: None,
            current: None,
            crossfade: None,
            no_fade_into: None,
            seek: None,
            underrun: false,
            silence: Vec::new(),
        }
    }

    /// Start the output thread. The device is built on the new thread.
    pub fn spawn(
        pipeline: Pipeline,
        chunks: RingReader<Chunk>,
        infos: RingReader<SongInfo>,
        factory: DeviceFactory,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("output".to_string())
            .spawn(move || {
                raise_priority();
                let device = factory();
                OutputWorker::new(pipeline, chunks, infos, device).run();
            })
    }

    /// Serve requests until `Quit`, latching a panic instead of leaving
    /// requesters waiting
    pub fn run(self) {
        let pipeline = self.pipeline.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.serve())) {
            let message = panic_message(payload.as_ref());
            error!("Output thread panicked: {}", message);
            pipeline
                .errors
                .latch(PlayerErrorKind::SystemError, format!("output failed: {}", message));
            pipeline.ob.set_state(OutputState::Quit);
        }
        pipeline.ob.actions().close();
    }

    fn serve(mut self) {
        info!("Output thread started with device '{}'", self.device.name());

        loop {
            if let Some(action) = self.pipeline.ob.actions().peek() {
                let quit = self.handle_action(action);
                self.pipeline.ob.actions().acknowledge(None);
                if quit {
                    break;
                }
                continue;
            }

            match self.pipeline.ob.state() {
                OutputState::Play => self.play_step(),
                _ => self.idle(IDLE_WAIT),
            }
        }

        self.close_device();
        info!("Output thread finished");
    }

    fn idle(&self, timeout: Duration) {
        let wake = self.pipeline.ob.wake();
        let guard = wake.enter();
        if !self.pipeline.ob.actions().is_pending() {
            let _ = wake.timed_wait(guard, timeout);
        }
    }

    /// Returns true on `Quit`
    fn handle_action(&mut self, action: OutputAction) -> bool {
        let ob = Arc::clone(&self.pipeline.ob);
        debug!("Output action {:?} in state {:?}", action, ob.state());

        match action {
            OutputAction::Play => {
                if ob.state() == OutputState::Stop {
                    ob.set_bpp_current(ob.bpp_max());
                }
                if matches!(ob.state(), OutputState::Stop | OutputState::Pause) {
                    ob.set_state(OutputState::Play);
                }
            }
            OutputAction::Pause(mode) => {
                let next = match (mode, ob.state()) {
                    (PauseMode::Set | PauseMode::Flip, OutputState::Play) => OutputState::Pause,
                    (PauseMode::Unset | PauseMode::Flip, OutputState::Pause) => OutputState::Play,
                    (_, state) => state,
                };
                ob.set_state(next);
            }
            OutputAction::Drop(sequence) => self.drop_sequence(sequence),
            OutputAction::SeekStart => self.seek_start(),
            OutputAction::SeekFinish(position) => self.seek_finish(position),
            OutputAction::Reset => {
                self.chunks.clear();
                self.prune_infos();
                self.end_crossfade();
                self.seek = None;
                self.device.drop_buffered();
                self.close_device();
                self.current = None;
                *ob.status_mut() = Default::default();
                ob.set_bpp_current(ob.bpp_max());
                ob.set_state(OutputState::Stop);
                self.pipeline.dc.notify_space();
            }
            OutputAction::Stop => {
                self.close_device();
                ob.set_bpp_current(ob.bpp_max());
                ob.set_state(OutputState::Stop);
            }
            OutputAction::Quit => {
                self.close_device();
                ob.set_state(OutputState::Quit);
                return true;
            }
        }
        false
    }

    fn play_step(&mut self) {
        self.skip_excised();

        let available = self.chunks.read_space();
        if available == 0 {
            self.starved();
            return;
        }

        let ob = Arc::clone(&self.pipeline.ob);
        if ob.bpp_current() > 0 && self.crossfade.is_none() {
            if available < ob.bpp_current() && !self.pipeline.dc.is_stopped() {
                self.idle(DATA_WAIT);
                return;
            }
            debug!("Prebuffered {} chunks", available);
            ob.set_bpp_current(0);
        }

        let Some(sequence) = self.chunks.read_peek(0).map(|chunk| chunk.sequence) else {
            return;
        };
        if self.current.as_ref().map(|info| info.sequence) != Some(sequence) {
            self.adopt(sequence);
        }
        let Some(format) = self.current.as_ref().map(|info| info.format) else {
            warn!("No format known for sequence {}, discarding chunk", sequence);
            self.consume();
            return;
        };

        if let Err(err) = self.ensure_device(format) {
            self.device_failed(err);
            return;
        }

        self.crossfade_step(format);

        let factor = self.gain();
        let Some(chunk) = self.chunks.read_peek_mut(0) else {
            return;
        };
        pcm::apply_volume(format.sample_format, chunk.bytes_mut(), factor);
        let result = self.device.play(chunk.bytes());
        let end = chunk.time + format.duration_of(chunk.length);
        let bit_rate = chunk.bit_rate;
        self.consume();

        match result {
            Ok(()) => {
                self.underrun = false;
                let mut status = self.pipeline.ob.status_mut();
                status.elapsed = end;
                status.bit_rate = bit_rate;
            }
            Err(err) => self.device_failed(err),
        }
    }

    /// Mark the chunk at the read cursor consumed and hand it back
    fn consume(&mut self) {
        if let Some(chunk) = self.chunks.read_peek_mut(0) {
            chunk.length = 0;
            self.chunks.read_advance(1);
            self.pipeline.dc.notify_space();
        }
    }

    fn skip_excised(&mut self) {
        let mut skipped = 0;
        while self.chunks.read_peek(0).is_some_and(Chunk::is_empty) {
            self.chunks.read_advance(1);
            skipped += 1;
        }
        if skipped > 0 {
            self.pipeline.dc.notify_space();
        }
    }

    /// Nothing buffered: either the playlist is done or the decoder lags
    fn starved(&mut self) {
        let ob = Arc::clone(&self.pipeline.ob);
        if self.pipeline.dc.is_stopped() && !self.pipeline.queue.is_playing() {
            info!("Playback finished");
            self.close_device();
            ob.set_bpp_current(ob.bpp_max());
            ob.set_state(OutputState::Stop);
            return;
        }

        if self.open_format.is_none() || ob.bpp_current() > 0 {
            self.idle(DATA_WAIT);
            return;
        }

        if !self.underrun {
            self.underrun = true;
            self.pipeline
                .events
                .record(EventType::Underrun, "output buffer ran dry");
        }
        if let Err(err) = self.device.play(&self.silence) {
            self.device_failed(err);
        }
    }

    /// Make the chunks of `sequence` the audible pass
    fn adopt(&mut self, sequence: u8) {
        let found = self.infos.iter().position(|info| info.sequence == sequence);
        match found {
            Some(index) => {
                self.current = self.infos.read_peek(index).cloned();
                self.infos.read_advance(index + 1);
            }
            None => {
                warn!("No song info for sequence {}", sequence);
                if let Some(current) = self.current.as_mut() {
                    current.sequence = sequence;
                }
            }
        }

        self.pipeline.ob.sequence().set_player(sequence);
        self.no_fade_into = None;

        if let Some(info) = &self.current {
            {
                let mut status = self.pipeline.ob.status_mut();
                status.song = Some(info.song.clone());
                status.total = info.total_time;
                status.format = Some(info.format);
                status.elapsed = 0.0;
            }
            self.pipeline.events.record(
                EventType::TrackChanged,
                format!("{} (sequence {})", info.song.display_name(), sequence),
            );
        }
        self.pipeline.queue.notify_position_changed();
    }

    /// Open the device for `format`, reopening only on a format change
    fn ensure_device(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        if self.open_format == Some(format) {
            return Ok(());
        }
        self.close_device();

        self.device.open(&format)?;
        self.open_format = Some(format);
        self.silence = vec![0; CHUNK_SIZE - CHUNK_SIZE % format.frame_size()];
        self.pipeline.events.record(
            EventType::DeviceOpened,
            format!("{}: {}", self.device.name(), format.format_description()),
        );
        Ok(())
    }

    fn close_device(&mut self) {
        if self.open_format.take().is_some() {
            self.device.close();
            self.pipeline
                .events
                .record(EventType::DeviceClosed, self.device.name().to_string());
        }
    }

    fn device_failed(&mut self, err: DeviceError) {
        self.pipeline
            .errors
            .latch(PlayerErrorKind::AudioDeviceError, err.to_string());
        self.pipeline
            .events
            .record(EventType::DeviceError, err.to_string());
        self.close_device();
        self.pipeline.ob.set_state(OutputState::Stop);
    }

    fn gain(&self) -> f32 {
        let volume = self.pipeline.ob.volume() as f32 / 100.0;
        let replay_gain = self
            .current
            .as_ref()
            .and_then(|info| info.replay_gain.as_ref())
            .map(|info| replay_gain_scale(info, self.pipeline.ob.replay_gain_mode()))
            .unwrap_or(1.0);
        volume * replay_gain
    }

    fn crossfade_step(&mut self, format: AudioFormat) {
        if self.crossfade.is_none() && !self.start_crossfade(format) {
            return;
        }
        let Some(fade) = self.crossfade.as_mut() else {
            return;
        };

        let volume = fade.current_volume();
        match fade.next_sequence {
            Some(next_sequence) => {
                if let Some((outgoing, incoming)) = self.chunks.read_pair_mut(0, fade.partner) {
                    if incoming.length > 0 && incoming.sequence == next_sequence {
                        outgoing.pad_to(incoming.length);
                        pcm::mix(
                            format.sample_format,
                            outgoing.bytes_mut(),
                            incoming.bytes(),
                            volume,
                        );
                        incoming.length = 0;
                    }
                }
            }
            // Last song: mix against silence
            None => {
                if let Some(outgoing) = self.chunks.read_peek_mut(0) {
                    pcm::apply_volume(format.sample_format, outgoing.bytes_mut(), volume);
                }
            }
        }

        if fade.step() {
            self.end_crossfade();
        }
    }

    fn start_crossfade(&mut self, format: AudioFormat) -> bool {
        let seconds = self.pipeline.ob.crossfade();
        let Some(current) = self.current.as_ref() else {
            return false;
        };
        if seconds <= 0.0 || current.total_time <= 0.0 {
            return false;
        }
        if self.pipeline.ob.elapsed() + seconds < current.total_time {
            return false;
        }

        let wanted = crossfade::chunks_for(seconds, &format);
        let chunks = &self.chunks;
        let peek = |index: usize| chunks.read_peek(index).map(|chunk: &Chunk| (chunk.sequence, chunk.length));
        let Some(count) = crossfade::plan(peek, current.sequence, wanted) else {
            if !self.pipeline.dc.is_stopped() || self.pipeline.queue.is_playing() {
                return false;
            }
            let Some(count) = crossfade::plan_fade_out(peek, current.sequence, wanted) else {
                return false;
            };
            self.crossfade = Some(Crossfade::fade_out(count));
            self.pipeline.ob.set_crossfading(true);
            self.pipeline.events.record(
                EventType::CrossfadeStarted,
                format!("{} chunks into silence", count),
            );
            return true;
        };
        let Some(next_sequence) = chunks.read_peek(count).map(|chunk| chunk.sequence) else {
            return false;
        };
        if self.no_fade_into == Some(next_sequence) {
            return false;
        }

        let next_format = self
            .infos
            .iter()
            .find(|info| info.sequence == next_sequence)
            .map(|info| info.format);
        if next_format != Some(format) {
            debug!("Not cross-fading into sequence {}: format differs", next_sequence);
            self.no_fade_into = Some(next_sequence);
            return false;
        }

        self.crossfade = Some(Crossfade::new(count, next_sequence));
        self.pipeline.ob.set_crossfading(true);
        self.pipeline.events.record(
            EventType::CrossfadeStarted,
            format!("{} chunks into sequence {}", count, next_sequence),
        );
        true
    }

    fn end_crossfade(&mut self) {
        self.crossfade = None;
        self.pipeline.ob.set_crossfading(false);
    }

    fn drop_sequence(&mut self, sequence: u8) {
        let mut dropped = 0;
        for index in 0..self.chunks.read_space() {
            if let Some(chunk) = self.chunks.read_peek_mut(index) {
                if chunk.sequence == sequence && chunk.length > 0 {
                    chunk.length = 0;
                    dropped += 1;
                }
            }
        }
        if self.current.as_ref().map(|info| info.sequence) == Some(sequence) {
            self.device.drop_buffered();
        }
        self.end_crossfade();
        self.prune_infos();
        debug!("Dropped {} chunks of sequence {}", dropped, sequence);
    }

    /// Forget song info of passes that can no longer become audible
    fn prune_infos(&mut self) {
        let decoding = self.pipeline.dc.sequence().decoder();
        loop {
            let stale = match self.infos.read_peek(0) {
                Some(info) => info.sequence != decoding && !self.has_chunks_of(info.sequence),
                None => false,
            };
            if !stale {
                break;
            }
            self.infos.read_advance(1);
        }
    }

    fn has_chunks_of(&self, sequence: u8) -> bool {
        self.chunks
            .iter()
            .any(|chunk| chunk.sequence == sequence && chunk.length > 0)
    }

    fn seek_start(&mut self) {
        let lengths = self.chunks.iter().map(|chunk| chunk.length).collect();
        let resume = match self.seek.take() {
            Some(previous) => previous.resume,
            None => self.pipeline.ob.state(),
        };
        self.seek = Some(SeekSnapshot {
            cursors: self.chunks.snapshot(),
            lengths,
            resume,
            crossfade: self.crossfade,
        });
        self.chunks.clear();
        self.pipeline.ob.set_state(OutputState::Seek);
        self.pipeline.dc.notify_space();
    }

    fn seek_finish(&mut self, position: Option<f32>) {
        let Some(snapshot) = self.seek.take() else {
            warn!("Seek finished without a seek in progress");
            return;
        };
        let ob = Arc::clone(&self.pipeline.ob);

        match position {
            None => {
                // SAFETY: the decode thread is blocked inside this action and
                // pushes nothing until it is acknowledged.
                let restored = unsafe { self.chunks.rewind(snapshot.cursors) };
                if restored {
                    for (index, length) in snapshot.lengths.iter().enumerate() {
                        if let Some(chunk) = self.chunks.read_peek_mut(index) {
                            chunk.length = *length;
                        }
                    }
                    self.crossfade = snapshot.crossfade;
                    ob.set_crossfading(self.crossfade.is_some());
                } else {
                    warn!("Chunks were pushed during a seek, cannot roll back");
                }
                ob.set_state(snapshot.resume);
            }
            Some(position) => {
                self.chunks.clear();
                self.device.drop_buffered();
                self.end_crossfade();

                let sequence = ob.sequence().decoder();
                if self.current.as_ref().map(|info| info.sequence) != Some(sequence) {
                    self.adopt(sequence);
                }
                ob.sequence().set_player(sequence);
                ob.status_mut().elapsed = position;
                ob.set_bpp_current(ob.bpp_max());
                ob.set_state(snapshot.resume);
            }
        }
    }
}

/// Linear scale for the replay gain tags under `mode`, limited so the
/// tagged peak does not clip
pub fn replay_gain_scale(info: &ReplayGainInfo, mode: ReplayGainMode) -> f32 {
    let (gain, peak) = match mode {
        ReplayGainMode::Off => return 1.0,
        ReplayGainMode::Track => (info.track_gain, info.track_peak),
        ReplayGainMode::Album => (info.album_gain, info.album_peak),
    };
    let scale = 10f32.powf(gain / 20.0);
    if peak > 0.0 && scale * peak > 1.0 {
        1.0 / peak
    } else {
        scale
    }
}

/// Ask for real-time scheduling of the output thread where supported
fn raise_priority() {
    #[cfg(target_os = "macos")]
    {
        unsafe {
            let thread = libc::pthread_self();
            let mut policy: libc::c_int = 0;
            let mut param: libc::sched_param = std::mem::zeroed();

            if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                param.sched_priority = 63;
                let _ = libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param);
            }
        }
    }
}
