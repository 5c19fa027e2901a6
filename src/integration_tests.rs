//! End-to-end runs of the decode and output threads with a scripted format
//! plugin and a device that records what it was asked to play.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::audio::chunk::CHUNK_SIZE;
use crate::audio::decoders::{DecoderContext, DecoderSignal, FormatDecoder, PluginRegistry};
use crate::audio::device::{AudioDevice, DeviceFactory};
use crate::audio::{DecoderState, Engine};
use crate::config::PlayerConfig;
use crate::error::{DecodeError, DeviceError, PlayerErrorKind};
use crate::logging::EventType;
use crate::models::{AudioFormat, PlaybackState, SampleFormat, Song, SongId, Tag};
use crate::queue::PlayQueue;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Format of files with the `raw` extension; `r48` files play at 48 kHz
fn format_of(path: &Path) -> AudioFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("r48") => AudioFormat::new(48_000, SampleFormat::S16, 2),
        _ => AudioFormat::cd(),
    }
}

fn chunk_seconds(format: &AudioFormat) -> f32 {
    format.duration_of(CHUNK_SIZE)
}

/// One chunk of PCM: byte 0 is the song id, bytes 1..3 the chunk index
fn marked_pcm(song: SongId, index: usize) -> Vec<u8> {
    let mut pcm = vec![0x55; CHUNK_SIZE];
    pcm[0] = song as u8;
    pcm[1..3].copy_from_slice(&(index as u16).to_le_bytes());
    pcm
}

/// Produces `chunks` marked chunks per song
struct ScriptedDecoder {
    chunks: usize,
    seekable: bool,
    /// Chunks the decoder may produce so far, per pass
    limit: Option<Arc<AtomicUsize>>,
}

impl ScriptedDecoder {
    fn new(chunks: usize) -> Self {
        Self {
            chunks,
            seekable: true,
            limit: None,
        }
    }

    fn unseekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    fn gated(mut self, limit: Arc<AtomicUsize>) -> Self {
        self.limit = Some(limit);
        self
    }

    fn allowed(&self, index: usize) -> bool {
        self.limit
            .as_ref()
            .map_or(true, |limit| index < limit.load(Ordering::Acquire))
    }
}

impl FormatDecoder for ScriptedDecoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn try_decode(&self, song: &Song) -> bool {
        matches!(
            song.path.extension().and_then(|ext| ext.to_str()),
            Some("raw" | "r48")
        )
    }

    fn decode(&self, context: &mut dyn DecoderContext, song: &Song) -> Result<(), DecodeError> {
        let format = format_of(&song.path);
        let seconds = chunk_seconds(&format);
        context.start(format, self.chunks as f32 * seconds, None);

        let mut index = 0;
        while index < self.chunks {
            if let Some(target) = context.is_seek_requested() {
                if self.seekable {
                    index = ((target / seconds) as usize).min(self.chunks);
                    context.seek_complete(Some(index as f32 * seconds));
                } else {
                    context.seek_complete(None);
                }
                continue;
            }
            if !self.allowed(index) {
                if context.should_interrupt() {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            match context.push_chunk(&marked_pcm(song.id, index), index as f32 * seconds, 1411) {
                DecoderSignal::None => index += 1,
                DecoderSignal::SeekRequested => continue,
                DecoderSignal::Stop => return Ok(()),
            }
        }
        Ok(())
    }

    fn tag_read(&self, _path: &Path) -> Option<Tag> {
        None
    }
}

/// Announces a format no device can play, then tries to push audio anyway
struct BadFormatDecoder {
    signals: Arc<Mutex<Vec<DecoderSignal>>>,
}

impl FormatDecoder for BadFormatDecoder {
    fn name(&self) -> &'static str {
        "bad-format"
    }

    fn try_decode(&self, _song: &Song) -> bool {
        true
    }

    fn decode(&self, context: &mut dyn DecoderContext, _song: &Song) -> Result<(), DecodeError> {
        context.start(AudioFormat::new(44_100, SampleFormat::S16, 0), 1.0, None);
        let signal = context.push_chunk(&[1; 64], 0.0, 0);
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }

    fn tag_read(&self, _path: &Path) -> Option<Tag> {
        None
    }
}

struct PanickingDecoder;

impl FormatDecoder for PanickingDecoder {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn try_decode(&self, _song: &Song) -> bool {
        true
    }

    fn decode(&self, _context: &mut dyn DecoderContext, _song: &Song) -> Result<(), DecodeError> {
        panic!("plugin blew up");
    }

    fn tag_read(&self, _path: &Path) -> Option<Tag> {
        None
    }
}

/// How the recording device misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Open,
    /// Fail the write after this many blocks
    PlayAfter(usize),
}

#[derive(Debug, Default)]
struct Recording {
    opens: Vec<AudioFormat>,
    closes: usize,
    drops: usize,
    silent: usize,
    /// `(song, chunk index)` of every audible block
    played: Vec<(SongId, usize)>,
    /// Level of the first untouched sample of every audible block
    levels: Vec<i16>,
}

struct RecordingDevice {
    log: Arc<Mutex<Recording>>,
    pace: Duration,
    fault: Fault,
    format: Option<AudioFormat>,
}

impl AudioDevice for RecordingDevice {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), DeviceError> {
        if self.fault == Fault::Open {
            return Err(DeviceError::Open("no such card".to_string()));
        }
        self.format = Some(*format);
        self.log.lock().unwrap().opens.push(*format);
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        if self.format.is_none() {
            return Err(DeviceError::Write("device is not open".to_string()));
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        let mut log = self.log.lock().unwrap();
        if let Fault::PlayAfter(blocks) = self.fault {
            if log.played.len() + log.silent >= blocks {
                return Err(DeviceError::Write("cable pulled".to_string()));
            }
        }
        if pcm.iter().all(|byte| *byte == 0) {
            log.silent += 1;
        } else {
            let index = u16::from_le_bytes([pcm[1], pcm[2]]) as usize;
            log.played.push((pcm[0] as SongId, index));
            log.levels.push(i16::from_le_bytes([pcm[4], pcm[5]]));
        }
        Ok(())
    }

    fn drop_buffered(&mut self) {
        self.log.lock().unwrap().drops += 1;
    }

    fn close(&mut self) {
        self.format = None;
        self.log.lock().unwrap().closes += 1;
    }
}

struct Harness {
    engine: Engine,
    queue: Arc<PlayQueue>,
    log: Arc<Mutex<Recording>>,
    _dir: TempDir,
}

impl Harness {
    fn new<D>(files: &[&str], decoder: D, config: PlayerConfig, pace: Duration) -> Self
    where
        D: FormatDecoder + 'static,
    {
        Self::with_fault(files, decoder, config, pace, Fault::None)
    }

    fn with_fault<D>(
        files: &[&str],
        decoder: D,
        config: PlayerConfig,
        pace: Duration,
        fault: Fault,
    ) -> Self
    where
        D: FormatDecoder + 'static,
    {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(PlayQueue::new());
        for name in files {
            let path: PathBuf = dir.path().join(name);
            std::fs::write(&path, b"scripted").unwrap();
            queue.add(&path, None).unwrap();
        }

        let log = Arc::new(Mutex::new(Recording::default()));
        let device_log = Arc::clone(&log);
        let factory: DeviceFactory = Box::new(move || {
            Box::new(RecordingDevice {
                log: device_log,
                pace,
                fault,
                format: None,
            }) as Box<dyn AudioDevice>
        });

        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(decoder));
        let engine = Engine::new(&config, factory, registry, Arc::clone(&queue)).unwrap();

        Self {
            engine,
            queue,
            log,
            _dir: dir,
        }
    }

    fn played(&self) -> Vec<(SongId, usize)> {
        self.log.lock().unwrap().played.clone()
    }

    fn wait_until<F: Fn(&Self) -> bool>(&self, condition: F) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn wait_for_chunk(&self, song: SongId, index: usize) -> bool {
        self.wait_until(|h| h.played().contains(&(song, index)))
    }

    fn wait_for_stop(&self) -> bool {
        self.wait_until(|h| h.engine.status().state == PlaybackState::Stopped)
    }

    fn wait_for_error(&self) -> bool {
        self.wait_until(|h| h.engine.status().error.is_some())
    }
}

fn config(buffer_chunks: usize, buffer_before_play: f32) -> PlayerConfig {
    PlayerConfig {
        buffer_chunks,
        buffer_before_play,
        ..PlayerConfig::default()
    }
}

fn run(song: SongId, range: std::ops::Range<usize>) -> Vec<(SongId, usize)> {
    range.map(|index| (song, index)).collect()
}

#[test]
fn test_queue_plays_in_order_and_stops() {
    let h = Harness::new(
        &["a.raw", "b.raw"],
        ScriptedDecoder::new(10),
        config(16, 10.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());

    let mut expected = run(1, 0..10);
    expected.extend(run(2, 0..10));
    assert_eq!(h.played(), expected);

    let log = h.log.lock().unwrap();
    assert_eq!(log.opens, vec![AudioFormat::cd()]);
    assert_eq!(log.closes, 1);
    drop(log);

    assert_eq!(h.engine.events().count(EventType::TrackChanged), 2);
    assert!(h.queue.decode_position().is_none());
    assert!(h.engine.take_error().is_none());
}

#[test]
fn test_prebuffer_holds_first_chunk() {
    let limit = Arc::new(AtomicUsize::new(10));
    let h = Harness::new(
        &["a.raw"],
        ScriptedDecoder::new(40).gated(Arc::clone(&limit)),
        config(32, 50.0),
        Duration::ZERO,
    );
    assert_eq!(h.engine.output().bpp_max(), 16);

    h.engine.play().unwrap();
    assert!(h.wait_until(|h| h.engine.status().buffered_chunks == 10));
    thread::sleep(Duration::from_millis(100));
    assert!(h.played().is_empty());
    assert_eq!(h.log.lock().unwrap().silent, 0);

    limit.store(40, Ordering::Release);
    assert!(h.wait_for_stop());
    assert_eq!(h.played(), run(1, 0..40));
}

#[test]
fn test_short_song_plays_without_filling_prebuffer() {
    let h = Harness::new(
        &["a.raw"],
        ScriptedDecoder::new(5),
        config(64, 50.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());
    assert_eq!(h.played(), run(1, 0..5));
}

#[test]
fn test_format_change_reopens_device() {
    let h = Harness::new(
        &["a.raw", "b.r48", "c.r48"],
        ScriptedDecoder::new(8),
        config(16, 0.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());

    let mut expected = run(1, 0..8);
    expected.extend(run(2, 0..8));
    expected.extend(run(3, 0..8));
    assert_eq!(h.played(), expected);

    let log = h.log.lock().unwrap();
    assert_eq!(
        log.opens,
        vec![AudioFormat::cd(), AudioFormat::new(48_000, SampleFormat::S16, 2)]
    );
    assert_eq!(log.closes, 2);
}

#[test]
fn test_skip_drops_rest_of_audible_song() {
    let h = Harness::new(
        &["a.raw", "b.raw", "c.raw"],
        ScriptedDecoder::new(200),
        config(32, 10.0),
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_chunk(1, 5));

    h.engine.next();
    assert!(h.wait_for_stop());

    let played = h.played();
    let skipped_at = played.iter().position(|(song, _)| *song != 1).unwrap();
    assert!(skipped_at < 200);
    assert_eq!(played[..skipped_at], run(1, 0..skipped_at)[..]);

    let mut rest = run(2, 0..200);
    rest.extend(run(3, 0..200));
    assert_eq!(played[skipped_at..], rest[..]);

    let log = h.log.lock().unwrap();
    assert_eq!(log.opens.len(), 1);
    assert!(log.drops >= 1);
}

#[test]
fn test_failed_seek_leaves_playback_untouched() {
    let h = Harness::new(
        &["a.raw"],
        ScriptedDecoder::new(200).unseekable(),
        config(32, 10.0),
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_chunk(1, 5));

    assert!(h.engine.seek(1.5).is_err());
    assert!(h.wait_for_stop());

    // Nothing lost, nothing repeated
    assert_eq!(h.played(), run(1, 0..200));
    assert_eq!(h.engine.events().count(EventType::SeekFailed), 1);
}

#[test]
fn test_seek_continues_from_target() {
    let format = AudioFormat::cd();
    let seconds = chunk_seconds(&format);
    let h = Harness::new(
        &["a.raw"],
        ScriptedDecoder::new(400),
        config(32, 10.0),
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_chunk(1, 5));

    let target = 300.0 * seconds + seconds / 2.0;
    let reached = h.engine.seek(target).unwrap();
    assert!((reached - 300.0 * seconds).abs() < 1e-4);
    assert!(h.wait_for_stop());

    let played = h.played();
    let jump = played
        .windows(2)
        .position(|pair| pair[1].1 != pair[0].1 + 1)
        .unwrap()
        + 1;
    assert_eq!(played[..jump], run(1, 0..jump)[..]);
    assert_eq!(played[jump..], run(1, 300..400)[..]);
    assert!(jump < 300);
}

#[test]
fn test_stop_rewinds_to_audible_song() {
    let h = Harness::new(
        &["a.raw", "b.raw"],
        ScriptedDecoder::new(200),
        config(32, 10.0),
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_chunk(1, 3));

    h.engine.stop();
    let status = h.engine.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.song.is_none());
    assert_eq!(status.buffered_chunks, 0);
    assert_eq!(h.queue.decode_position(), Some(0));
    assert!(h.log.lock().unwrap().closes >= 1);

    let stopped_at = h.played().len();
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());

    let played = h.played();
    assert_eq!(played[stopped_at], (1, 0));
    let mut expected = run(1, 0..200);
    expected.extend(run(2, 0..200));
    assert_eq!(played[stopped_at..], expected[..]);
}

#[test]
fn test_sequence_tags_follow_passes() {
    let h = Harness::new(
        &["a.raw", "b.raw", "c.raw"],
        ScriptedDecoder::new(4),
        config(16, 0.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());

    let dc = h.engine.decoder();
    for sequence in 1..=3u8 {
        let song = dc.song_for_sequence(sequence).unwrap();
        assert_eq!(song.id, sequence as SongId);
    }
    assert_eq!(h.engine.output().sequence().player(), 3);
    assert_eq!(h.engine.output().sequence().decoder(), 3);
}

#[test]
fn test_crossfade_overlaps_songs() {
    let mut config = config(32, 10.0);
    config.crossfade_seconds = 0.05;
    let h = Harness::new(
        &["a.raw", "b.raw"],
        ScriptedDecoder::new(40),
        config,
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());

    // 0.05s is 4.375 chunks: the last four chunks of the first song carry
    // the first four of the second. The second song then fades out.
    let played = h.played();
    assert_eq!(h.engine.events().count(EventType::CrossfadeStarted), 2);
    assert_eq!(played.len(), 76);
    assert_eq!(played[..36], run(1, 0..36)[..]);
    assert_eq!(played[40..72], run(2, 4..36)[..]);
}

#[test]
fn test_last_song_fades_into_silence() {
    let mut config = config(64, 10.0);
    config.crossfade_seconds = 0.05;
    let h = Harness::new(
        &["a.raw"],
        ScriptedDecoder::new(40),
        config,
        Duration::from_millis(2),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_stop());
    assert_eq!(h.engine.events().count(EventType::CrossfadeStarted), 1);

    let log = h.log.lock().unwrap();
    assert_eq!(log.played.len(), 40);
    assert_eq!(log.played[..37], run(1, 0..37)[..]);

    // The tail ramps down from full level
    let full = i16::from_le_bytes([0x55, 0x55]);
    assert!(log.levels[..37].iter().all(|level| *level == full));
    let tail = &log.levels[37..];
    assert!(tail.iter().all(|level| *level < full && *level > 0));
    assert!(tail.windows(2).all(|pair| pair[1] < pair[0]));
}

#[test]
fn test_unplayable_format_is_rejected() {
    let signals = Arc::new(Mutex::new(Vec::new()));
    let decoder = BadFormatDecoder {
        signals: Arc::clone(&signals),
    };
    let mut h = Harness::new(
        &["a.raw"],
        decoder,
        config(16, 0.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_error());
    assert!(h.wait_for_stop());

    assert_eq!(*signals.lock().unwrap(), vec![DecoderSignal::Stop]);
    assert!(h.played().is_empty());
    assert_eq!(h.engine.decoder().state(), DecoderState::Stopped);

    let error = h.engine.take_error().unwrap();
    assert_eq!(error.kind, PlayerErrorKind::FileError);
    assert!(error.message.contains("0 channel(s)"));

    h.engine.shutdown();
}

#[test]
fn test_panicking_plugin_does_not_hang_shutdown() {
    let mut h = Harness::new(
        &["a.raw"],
        PanickingDecoder,
        config(16, 0.0),
        Duration::ZERO,
    );
    h.engine.play().unwrap();
    assert!(h.wait_until(|h| h.engine.decoder().state() == DecoderState::Quit));

    let error = h.engine.take_error().unwrap();
    assert_eq!(error.kind, PlayerErrorKind::SystemError);
    assert!(error.message.contains("plugin blew up"));

    // Requests to the dead thread return instead of waiting for an answer
    h.engine.stop();
    h.engine.shutdown();
    assert!(h.played().is_empty());
}

#[test]
fn test_device_open_failure_stops_output() {
    let h = Harness::with_fault(
        &["a.raw"],
        ScriptedDecoder::new(10),
        config(16, 0.0),
        Duration::ZERO,
        Fault::Open,
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_error());
    assert!(h.wait_for_stop());

    let error = h.engine.take_error().unwrap();
    assert_eq!(error.kind, PlayerErrorKind::AudioDeviceError);
    assert!(error.message.contains("no such card"));
    assert_eq!(h.engine.events().count(EventType::DeviceError), 1);

    // Never opened, so never closed
    let log = h.log.lock().unwrap();
    assert!(log.played.is_empty());
    assert_eq!(log.closes, 0);
}

#[test]
fn test_device_write_failure_closes_device() {
    let h = Harness::with_fault(
        &["a.raw"],
        ScriptedDecoder::new(40),
        config(16, 10.0),
        Duration::ZERO,
        Fault::PlayAfter(3),
    );
    h.engine.play().unwrap();
    assert!(h.wait_for_error());
    assert!(h.wait_for_stop());

    let error = h.engine.take_error().unwrap();
    assert_eq!(error.kind, PlayerErrorKind::AudioDeviceError);
    assert!(error.message.contains("cable pulled"));
    assert_eq!(h.engine.events().count(EventType::DeviceClosed), 1);

    let log = h.log.lock().unwrap();
    assert_eq!(log.played.len() + log.silent, 3);
    assert_eq!(log.played, run(1, 0..log.played.len()));
    assert_eq!(log.opens.len(), 1);
    assert_eq!(log.closes, 1);
}

#[test]
fn test_missing_file_is_latched_and_skipped() {
    let h = Harness::new(
        &["a.raw", "b.raw"],
        ScriptedDecoder::new(6),
        config(16, 0.0),
        Duration::ZERO,
    );
    let first = h.queue.get(0).unwrap();
    std::fs::remove_file(&first.path).unwrap();

    h.engine.play().unwrap();
    assert!(h.wait_for_stop());
    assert_eq!(h.played(), run(2, 0..6));

    let error = h.engine.take_error().unwrap();
    assert_eq!(error.kind, PlayerErrorKind::FileNotFound);
    assert!(h.engine.take_error().is_none());
}
