use std::fs::File;
use std::path::Path;

use log::{debug, warn};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, Value};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::audio::decoders::{DecoderContext, DecoderSignal, FormatDecoder};
use crate::error::DecodeError;
use crate::models::{AudioFormat, ReplayGainInfo, SampleFormat, Song, Tag};

/// File extensions handed to symphonia
const EXTENSIONS: &[&str] = &[
    "flac", "wav", "wave", "mp3", "ogg", "oga", "m4a", "mp4", "alac", "aac",
];

/// Decodes everything symphonia's default registry can probe
#[derive(Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }

    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Probe `path` and return the format reader plus any container-level tags
    fn probe(path: &Path) -> Result<(Box<dyn FormatReader>, Option<MetadataRevision>), DecodeError> {
        let file = File::open(path)?;
        let media_source = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = Self::extension(path) {
            hint.with_extension(&ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Unsupported(format!("Probe failed: {}", e)))?;

        let container_tags = probed
            .metadata
            .get()
            .and_then(|metadata| metadata.current().cloned());
        Ok((probed.format, container_tags))
    }

    /// Apply tags from a metadata revision
    fn extract_from_revision(
        revision: &MetadataRevision,
        tag: &mut Tag,
        replay_gain: &mut Option<ReplayGainInfo>,
    ) {
        for entry in revision.tags() {
            let Some(key) = entry.std_key else { continue };
            match (key, &entry.value) {
                (StandardTagKey::TrackTitle, Value::String(title)) => tag.title = Some(title.clone()),
                (StandardTagKey::Artist, Value::String(artist)) => tag.artist = Some(artist.clone()),
                (StandardTagKey::Album, Value::String(album)) => tag.album = Some(album.clone()),
                (StandardTagKey::ReplayGainTrackGain, value) => {
                    if let Some(gain) = parse_gain(value) {
                        replay_gain.get_or_insert_with(ReplayGainInfo::default).track_gain = gain;
                    }
                }
                (StandardTagKey::ReplayGainTrackPeak, value) => {
                    if let Some(peak) = parse_gain(value) {
                        replay_gain.get_or_insert_with(ReplayGainInfo::default).track_peak = peak;
                    }
                }
                (StandardTagKey::ReplayGainAlbumGain, value) => {
                    if let Some(gain) = parse_gain(value) {
                        replay_gain.get_or_insert_with(ReplayGainInfo::default).album_gain = gain;
                    }
                }
                (StandardTagKey::ReplayGainAlbumPeak, value) => {
                    if let Some(peak) = parse_gain(value) {
                        replay_gain.get_or_insert_with(ReplayGainInfo::default).album_peak = peak;
                    }
                }
                _ => {}
            }
        }
    }

    /// Tags from the container and the stream, stream taking precedence
    fn read_tags(
        format_reader: &mut dyn FormatReader,
        container_tags: Option<&MetadataRevision>,
    ) -> (Tag, Option<ReplayGainInfo>) {
        let mut tag = Tag::default();
        let mut replay_gain = None;
        if let Some(revision) = container_tags {
            Self::extract_from_revision(revision, &mut tag, &mut replay_gain);
        }
        if let Some(revision) = format_reader.metadata().current() {
            Self::extract_from_revision(revision, &mut tag, &mut replay_gain);
        }
        (tag, replay_gain)
    }

    /// PCM layout the decoder emits for a stream of `bits` bits per sample
    fn output_sample_format(bits: Option<u32>) -> SampleFormat {
        match bits {
            Some(bits) if bits > 16 => SampleFormat::for_bits(bits).unwrap_or(SampleFormat::S32),
            _ => SampleFormat::S16,
        }
    }
}

fn parse_gain(value: &Value) -> Option<f32> {
    match value {
        Value::Float(v) => Some(*v as f32),
        Value::String(s) => s
            .trim()
            .trim_end_matches("dB")
            .trim_end_matches("db")
            .trim()
            .parse()
            .ok(),
        _ => None,
    }
}

fn seconds(time: Time) -> f32 {
    (time.seconds as f64 + time.frac) as f32
}

/// Interleave `samples` (full-scale i32) into little-endian `format` bytes
fn encode_pcm(samples: &[i32], format: SampleFormat, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * format.bytes());
    for &sample in samples {
        match format {
            SampleFormat::S8 => out.push((sample >> 24) as i8 as u8),
            SampleFormat::S16 => out.extend_from_slice(&((sample >> 16) as i16).to_le_bytes()),
            SampleFormat::S24 => out.extend_from_slice(&(sample >> 8).to_le_bytes()[..3]),
            SampleFormat::S32 => out.extend_from_slice(&sample.to_le_bytes()),
            SampleFormat::F32 => {
                out.extend_from_slice(&(sample as f32 / 2_147_483_648.0).to_le_bytes())
            }
        }
    }
}

impl FormatDecoder for SymphoniaDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn try_decode(&self, song: &Song) -> bool {
        Self::extension(&song.path)
            .map(|ext| EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    fn decode(&self, context: &mut dyn DecoderContext, song: &Song) -> Result<(), DecodeError> {
        let (mut format_reader, container_tags) = Self::probe(&song.path)?;

        // Find the first audio track
        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("No audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(format!("Failed to create decoder: {}", e)))?;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| DecodeError::Malformed("Stream has no sample rate".to_string()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let sample_format = Self::output_sample_format(params.bits_per_sample);
        let audio_format = AudioFormat::new(sample_rate, sample_format, channels);
        let time_base = params.time_base.unwrap_or(TimeBase::new(1, sample_rate));

        let total_time = params
            .n_frames
            .map(|frames| frames as f32 / sample_rate as f32)
            .unwrap_or(0.0);

        let (_, replay_gain) = Self::read_tags(format_reader.as_mut(), container_tags.as_ref());

        debug!(
            "Decoding {} as {} ({:.1}s)",
            song.path.display(),
            audio_format.format_description(),
            total_time
        );
        context.start(audio_format, total_time, replay_gain);

        let mut sample_buffer: Option<SampleBuffer<i32>> = None;
        let mut pcm = Vec::new();

        loop {
            if let Some(target) = context.is_seek_requested() {
                let seek_to = SeekTo::Time {
                    time: Time::new(target.trunc() as u64, target.fract() as f64),
                    track_id: Some(track_id),
                };
                match format_reader.seek(SeekMode::Accurate, seek_to) {
                    Ok(seeked) => {
                        decoder.reset();
                        context.seek_complete(Some(seconds(time_base.calc_time(seeked.actual_ts))));
                    }
                    Err(e) => {
                        debug!("Seek to {:.2}s failed: {}", target, e);
                        context.seek_complete(None);
                    }
                }
            }

            if context.should_interrupt() {
                return Ok(());
            }

            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    // End of stream
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(DecodeError::Unsupported(
                        "Stream parameters changed mid-stream".to_string(),
                    ));
                }
                Err(err) => {
                    return Err(DecodeError::Malformed(format!("Failed to read packet: {}", err)));
                }
            };

            // Only process packets for our track
            if packet.track_id() != track_id {
                continue;
            }

            let time = seconds(time_base.calc_time(packet.ts()));
            let duration = seconds(time_base.calc_time(packet.dur()));
            let bit_rate = if duration > 0.0 {
                (packet.buf().len() as f32 * 8.0 / duration / 1000.0).round() as u32
            } else {
                0
            };

            let decoded: AudioBufferRef = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Recoverable: skip the damaged packet
                    warn!("Skipping undecodable packet in {}: {}", song.path.display(), msg);
                    continue;
                }
                Err(err) => {
                    return Err(DecodeError::Malformed(format!("Failed to decode packet: {}", err)));
                }
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if sample_buffer.as_ref().map_or(true, |buffer| buffer.capacity() < needed) {
                sample_buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buffer) = sample_buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);
            encode_pcm(buffer.samples(), sample_format, &mut pcm);

            if context.push_chunk(&pcm, time, bit_rate) == DecoderSignal::Stop {
                return Ok(());
            }
        }
    }

    fn tag_read(&self, path: &Path) -> Option<Tag> {
        let (mut format_reader, container_tags) = Self::probe(path).ok()?;
        let (mut tag, _) = Self::read_tags(format_reader.as_mut(), container_tags.as_ref());

        // Calculate duration
        if let Some(track) = format_reader.default_track() {
            if let (Some(frames), Some(rate)) =
                (track.codec_params.n_frames, track.codec_params.sample_rate)
            {
                tag.duration = Some(frames as f32 / rate as f32);
            }
        }
        Some(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// A canonical 16-bit PCM WAV file of `frames` frames of a ramp
    fn write_wav(sample_rate: u32, channels: u16, frames: u32) -> NamedTempFile {
        let block_align = channels as u32 * 2;
        let data_len = frames * block_align;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
        bytes.extend_from_slice(&(block_align as u16).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for frame in 0..frames {
            for _ in 0..channels {
                bytes.extend_from_slice(&((frame % 1000) as i16).to_le_bytes());
            }
        }

        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[derive(Default)]
    struct RecordingContext {
        format: Option<AudioFormat>,
        total_time: f32,
        pcm: Vec<u8>,
        seek_target: Option<f32>,
        seek_results: Vec<Option<f32>>,
        stop_after: Option<usize>,
        pushes: usize,
    }

    impl DecoderContext for RecordingContext {
        fn start(&mut self, format: AudioFormat, total_time: f32, _replay_gain: Option<ReplayGainInfo>) {
            self.format = Some(format);
            self.total_time = total_time;
        }

        fn push_chunk(&mut self, pcm: &[u8], _time: f32, _bit_rate: u32) -> DecoderSignal {
            self.pcm.extend_from_slice(pcm);
            self.pushes += 1;
            match self.stop_after {
                Some(limit) if self.pushes >= limit => DecoderSignal::Stop,
                _ => DecoderSignal::None,
            }
        }

        fn should_interrupt(&mut self) -> bool {
            false
        }

        fn is_seek_requested(&mut self) -> Option<f32> {
            self.seek_target
        }

        fn seek_complete(&mut self, position: Option<f32>) {
            self.seek_target = None;
            self.seek_results.push(position);
        }
    }

    #[test]
    fn test_try_decode_by_extension() {
        let decoder = SymphoniaDecoder::new();
        assert!(decoder.try_decode(&Song::new(1, "a.FLAC".into())));
        assert!(decoder.try_decode(&Song::new(1, "b.ogg".into())));
        assert!(!decoder.try_decode(&Song::new(1, "c.txt".into())));
        assert!(!decoder.try_decode(&Song::new(1, "noext".into())));
    }

    #[test]
    fn test_decode_wav_to_pcm() {
        let file = write_wav(8000, 2, 4000);
        let song = Song::new(1, file.path().to_path_buf());
        let mut context = RecordingContext::default();

        SymphoniaDecoder::new().decode(&mut context, &song).unwrap();

        assert_eq!(context.format, Some(AudioFormat::new(8000, SampleFormat::S16, 2)));
        assert!((context.total_time - 0.5).abs() < 1e-3);
        assert_eq!(context.pcm.len(), 4000 * 4);
        // Ramp survives the i32 round trip bit-exactly
        assert_eq!(i16::from_le_bytes([context.pcm[4 * 7], context.pcm[4 * 7 + 1]]), 7);
    }

    #[test]
    fn test_stop_signal_ends_decode() {
        let file = write_wav(8000, 1, 8000);
        let song = Song::new(1, file.path().to_path_buf());
        let mut context = RecordingContext {
            stop_after: Some(1),
            ..Default::default()
        };

        SymphoniaDecoder::new().decode(&mut context, &song).unwrap();
        assert_eq!(context.pushes, 1);
        assert!(context.pcm.len() < 8000 * 2);
    }

    #[test]
    fn test_seek_past_end_reports_failure() {
        let file = write_wav(8000, 1, 8000);
        let song = Song::new(1, file.path().to_path_buf());
        let mut context = RecordingContext {
            seek_target: Some(999_999.0),
            stop_after: Some(1),
            ..Default::default()
        };

        SymphoniaDecoder::new().decode(&mut context, &song).unwrap();
        assert_eq!(context.seek_results, vec![None]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let song = Song::new(1, "/nonexistent/file.flac".into());
        let mut context = RecordingContext::default();
        let result = SymphoniaDecoder::new().decode(&mut context, &song);
        assert!(matches!(result, Err(DecodeError::Io(_))));
        assert!(context.format.is_none());
    }

    #[test]
    fn test_tag_read_reports_duration() {
        let file = write_wav(8000, 1, 16000);
        let tag = SymphoniaDecoder::new().tag_read(file.path()).unwrap();
        assert!((tag.duration.unwrap() - 2.0).abs() < 1e-3);
        assert!(tag.title.is_none());
    }

    #[test]
    fn test_encode_pcm_layouts() {
        let samples = [0x1234_5678i32, -0x0100_0000];
        let mut out = Vec::new();

        encode_pcm(&samples, SampleFormat::S16, &mut out);
        assert_eq!(out, vec![0x34, 0x12, 0x00, 0xff]);

        encode_pcm(&samples, SampleFormat::S24, &mut out);
        assert_eq!(out, vec![0x56, 0x34, 0x12, 0x00, 0x00, 0xff]);
    }

    #[test]
    fn test_parse_gain_strings() {
        assert_eq!(parse_gain(&Value::String("-6.50 dB".to_string())), Some(-6.5));
        assert_eq!(parse_gain(&Value::String("0.988".to_string())), Some(0.988));
        assert_eq!(parse_gain(&Value::Boolean(true)), None);
    }
}
