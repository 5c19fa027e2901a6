//! Cross-fade planning between the tail of one decode pass and the head of
//! the next.
//!
//! With `n` outgoing chunks left, the incoming run starts at index `n` of the
//! read side. Every step mixes read index 0 with read index `n` and then
//! empties the incoming chunk. Both ends shrink by one per step, so the
//! partner index stays constant for the whole fade.

use std::f32::consts::FRAC_PI_2;

use crate::audio::chunk::CHUNK_SIZE;
use crate::models::AudioFormat;

/// Number of chunks that hold `seconds` of audio in `format`
pub fn chunks_for(seconds: f32, format: &AudioFormat) -> usize {
    if seconds <= 0.0 || !format.is_valid() {
        return 0;
    }
    let bytes = seconds as f64 * format.byte_rate() as f64;
    (bytes / CHUNK_SIZE as f64).ceil() as usize
}

/// Gain of the outgoing song with `remaining` of `total` steps to go.
///
/// Equal-power curve: the outgoing gain squared plus the incoming gain
/// squared stays constant.
pub fn old_volume(remaining: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let progress = remaining.min(total) as f32 / total as f32;
    (FRAC_PI_2 * progress).sin().powi(2)
}

/// Decide whether a fade into the next pass can start now.
///
/// `peek(i)` returns `(sequence, length)` of the i-th buffered chunk.
/// Returns the fade length `n`: the outgoing pass ends after exactly `n`
/// chunks, the next pass has at least `n` non-empty chunks buffered right
/// behind it, and `n <= wanted`.
pub fn plan<F>(peek: F, current: u8, wanted: usize) -> Option<usize>
where
    F: Fn(usize) -> Option<(u8, usize)>,
{
    if wanted == 0 {
        return None;
    }

    // The boundary must fall within reach
    let mut boundary = None;
    for index in 0..=wanted {
        let (sequence, _) = peek(index)?;
        if sequence != current {
            boundary = Some((index, sequence));
            break;
        }
    }
    let (n, next) = boundary?;
    if n == 0 {
        return None;
    }

    let run = (n..2 * n)
        .take_while(|&index| matches!(peek(index), Some((sequence, length)) if sequence == next && length > 0))
        .count();
    (run == n).then_some(n)
}

/// Decide whether the last pass can fade out against silence.
///
/// Every buffered chunk must belong to `current`, and there must be at
/// most `wanted` of them. Returns how many chunks the fade spans.
pub fn plan_fade_out<F>(peek: F, current: u8, wanted: usize) -> Option<usize>
where
    F: Fn(usize) -> Option<(u8, usize)>,
{
    if wanted == 0 {
        return None;
    }
    let mut count = 0;
    while let Some((sequence, _)) = peek(count) {
        if sequence != current || count == wanted {
            return None;
        }
        count += 1;
    }
    (count > 0).then_some(count)
}

/// Progress of a running fade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossfade {
    /// Read index of the incoming partner chunk
    pub partner: usize,
    pub total: usize,
    pub remaining: usize,
    /// Incoming pass, `None` when fading into silence
    pub next_sequence: Option<u8>,
}

impl Crossfade {
    pub fn new(chunks: usize, next_sequence: u8) -> Self {
        Self {
            partner: chunks,
            total: chunks,
            remaining: chunks,
            next_sequence: Some(next_sequence),
        }
    }

    pub fn fade_out(chunks: usize) -> Self {
        Self {
            next_sequence: None,
            ..Self::new(chunks, 0)
        }
    }

    /// Gain for the chunk about to be mixed
    pub fn current_volume(&self) -> f32 {
        old_volume(self.remaining, self.total)
    }

    /// Count one mixed chunk; true once the fade is over
    pub fn step(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleFormat;

    fn buffered(layout: &[(u8, usize)]) -> impl Fn(usize) -> Option<(u8, usize)> + '_ {
        move |index| layout.get(index).copied()
    }

    #[test]
    fn test_chunks_for_cd_audio() {
        let cd = AudioFormat::cd();
        // 176400 bytes per second
        assert_eq!(chunks_for(1.0, &cd), 88);
        assert_eq!(chunks_for(0.0, &cd), 0);
        let mono = AudioFormat::new(8000, SampleFormat::S8, 1);
        assert_eq!(chunks_for(0.25, &mono), 1);
    }

    #[test]
    fn test_equal_power_curve() {
        assert!((old_volume(4, 4) - 1.0).abs() < 1e-6);
        assert_eq!(old_volume(0, 4), 0.0);
        let half = old_volume(2, 4);
        assert!((half - 0.5).abs() < 1e-6);

        for step in 0..=8 {
            let old = old_volume(step, 8);
            let new = old_volume(8 - step, 8);
            assert!((old + new - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_plan_needs_boundary_within_reach() {
        let layout = [(1, 10), (1, 10), (1, 10), (1, 10), (2, 10), (2, 10)];
        // Four outgoing chunks but only three wanted
        assert_eq!(plan(buffered(&layout), 1, 3), None);
    }

    #[test]
    fn test_plan_needs_incoming_run() {
        let short = [(1, 10), (1, 10), (2, 10)];
        assert_eq!(plan(buffered(&short), 1, 4), None);

        let ready = [(1, 10), (1, 10), (2, 10), (2, 10), (2, 10)];
        assert_eq!(plan(buffered(&ready), 1, 4), Some(2));
    }

    #[test]
    fn test_plan_skips_excised_partners() {
        let layout = [(1, 10), (1, 10), (2, 0), (2, 10)];
        assert_eq!(plan(buffered(&layout), 1, 4), None);
    }

    #[test]
    fn test_plan_without_next_song() {
        let layout = [(1, 10), (1, 10)];
        assert_eq!(plan(buffered(&layout), 1, 4), None);
        assert_eq!(plan(buffered(&layout), 1, 0), None);

        // The last song fades into silence instead
        assert_eq!(plan_fade_out(buffered(&layout), 1, 4), Some(2));
        assert_eq!(plan_fade_out(buffered(&layout), 1, 2), Some(2));
        assert_eq!(plan_fade_out(buffered(&layout), 1, 0), None);
    }

    #[test]
    fn test_fade_out_waits_for_tail() {
        let long = [(1, 10), (1, 10), (1, 10), (1, 10)];
        assert_eq!(plan_fade_out(buffered(&long), 1, 3), None);
        assert_eq!(plan_fade_out(buffered(&[]), 1, 3), None);

        // Something else is still buffered behind the tail
        let mixed = [(1, 10), (2, 10)];
        assert_eq!(plan_fade_out(buffered(&mixed), 1, 4), None);
    }

    #[test]
    fn test_fade_out_has_no_partner() {
        let fade = Crossfade::fade_out(3);
        assert_eq!(fade.next_sequence, None);
        assert_eq!((fade.total, fade.remaining), (3, 3));
        assert!((fade.current_volume() - 1.0).abs() < 1e-6);
        assert_eq!(Crossfade::new(3, 7).next_sequence, Some(7));
    }

    #[test]
    fn test_fade_steps_down() {
        let mut fade = Crossfade::new(3, 7);
        assert_eq!(fade.partner, 3);
        assert!((fade.current_volume() - 1.0).abs() < 1e-6);
        assert!(!fade.step());
        assert!(fade.current_volume() < 0.9);
        assert!(!fade.step());
        assert!(fade.step());
        assert_eq!(fade.partner, 3);
    }
}
