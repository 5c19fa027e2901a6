//! Pass tags shared by the decode and output threads. Every chunk carries
//! the tag of the pass that produced it, so stale audio can be recognised
//! after a skip or seek without locking the ring.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

/// Generation tags telling which decode pass a chunk belongs to.
///
/// `decoder` is written only by the decode thread; `player` only by the
/// output thread but read by anyone, under its own lock.
#[derive(Debug, Default)]
pub struct SequenceCoordinator {
    decoder: AtomicU8,
    player: Mutex<u8>,
}

impl SequenceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag stamped on chunks of the current decode pass
    pub fn decoder(&self) -> u8 {
        self.decoder.load(Ordering::Acquire)
    }

    /// Begin a new decode pass, returning its tag. Wraps at 256.
    pub fn advance_decoder(&self) -> u8 {
        let next = self.decoder().wrapping_add(1);
        self.decoder.store(next, Ordering::Release);
        next
    }

    /// Tag of the pass currently audible
    pub fn player(&self) -> u8 {
        *self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_player(&self, sequence: u8) {
        *self.player.lock().unwrap_or_else(PoisonError::into_inner) = sequence;
    }

    /// Whether the decoder is still producing the pass that is audible
    pub fn in_step(&self) -> bool {
        self.player() == self.decoder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_sequence_increments_and_wraps() {
        let sequence = SequenceCoordinator::new();
        assert_eq!(sequence.decoder(), 0);
        assert_eq!(sequence.advance_decoder(), 1);
        assert_eq!(sequence.advance_decoder(), 2);

        for _ in 2..255 {
            sequence.advance_decoder();
        }
        assert_eq!(sequence.decoder(), 255);
        assert_eq!(sequence.advance_decoder(), 0);
    }

    #[test]
    fn test_player_sequence_tracks_independently() {
        let sequence = SequenceCoordinator::new();
        sequence.advance_decoder();
        assert!(!sequence.in_step());

        sequence.set_player(1);
        assert_eq!(sequence.player(), 1);
        assert!(sequence.in_step());
    }
}
