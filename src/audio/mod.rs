pub mod action;
pub mod chunk;
pub mod decode;
pub mod decoders;
pub mod device;
pub mod engine;
pub mod output;
pub mod pcm;
pub mod ring;
pub mod sequence;
pub mod sync;

use std::sync::Arc;

use crate::error::ErrorLatch;
use crate::logging::EventLog;
use crate::queue::SongQueue;

pub use chunk::{Chunk, SongInfo, CHUNK_SIZE};
pub use decode::{DecoderControl, DecoderState, SeekResult};
pub use decoders::{DecoderContext, DecoderSignal, FormatDecoder, PluginRegistry, SymphoniaDecoder};
pub use device::{AudioDevice, CpalDevice, DeviceFactory, NullDevice};
pub use engine::Engine;
pub use output::{OutputBuffer, OutputState, PauseMode};
pub use ring::{RingMonitor, RingReader, RingWriter};
pub use sequence::SequenceCoordinator;
pub use sync::SyncSignal;

/// Handles every thread of the player shares
#[derive(Clone)]
pub struct Pipeline {
    pub dc: Arc<DecoderControl>,
    pub ob: Arc<OutputBuffer>,
    pub queue: Arc<dyn SongQueue>,
    pub errors: Arc<ErrorLatch>,
    pub events: Arc<EventLog>,
}
