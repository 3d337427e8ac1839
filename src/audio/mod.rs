// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod cpal_output;
pub mod decoder;
pub mod format;
pub mod memory;
pub mod output;
pub mod session;
pub mod source;

pub use cpal_output::CpalBackend;
pub use decoder::{AudioDecoder, PcmStream};
pub use format::AudioFormat;
pub use memory::{LineRecord, MemoryBackend};
pub use output::{volume_to_db, AudioBackend, GainControl, OutputLine, SILENCE_FLOOR_DB};
pub use session::{PlaybackSession, PlaybackState};
pub use source::AudioSource;
