// Chime - in-process sound playback manager
// Module declarations
pub mod audio;
pub mod error;
pub mod logging;
pub mod registry;
pub mod settings;

pub use audio::{AudioBackend, AudioSource, CpalBackend, MemoryBackend, PlaybackSession, PlaybackState};
pub use error::{Error, Result};
pub use registry::SoundRegistry;
pub use settings::EngineSettings;
