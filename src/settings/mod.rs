// Engine settings, persisted as JSON

pub mod settings;

pub use settings::{EngineSettings, LogSettings, OutputSettings, PlaybackSettings, ResourceSettings};
