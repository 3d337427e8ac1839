// Sound registry
// Maps keys to loaded sources and to the sessions playing them.
//
// Create one at startup, share it by reference, and drop (or `shutdown`) it at
// exit: every session is stopped and its thread joined, which closes every line.
// Repeated plays of one key stack: each gets its own session.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::cpal_output::CpalBackend;
use crate::audio::output::AudioBackend;
use crate::audio::session::PlaybackSession;
use crate::audio::source::AudioSource;
use crate::error::{Error, Result};
use crate::settings::EngineSettings;

#[derive(Default)]
struct Inner {
    sources: HashMap<String, AudioSource>,
    sessions: HashMap<String, Vec<Arc<PlaybackSession>>>,
}

impl Inner {
    /// Drop sessions whose thread has exited
    fn prune(&mut self, key: &str) {
        if let Some(sessions) = self.sessions.get_mut(key) {
            sessions.retain(|s| !s.is_finished());
            if sessions.is_empty() {
                self.sessions.remove(key);
            }
        }
    }

    fn all_sessions(&self) -> impl Iterator<Item = &Arc<PlaybackSession>> {
        self.sessions.values().flatten()
    }
}

pub struct SoundRegistry {
    backend: Arc<dyn AudioBackend>,
    settings: EngineSettings,
    inner: Mutex<Inner>,
}

impl SoundRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>, settings: EngineSettings) -> Self {
        debug!("Sound registry using '{}' output", backend.name());
        Self {
            backend,
            settings,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registry playing through the configured cpal output device
    pub fn with_default_output(settings: EngineSettings) -> Result<Self> {
        let settings = settings.validate()?;
        let backend = Arc::new(CpalBackend::new(settings.output.clone()));
        Ok(Self::new(backend, settings))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    // ===== Loading =====

    /// Register an already-loaded source under `key`, replacing any previous one
    pub fn insert(&self, key: &str, source: AudioSource) {
        info!("Loaded '{}' ({} bytes)", key, source.len());
        self.inner.lock().sources.insert(key.to_string(), source);
    }

    pub fn load(&self, key: &str, bytes: impl Into<Vec<u8>>) -> bool {
        self.insert(key, AudioSource::from_bytes(key, bytes));
        true
    }

    pub fn load_reader(&self, key: &str, reader: impl Read) -> bool {
        self.report_load(key, AudioSource::from_reader(key, reader))
    }

    pub fn load_file(&self, key: &str, path: impl AsRef<Path>) -> bool {
        self.report_load(key, AudioSource::from_file(key, path.as_ref()))
    }

    /// Load `name` from the bundled resource directory
    pub fn load_resource(&self, key: &str, name: &str) -> bool {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            warn!("Refusing resource path outside the resource root: {:?}", name);
            return false;
        }

        let path = self.settings.resources.root.join(relative);
        self.report_load(key, AudioSource::from_file(key, &path))
    }

    fn report_load(&self, key: &str, result: Result<AudioSource>) -> bool {
        match result {
            Ok(source) => {
                self.insert(key, source);
                true
            }
            Err(e) => {
                warn!("Failed to load '{}': {}", key, e);
                false
            }
        }
    }

    /// Stop the key's sessions, wait for their threads, and forget its source
    pub fn unload(&self, key: &str) -> bool {
        let (known, sessions) = {
            let mut inner = self.inner.lock();
            let sessions = inner.sessions.remove(key).unwrap_or_default();
            (inner.sources.remove(key).is_some(), sessions)
        };

        for session in &sessions {
            session.stop();
        }
        for session in &sessions {
            session.join();
        }

        if known {
            debug!("Unloaded '{}', stopped {} session(s)", key, sessions.len());
        }
        known
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.inner.lock().sources.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().sources.keys().cloned().collect();
        keys.sort();
        keys
    }

    // ===== Playback =====

    /// Start a new session for `key` and return a handle to it.
    ///
    /// The registry lock is not held while the decoder probes the source or the
    /// line opens, so other keys stay controllable meanwhile.
    pub fn spawn(&self, key: &str, looping: bool) -> Result<Arc<PlaybackSession>> {
        let source = self
            .inner
            .lock()
            .sources
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownKey(key.to_string()))?;

        let session = PlaybackSession::new(&source, looping, &self.settings.playback)?;
        session.start(Arc::clone(&self.backend))?;
        let session = Arc::new(session);

        let mut inner = self.inner.lock();
        if !inner.sources.contains_key(key) {
            // Unloaded while the line was opening
            drop(inner);
            session.stop();
            session.join();
            return Err(Error::UnknownKey(key.to_string()));
        }

        inner.prune(key);
        inner
            .sessions
            .entry(key.to_string())
            .or_default()
            .push(Arc::clone(&session));

        debug!("Playing '{}' as session {} (loop={})", key, session.id(), looping);
        Ok(session)
    }

    /// Start a new session for `key`; false if nothing was started
    pub fn play(&self, key: &str, looping: bool) -> bool {
        match self.spawn(key, looping) {
            Ok(_) => true,
            Err(e) => {
                warn!("Cannot play '{}': {}", key, e);
                false
            }
        }
    }

    /// Pause or resume every session of `key`; false for a key with no live sessions
    pub fn pause(&self, key: &str, pause: bool) -> bool {
        let mut inner = self.inner.lock();
        inner.prune(key);
        match inner.sessions.get(key) {
            Some(sessions) => {
                sessions.iter().for_each(|s| s.pause(pause));
                true
            }
            None => false,
        }
    }

    pub fn pause_all(&self, pause: bool) {
        let inner = self.inner.lock();
        inner.all_sessions().for_each(|s| s.pause(pause));
    }

    /// Stop every session of `key`; false for a key with no live sessions
    pub fn stop(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.prune(key);
        match inner.sessions.get(key) {
            Some(sessions) => {
                sessions.iter().for_each(|s| s.stop());
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let inner = self.inner.lock();
        inner.all_sessions().for_each(|s| s.stop());
    }

    /// Set the volume of every session of `key`.
    /// False for a key with no live sessions or if any session rejected the change.
    pub fn set_volume(&self, key: &str, volume: f32) -> bool {
        let mut inner = self.inner.lock();
        inner.prune(key);
        match inner.sessions.get(key) {
            Some(sessions) => Self::apply_volume(key, sessions.iter(), volume),
            None => false,
        }
    }

    pub fn set_volume_all(&self, volume: f32) -> bool {
        let inner = self.inner.lock();
        Self::apply_volume("*", inner.all_sessions(), volume)
    }

    fn apply_volume<'a>(
        key: &str,
        sessions: impl Iterator<Item = &'a Arc<PlaybackSession>>,
        volume: f32,
    ) -> bool {
        let mut ok = true;
        for session in sessions {
            if let Err(e) = session.set_volume(volume) {
                warn!("Volume change refused by '{}' session {}: {}", key, session.id(), e);
                ok = false;
            }
        }
        ok
    }

    // ===== Inspection =====

    /// Sessions of `key` that have not finished, oldest first
    pub fn sessions(&self, key: &str) -> Vec<Arc<PlaybackSession>> {
        let mut inner = self.inner.lock();
        inner.prune(key);
        inner.sessions.get(key).cloned().unwrap_or_default()
    }

    pub fn active_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .sessions
            .get(key)
            .map(|sessions| sessions.iter().filter(|s| s.is_active()).count())
            .unwrap_or(0)
    }

    pub fn active_total(&self) -> usize {
        self.inner.lock().all_sessions().filter(|s| s.is_active()).count()
    }

    // ===== Teardown =====

    /// Stop every session and wait for their threads to exit
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<PlaybackSession>> = {
            let mut inner = self.inner.lock();
            inner.sessions.drain().flat_map(|(_, sessions)| sessions).collect()
        };

        for session in &sessions {
            session.stop();
        }
        for session in &sessions {
            session.join();
        }

        if !sessions.is_empty() {
            info!("Sound registry shut down, {} session(s) stopped", sessions.len());
        }
    }
}

impl Drop for SoundRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
