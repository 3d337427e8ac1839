// Loaded sound data
// Encoded bytes are immutable once loaded and shared by every session playing them

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct AudioSource {
    id: String,
    bytes: Arc<[u8]>,
}

impl AudioSource {
    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            bytes: Arc::from(bytes.into().into_boxed_slice()),
        }
    }

    /// Read a stream to its end
    pub fn from_reader(id: impl Into<String>, mut reader: impl Read) -> Result<Self> {
        let id = id.into();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|source| Error::Load {
            path: PathBuf::from(&id),
            source,
        })?;
        Ok(Self::from_bytes(id, bytes))
    }

    pub fn from_file(id: impl Into<String>, path: &Path) -> Result<Self> {
        let load_error = |source| Error::Load {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(load_error)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(load_error)?;
        Ok(Self::from_bytes(id, bytes))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the encoded bytes; each reader gets its own cursor
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
