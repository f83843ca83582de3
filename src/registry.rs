//! Format plugin registry.
//!
//! Maps file extensions and content signatures to [`FormatBackend`]s.
//! Lookups take a read lock only, so any number of sessions on different
//! threads can resolve formats at once.
//!
//! The process-wide registry is built explicitly with
//! [`initialize_registry`]; nothing is registered behind the caller's back.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::backend::FormatBackend;
use crate::error::ImageIoError;
use crate::input::ImageInput;
use crate::output::ImageOutput;

/// Bytes read from the start of a file for content sniffing.
pub const SIGNATURE_BYTES: usize = 64;

/// Table of format backends keyed by extension.
#[derive(Default)]
pub struct Registry {
    by_key: RwLock<HashMap<String, Arc<dyn FormatBackend>>>,
    /// Distinct backends in registration order, used for sniffing.
    backends: RwLock<Vec<Arc<dyn FormatBackend>>>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("backends", &self.backend_names())
            .field("extensions", &self.extensions())
            .finish()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled PNM, farbfeld and TRF backends.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_backend(Arc::new(crate::pnm::PnmBackend));
        registry.register_backend(Arc::new(crate::farbfeld::FarbfeldBackend));
        registry.register_backend(Arc::new(crate::trf::TrfBackend));
        registry
    }

    /// Bind `key` (an extension such as `"tif"` or `".TIF"`) to `backend`.
    ///
    /// Keys are case-insensitive. Registering a key twice replaces the
    /// earlier binding and logs a warning.
    pub fn register(&self, key: &str, backend: Arc<dyn FormatBackend>) {
        let key = normalize_key(key);
        {
            let mut backends = self.backends.write();
            if !backends.iter().any(|b| Arc::ptr_eq(b, &backend)) {
                backends.push(Arc::clone(&backend));
            }
        }
        let name = backend.name();
        let previous = self.by_key.write().insert(key.clone(), backend);
        match previous {
            Some(prev) => log::warn!(
                "format key '{key}' re-registered: {} replaced by {name}",
                prev.name()
            ),
            None => log::debug!("registered format key '{key}' -> {name}"),
        }
    }

    /// Register `backend` under every extension it declares.
    pub fn register_backend(&self, backend: Arc<dyn FormatBackend>) {
        for ext in backend.extensions() {
            self.register(ext, Arc::clone(&backend));
        }
    }

    /// Backend bound to `ext` (case-insensitive, leading dot optional).
    pub fn find_by_extension(&self, ext: &str) -> Option<Arc<dyn FormatBackend>> {
        self.by_key.read().get(&normalize_key(ext)).cloned()
    }

    /// First backend, in registration order, that identifies `header`.
    pub fn find_by_content(&self, header: &[u8]) -> Option<Arc<dyn FormatBackend>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.identify(header))
            .cloned()
    }

    /// Backend for writing `path`, chosen by extension.
    pub fn resolve_output(&self, path: &Path) -> Result<Arc<dyn FormatBackend>, ImageIoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                ImageIoError::UnsupportedFormat(format!("{} has no extension", path.display()))
            })?;
        self.find_by_extension(ext).ok_or_else(|| {
            ImageIoError::UnsupportedFormat(format!(
                "no backend for extension '{ext}' ({})",
                path.display()
            ))
        })
    }

    /// Backend for reading `path`.
    ///
    /// The extension picks a candidate; the file's first bytes confirm it.
    /// When the content belongs to another registered format, or the
    /// extension is unknown, content sniffing decides.
    pub fn resolve_input(&self, path: &Path) -> Result<Arc<dyn FormatBackend>, ImageIoError> {
        let by_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.find_by_extension(e));

        let header = read_signature(path)?;

        if let Some(backend) = &by_ext {
            if backend.identify(&header) {
                return Ok(Arc::clone(backend));
            }
        }
        if let Some(sniffed) = self.find_by_content(&header) {
            if let Some(backend) = &by_ext {
                log::debug!(
                    "{}: extension says {}, content says {}",
                    path.display(),
                    backend.name(),
                    sniffed.name()
                );
            }
            return Ok(sniffed);
        }
        // Extension match with unrecognizable content; let the reader report the header error.
        by_ext.ok_or_else(|| {
            ImageIoError::UnsupportedFormat(format!(
                "{} does not match any registered format",
                path.display()
            ))
        })
    }

    /// Create an output session for `path` (not yet opened).
    pub fn create_output(&self, path: impl AsRef<Path>) -> Result<ImageOutput, ImageIoError> {
        let backend = self.resolve_output(path.as_ref())?;
        Ok(ImageOutput::new(backend))
    }

    /// Open `path` for reading.
    pub fn open_input(&self, path: impl AsRef<Path>) -> Result<ImageInput, ImageIoError> {
        ImageInput::open(self, path)
    }

    /// Distinct registered backends, in registration order.
    pub fn backends(&self) -> Vec<Arc<dyn FormatBackend>> {
        self.backends.read().clone()
    }

    /// Names of the distinct registered backends, in registration order.
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.read().iter().map(|b| b.name()).collect()
    }

    /// All registered keys, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn read_signature(path: &Path) -> Result<Vec<u8>, ImageIoError> {
    let file = File::open(path).map_err(|e| ImageIoError::open(path, e))?;
    let mut header = Vec::with_capacity(SIGNATURE_BYTES);
    file.take(SIGNATURE_BYTES as u64)
        .read_to_end(&mut header)
        .map_err(|e| ImageIoError::open(path, e))?;
    Ok(header)
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Build the process-wide registry with the bundled backends.
///
/// Call once at startup; later calls return the same registry. Extra
/// backends can be added afterwards with [`Registry::register_backend`].
pub fn initialize_registry() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        log::debug!("initializing process-wide format registry");
        Registry::with_builtins()
    })
}

/// The process-wide registry, if [`initialize_registry`] has run.
pub fn registry() -> Result<&'static Registry, ImageIoError> {
    GLOBAL.get().ok_or(ImageIoError::NotInitialized)
}

/// Create an output session through the process-wide registry.
pub fn create_output(path: impl AsRef<Path>) -> Result<ImageOutput, ImageIoError> {
    registry()?.create_output(path)
}

/// Open an input session through the process-wide registry.
pub fn open_input(path: impl AsRef<Path>) -> Result<ImageInput, ImageIoError> {
    registry()?.open_input(path)
}
