//! Logo loading and per-worker logo copies

use crate::error::{Error, Result};
use image::RgbaImage;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A logo bitmap loaded once at startup and passed to the pipeline explicitly
#[derive(Debug, Clone)]
pub struct Logo {
    image: Arc<RgbaImage>,
    source: Option<PathBuf>,
}

impl Logo {
    /// Load a logo from any raster format the `image` crate understands.
    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| Error::Logo(format!("Failed to load {}: {e}", path.display())))?
            .to_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Logo(format!("{} is empty", path.display())));
        }
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "Loaded logo"
        );
        Ok(Self {
            image: Arc::new(image),
            source: Some(path.to_path_buf()),
        })
    }

    /// Wrap an in-memory bitmap
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            source: None,
        }
    }

    /// The bitmap
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// File the logo was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Per-worker logo copies, keyed by worker id.
///
/// A worker borrows its copy for the duration of one encode through a
/// [`LogoLease`]; the copy goes back into the pool when the lease drops.
#[derive(Debug, Default)]
pub struct LogoPool {
    logo: Option<Logo>,
    slots: Mutex<HashMap<usize, RgbaImage>>,
}

impl LogoPool {
    /// Pool handing out copies of `logo`; `None` disables logos entirely.
    pub fn new(logo: Option<Logo>) -> Self {
        Self {
            logo,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a logo is configured
    pub fn has_logo(&self) -> bool {
        self.logo.is_some()
    }

    /// Shared source bitmap
    pub fn logo(&self) -> Option<&Logo> {
        self.logo.as_ref()
    }

    /// Acquire `worker_id`'s copy, creating it on first use.
    pub fn lease(&self, worker_id: usize) -> Option<LogoLease<'_>> {
        let logo = self.logo.as_ref()?;
        let image = self
            .slots()
            .remove(&worker_id)
            .unwrap_or_else(|| logo.image().clone());
        Some(LogoLease {
            pool: self,
            worker_id,
            image,
        })
    }

    /// Number of worker copies currently parked in the pool
    pub fn idle_copies(&self) -> usize {
        self.slots().len()
    }

    /// Drop every cached copy.
    pub fn release_all(&self) {
        self.slots().clear();
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<usize, RgbaImage>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped access to one worker's logo copy
pub struct LogoLease<'a> {
    pool: &'a LogoPool,
    worker_id: usize,
    image: RgbaImage,
}

impl LogoLease<'_> {
    /// Worker that holds this lease
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
}

impl Deref for LogoLease<'_> {
    type Target = RgbaImage;

    fn deref(&self) -> &RgbaImage {
        &self.image
    }
}

impl Drop for LogoLease<'_> {
    fn drop(&mut self) {
        let image = std::mem::take(&mut self.image);
        self.pool.slots().insert(self.worker_id, image);
    }
}
