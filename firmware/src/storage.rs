//! Byte-addressable non-volatile store (EEPROM emulation).
//!
//! Writes land in a working image and only become durable on `commit`, the
//! same contract as the ESP32 EEPROM emulation: a power loss before commit
//! loses the write, never half of it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::StorageError;

/// Size of the emulated EEPROM.
pub const EEPROM_SIZE: usize = 256;

/// Erased flash reads back as 0xFF.
const ERASED: u8 = 0xFF;

pub trait NvStore: Send {
    fn capacity(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;
    /// Durability barrier for every write since the previous commit.
    fn commit(&mut self) -> Result<(), StorageError>;
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds { offset, len, capacity }),
    }
}

// ─── File-backed store ────────────────────────────────────────────────────────

/// EEPROM image kept in a file. Commit writes a sibling temp file, syncs it
/// and renames it over the image, so the file on disk is always either the
/// previous or the new image.
pub struct FileStore {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut image = match fs::read(&path) {
            Ok(bytes) => {
                info!("EEPROM image loaded from {} ({} bytes)", path.display(), bytes.len());
                bytes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No EEPROM image at {}, starting erased", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        // shrinking would drop data on the next commit
        if image.len() > capacity {
            return Err(StorageError::ImageTooLarge {
                path: path.display().to_string(),
                actual: image.len(),
                capacity,
            });
        }
        image.resize(capacity, ERASED);
        Ok(Self { path, image })
    }
}

impl NvStore for FileStore {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.image.len())?;
        buf.copy_from_slice(&self.image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.image.len())?;
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&self.image)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("EEPROM committed to {}", self.path.display());
        Ok(())
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct MemoryImage {
    working: Vec<u8>,
    durable: Vec<u8>,
    failing_commits: u32,
    commits: u32,
}

/// RAM-backed store with commit semantics and failure injection.
///
/// Clones share the same image, so a test can keep a handle while the
/// calibration store owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    image: Arc<Mutex<MemoryImage>>,
}

impl MemoryStore {
    /// Erased store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::from_bytes(vec![ERASED; capacity])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            image: Arc::new(Mutex::new(MemoryImage {
                working: bytes.clone(),
                durable: bytes,
                failing_commits: 0,
                commits: 0,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryImage) -> R) -> R {
        f(&mut self.image.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.with(|img| img.failing_commits = n);
    }

    /// Successful commits so far.
    pub fn commits(&self) -> u32 {
        self.with(|img| img.commits)
    }

    /// Bytes that would survive a power cycle.
    pub fn durable_bytes(&self) -> Vec<u8> {
        self.with(|img| img.durable.clone())
    }

    /// Simulate a power loss: uncommitted writes are discarded.
    pub fn power_cycle(&self) -> Self {
        Self::from_bytes(self.durable_bytes())
    }
}

impl NvStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.with(|img| img.working.len())
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.with(|img| {
            check_bounds(offset, buf.len(), img.working.len())?;
            buf.copy_from_slice(&img.working[offset..offset + buf.len()]);
            Ok(())
        })
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        self.with(|img| {
            check_bounds(offset, bytes.len(), img.working.len())?;
            img.working[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        })
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.with(|img| {
            if img.failing_commits > 0 {
                img.failing_commits -= 1;
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected commit failure",
                )));
            }
            img.durable = img.working.clone();
            img.commits += 1;
            Ok(())
        })
    }
}
