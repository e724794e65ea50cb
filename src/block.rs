//! Random-access, fixed-size-sector I/O over an image file standing in for a
//! block device. Sector size is a runtime value rather than a compile-time
//! one, since the BPB read at mount time is what actually determines it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{FsError, Result};

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Distinguishes floppy and hard-disk media, which affects GRUB patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Floppy,
    HardDisk,
}

impl MediaKind {
    pub fn as_byte(self) -> u8 {
        match self {
            MediaKind::Floppy => 0x00,
            MediaKind::HardDisk => 0x80,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        if b == 0x80 {
            MediaKind::HardDisk
        } else {
            MediaKind::Floppy
        }
    }
}

/// A block device backed by a flat host file. Reads/writes are always
/// sector-aligned and sector-sized; every write is flushed before returning.
#[derive(Debug)]
pub struct BlockDevice {
    path: PathBuf,
    handle: File,
    sector_size: u32,
    media: MediaKind,
}

impl BlockDevice {
    /// Opens (or creates, if `create` is set) an image file as a device.
    pub fn create(path: impl AsRef<Path>, media: MediaKind, create: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)
            .map_err(|source| FsError::Io {
                path: path.clone(),
                source,
            })?;

        debug!("opened device {:?} (media={:?}, create={})", path, media, create);

        Ok(Self {
            path,
            handle,
            sector_size: DEFAULT_SECTOR_SIZE,
            media,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn set_sector_size(&mut self, bps: u32) {
        self.sector_size = bps;
    }

    /// Truncates the image and writes `sector_count` zero-filled sectors of
    /// `bps` bytes each, sequentially.
    pub fn init(&mut self, bps: u32, sector_count: u64) -> Result<()> {
        debug!(
            "initializing device {:?}: {} sectors of {} bytes",
            self.path, sector_count, bps
        );

        self.sector_size = bps;
        self.handle.set_len(0).map_err(|source| FsError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.handle
            .seek(SeekFrom::Start(0))
            .map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?;

        let zeros = vec![0u8; bps as usize];
        for _ in 0..sector_count {
            self.handle.write_all(&zeros).map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        self.handle.flush().map_err(|source| FsError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    pub fn total_sectors(&self) -> Result<u64> {
        let len = self
            .handle
            .metadata()
            .map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?
            .len();
        Ok(len / self.sector_size as u64)
    }

    fn check_range(&self, idx: u64, n: u64) -> Result<()> {
        let total = self.total_sectors()?;
        if idx.checked_add(n).map_or(true, |end| end > total) {
            warn!(
                "sector range [{}, {}) out of bounds (device has {} sectors)",
                idx,
                idx + n,
                total
            );
            return Err(FsError::OutOfRange { sector: idx, total });
        }
        Ok(())
    }

    pub fn read_sector(&mut self, idx: u64) -> Result<Vec<u8>> {
        self.read_sectors(idx, 1)
    }

    pub fn read_sectors(&mut self, idx: u64, n: u64) -> Result<Vec<u8>> {
        self.check_range(idx, n)?;

        let offset = idx * self.sector_size as u64;
        let mut buf = vec![0u8; (n * self.sector_size as u64) as usize];

        self.handle
            .seek(SeekFrom::Start(offset))
            .map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.handle
            .read_exact(&mut buf)
            .map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?;

        Ok(buf)
    }

    pub fn write_sector(&mut self, idx: u64, data: &[u8]) -> Result<()> {
        self.write_sectors(idx, 1, data)
    }

    pub fn write_sectors(&mut self, idx: u64, n: u64, data: &[u8]) -> Result<()> {
        self.check_range(idx, n)?;

        let expected = (n * self.sector_size as u64) as usize;
        if data.len() != expected {
            return Err(FsError::InvalidArg {
                reason: format!(
                    "write_sectors given {} bytes for {} sector(s) of {} bytes",
                    data.len(),
                    n,
                    self.sector_size
                ),
            });
        }

        let offset = idx * self.sector_size as u64;
        self.handle
            .seek(SeekFrom::Start(offset))
            .map_err(|source| FsError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.handle.write_all(data).map_err(|source| FsError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.handle.flush().map_err(|source| FsError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Releases the device. Consuming `self` drops the handle; this exists so
    /// callers have an explicit, loggable point to call out "detach".
    pub fn destroy(self) {
        debug!("closing device {:?}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    #[test]
    fn init_then_read_write_round_trip() {
        let path = temp_path("rw.img");
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 8).unwrap();
        assert_eq!(dev.total_sectors().unwrap(), 8);

        let mut sector = vec![0u8; 512];
        sector[0] = 0xAB;
        dev.write_sector(3, &sector).unwrap();

        let read_back = dev.read_sector(3).unwrap();
        assert_eq!(read_back, sector);

        // Untouched sectors stay zero.
        let other = dev.read_sector(4).unwrap();
        assert!(other.iter().all(|&b| b == 0));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let path = temp_path("oob.img");
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 4).unwrap();

        let err = dev.read_sector(4).unwrap_err();
        assert!(matches!(err, FsError::OutOfRange { sector: 4, total: 4 }));

        let err = dev.read_sectors(2, 10).unwrap_err();
        assert!(matches!(err, FsError::OutOfRange { .. }));

        std::fs::remove_file(&path).ok();
    }
}
