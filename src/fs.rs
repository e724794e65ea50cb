//! The filesystem facade: ties the block device, BPB, FAT table and
//! directory cache together into the capability set a caller (the shell, or
//! the GRUB installer) actually uses. Dispatch is an enum over filesystem
//! variants rather than a trait object, since there is exactly one variant
//! today (FAT12) and future ones would be added the same way.

use chrono::{NaiveDateTime, Utc};
use log::{debug, info};

use crate::block::{BlockDevice, MediaKind};
use crate::bpb::BiosParameterBlock;
use crate::dir::DirectoryCache;
use crate::error::{FsError, Result};
use crate::fat_table::FatTable;
use crate::name::Attributes;
use crate::node::Node;

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// A mounted FAT12 volume: BPB, both in-memory FAT copies folded into one
/// buffer, and the currently active directory.
pub struct Fat12FileSystem {
    device: BlockDevice,
    bpb: BiosParameterBlock,
    fat: FatTable,
    current: DirectoryCache,
    current_path: Vec<u32>,
}

impl Fat12FileSystem {
    pub fn format(mut device: BlockDevice, label: &str, extra_reserved: u16, boot_code: Option<[u8; 448]>) -> Result<BlockDevice> {
        let total = device.total_sectors()?;
        let mut bpb = BiosParameterBlock::new_floppy_defaults(label, total as u32, extra_reserved);
        if let Some(code) = boot_code {
            bpb.boot_code = code;
        }

        info!("formatting {:?} as FAT12 (label={:?}, {} sectors)", device.path(), label, total);

        let mut sector = [0u8; crate::bpb::SECTOR_LEN];
        bpb.write(&mut sector);
        device.write_sector(0, &sector)?;

        let fat_size_bytes = (bpb.fat_size() * bpb.bytes_per_sector as u32) as usize;
        let mut fat_bytes = vec![0u8; fat_size_bytes];
        // Reserved entries conventionally carry the media descriptor byte.
        fat_bytes[0] = bpb.media_type;
        fat_bytes[1] = 0xFF;
        fat_bytes[2] = 0xFF;

        for n in 0..bpb.table_count {
            device.write_sectors(bpb.fat_start(n as u32) as u64, bpb.fat_size() as u64, &fat_bytes)?;
        }

        let root_bytes = vec![0u8; (bpb.root_dir_size() * bpb.bytes_per_sector as u32) as usize];
        device.write_sectors(bpb.root_dir_start() as u64, bpb.root_dir_size() as u64, &root_bytes)?;

        Ok(device)
    }

    pub fn mount(mut device: BlockDevice) -> Result<Self> {
        let sector = device.read_sector(0)?;
        let bpb = BiosParameterBlock::read(&sector)?;
        bpb.validate_fat12()?;

        let fat_bytes = device.read_sectors(bpb.fat_start(0) as u64, bpb.fat_size() as u64)?;
        let fat = FatTable::from_bpb(&bpb, fat_bytes);

        let current = DirectoryCache::load(&mut device, &bpb, &fat, 0)?;

        debug!("mounted {:?}: {} clusters, {} root slots", device.path(), bpb.total_clusters(), current.nodes.len());

        Ok(Self {
            device,
            bpb,
            fat,
            current,
            current_path: Vec::new(),
        })
    }

    pub fn unmount(self) -> BlockDevice {
        info!("unmounting {:?}", self.device.path());
        self.device
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    pub fn device(&mut self) -> &mut BlockDevice {
        &mut self.device
    }

    pub fn get_directory_list(&self) -> impl Iterator<Item = &Node> {
        self.current.live_nodes()
    }

    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.current.find_by_name(name).map(|i| &self.current.nodes[i])
    }

    /// Switches the current directory to `name`, which must already exist
    /// and be a directory.
    pub fn set_directory(&mut self, name: &str) -> Result<()> {
        let idx = self
            .current
            .find_by_name(name)
            .ok_or_else(|| FsError::NotFound { name: name.to_string() })?;
        let node = &self.current.nodes[idx];
        if !node.is_directory() {
            return Err(FsError::InvalidArg {
                reason: format!("'{}' is not a directory", name),
            });
        }

        let target_cluster = node.first_cluster;
        let new_cache = DirectoryCache::load(&mut self.device, &self.bpb, &self.fat, target_cluster)?;
        self.current_path.push(self.current.first_cluster);
        self.current = new_cache;
        Ok(())
    }

    pub fn create_file(&mut self, name: &str) -> Result<()> {
        self.current
            .create(&mut self.device, &self.bpb, &mut self.fat, name, Attributes::empty(), now())?;
        Ok(())
    }

    pub fn create_dir(&mut self, name: &str) -> Result<()> {
        self.current
            .create(&mut self.device, &self.bpb, &mut self.fat, name, Attributes::DIRECTORY, now())?;
        Ok(())
    }

    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let idx = self.current.find_by_name(name).ok_or_else(|| FsError::NotFound { name: name.to_string() })?;
        let node = &self.current.nodes[idx];
        let size = node.size as usize;
        let first_cluster = node.first_cluster;

        let mut out = Vec::with_capacity(size);
        for cluster in self.fat.chain(first_cluster)? {
            let sector = self.bpb.sector_for_cluster(cluster) as u64;
            out.extend(self.device.read_sectors(sector, self.bpb.sectors_per_cluster as u64)?);
        }
        out.truncate(size);
        Ok(out)
    }

    pub fn write(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let idx = match self.current.find_by_name(name) {
            Some(i) => i,
            None => self
                .current
                .create(&mut self.device, &self.bpb, &mut self.fat, name, Attributes::empty(), now())?,
        };

        let required = FatTable::clusters_for_size(bytes.len() as u32, self.bpb.bytes_per_sector as u32, self.bpb.sectors_per_cluster as u32);
        let old_head = self.current.nodes[idx].first_cluster;
        let new_head = self.fat.reallocate_chain(old_head, required)?;

        let bytes_per_cluster = self.bpb.bytes_per_cluster() as usize;
        for (cluster, chunk) in self.fat.chain(new_head)?.iter().zip(bytes.chunks(bytes_per_cluster)) {
            let mut padded = chunk.to_vec();
            padded.resize(bytes_per_cluster, 0);
            let sector = self.bpb.sector_for_cluster(*cluster) as u64;
            self.device.write_sectors(sector, self.bpb.sectors_per_cluster as u64, &padded)?;
        }

        let node = &mut self.current.nodes[idx];
        node.first_cluster = new_head;
        node.size = bytes.len() as u32;
        node.modified = now();
        node.accessed = node.modified;
        node.dirty = true;

        self.flush()
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.current.remove(&mut self.fat, name)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        for n in 0..self.bpb.table_count {
            self.device
                .write_sectors(self.bpb.fat_start(n as u32) as u64, self.bpb.fat_size() as u64, self.fat.bytes())?;
        }
        self.current.flush(&mut self.device, &self.bpb, &self.fat)
    }

    /// Absolute on-disk sector numbers, in order, for every sector `name`
    /// occupies. The GRUB installer uses this to locate `STAGE2`'s first and
    /// second sectors.
    pub fn absolute_sectors(&mut self, name: &str) -> Result<Vec<u64>> {
        let idx = self.current.find_by_name(name).ok_or_else(|| FsError::NotFound { name: name.to_string() })?;
        let first_cluster = self.current.nodes[idx].first_cluster;

        let mut out = Vec::new();
        for cluster in self.fat.chain(first_cluster)? {
            let start = self.bpb.sector_for_cluster(cluster) as u64;
            for s in 0..self.bpb.sectors_per_cluster as u64 {
                out.push(start + s);
            }
        }
        Ok(out)
    }
}

/// Dispatches filesystem operations by type name. A second variant (FAT16,
/// FAT32, ...) would be added here rather than via a trait object, since the
/// set of on-disk formats this engine understands is closed and small.
pub enum FileSystemHandle {
    Fat12(Fat12FileSystem),
}

impl FileSystemHandle {
    pub fn type_name(&self) -> &'static str {
        match self {
            FileSystemHandle::Fat12(_) => "FAT12",
        }
    }

    pub fn mount(device: BlockDevice) -> Result<Self> {
        Ok(FileSystemHandle::Fat12(Fat12FileSystem::mount(device)?))
    }

    pub fn as_fat12(&mut self) -> &mut Fat12FileSystem {
        match self {
            FileSystemHandle::Fat12(fs) => fs,
        }
    }
}

pub fn default_media_for_extension(path: &std::path::Path) -> MediaKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some("img") | Some("flp") => MediaKind::Floppy,
        _ => MediaKind::HardDisk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    #[test]
    fn format_mount_touch_write_read_round_trip() {
        let path = temp_path("e2e");
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 2880).unwrap();
        let dev = Fat12FileSystem::format(dev, "TESTVOL", 0, None).unwrap();

        let mut fs = Fat12FileSystem::mount(dev).unwrap();
        fs.create_file("hello.txt").unwrap();
        assert!(fs.get_node("hello.txt").is_some());

        fs.write("hello.txt", b"hello, world").unwrap();
        let contents = fs.read("hello.txt").unwrap();
        assert_eq!(contents, b"hello, world");

        fs.remove("hello.txt").unwrap();
        assert!(fs.get_node("hello.txt").is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_grows_across_multiple_clusters() {
        let path = temp_path("grow");
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 2880).unwrap();
        let dev = Fat12FileSystem::format(dev, "TESTVOL", 0, None).unwrap();

        let mut fs = Fat12FileSystem::mount(dev).unwrap();
        let payload = vec![0xAB; 2000];
        fs.write("big.bin", &payload).unwrap();
        let back = fs.read("big.bin").unwrap();
        assert_eq!(back, payload);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn mkdir_creates_dot_and_dotdot() {
        let path = temp_path("mkdir");
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 2880).unwrap();
        let dev = Fat12FileSystem::format(dev, "TESTVOL", 0, None).unwrap();

        let mut fs = Fat12FileSystem::mount(dev).unwrap();
        fs.create_dir("sub").unwrap();
        fs.flush().unwrap();
        fs.set_directory("sub").unwrap();

        assert!(fs.get_node(".").is_some());
        assert!(fs.get_node("..").is_some());

        std::fs::remove_file(&path).ok();
    }
}
