//! The directory cache: an in-memory decode of one directory's on-disk
//! region (the fixed root region, or a subdirectory's cluster chain), with
//! dirty-tracking and flush-back. Entries live in a flat `Vec<Node>` rather
//! than an intrusive linked list, indexed by position instead of pointer.

use chrono::NaiveDateTime;
use log::{debug, warn};

use crate::block::BlockDevice;
use crate::bpb::BiosParameterBlock;
use crate::error::{FsError, Result};
use crate::fat_table::FatTable;
use crate::name::{self, Attributes};
use crate::node::{Node, NodeState};
use crate::sfn::{Sfn, SFN_LEN};

/// Decoded directory contents. `first_cluster == 0` means this is the root
/// directory, living in the fixed on-disk region rather than a cluster chain.
#[derive(Debug)]
pub struct DirectoryCache {
    pub first_cluster: u32,
    pub nodes: Vec<Node>,
}

impl DirectoryCache {
    pub fn load(device: &mut BlockDevice, bpb: &BiosParameterBlock, fat: &FatTable, first_cluster: u32) -> Result<Self> {
        let raw = Self::read_region(device, bpb, fat, first_cluster)?;
        let nodes = Self::decode(&raw);

        debug!(
            "loaded directory (cluster={}): {} slots, {} live",
            first_cluster,
            nodes.len(),
            nodes.iter().filter(|n| n.is_live()).count()
        );

        Ok(Self { first_cluster, nodes })
    }

    fn read_region(device: &mut BlockDevice, bpb: &BiosParameterBlock, fat: &FatTable, first_cluster: u32) -> Result<Vec<u8>> {
        if first_cluster == 0 {
            device.read_sectors(bpb.root_dir_start() as u64, bpb.root_dir_size() as u64)
        } else {
            let mut buf = Vec::new();
            for c in fat.chain(first_cluster)? {
                let sector = bpb.sector_for_cluster(c) as u64;
                buf.extend(device.read_sectors(sector, bpb.sectors_per_cluster as u64)?);
            }
            Ok(buf)
        }
    }

    fn decode(raw: &[u8]) -> Vec<Node> {
        raw.chunks(SFN_LEN)
            .enumerate()
            .filter(|(_, chunk)| chunk.len() == SFN_LEN)
            .map(|(i, chunk)| {
                let sfn = Sfn::read(chunk);
                let state = sfn.state();
                Node {
                    state,
                    name: name::expand_short_name(&sfn.name),
                    attributes: sfn.attributes(),
                    first_cluster: sfn.first_cluster as u32,
                    size: sfn.size,
                    created: name::decode_fat_datetime(sfn.cdate, sfn.ctime),
                    modified: name::decode_fat_datetime(sfn.mdate, sfn.mtime),
                    accessed: name::decode_fat_datetime(sfn.adate, 0),
                    slot_offset: i * SFN_LEN,
                    dirty: false,
                }
            })
            .collect()
    }

    /// Linear scan; a node with state `Unused` terminates the search, matching
    /// the classic FAT end-of-directory convention.
    pub fn find_by_name(&self, query: &str) -> Option<usize> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.state == NodeState::Unused {
                break;
            }
            if node.state == NodeState::Used && node.name.eq_ignore_ascii_case(query) {
                return Some(i);
            }
        }
        None
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_live())
    }

    fn find_or_grow_free_slot(&mut self, fat: &mut FatTable, bpb: &BiosParameterBlock) -> Result<usize> {
        if let Some(i) = self.nodes.iter().position(|n| n.state != NodeState::Used) {
            return Ok(i);
        }

        if self.first_cluster == 0 {
            warn!("root directory has no free slot (capacity {})", self.nodes.len());
            return Err(FsError::NoSpace);
        }

        let current_count = fat.chain(self.first_cluster)?.len() as u32;
        let new_head = fat.reallocate_chain(self.first_cluster, current_count + 1)?;
        self.first_cluster = new_head;

        let slots_per_cluster = bpb.bytes_per_cluster() as usize / SFN_LEN;
        let base = self.nodes.len();
        for i in 0..slots_per_cluster {
            self.nodes.push(Node {
                state: NodeState::Unused,
                name: String::new(),
                attributes: Attributes::empty(),
                first_cluster: 0,
                size: 0,
                created: name::decode_fat_datetime(0, 0),
                modified: name::decode_fat_datetime(0, 0),
                accessed: name::decode_fat_datetime(0, 0),
                slot_offset: (base + i) * SFN_LEN,
                dirty: true,
            });
        }

        Ok(base)
    }

    /// Creates `input_name` in this directory, allocating one cluster for its
    /// initial (empty) contents. Collision avoidance retries truncation
    /// numbers 1-9 before giving up; the name codec itself always defaults to
    /// truncation 1 when called directly, so this loop is additive.
    pub fn create(
        &mut self,
        device: &mut BlockDevice,
        bpb: &BiosParameterBlock,
        fat: &mut FatTable,
        input_name: &str,
        attributes: Attributes,
        now: NaiveDateTime,
    ) -> Result<usize> {
        let mut chosen = None;
        for truncation in 1..=9u8 {
            let bytes = name::construct_short_name(input_name, truncation)?;
            let expanded = name::expand_short_name(&bytes);
            let collides = self.nodes.iter().any(|n| n.state == NodeState::Used && n.name.eq_ignore_ascii_case(&expanded));
            if !collides {
                chosen = Some(expanded);
                break;
            }
        }

        let short_name = chosen.ok_or_else(|| {
            warn!("exhausted truncation numbers 1-9 constructing a short name for '{}'", input_name);
            FsError::InvalidArg {
                reason: format!("could not construct a unique short name for '{}'", input_name),
            }
        })?;

        let slot = self.find_or_grow_free_slot(fat, bpb)?;
        let head = fat.reallocate_chain(0, 1)?;

        {
            let node = &mut self.nodes[slot];
            node.state = NodeState::Used;
            node.name = short_name;
            node.attributes = attributes;
            node.first_cluster = head;
            node.size = 0;
            node.created = now;
            node.modified = now;
            node.accessed = now;
            node.dirty = true;
        }

        if attributes.contains(Attributes::DIRECTORY) {
            self.init_subdirectory_cluster(device, bpb, head)?;
        }

        debug!("created '{}' (cluster {}) in directory at {}", self.nodes[slot].name, head, self.first_cluster);
        Ok(slot)
    }

    fn init_subdirectory_cluster(&self, device: &mut BlockDevice, bpb: &BiosParameterBlock, head: u32) -> Result<()> {
        let mut buf = vec![0u8; bpb.bytes_per_cluster() as usize];

        let mut dot = Sfn::blank();
        dot.name = *b".          ";
        dot.attribute = name::attributes_to_byte(Attributes::DIRECTORY);
        dot.first_cluster = head as u16;
        dot.write(&mut buf[0..SFN_LEN]);

        let mut dotdot = Sfn::blank();
        dotdot.name = *b"..         ";
        dotdot.attribute = name::attributes_to_byte(Attributes::DIRECTORY);
        dotdot.first_cluster = self.first_cluster as u16;
        dotdot.write(&mut buf[SFN_LEN..SFN_LEN * 2]);

        device.write_sectors(bpb.sector_for_cluster(head) as u64, bpb.sectors_per_cluster as u64, &buf)
    }

    /// Marks `name` available and frees its cluster chain. Does not flush.
    pub fn remove(&mut self, fat: &mut FatTable, query: &str) -> Result<()> {
        let idx = self.find_by_name(query).ok_or_else(|| FsError::NotFound { name: query.to_string() })?;

        let first_cluster = self.nodes[idx].first_cluster;
        fat.reallocate_chain(first_cluster, 0)?;

        let node = &mut self.nodes[idx];
        node.state = NodeState::Available;
        node.first_cluster = 0;
        node.size = 0;
        node.dirty = true;

        debug!("removed '{}' from directory at {}", query, self.first_cluster);
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.nodes.len() * SFN_LEN];
        for (i, node) in self.nodes.iter().enumerate() {
            let sfn = Self::node_to_sfn(node)?;
            sfn.write(&mut buf[i * SFN_LEN..(i + 1) * SFN_LEN]);
        }
        Ok(buf)
    }

    fn node_to_sfn(node: &Node) -> Result<Sfn> {
        let mut sfn = Sfn::blank();
        match node.state {
            NodeState::Unused => Ok(sfn),
            NodeState::Available => {
                sfn.name[0] = crate::sfn::NAME_DELETED;
                Ok(sfn)
            }
            NodeState::Used => {
                let short_name = name::construct_short_name(&node.name, 1)?;
                sfn.name = short_name;
                sfn.attribute = name::attributes_to_byte(node.attributes);
                sfn.cdate = name::encode_fat_date(&node.created);
                sfn.ctime = name::encode_fat_time(&node.created);
                sfn.mdate = name::encode_fat_date(&node.modified);
                sfn.mtime = name::encode_fat_time(&node.modified);
                sfn.adate = name::encode_fat_date(&node.accessed);
                sfn.first_cluster = node.first_cluster as u16;
                sfn.size = node.size;
                Ok(sfn)
            }
        }
    }

    /// Re-encodes every node and writes the whole region back: the fixed
    /// root region for the root directory, or cluster-by-cluster along the
    /// chain for a subdirectory. The FAT itself is flushed separately by the
    /// facade, alongside this call, to keep FAT and directory consistent.
    pub fn flush(&mut self, device: &mut BlockDevice, bpb: &BiosParameterBlock, fat: &FatTable) -> Result<()> {
        let dirty_count = self.nodes.iter().filter(|n| n.dirty).count();
        let raw = self.encode()?;

        if self.first_cluster == 0 {
            device.write_sectors(bpb.root_dir_start() as u64, bpb.root_dir_size() as u64, &raw)?;
        } else {
            let bytes_per_cluster = bpb.bytes_per_cluster() as usize;
            let chain = fat.chain(self.first_cluster)?;
            for (cluster, chunk) in chain.iter().zip(raw.chunks(bytes_per_cluster)) {
                let sector = bpb.sector_for_cluster(*cluster) as u64;
                let mut padded = chunk.to_vec();
                padded.resize(bytes_per_cluster, 0);
                device.write_sectors(sector, bpb.sectors_per_cluster as u64, &padded)?;
            }
        }

        for node in &mut self.nodes {
            node.dirty = false;
        }

        debug!("flushed directory at cluster {} ({} dirty)", self.first_cluster, dirty_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MediaKind;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn fresh_device(name: &str) -> BlockDevice {
        let path = temp_path(name);
        let mut dev = BlockDevice::create(&path, MediaKind::Floppy, true).unwrap();
        dev.init(512, 2880).unwrap();
        dev
    }

    #[test]
    fn create_then_find_then_remove_round_trips() {
        let mut dev = fresh_device("basic");
        let bpb = BiosParameterBlock::new_floppy_defaults("TEST", 2880, 0);
        let mut sector = [0u8; 512];
        bpb.write(&mut sector);
        dev.write_sector(0, &sector).unwrap();

        let fat_bytes = vec![0u8; (bpb.fat_size() * bpb.bytes_per_sector as u32) as usize];
        let mut fat = FatTable::from_bpb(&bpb, fat_bytes);

        let mut cache = DirectoryCache::load(&mut dev, &bpb, &fat, 0).unwrap();
        let now = name::decode_fat_datetime(0, 0);

        let idx = cache
            .create(&mut dev, &bpb, &mut fat, "readme.txt", Attributes::empty(), now)
            .unwrap();
        assert_eq!(cache.nodes[idx].name, "README.TXT");

        assert!(cache.find_by_name("README.TXT").is_some());
        assert!(cache.find_by_name("NOPE.TXT").is_none());

        cache.remove(&mut fat, "README.TXT").unwrap();
        assert!(cache.find_by_name("README.TXT").is_none());

        let path = dev.path().to_path_buf();
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn collision_avoidance_retries_truncation_numbers() {
        let mut dev = fresh_device("collide");
        let bpb = BiosParameterBlock::new_floppy_defaults("TEST", 2880, 0);
        let fat_bytes = vec![0u8; (bpb.fat_size() * bpb.bytes_per_sector as u32) as usize];
        let mut fat = FatTable::from_bpb(&bpb, fat_bytes);

        let mut cache = DirectoryCache::load(&mut dev, &bpb, &fat, 0).unwrap();
        let now = name::decode_fat_datetime(0, 0);

        let a = cache
            .create(&mut dev, &bpb, &mut fat, "configuration.cfg", Attributes::empty(), now)
            .unwrap();
        let b = cache
            .create(&mut dev, &bpb, &mut fat, "configuration-two.cfg", Attributes::empty(), now)
            .unwrap();

        assert_ne!(cache.nodes[a].name, cache.nodes[b].name);
        assert!(cache.nodes[b].name.starts_with("CONFIG~2"));

        let path = dev.path().to_path_buf();
        std::fs::remove_file(path).ok();
    }
}
