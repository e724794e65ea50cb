//! The BIOS Parameter Block: the 512-byte sector-0 layout that describes a
//! FAT12 volume's geometry. Serialize/deserialize are explicit byte-offset
//! functions rather than `#[repr(C, packed)]` reinterpretation, so there's
//! no alignment or host-endianness hazard.

use crate::error::{FsError, Result};

pub const SECTOR_LEN: usize = 512;
pub const BOOT_SIGNATURE: u16 = 0xAA55;

/// Bit-exact on-disk BPB layout. Every field here round-trips byte-for-byte
/// through `read`/`write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosParameterBlock {
    pub jump: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub table_count: u8,
    pub directory_entries: u16,
    pub total_sectors_16: u16,
    pub media_type: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub drive: u8,
    pub nt_reserved: u8,
    pub signature: u8,
    pub volume_id: u32,
    pub label: [u8; 11],
    pub system_id: [u8; 8],
    pub boot_code: [u8; 448],
    pub boot_signature: u16,
}

impl BiosParameterBlock {
    /// Sensible 1.44 MB floppy defaults. `total_sectors` reflects the actual
    /// device, everything else is fixed.
    pub fn new_floppy_defaults(label: &str, total_sectors: u32, extra_reserved: u16) -> Self {
        let mut l = [b' '; 11];
        let bytes = label.as_bytes();
        let n = bytes.len().min(11);
        l[..n].copy_from_slice(&bytes[..n]);

        Self {
            jump: [0xEB, 0x3C, 0x90],
            oem_name: *b"fatimg  ",
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1 + extra_reserved,
            table_count: 2,
            directory_entries: 224,
            total_sectors_16: total_sectors as u16,
            media_type: 0xF8,
            sectors_per_fat: 9,
            sectors_per_track: 18,
            heads: 2,
            hidden_sectors: 0,
            total_sectors_32: if total_sectors > 0xFFFF { total_sectors } else { 0 },
            drive: 0x00,
            nt_reserved: 0,
            signature: 0x29,
            volume_id: 0,
            label: l,
            system_id: *b"FAT12   ",
            boot_code: [0u8; 448],
            boot_signature: BOOT_SIGNATURE,
        }
    }

    pub fn read(sector: &[u8]) -> Result<Self> {
        if sector.len() < SECTOR_LEN {
            return Err(FsError::InvalidArg {
                reason: format!("BPB sector is {} bytes, expected {}", sector.len(), SECTOR_LEN),
            });
        }

        macro_rules! e {
            ($ty:ty, $offset:literal) => {
                <$ty>::from_le_bytes(
                    sector[$offset..$offset + std::mem::size_of::<$ty>()]
                        .try_into()
                        .unwrap(),
                )
            };
        }

        Ok(Self {
            jump: sector[0x00..0x03].try_into().unwrap(),
            oem_name: sector[0x03..0x0B].try_into().unwrap(),
            bytes_per_sector: e!(u16, 0x0B),
            sectors_per_cluster: sector[0x0D],
            reserved_sectors: e!(u16, 0x0E),
            table_count: sector[0x10],
            directory_entries: e!(u16, 0x11),
            total_sectors_16: e!(u16, 0x13),
            media_type: sector[0x15],
            sectors_per_fat: e!(u16, 0x16),
            sectors_per_track: e!(u16, 0x18),
            heads: e!(u16, 0x1A),
            hidden_sectors: e!(u32, 0x1C),
            total_sectors_32: e!(u32, 0x20),
            drive: sector[0x24],
            nt_reserved: sector[0x25],
            signature: sector[0x26],
            volume_id: e!(u32, 0x27),
            label: sector[0x2B..0x36].try_into().unwrap(),
            system_id: sector[0x36..0x3E].try_into().unwrap(),
            boot_code: sector[0x3E..0x1FE].try_into().unwrap(),
            boot_signature: e!(u16, 0x1FE),
        })
    }

    pub fn write(&self, sector: &mut [u8]) {
        assert!(sector.len() >= SECTOR_LEN, "sector buffer too small for BPB");

        sector[0x00..0x03].copy_from_slice(&self.jump);
        sector[0x03..0x0B].copy_from_slice(&self.oem_name);
        sector[0x0B..0x0D].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        sector[0x0D] = self.sectors_per_cluster;
        sector[0x0E..0x10].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        sector[0x10] = self.table_count;
        sector[0x11..0x13].copy_from_slice(&self.directory_entries.to_le_bytes());
        sector[0x13..0x15].copy_from_slice(&self.total_sectors_16.to_le_bytes());
        sector[0x15] = self.media_type;
        sector[0x16..0x18].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        sector[0x18..0x1A].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        sector[0x1A..0x1C].copy_from_slice(&self.heads.to_le_bytes());
        sector[0x1C..0x20].copy_from_slice(&self.hidden_sectors.to_le_bytes());
        sector[0x20..0x24].copy_from_slice(&self.total_sectors_32.to_le_bytes());
        sector[0x24] = self.drive;
        sector[0x25] = self.nt_reserved;
        sector[0x26] = self.signature;
        sector[0x27..0x2B].copy_from_slice(&self.volume_id.to_le_bytes());
        sector[0x2B..0x36].copy_from_slice(&self.label);
        sector[0x36..0x3E].copy_from_slice(&self.system_id);
        sector[0x3E..0x1FE].copy_from_slice(&self.boot_code);
        sector[0x1FE..0x200].copy_from_slice(&self.boot_signature.to_le_bytes());
    }

    pub fn validate_fat12(&self) -> Result<()> {
        if self.bytes_per_sector == 0 {
            return Err(FsError::NotFat12 {
                reason: "bytes_per_sector must be > 0",
            });
        }
        if self.total_clusters() >= 4085 {
            return Err(FsError::NotFat12 {
                reason: "total_clusters must be < 4085 to qualify as FAT12",
            });
        }
        Ok(())
    }

    pub fn fat_start(&self, n: u32) -> u32 {
        self.reserved_sectors as u32 + n * self.sectors_per_fat as u32
    }

    pub fn fat_size(&self) -> u32 {
        self.sectors_per_fat as u32
    }

    pub fn root_dir_start(&self) -> u32 {
        self.fat_start(0) + self.table_count as u32 * self.fat_size()
    }

    pub fn root_dir_size(&self) -> u32 {
        let bytes = self.directory_entries as u32 * 32;
        (bytes + self.bytes_per_sector as u32 - 1) / self.bytes_per_sector as u32
    }

    pub fn data_start(&self) -> u32 {
        self.root_dir_start() + self.root_dir_size()
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    pub fn total_clusters(&self) -> u32 {
        let overhead = self.reserved_sectors as u32
            + self.table_count as u32 * self.fat_size()
            + self.root_dir_size();
        let data_sectors = self.total_sectors().saturating_sub(overhead);
        data_sectors / self.sectors_per_cluster.max(1) as u32
    }

    /// `sector_for_cluster(0)` returns the start of the root directory region
    /// per the "cluster 0 means root" convention used throughout this engine.
    pub fn sector_for_cluster(&self, cluster: u32) -> u32 {
        if cluster == 0 {
            self.root_dir_start()
        } else {
            self.data_start() + (cluster - 2) * self.sectors_per_cluster as u32
        }
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_byte_for_byte() {
        let bpb = BiosParameterBlock::new_floppy_defaults("TEST", 2880, 0);
        let mut sector = [0u8; SECTOR_LEN];
        bpb.write(&mut sector);

        let read_back = BiosParameterBlock::read(&sector).unwrap();
        assert_eq!(bpb, read_back);

        assert_eq!(&sector[0x36..0x3E], b"FAT12   ");
        assert_eq!(&sector[0x1FE..0x200], &[0x55, 0xAA]);
        assert_eq!(u16::from_le_bytes(sector[0x0B..0x0D].try_into().unwrap()), 512);
        assert_eq!(sector[0x15], 0xF8);
    }

    #[test]
    fn layout_arithmetic_matches_floppy_geometry() {
        let bpb = BiosParameterBlock::new_floppy_defaults("TEST", 2880, 0);
        assert_eq!(bpb.fat_start(0), 1);
        assert_eq!(bpb.fat_start(1), 10);
        assert_eq!(bpb.root_dir_start(), 19);
        assert_eq!(bpb.root_dir_size(), 14);
        assert_eq!(bpb.data_start(), 33);
        assert!(bpb.total_clusters() < 4085);
    }
}
