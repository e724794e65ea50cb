//! A FAT12 filesystem engine over a flat image file, with a directory cache,
//! a small shell, and a legacy GRUB stage1/stage2 installer.
//!
//! The module layout mirrors the engine's layering: [`block`] is the raw
//! sector device, [`bpb`] and [`fat_table`] decode the volume's geometry and
//! allocation table, [`name`] and [`sfn`] handle the 8.3 short-name codec,
//! [`node`] and [`dir`] make up the directory cache, [`fs`] is the facade
//! callers actually use, and [`grub`] builds on top of it.

pub mod block;
pub mod bpb;
pub mod dir;
pub mod error;
pub mod fat_table;
pub mod fs;
pub mod grub;
pub mod name;
pub mod node;
pub mod sfn;

pub use block::{BlockDevice, MediaKind};
pub use bpb::BiosParameterBlock;
pub use error::{FsError, Result};
pub use fs::{Fat12FileSystem, FileSystemHandle};
pub use grub::GrubInstaller;
pub use node::Node;
