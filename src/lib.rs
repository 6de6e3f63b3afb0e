//! # FAT32
//!
//! FAT32 filesystem formatting in Rust.
//!
//! ## Usage
//!
//! ```rust
//! use fat32_fs::{
//!    Label, MB,
//!    format::{Fat32, FormatVolumeOptionsBuilder},
//!    volume::Volume,
//! };
//!
//! let size: u64 = 64 * MB as u64;
//!
//! let format_options = FormatVolumeOptionsBuilder::default()
//!     .dev_size(size)
//!     .label(Label::new("HELLO"))
//!     .bytes_per_sector(512)
//!     .build()
//!     .unwrap();
//!
//! let formatter = Fat32::try_from(format_options).unwrap();
//!
//! # let mut file = std::io::Cursor::new(vec![0u8; size as usize]);
//!
//! formatter.write(&mut file).unwrap();
//!
//! let volume = Volume::open(&file).unwrap();
//! volume.verify().unwrap();
//! assert_eq!(volume.label().as_bytes(), b"HELLO      ");
//! ```
//!
//! ## Limitations
//! The crate formats and verifies volumes but cannot create files or directories inside them.

/// On-disk boot sector & FSInfo structures
pub mod boot_sector;
/// Disk utility functions
pub mod disk;
pub mod error;
/// File allocation table entries
pub mod fat;
/// Filesystem formatting capabilities
pub mod format;
mod label;
/// Read-back of formatted volumes
pub mod volume;

pub use label::Label;

pub const GB: u32 = 1024 * 1024 * 1024;
pub const MB: u32 = 1024 * 1024;
pub const KB: u16 = 1024;

/// First cluster index that refers to the data region
pub const FIRST_USABLE_CLUSTER_INDEX: u32 = 2;
