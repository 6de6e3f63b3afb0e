use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use crate::Label;

/// Size of the boot sector & FSInfo structures. Larger sectors are padded with zeroes.
pub const BOOT_SECTOR_SIZE: usize = 512;
/// Offset of the BIOS Parameter Block within the boot sector
pub const BPB_OFFSET: usize = 3;
/// Length of the FAT32 BIOS Parameter Block (up to, not including, the boot code)
pub const BPB_LENGTH: usize = 87;
/// Signature of regular boot sector
pub const BOOT_SIGNATURE: u16 = 0xAA55;
/// Signature of the extended BIOS Parameter Block
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

/// The FAT32 boot sector, including the BIOS Parameter Block.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct BootSector {
    /// The jump instruction for CPUs to execute bootstrapping instructions in `boot_code`.
    pub(crate) jump_boot: [u8; 3],

    /// Name of the system that formatted the volume. Purely informational.
    pub(crate) oem_name: [u8; 8],

    /// Count of bytes per sector.
    /// - One of `512`, `1024`, `2048` or `4096`.
    pub(crate) bytes_per_sector: u16,

    /// Number of sectors per allocation unit. A power of `2` no larger than `128`.
    pub(crate) sectors_per_cluster: u8,

    /// Number of sectors in the reserved region, starting at the first sector of the volume.
    /// - Typically `32` for FAT32.
    pub(crate) reserved_sectors: u16,

    /// The count of FATs on the volume. `2` is recommended for any FAT volume.
    pub(crate) number_of_fats: u8,

    /// Count of 32-byte root directory entries.
    /// - Must be `0` for FAT32, as the root directory is an ordinary cluster chain.
    pub(crate) root_entries: u16,

    /// 16-bit total sector count.
    /// - Must be `0` for FAT32. See `total_sectors_32`.
    pub(crate) total_sectors_16: u16,

    /// Media descriptor. `0xF8` for fixed media.
    /// - The low byte of FAT entry `0` must contain the same value.
    pub(crate) media: u8,

    /// 16-bit count of sectors occupied by one FAT.
    /// - Must be `0` for FAT32. See `fat_length_32`.
    pub(crate) fat_length_16: u16,

    /// Sectors per track for interrupt `0x13`.
    pub(crate) sectors_per_track: u16,

    /// Number of heads for interrupt `0x13`.
    pub(crate) heads: u16,

    /// Count of hidden sectors preceding the partition that contains this volume.
    pub(crate) hidden_sectors: u32,

    /// 32-bit total count of sectors on the volume, covering all four regions.
    pub(crate) total_sectors_32: u32,

    /// 32-bit count of sectors occupied by one FAT.
    pub(crate) fat_length_32: u32,

    /// See [`ExtFlags`].
    pub(crate) ext_flags: u16,

    /// Version number of the volume. High byte is the major, low byte the minor revision.
    /// - Must be `0:0`.
    pub(crate) fs_version: u16,

    /// Cluster number of the first cluster of the root directory. Usually `2`.
    pub(crate) root_cluster: u32,

    /// Sector number of the FSInfo structure in the reserved region. Usually `1`.
    pub(crate) fs_info_sector: u16,

    /// Sector number of the copy of the boot record in the reserved region.
    /// - `0` means no backup is present. Usually `6`.
    pub(crate) backup_boot_sector: u16,

    /// Reserved. Must be set to zero.
    pub(crate) _reserved: [u8; 12],

    /// Interrupt `0x13` drive number.
    pub(crate) drive_number: u8,

    /// Reserved. Must be set to zero.
    pub(crate) _reserved1: u8,

    /// Extended boot signature (`0x29`), indicating that the following three fields are present.
    pub(crate) boot_signature_ext: u8,

    /// Volume serial number.
    pub(crate) volume_id: VolumeSerialNumber,

    /// Volume label, matching the label in the root directory (if any).
    pub(crate) volume_label: Label,

    /// Informational file system type. Always `"FAT32   "`.
    pub(crate) filesystem_type: [u8; 8],

    /// Bootstrapping code. Zeroed, as formatted volumes are not bootable.
    pub(crate) boot_code: [u8; 420],

    /// Identifies this sector as a boot sector.
    /// - Must be `0xAA55` to be considered valid.
    pub(crate) boot_signature: u16,
}

impl BootSector {
    pub fn bytes_per_sector(&self) -> u16 {
        u16::from_le(self.bytes_per_sector)
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector() as u32 * self.sectors_per_cluster as u32
    }

    pub fn reserved_sectors(&self) -> u16 {
        u16::from_le(self.reserved_sectors)
    }

    pub fn number_of_fats(&self) -> u8 {
        self.number_of_fats
    }

    pub fn media(&self) -> u8 {
        self.media
    }

    pub fn sectors_per_track(&self) -> u16 {
        u16::from_le(self.sectors_per_track)
    }

    pub fn heads(&self) -> u16 {
        u16::from_le(self.heads)
    }

    pub fn hidden_sectors(&self) -> u32 {
        u32::from_le(self.hidden_sectors)
    }

    pub fn total_sectors(&self) -> u32 {
        u32::from_le(self.total_sectors_32)
    }

    pub fn fat_length(&self) -> u32 {
        u32::from_le(self.fat_length_32)
    }

    pub fn ext_flags(&self) -> ExtFlags {
        ExtFlags::from_bits_retain(u16::from_le(self.ext_flags))
    }

    pub fn root_cluster(&self) -> u32 {
        u32::from_le(self.root_cluster)
    }

    pub fn fs_info_sector(&self) -> u16 {
        u16::from_le(self.fs_info_sector)
    }

    pub fn backup_boot_sector(&self) -> u16 {
        u16::from_le(self.backup_boot_sector)
    }

    pub fn volume_id(&self) -> u32 {
        { self.volume_id }.get()
    }

    pub fn volume_label(&self) -> Label {
        self.volume_label
    }

    pub fn boot_signature(&self) -> u16 {
        u16::from_le(self.boot_signature)
    }

    /// The first sector of the data region (cluster `2`).
    pub fn first_data_sector(&self) -> u64 {
        self.reserved_sectors() as u64 + self.number_of_fats as u64 * self.fat_length() as u64
    }

    /// Number of clusters in the data region.
    pub fn cluster_count(&self) -> u32 {
        let data_sectors = (self.total_sectors() as u64).saturating_sub(self.first_data_sector());
        (data_sectors / self.sectors_per_cluster.max(1) as u64) as u32
    }

    /// Whether the 16-bit fields are zeroed and the 32-bit FAT length is set, which is how FAT32
    /// volumes are told apart from FAT12/16.
    pub fn is_fat32(&self) -> bool {
        u16::from_le(self.root_entries) == 0
            && u16::from_le(self.total_sectors_16) == 0
            && u16::from_le(self.fat_length_16) == 0
            && self.fat_length() != 0
    }
}

bitflags! {
    /// The `ExtFlags` field of the FAT32 BIOS Parameter Block.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ExtFlags: u16 {
        /// Zero-based number of the active FAT. Only valid if mirroring is disabled.
        const ACTIVE_FAT = 0b1111;
        /// - 0: the FAT is mirrored at runtime into all FATs.
        /// - 1: only the FAT referenced by `ACTIVE_FAT` is active.
        const MIRRORING_DISABLED = 1 << 7;
    }
}

/// The FAT32 FSInfo structure, caching allocation hints.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FsInfo {
    /// Must be `0x41615252`.
    pub(crate) lead_signature: u32,
    pub(crate) _reserved: [u8; 480],
    /// Must be `0x61417272`.
    pub(crate) struct_signature: u32,
    /// Last known free cluster count. `0xFFFFFFFF` if unknown.
    pub(crate) free_count: u32,
    /// Hint where to start looking for free clusters. `0xFFFFFFFF` if unknown.
    pub(crate) next_free: u32,
    pub(crate) _reserved2: [u8; 12],
    /// Must be `0xAA550000`.
    pub(crate) trail_signature: u32,
}

impl FsInfo {
    pub const LEAD_SIGNATURE: u32 = 0x41615252;
    pub const STRUCT_SIGNATURE: u32 = 0x61417272;
    pub const TRAIL_SIGNATURE: u32 = 0xAA550000;
    /// Value of `free_count` & `next_free` when no hint is available
    pub const UNKNOWN: u32 = 0xFFFFFFFF;

    /// An FSInfo sector without allocation hints.
    pub fn unknown() -> FsInfo {
        Self {
            lead_signature: Self::LEAD_SIGNATURE.to_le(),
            _reserved: [0; 480],
            struct_signature: Self::STRUCT_SIGNATURE.to_le(),
            free_count: Self::UNKNOWN.to_le(),
            next_free: Self::UNKNOWN.to_le(),
            _reserved2: [0; 12],
            trail_signature: Self::TRAIL_SIGNATURE.to_le(),
        }
    }

    pub fn is_valid(&self) -> bool {
        u32::from_le(self.lead_signature) == Self::LEAD_SIGNATURE
            && u32::from_le(self.struct_signature) == Self::STRUCT_SIGNATURE
            && u32::from_le(self.trail_signature) == Self::TRAIL_SIGNATURE
    }

    pub fn free_count(&self) -> Option<u32> {
        Some(u32::from_le(self.free_count)).filter(|c| *c != Self::UNKNOWN)
    }

    pub fn next_free(&self) -> Option<u32> {
        Some(u32::from_le(self.next_free)).filter(|c| *c != Self::UNKNOWN)
    }
}

/// Structure representing the unique volume serial number.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct VolumeSerialNumber(u32);

impl VolumeSerialNumber {
    pub(crate) fn try_new() -> Result<VolumeSerialNumber, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(VolumeSerialNumber((now.as_secs() as u32).to_le()))
    }

    pub(crate) fn new(serial: u32) -> VolumeSerialNumber {
        VolumeSerialNumber(serial.to_le())
    }

    pub fn get(&self) -> u32 {
        u32::from_le(self.0)
    }
}

#[test]
fn layout() {
    use core::mem::offset_of;

    assert_eq!(size_of::<BootSector>(), BOOT_SECTOR_SIZE);
    assert_eq!(size_of::<FsInfo>(), BOOT_SECTOR_SIZE);

    assert_eq!(offset_of!(BootSector, oem_name), BPB_OFFSET);
    assert_eq!(offset_of!(BootSector, bytes_per_sector), 11);
    assert_eq!(offset_of!(BootSector, hidden_sectors), 28);
    assert_eq!(offset_of!(BootSector, fat_length_32), 36);
    assert_eq!(offset_of!(BootSector, root_cluster), 44);
    assert_eq!(offset_of!(BootSector, backup_boot_sector), 50);
    assert_eq!(offset_of!(BootSector, volume_id), 67);
    assert_eq!(offset_of!(BootSector, volume_label), 71);
    assert_eq!(offset_of!(BootSector, boot_code), BPB_OFFSET + BPB_LENGTH);
    assert_eq!(offset_of!(BootSector, boot_signature), 510);

    assert_eq!(offset_of!(FsInfo, struct_signature), 484);
    assert_eq!(offset_of!(FsInfo, free_count), 488);
    assert_eq!(offset_of!(FsInfo, next_free), 492);
    assert_eq!(offset_of!(FsInfo, trail_signature), 508);
}

#[test]
fn fs_info_without_hints() {
    let fs_info = FsInfo::unknown();
    assert!(fs_info.is_valid());
    assert_eq!(fs_info.free_count(), None);
    assert_eq!(fs_info.next_free(), None);

    let bytes = bytemuck::bytes_of(&fs_info);
    assert_eq!(bytes[..4], [0x52, 0x52, 0x61, 0x41]);
    assert_eq!(bytes[508..], [0x00, 0x00, 0x55, 0xAA]);
}
