use bitflags::bitflags;
use bytemuck::{AnyBitPattern, NoUninit};
use checked_num::CheckedU64;
use endify::Endify;

use crate::{
    boot_sector::BootSector,
    disk::{self, ReadOffset},
    error::FatLoadError,
};

/// Only the low 28 bits of a FAT32 entry are significant.
pub const FAT32_ENTRY_MASK: u32 = 0x0FFFFFFF;
/// Highest valid cluster count of a FAT32 volume
pub const MAX_CLUSTER_COUNT: u32 = 0x0FFFFFF5;
/// Cluster counts below this are treated as FAT16 by Microsoft's FAT type determination rule
pub const MIN_CLUSTER_COUNT: u32 = 65525;

#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, AnyBitPattern, NoUninit, Endify)]
pub struct FatEntry(pub(crate) u32);

impl FatEntry {
    /// The media type FAT entry. The media descriptor as the first byte, followed by `FFh FFh 0Fh`.
    pub(crate) fn media_type(media: u8) -> FatEntry {
        Self((0x0FFFFF00 | media as u32).to_le())
    }

    /// Marks the end of a cluster chain. Also used for entry `1`, where it signals a clean
    /// shutdown without disk errors (see [`VolumeStatus`]).
    pub(crate) fn eoc() -> FatEntry {
        Self(FAT32_ENTRY_MASK.to_le())
    }

    /// The entry value with the reserved high nibble masked off.
    pub fn value(self) -> u32 {
        u32::from_le(self.0) & FAT32_ENTRY_MASK
    }

    /// The raw 32-bit entry, including the reserved high nibble.
    pub fn raw(self) -> u32 {
        u32::from_le(self.0)
    }

    pub fn is_free(self) -> bool {
        self.value() == 0
    }

    pub fn is_eoc(self) -> bool {
        self.value() >= 0x0FFFFFF8
    }

    /// The next cluster of the chain, if this entry links to one.
    pub fn next(self) -> Option<u32> {
        let value = self.value();
        (2..MAX_CLUSTER_COUNT + 2).contains(&value).then_some(value)
    }
}

bitflags! {
    /// Volume status bits stored in FAT entry `1`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct VolumeStatus: u32 {
        /// - 1: the volume was unmounted cleanly.
        /// - 0: the volume is dirty.
        const CLEAN_SHUTDOWN = 1 << 27;
        /// - 1: no disk read/write errors were encountered.
        /// - 0: the last mount encountered an I/O error.
        const NO_HARD_ERROR = 1 << 26;
    }
}

/// One copy of the file allocation table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fat {
    entries: Vec<FatEntry>,
}

impl Fat {
    /// Loads the FAT with the given (zero-based) index. Only the entries addressing clusters of the
    /// data region are read.
    pub fn load<R: ReadOffset>(device: &R, boot: &BootSector, index: u8) -> Result<Fat, FatLoadError> {
        if index >= boot.number_of_fats() {
            return Err(FatLoadError::InvalidIndex(index));
        }

        let sector_offset =
            CheckedU64::new(boot.fat_length() as u64) * index as u64 + boot.reserved_sectors() as u64;
        let byte_offset =
            (sector_offset * boot.bytes_per_sector() as u64).ok_or(FatLoadError::InvalidOffset)?;

        let entry_count = (boot.cluster_count().min(MAX_CLUSTER_COUNT) as u64
            + crate::FIRST_USABLE_CLUSTER_INDEX as u64)
            .min(boot.fat_length() as u64 * boot.bytes_per_sector() as u64 / 4);
        let length = entry_count * size_of::<FatEntry>() as u64;

        // the whole table must be on the device before it is buffered
        if length > 0 {
            let last = byte_offset + length - 1;
            device
                .read_exact_at(last, &mut [0u8])
                .map_err(|e| FatLoadError::ReadFailed(last, e))?;
        }

        let mut bytes = disk::zeroed(length as usize)?;
        device
            .read_exact_at(byte_offset, &mut bytes)
            .map_err(|e| FatLoadError::ReadFailed(byte_offset, e))?;

        let entries = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<FatEntry>)
            .collect::<Vec<FatEntry>>();

        Ok(Self { entries })
    }

    pub fn entry(&self, cluster: u32) -> Option<FatEntry> {
        self.entries.get(cluster as usize).copied()
    }

    pub fn entries(&self) -> &[FatEntry] {
        &self.entries
    }

    /// The volume status bits of entry `1`.
    pub fn status(&self) -> Option<VolumeStatus> {
        self.entry(1)
            .map(|e| VolumeStatus::from_bits_truncate(e.raw()))
    }

    /// Number of free clusters of the data region.
    pub fn free_clusters(&self) -> u32 {
        self.entries
            .iter()
            .skip(crate::FIRST_USABLE_CLUSTER_INDEX as usize)
            .filter(|e| e.is_free())
            .count() as u32
    }
}

#[test]
fn reserved_entry_bytes() {
    assert_eq!(
        bytemuck::bytes_of(&FatEntry::media_type(0xF8)),
        [0xF8, 0xFF, 0xFF, 0x0F]
    );
    assert_eq!(bytemuck::bytes_of(&FatEntry::eoc()), [0xFF, 0xFF, 0xFF, 0x0F]);
}

#[test]
fn entry_values() {
    assert!(FatEntry::eoc().is_eoc());
    assert_eq!(FatEntry::eoc().next(), None);
    assert!(FatEntry(0).is_free());
    assert_eq!(FatEntry(5u32.to_le()).next(), Some(5));
    // high nibble is reserved
    assert_eq!(FatEntry(0xF000_0003u32.to_le()).next(), Some(3));
    assert_eq!(FatEntry(1u32.to_le()).next(), None);
}

#[test]
fn clean_volume_status() {
    let status = VolumeStatus::from_bits_truncate(FatEntry::eoc().raw());
    assert!(status.contains(VolumeStatus::CLEAN_SHUTDOWN | VolumeStatus::NO_HARD_ERROR));
}

#[test]
fn table_beyond_device_is_not_buffered() {
    use crate::format::Fat32;
    use std::io::Cursor;

    let size: u64 = 64 * crate::MB as u64;
    let options = crate::format::test_options(size).build().unwrap();
    let mut f = Cursor::new(vec![0u8; size as usize]);
    Fat32::try_from(options).unwrap().write(&mut f).unwrap();

    // one FAT of 2^24 sectors covering a 2TB volume
    let mut sector = f.get_ref()[..512].to_vec();
    sector[13] = 1;
    sector[16] = 1;
    sector[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
    sector[36..40].copy_from_slice(&(1u32 << 24).to_le_bytes());
    let boot: BootSector = bytemuck::pod_read_unaligned(&sector);

    assert!(matches!(
        Fat::load(&f, &boot, 0),
        Err(FatLoadError::ReadFailed(..))
    ));
    assert!(matches!(
        Fat::load(&f, &boot, 1),
        Err(FatLoadError::InvalidIndex(1))
    ));
}
