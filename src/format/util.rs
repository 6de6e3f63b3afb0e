use checked_num::CheckedU64;

use crate::{GB, KB, error::Fat32FormatError};

/// Sectors in the reserved region, starting at sector `0`
pub(super) const RESERVED_SECTORS: u16 = 32;
/// The volume is always formatted with two mirrored FATs
pub(super) const NUMBER_OF_FATS: u8 = 2;
/// Sector of the FSInfo structure
pub(super) const FS_INFO_SECTOR: u16 = 1;
/// Default sector of the backup boot sector
pub const BACKUP_BOOT_SECTOR: u16 = 6;
/// Cluster of the root directory
pub(super) const ROOT_CLUSTER: u32 = crate::FIRST_USABLE_CLUSTER_INDEX;
/// Media descriptor for fixed disks
pub(super) const MEDIA_DESCRIPTOR: u8 = 0xF8;
/// No BIOS boot drive available
pub(super) const DRIVE_NUMBER: u8 = 0xFF;
pub(super) const JUMP_BOOT: [u8; 3] = [0xEB, 0x58, 0x90];
pub(super) const OEM_NAME: [u8; 8] = *b"MSWIN4.1";
pub(super) const FILESYSTEM_TYPE: [u8; 8] = *b"FAT32   ";
/// Maximum size of clusters
pub(super) const MAX_CLUSTER_SIZE: u32 = 64 * KB as u32;
/// Maximum value of the `sectors_per_cluster` field
pub(super) const MAX_SECTORS_PER_CLUSTER: u32 = 128;
/// Size of the buffer used to zero the FATs
pub(super) const FAT_CHUNK_SIZE: usize = 64 * KB as usize;
/// Upper bound for the FAT length computation. Convergence usually takes two or three rounds.
pub(super) const MAX_FAT_LENGTH_ITERATIONS: u32 = 32;

/// Cluster size used when none is requested, depending on the size of the partition (in bytes).
pub fn default_cluster_size(partition_length: u64) -> u32 {
    const GIB: u64 = GB as u64;
    match partition_length {
        l if l < 8 * GIB => 4 * KB as u32,
        l if l < 16 * GIB => 8 * KB as u32,
        l if l < 32 * GIB => 16 * KB as u32,
        _ => 32 * KB as u32,
    }
}

/// Number of right shifts equivalent to a division by `value`, which must be a power of `2`.
pub(super) fn shift_count(value: u32) -> u32 {
    debug_assert!(value.is_power_of_two());
    value.ilog2()
}

/// Computes the smallest number of sectors per FAT that can address every cluster of the data
/// region.
///
/// Starts from the FAT size needed if the whole volume (minus the reserved region) were data, then
/// recomputes the cluster count under the current guess until the guess stops shrinking. The
/// estimate is monotonically non-increasing, so the final value is always large enough.
pub(super) fn fat_length(
    total_sectors: u64,
    reserved_sectors: u64,
    number_of_fats: u64,
    sectors_per_cluster: u64,
    bytes_per_sector: u64,
) -> Result<u32, Fat32FormatError> {
    let usable = (CheckedU64::new(total_sectors) - reserved_sectors)
        .ok_or(Fat32FormatError::VolumeTooSmall(total_sectors))?;

    let mut length = 0u64;
    for _ in 0..MAX_FAT_LENGTH_ITERATIONS {
        let previous = if length == 0 { u64::MAX } else { length };

        let clusters = ((CheckedU64::new(usable) - length * number_of_fats) / sectors_per_cluster
            + 2)
        .ok_or(Fat32FormatError::VolumeTooSmall(total_sectors))?;
        length = (clusters * 4).div_ceil(bytes_per_sector);

        if previous <= length {
            return u32::try_from(length)
                .map_err(|_| Fat32FormatError::InvalidSize(total_sectors * bytes_per_sector));
        }
    }

    Err(Fat32FormatError::FatLengthDiverged(MAX_FAT_LENGTH_ITERATIONS))
}

#[test]
fn cluster_size_thresholds() {
    let gib = GB as u64;

    assert_eq!(default_cluster_size(100 * crate::MB as u64), 4096);
    assert_eq!(default_cluster_size(gib), 4096);
    assert_eq!(default_cluster_size(8 * gib - 1), 4096);
    assert_eq!(default_cluster_size(8 * gib), 8192);
    assert_eq!(default_cluster_size(16 * gib), 16384);
    assert_eq!(default_cluster_size(32 * gib - 1), 16384);
    assert_eq!(default_cluster_size(32 * gib), 32768);
    assert_eq!(default_cluster_size(64 * gib), 32768);
}

#[test]
fn shift_count_matches_division() {
    for bytes_per_sector in [512u32, 1024, 2048, 4096] {
        let size = 123_456_789_000u64;
        assert_eq!(
            size >> shift_count(bytes_per_sector),
            size / bytes_per_sector as u64
        );
    }
}

#[test]
fn fat_length_of_100mb() {
    // 100MB with 512 byte sectors & 4KB clusters
    assert_eq!(fat_length(204800, 32, 2, 8, 512).unwrap(), 200);
}

#[test]
fn fat_length_covers_all_clusters() {
    let mut size: u64 = 2 * crate::MB as u64;
    while size <= 2048 * GB as u64 {
        for (bytes_per_sector, sectors_per_cluster) in
            [(512u64, 1u64), (512, 8), (512, 64), (4096, 1), (4096, 8)]
        {
            let total = size / bytes_per_sector;
            if total > u32::MAX as u64 {
                continue;
            }

            let length =
                fat_length(total, 32, 2, sectors_per_cluster, bytes_per_sector).unwrap() as u64;
            let data = total - 32 - 2 * length;
            let clusters = data / sectors_per_cluster;
            let capacity = length * bytes_per_sector / 4;

            assert!(
                clusters + 2 <= capacity,
                "{clusters} clusters do not fit into {length} FAT sectors ({size} bytes)"
            );
        }
        size = size * 3 / 2 + 12345;
    }
}

#[test]
fn fat_length_of_tiny_volume() {
    assert!(matches!(
        fat_length(32, 32, 2, 8, 512),
        Err(Fat32FormatError::VolumeTooSmall(32))
    ));
    assert!(matches!(
        fat_length(16, 32, 2, 8, 512),
        Err(Fat32FormatError::VolumeTooSmall(16))
    ));
}
