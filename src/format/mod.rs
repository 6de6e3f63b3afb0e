use core::fmt;
use std::io::{Seek, SeekFrom, Write};

use checked_num::CheckedU64;
use derive_builder::Builder;
use log::{debug, info, warn};
use util::{
    BACKUP_BOOT_SECTOR, FS_INFO_SECTOR, MAX_CLUSTER_SIZE, MAX_SECTORS_PER_CLUSTER,
    NUMBER_OF_FATS, RESERVED_SECTORS, ROOT_CLUSTER,
};

use crate::{
    Label,
    boot_sector::VolumeSerialNumber,
    disk,
    error::{Fat32Error, Fat32FormatError},
    fat::{MAX_CLUSTER_COUNT, MIN_CLUSTER_COUNT},
};

pub mod boot;
pub mod fat;
pub mod root;
pub mod util;

pub use util::default_cluster_size;

/// Options describing the target partition and the volume to create.
#[derive(Builder, Clone, Debug)]
pub struct FormatVolumeOptions {
    /// Length of the partition (in bytes)
    pub dev_size: u64,
    /// Bytes per sector of the device
    pub bytes_per_sector: u16,
    /// Sectors per track of the disk geometry
    #[builder(default = "63")]
    pub sectors_per_track: u16,
    /// Tracks per cylinder (heads) of the disk geometry
    #[builder(default = "255")]
    pub tracks_per_cylinder: u16,
    #[builder(default)]
    pub label: Label,
    /// Bytes per cluster. `0` selects the cluster size from the partition size.
    #[builder(default)]
    pub bytes_per_cluster: u32,
    /// Zero the entire volume before writing the filesystem structures
    #[builder(default)]
    pub full_format: bool,
    /// Sector of the backup boot sector. `0` disables the backup.
    #[builder(default = "BACKUP_BOOT_SECTOR")]
    pub backup_boot_sector: u16,
    /// Hidden sectors preceding the partition. Defaults to the sectors per track.
    #[builder(default, setter(strip_option))]
    pub hidden_sectors: Option<u32>,
    /// Volume serial number. Derived from the current time if not set.
    #[builder(default, setter(strip_option))]
    pub volume_serial: Option<u32>,
}

/// The stages of a format, in the order they are written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatStage {
    Prepare,
    Zero,
    BootSector,
    FsInfo,
    PrimaryFat,
    SecondaryFat,
    RootDirectory,
}

impl fmt::Display for FormatStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormatStage::Prepare => "device",
            FormatStage::Zero => "volume contents",
            FormatStage::BootSector => "boot sector",
            FormatStage::FsInfo => "FSInfo sector",
            FormatStage::PrimaryFat => "primary FAT",
            FormatStage::SecondaryFat => "secondary FAT",
            FormatStage::RootDirectory => "root directory",
        })
    }
}

/// Reported once a stage has been written completely.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatProgress {
    pub stage: FormatStage,
    /// Number of completed stages
    pub completed: u8,
    pub total: u8,
}

/// Layout of a FAT32 volume, computed from [`FormatVolumeOptions`].
#[derive(Clone, Debug)]
pub struct Fat32 {
    pub(super) format_options: FormatVolumeOptions,
    pub(super) bytes_per_sector_shift: u8,
    pub(super) sectors_per_cluster: u8,
    pub(super) bytes_per_cluster: u32,
    pub(super) total_sectors: u64,
    pub(super) reserved_sectors: u16,
    pub(super) number_of_fats: u8,
    pub(super) fat_length: u32,
    pub(super) cluster_count: u32,
    pub(super) root_cluster: u32,
    pub(super) fs_info_sector: u16,
    pub(super) hidden_sectors: u32,
    pub(super) volume_serial_number: VolumeSerialNumber,
}

impl TryFrom<FormatVolumeOptions> for Fat32 {
    type Error = Fat32FormatError;

    fn try_from(format_options: FormatVolumeOptions) -> Result<Self, Self::Error> {
        let bytes_per_sector = format_options.bytes_per_sector;
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            return Err(Fat32FormatError::InvalidBytesPerSector(bytes_per_sector));
        }

        let bytes_per_cluster = match format_options.bytes_per_cluster {
            0 => util::default_cluster_size(format_options.dev_size),
            size => size,
        };
        if !bytes_per_cluster.is_power_of_two()
            || !(bytes_per_sector as u32..=MAX_CLUSTER_SIZE).contains(&bytes_per_cluster)
            || bytes_per_cluster / bytes_per_sector as u32 > MAX_SECTORS_PER_CLUSTER
        {
            return Err(Fat32FormatError::InvalidClusterSize(bytes_per_cluster));
        }

        let bytes_per_sector_shift = util::shift_count(bytes_per_sector as u32) as u8;
        // fits into `u8`, checked above
        let sectors_per_cluster = (bytes_per_cluster >> bytes_per_sector_shift) as u8;

        let total_sectors = format_options.dev_size >> bytes_per_sector_shift;
        if total_sectors > u32::MAX as u64 {
            return Err(Fat32FormatError::InvalidSize(format_options.dev_size));
        }

        let reserved_sectors = RESERVED_SECTORS;
        let number_of_fats = NUMBER_OF_FATS;

        let fat_length = util::fat_length(
            total_sectors,
            reserved_sectors as u64,
            number_of_fats as u64,
            sectors_per_cluster as u64,
            bytes_per_sector as u64,
        )?;

        let data_sectors = (CheckedU64::new(total_sectors)
            - reserved_sectors as u64
            - fat_length as u64 * number_of_fats as u64)
            .ok_or(Fat32FormatError::VolumeTooSmall(total_sectors))?;
        let cluster_count = data_sectors / sectors_per_cluster as u64;

        if cluster_count == 0 {
            return Err(Fat32FormatError::VolumeTooSmall(total_sectors));
        }
        if cluster_count > MAX_CLUSTER_COUNT as u64 {
            return Err(Fat32FormatError::TooManyClusters(cluster_count));
        }
        // fits, checked above
        let cluster_count = cluster_count as u32;
        if cluster_count < MIN_CLUSTER_COUNT {
            warn!(
                "{cluster_count} clusters are below the FAT32 minimum of {MIN_CLUSTER_COUNT}; some drivers may detect the volume as FAT16"
            );
        }

        let backup_boot_sector = format_options.backup_boot_sector;
        if backup_boot_sector != 0
            && (backup_boot_sector == FS_INFO_SECTOR || backup_boot_sector >= reserved_sectors)
        {
            return Err(Fat32FormatError::InvalidBackupBootSector(backup_boot_sector));
        }

        let hidden_sectors = format_options
            .hidden_sectors
            .unwrap_or(format_options.sectors_per_track as u32);

        let volume_serial_number = match format_options.volume_serial {
            Some(serial) => VolumeSerialNumber::new(serial),
            None => VolumeSerialNumber::try_new()?,
        };

        debug!("bytes per sector = {bytes_per_sector}");
        debug!("sectors per cluster = {sectors_per_cluster}");
        debug!("total sectors = {total_sectors}");
        debug!("reserved sectors = {reserved_sectors}");
        debug!("FAT length = {fat_length}");
        debug!("cluster count = {cluster_count}");

        Ok(Self {
            format_options,
            bytes_per_sector_shift,
            sectors_per_cluster,
            bytes_per_cluster,
            total_sectors,
            reserved_sectors,
            number_of_fats,
            fat_length,
            cluster_count,
            root_cluster: ROOT_CLUSTER,
            fs_info_sector: FS_INFO_SECTOR,
            hidden_sectors,
            volume_serial_number,
        })
    }
}

impl Fat32 {
    /// Attempts to write the boot sectors, FSInfo, both FATs & the root directory onto the device.
    /// The device must be at least as large as the provided `dev_size`.
    pub fn write<T: Write + Seek>(&self, f: &mut T) -> Result<(), Fat32Error> {
        self.write_with_progress(f, |_| {})
    }

    /// Same as [`Fat32::write`], reporting each completed stage to `progress`.
    pub fn write_with_progress<T, P>(&self, f: &mut T, mut progress: P) -> Result<(), Fat32Error>
    where
        T: Write + Seek,
        P: FnMut(FormatProgress),
    {
        let len = f
            .seek(SeekFrom::End(0))
            .map_err(Fat32Error::io(FormatStage::Prepare))?;
        if len < self.format_options.dev_size {
            return Err(Fat32FormatError::InvalidFileSize {
                expected: self.format_options.dev_size,
                actual: len,
            }
            .into());
        }

        let total = if self.format_options.full_format { 6 } else { 5 };
        let mut completed = 0;
        let mut done = |stage: FormatStage| {
            completed += 1;
            info!("wrote {stage}");
            progress(FormatProgress {
                stage,
                completed,
                total,
            });
        };

        if self.format_options.full_format {
            disk::write_zeroes(f, self.total_sectors << self.bytes_per_sector_shift, 0)
                .map_err(Fat32Error::io(FormatStage::Zero))?;
            done(FormatStage::Zero);
        }

        // write main & backup boot sector
        self.write_boot_sectors(f)?;
        done(FormatStage::BootSector);

        self.write_fs_info(f)?;
        done(FormatStage::FsInfo);

        // write both copies of the FAT
        self.write_fat(f, 0)?;
        done(FormatStage::PrimaryFat);
        self.write_fat(f, 1)?;
        done(FormatStage::SecondaryFat);

        self.write_root_directory(f)?;
        done(FormatStage::RootDirectory);

        Ok(())
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.format_options.bytes_per_sector
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_cluster
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Sectors occupied by a single FAT.
    pub fn fat_length(&self) -> u32 {
        self.fat_length
    }

    /// Number of clusters in the data region.
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn volume_serial(&self) -> u32 {
        self.volume_serial_number.get()
    }

    /// Sector offset of the FAT with the given (zero-based) index.
    pub fn fat_offset(&self, index: u8) -> u64 {
        self.reserved_sectors as u64 + index as u64 * self.fat_length as u64
    }

    /// Sector offset of the data region (cluster `2`).
    pub fn data_offset(&self) -> u64 {
        self.fat_offset(self.number_of_fats)
    }

    /// Byte offset of the root directory cluster.
    pub fn root_offset_bytes(&self) -> u64 {
        let sector = self.data_offset()
            + (self.root_cluster - crate::FIRST_USABLE_CLUSTER_INDEX) as u64
                * self.sectors_per_cluster as u64;
        self.offset_sector_bytes(sector)
    }

    /// Offset in bytes until the given sector index.
    pub(super) fn offset_sector_bytes(&self, sector_index: u64) -> u64 {
        sector_index << self.bytes_per_sector_shift
    }
}

#[cfg(test)]
pub(crate) fn test_options(size: u64) -> FormatVolumeOptionsBuilder {
    let mut builder = FormatVolumeOptionsBuilder::default();
    builder
        .dev_size(size)
        .bytes_per_sector(512)
        .volume_serial(0x1234_5678);
    builder
}

#[test]
fn auto_cluster_size() {
    let gib = crate::GB as u64;
    for (size, expected) in [
        (gib, 4096),
        (8 * gib, 8192),
        (16 * gib, 16384),
        (32 * gib, 32768),
        (64 * gib, 32768),
    ] {
        let options = test_options(size).build().unwrap();
        let fat32 = Fat32::try_from(options).unwrap();

        assert_eq!(fat32.bytes_per_cluster(), expected, "size {size}");
        assert_eq!(
            fat32.sectors_per_cluster() as u32,
            expected / 512,
            "size {size}"
        );
    }
}

#[test]
fn layout_100mb() {
    let options = test_options(100 * crate::MB as u64).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();

    assert_eq!(fat32.bytes_per_cluster(), 4096);
    assert_eq!(fat32.total_sectors(), 204800);
    assert_eq!(fat32.fat_length(), 200);
    assert_eq!(fat32.cluster_count(), 25546);
    assert_eq!(fat32.fat_offset(0), 32);
    assert_eq!(fat32.fat_offset(1), 232);
    assert_eq!(fat32.data_offset(), 432);
    assert_eq!(fat32.root_offset_bytes(), 432 * 512);
    assert_eq!(fat32.hidden_sectors, 63);
}

#[test]
fn explicit_cluster_size() {
    let options = test_options(crate::GB as u64)
        .bytes_per_cluster(16 * crate::KB as u32)
        .build()
        .unwrap();
    let fat32 = Fat32::try_from(options).unwrap();

    assert_eq!(fat32.bytes_per_cluster(), 16384);
    assert_eq!(fat32.sectors_per_cluster(), 32);
}

#[test]
fn invalid_geometry() {
    for bytes_per_sector in [0, 256, 513, 8192] {
        let options = test_options(crate::GB as u64)
            .bytes_per_sector(bytes_per_sector)
            .build()
            .unwrap();
        assert!(matches!(
            Fat32::try_from(options),
            Err(Fat32FormatError::InvalidBytesPerSector(b)) if b == bytes_per_sector
        ));
    }

    for bytes_per_cluster in [256, 1000, 128 * crate::KB as u32] {
        let options = test_options(crate::GB as u64)
            .bytes_per_cluster(bytes_per_cluster)
            .build()
            .unwrap();
        assert!(matches!(
            Fat32::try_from(options),
            Err(Fat32FormatError::InvalidClusterSize(c)) if c == bytes_per_cluster
        ));
    }

    // cluster smaller than a sector
    let options = test_options(crate::GB as u64)
        .bytes_per_sector(4096)
        .bytes_per_cluster(2048)
        .build()
        .unwrap();
    assert!(matches!(
        Fat32::try_from(options),
        Err(Fat32FormatError::InvalidClusterSize(2048))
    ));
}

#[test]
fn invalid_sizes() {
    let options = test_options(16 * crate::KB as u64).build().unwrap();
    assert!(matches!(
        Fat32::try_from(options),
        Err(Fat32FormatError::VolumeTooSmall(_))
    ));

    // more than 2^32 sectors
    let options = test_options(4096 * crate::GB as u64).build().unwrap();
    assert!(matches!(
        Fat32::try_from(options),
        Err(Fat32FormatError::InvalidSize(_))
    ));

    // 2^29 clusters
    let options = test_options(2048 * crate::GB as u64)
        .bytes_per_sector(4096)
        .bytes_per_cluster(4096)
        .build()
        .unwrap();
    assert!(matches!(
        Fat32::try_from(options),
        Err(Fat32FormatError::TooManyClusters(_))
    ));
}

#[test]
fn invalid_backup_boot_sector() {
    for backup in [1, 32, 100] {
        let options = test_options(crate::GB as u64)
            .backup_boot_sector(backup)
            .build()
            .unwrap();
        assert!(matches!(
            Fat32::try_from(options),
            Err(Fat32FormatError::InvalidBackupBootSector(b)) if b == backup
        ));
    }
}

#[test]
fn device_too_small() {
    let options = test_options(32 * crate::MB as u64).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    let mut f = std::io::Cursor::new(vec![0u8; 16 * crate::MB as usize]);

    assert!(matches!(
        fat32.write(&mut f),
        Err(Fat32Error::Format(Fat32FormatError::InvalidFileSize { .. }))
    ));
    assert!(f.get_ref().iter().all(|b| *b == 0));
}

#[test]
fn progress_is_reported_per_stage() {
    let size = 40 * crate::MB as u64;
    let options = test_options(size).full_format(true).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    let mut f = std::io::Cursor::new(vec![0u8; size as usize]);

    let mut stages = Vec::new();
    fat32
        .write_with_progress(&mut f, |p| stages.push((p.stage, p.completed, p.total)))
        .unwrap();

    assert_eq!(
        stages,
        [
            (FormatStage::Zero, 1, 6),
            (FormatStage::BootSector, 2, 6),
            (FormatStage::FsInfo, 3, 6),
            (FormatStage::PrimaryFat, 4, 6),
            (FormatStage::SecondaryFat, 5, 6),
            (FormatStage::RootDirectory, 6, 6),
        ]
    );
}
