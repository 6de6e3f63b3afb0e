use std::io::ErrorKind;

use bytemuck::pod_read_unaligned;
use log::debug;

use crate::{
    FIRST_USABLE_CLUSTER_INDEX, Label,
    boot_sector::{BOOT_SECTOR_SIZE, BOOT_SIGNATURE, BootSector, FsInfo},
    disk::ReadOffset,
    error::VolumeError,
    fat::{FAT32_ENTRY_MASK, Fat, FatEntry, MAX_CLUSTER_COUNT, VolumeStatus},
};

/// A FAT32 volume opened for inspection.
pub struct Volume<O> {
    device: O,
    boot: BootSector,
    fs_info: FsInfo,
}

impl<O: ReadOffset> Volume<O> {
    /// Reads & validates the boot sector, the backup boot sector (if present) and the FSInfo
    /// sector.
    pub fn open(device: O) -> Result<Volume<O>, VolumeError> {
        let mut sector = [0u8; BOOT_SECTOR_SIZE];
        device.read_exact_at(0, &mut sector)?;
        let boot: BootSector = pod_read_unaligned(&sector);

        if boot.boot_signature() != BOOT_SIGNATURE {
            return Err(VolumeError::InvalidBootSignature(boot.boot_signature()));
        }
        if !boot.is_fat32() {
            return Err(VolumeError::WrongFs);
        }

        let bytes_per_sector = boot.bytes_per_sector();
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            return Err(VolumeError::InvalidBytesPerSector(bytes_per_sector));
        }
        let sectors_per_cluster = boot.sectors_per_cluster();
        if !sectors_per_cluster.is_power_of_two() {
            return Err(VolumeError::InvalidSectorsPerCluster(sectors_per_cluster));
        }
        if ![1, 2].contains(&boot.number_of_fats()) {
            return Err(VolumeError::InvalidNumberOfFats(boot.number_of_fats()));
        }
        let reserved_sectors = boot.reserved_sectors();
        if reserved_sectors <= boot.fs_info_sector() || boot.fs_info_sector() == 0 {
            return Err(VolumeError::InvalidReservedSectors(reserved_sectors));
        }
        if boot.cluster_count() > MAX_CLUSTER_COUNT {
            return Err(VolumeError::TooManyClusters(boot.cluster_count()));
        }
        let root_cluster = boot.root_cluster();
        if !(FIRST_USABLE_CLUSTER_INDEX..=boot.cluster_count() + 1).contains(&root_cluster) {
            return Err(VolumeError::InvalidRootDirectoryClusterIndex(root_cluster));
        }

        // the last sector must be on the device
        let volume_length = boot.total_sectors() as u64 * bytes_per_sector as u64;
        match device.read_exact_at(volume_length - 1, &mut [0u8]) {
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(VolumeError::Truncated(volume_length));
            }
            result => result?,
        }

        let backup = boot.backup_boot_sector();
        if backup != 0 {
            let mut backup_sector = [0u8; BOOT_SECTOR_SIZE];
            device.read_exact_at(backup as u64 * bytes_per_sector as u64, &mut backup_sector)?;
            if backup_sector != sector {
                return Err(VolumeError::BackupBootSectorMismatch(backup));
            }
        }

        let fs_info_sector = boot.fs_info_sector();
        device.read_exact_at(fs_info_sector as u64 * bytes_per_sector as u64, &mut sector)?;
        let fs_info: FsInfo = pod_read_unaligned(&sector);
        if !fs_info.is_valid() {
            return Err(VolumeError::InvalidFsInfo(fs_info_sector));
        }

        debug!(
            "opened FAT32 volume {} with {} clusters of {} bytes",
            boot.volume_label(),
            boot.cluster_count(),
            boot.bytes_per_cluster()
        );

        Ok(Self {
            device,
            boot,
            fs_info,
        })
    }

    /// Loads the FAT with the given (zero-based) index.
    pub fn fat(&self, index: u8) -> Result<Fat, VolumeError> {
        Ok(Fat::load(&self.device, &self.boot, index)?)
    }

    /// Checks that all FATs are identical, that the reserved entries are intact and that the root
    /// directory is a terminated cluster chain.
    pub fn verify(&self) -> Result<(), VolumeError> {
        let fat = self.fat(0)?;

        for index in 1..self.boot.number_of_fats() {
            let copy = self.fat(index)?;
            if let Some(entry) = fat
                .entries()
                .iter()
                .zip(copy.entries())
                .position(|(a, b)| a != b)
            {
                return Err(VolumeError::FatMismatch {
                    index,
                    entry: entry as u32,
                });
            }
        }

        let media = fat.entry(0).map(FatEntry::raw).unwrap_or_default();
        if media != 0x0FFFFF00 | self.boot.media() as u32 {
            return Err(VolumeError::InvalidReservedEntry {
                index: 0,
                value: media,
            });
        }
        // the status bits of entry 1 may be cleared by a driver
        let reserved = fat.entry(1).unwrap_or(FatEntry(0));
        let mask = FAT32_ENTRY_MASK & !VolumeStatus::all().bits();
        if reserved.raw() & mask != mask {
            return Err(VolumeError::InvalidReservedEntry {
                index: 1,
                value: reserved.raw(),
            });
        }

        // follow the root directory chain; it can't be longer than the cluster count
        let mut cluster = self.boot.root_cluster();
        for _ in 0..self.boot.cluster_count() {
            let entry = fat
                .entry(cluster)
                .ok_or(VolumeError::BrokenRootChain(cluster))?;
            if entry.is_eoc() {
                return Ok(());
            }
            cluster = entry.next().ok_or(VolumeError::BrokenRootChain(cluster))?;
        }
        Err(VolumeError::BrokenRootChain(cluster))
    }

    /// Reads the cluster with the given index into `buffer`, which must hold exactly one cluster.
    pub fn read_cluster(&self, cluster: u32, buffer: &mut [u8]) -> Result<(), VolumeError> {
        let end = self
            .boot
            .cluster_count()
            .checked_add(FIRST_USABLE_CLUSTER_INDEX)
            .ok_or(VolumeError::TooManyClusters(self.boot.cluster_count()))?;
        if !(FIRST_USABLE_CLUSTER_INDEX..end).contains(&cluster) {
            return Err(VolumeError::InvalidClusterIndex(cluster));
        }
        let expected = self.boot.bytes_per_cluster() as usize;
        if buffer.len() != expected {
            return Err(VolumeError::InvalidBufferLength {
                expected,
                actual: buffer.len(),
            });
        }

        let sector = self.boot.first_data_sector()
            + (cluster - FIRST_USABLE_CLUSTER_INDEX) as u64 * self.boot.sectors_per_cluster() as u64;
        self.device
            .read_exact_at(sector * self.boot.bytes_per_sector() as u64, buffer)?;
        Ok(())
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn fs_info(&self) -> &FsInfo {
        &self.fs_info
    }

    pub fn label(&self) -> Label {
        self.boot.volume_label()
    }

    pub fn cluster_count(&self) -> u32 {
        self.boot.cluster_count()
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.boot.bytes_per_cluster()
    }

    pub fn into_inner(self) -> O {
        self.device
    }
}

#[cfg(test)]
fn formatted(
    options: &mut crate::format::FormatVolumeOptionsBuilder,
) -> (crate::format::Fat32, std::io::Cursor<Vec<u8>>) {
    use crate::format::Fat32;

    let options = options.build().unwrap();
    let size = options.dev_size;
    let fat32 = Fat32::try_from(options).unwrap();
    let mut f = std::io::Cursor::new(vec![0xAAu8; size as usize]);
    fat32.write(&mut f).unwrap();
    (fat32, f)
}

#[test]
fn end_to_end_100mb() {
    let size: u64 = 100 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder.dev_size(size).bytes_per_sector(512);
    let (fat32, f) = formatted(&mut builder);
    let data = f.get_ref();

    assert_eq!(fat32.bytes_per_cluster(), 4096);

    // main & backup boot sector
    assert_eq!(data[..512], data[6 * 512..7 * 512]);
    assert_eq!(&data[71..82], b"NO NAME    ");

    // FSInfo
    let fs_info = &data[512..1024];
    assert_eq!(fs_info[0..4], 0x41615252u32.to_le_bytes());
    assert_eq!(fs_info[484..488], 0x61417272u32.to_le_bytes());
    assert_eq!(fs_info[488..492], [0xFF; 4]);
    assert_eq!(fs_info[492..496], [0xFF; 4]);
    assert_eq!(fs_info[508..512], 0xAA550000u32.to_le_bytes());

    // root directory
    let root = fat32.root_offset_bytes() as usize;
    assert!(data[root..root + 4096].iter().all(|b| *b == 0));

    let volume = Volume::open(&f).unwrap();
    volume.verify().unwrap();
    assert_eq!(volume.cluster_count(), fat32.cluster_count());
    assert_eq!(volume.fs_info().free_count(), None);

    let fat = volume.fat(0).unwrap();
    assert_eq!(fat.entries().len(), 25546 + 2);
    assert_eq!(fat.free_clusters(), 25546 - 1);
    assert_eq!(
        fat.status(),
        Some(crate::fat::VolumeStatus::CLEAN_SHUTDOWN | crate::fat::VolumeStatus::NO_HARD_ERROR)
    );

    let mut cluster = vec![0xAAu8; 4096];
    volume.read_cluster(2, &mut cluster).unwrap();
    assert!(cluster.iter().all(|b| *b == 0));
    assert!(matches!(
        volume.read_cluster(25546 + 2, &mut cluster),
        Err(VolumeError::InvalidClusterIndex(25548))
    ));
    assert!(matches!(
        volume.read_cluster(2, &mut cluster[..512]),
        Err(VolumeError::InvalidBufferLength { expected: 4096, actual: 512 })
    ));
}

#[test]
fn bpb_matches_input_geometry() {
    let size: u64 = 300 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder
        .dev_size(size)
        .bytes_per_sector(1024)
        .sectors_per_track(32)
        .tracks_per_cylinder(16)
        .bytes_per_cluster(8192)
        .label(Label::new("Geometry"))
        .volume_serial(0xCAFE_F00D);
    let (fat32, f) = formatted(&mut builder);

    let volume = Volume::open(&f).unwrap();
    volume.verify().unwrap();

    let boot = volume.boot_sector();
    assert_eq!(boot.bytes_per_sector(), 1024);
    assert_eq!(boot.sectors_per_cluster(), 8);
    assert_eq!(boot.sectors_per_track(), 32);
    assert_eq!(boot.heads(), 16);
    assert_eq!(boot.hidden_sectors(), 32);
    assert_eq!(boot.total_sectors() as u64, size / 1024);
    assert_eq!(boot.fat_length(), fat32.fat_length());
    assert_eq!(boot.volume_id(), 0xCAFE_F00D);
    assert_eq!(volume.label().as_bytes(), b"Geometry   ");
}

#[test]
fn large_sectors() {
    let size: u64 = 512 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder.dev_size(size).bytes_per_sector(4096);
    let (_, f) = formatted(&mut builder);

    let volume = Volume::open(&f).unwrap();
    volume.verify().unwrap();
    assert_eq!(volume.boot_sector().backup_boot_sector(), 6);

    // backup boot sector & FSInfo live at multiples of the sector size
    let data = f.get_ref();
    assert_eq!(data[..4096], data[6 * 4096..7 * 4096]);
    assert_eq!(data[4096..4100], 0x41615252u32.to_le_bytes());
    assert!(data[4096 + 512..2 * 4096].iter().all(|b| *b == 0));
}

#[test]
fn without_backup_boot_sector() {
    let size: u64 = 64 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder
        .dev_size(size)
        .bytes_per_sector(512)
        .backup_boot_sector(0);
    let (_, f) = formatted(&mut builder);

    // sector 6 was never written
    assert!(f.get_ref()[6 * 512..7 * 512].iter().all(|b| *b == 0xAA));

    let volume = Volume::open(&f).unwrap();
    volume.verify().unwrap();
    assert_eq!(volume.boot_sector().backup_boot_sector(), 0);
}

#[test]
fn corrupted_volumes_are_rejected() {
    let size: u64 = 64 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder.dev_size(size).bytes_per_sector(512);
    let (fat32, f) = formatted(&mut builder);

    // boot signature
    let mut data = f.clone().into_inner();
    data[510] = 0;
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::InvalidBootSignature(_))
    ));

    // backup boot sector
    let mut data = f.clone().into_inner();
    data[6 * 512 + 71] = b'X';
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::BackupBootSectorMismatch(6))
    ));

    // FSInfo
    let mut data = f.clone().into_inner();
    data[512] = 0;
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::InvalidFsInfo(1))
    ));

    // second FAT
    let mut data = f.clone().into_inner();
    let entry = fat32.fat_offset(1) as usize * 512 + 5 * 4;
    data[entry] = 7;
    let volume = Volume::open(std::io::Cursor::new(data)).unwrap();
    assert!(matches!(
        volume.verify(),
        Err(VolumeError::FatMismatch { index: 1, entry: 5 })
    ));

    // root directory chain
    let mut data = f.into_inner();
    for index in 0..2 {
        let entry = fat32.fat_offset(index) as usize * 512 + 2 * 4;
        data[entry..entry + 4].copy_from_slice(&0u32.to_le_bytes());
    }
    let volume = Volume::open(std::io::Cursor::new(data)).unwrap();
    assert!(matches!(
        volume.verify(),
        Err(VolumeError::BrokenRootChain(2))
    ));
}

#[test]
fn file_backed_full_format() {
    use crate::format::Fat32;
    use std::io::Write;

    let size: u64 = 72 * crate::MB as u64;
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0xAAu8; size as usize]).unwrap();

    let options = crate::format::FormatVolumeOptionsBuilder::default()
        .dev_size(size)
        .bytes_per_sector(512)
        .full_format(true)
        .build()
        .unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    fat32.write(&mut file).unwrap();

    let volume = Volume::open(&file).unwrap();
    volume.verify().unwrap();
    assert_eq!(volume.fat(0).unwrap().free_clusters(), fat32.cluster_count() - 1);

    // the last cluster was zeroed as well
    let mut cluster = vec![0xAAu8; fat32.bytes_per_cluster() as usize];
    volume
        .read_cluster(fat32.cluster_count() + 1, &mut cluster)
        .unwrap();
    assert!(cluster.iter().all(|b| *b == 0));
}

#[test]
fn implausible_geometry_is_rejected() {
    let size: u64 = 64 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder.dev_size(size).bytes_per_sector(512);
    let (_, f) = formatted(&mut builder);

    // a single one-sector FAT addressing 4 billion clusters
    let mut data = f.clone().into_inner();
    data[13] = 1;
    data[16] = 1;
    data[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
    data[36..40].copy_from_slice(&1u32.to_le_bytes());
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::TooManyClusters(_))
    ));

    // FSInfo outside of the reserved region
    let mut data = f.clone().into_inner();
    data[14..16].copy_from_slice(&1u16.to_le_bytes());
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::InvalidReservedSectors(1))
    ));

    // image cut short
    let mut data = f.into_inner();
    data.truncate(size as usize - 512);
    assert!(matches!(
        Volume::open(std::io::Cursor::new(data)),
        Err(VolumeError::Truncated(len)) if len == size
    ));
}

#[test]
fn dirty_volume_passes_verification() {
    let size: u64 = 64 * crate::MB as u64;
    let mut builder = crate::format::FormatVolumeOptionsBuilder::default();
    builder.dev_size(size).bytes_per_sector(512);
    let (fat32, f) = formatted(&mut builder);

    // a driver clears the clean shutdown bit while mounted
    let mut data = f.into_inner();
    for index in 0..2 {
        let entry = fat32.fat_offset(index) as usize * 512 + 4;
        data[entry..entry + 4].copy_from_slice(&0x07FF_FFFFu32.to_le_bytes());
    }

    let volume = Volume::open(std::io::Cursor::new(data)).unwrap();
    volume.verify().unwrap();
    assert_eq!(
        volume.fat(0).unwrap().status(),
        Some(VolumeStatus::NO_HARD_ERROR)
    );
}
