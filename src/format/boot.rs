use std::io::{Seek, Write};

use bytemuck::bytes_of;

use crate::{
    boot_sector::{BOOT_SECTOR_SIZE, BOOT_SIGNATURE, BootSector, EXTENDED_BOOT_SIGNATURE, FsInfo},
    disk,
    error::Fat32Error,
};

use super::{
    Fat32, FormatStage,
    util::{DRIVE_NUMBER, FILESYSTEM_TYPE, JUMP_BOOT, MEDIA_DESCRIPTOR, OEM_NAME},
};

impl BootSector {
    /// Creates the boot sector describing the given layout. FATs are mirrored and the volume is
    /// not bootable.
    pub(super) fn new(meta: &Fat32) -> BootSector {
        Self {
            jump_boot: JUMP_BOOT,
            oem_name: OEM_NAME,
            bytes_per_sector: meta.format_options.bytes_per_sector.to_le(),
            sectors_per_cluster: meta.sectors_per_cluster,
            reserved_sectors: meta.reserved_sectors.to_le(),
            number_of_fats: meta.number_of_fats,
            root_entries: 0,
            total_sectors_16: 0,
            media: MEDIA_DESCRIPTOR,
            fat_length_16: 0,
            sectors_per_track: meta.format_options.sectors_per_track.to_le(),
            heads: meta.format_options.tracks_per_cylinder.to_le(),
            hidden_sectors: meta.hidden_sectors.to_le(),
            // bounded by `u32::MAX` when the layout is computed
            total_sectors_32: (meta.total_sectors as u32).to_le(),
            fat_length_32: meta.fat_length.to_le(),
            ext_flags: 0, // mirror all FATs
            fs_version: 0,
            root_cluster: meta.root_cluster.to_le(),
            fs_info_sector: meta.fs_info_sector.to_le(),
            backup_boot_sector: meta.format_options.backup_boot_sector.to_le(),
            _reserved: [0; 12],
            drive_number: DRIVE_NUMBER,
            _reserved1: 0,
            boot_signature_ext: EXTENDED_BOOT_SIGNATURE,
            volume_id: meta.volume_serial_number,
            volume_label: meta.format_options.label,
            filesystem_type: FILESYSTEM_TYPE,
            boot_code: [0; 420],
            boot_signature: BOOT_SIGNATURE.to_le(),
        }
    }
}

impl Fat32 {
    /// Attempts to write the boot sector to sector `0` and, unless disabled, to the backup boot
    /// sector.
    pub(super) fn write_boot_sectors<T: Write + Seek>(&self, f: &mut T) -> Result<(), Fat32Error> {
        let stage = FormatStage::BootSector;
        let boot_sector = BootSector::new(self);

        let mut sector = self.sector_buffer(stage)?;
        sector[..BOOT_SECTOR_SIZE].copy_from_slice(bytes_of(&boot_sector));

        disk::write_at(f, &sector, 0).map_err(Fat32Error::io(stage))?;

        let backup = self.format_options.backup_boot_sector;
        if backup != 0 {
            disk::write_at(f, &sector, self.offset_sector_bytes(backup as u64))
                .map_err(Fat32Error::io(stage))?;
        }

        Ok(())
    }

    /// Attempts to write the FSInfo sector. Free cluster count & next free cluster are left unknown.
    pub(super) fn write_fs_info<T: Write + Seek>(&self, f: &mut T) -> Result<(), Fat32Error> {
        let stage = FormatStage::FsInfo;

        let mut sector = self.sector_buffer(stage)?;
        sector[..BOOT_SECTOR_SIZE].copy_from_slice(bytes_of(&FsInfo::unknown()));

        disk::write_at(
            f,
            &sector,
            self.offset_sector_bytes(self.fs_info_sector as u64),
        )
        .map_err(Fat32Error::io(stage))
    }

    /// A zeroed buffer of one sector.
    fn sector_buffer(&self, stage: FormatStage) -> Result<Vec<u8>, Fat32Error> {
        disk::zeroed(self.format_options.bytes_per_sector as usize).map_err(Fat32Error::alloc(stage))
    }
}

#[test]
fn boot_sector_fields() {
    let size: u64 = 100 * crate::MB as u64;
    let options = super::test_options(size)
        .label(crate::Label::new("TEST"))
        .build()
        .unwrap();
    let fat32 = Fat32::try_from(options).unwrap();

    let boot_sector = BootSector::new(&fat32);

    assert_eq!({ boot_sector.jump_boot }, [0xEB, 0x58, 0x90]);
    assert_eq!(boot_sector.bytes_per_sector(), 512);
    assert_eq!(boot_sector.sectors_per_cluster(), 8);
    assert_eq!(boot_sector.reserved_sectors(), 32);
    assert_eq!(boot_sector.number_of_fats(), 2);
    assert_eq!(boot_sector.media(), 0xF8);
    assert_eq!(boot_sector.sectors_per_track(), 63);
    assert_eq!(boot_sector.heads(), 255);
    assert_eq!(boot_sector.hidden_sectors(), 63);
    assert_eq!(boot_sector.total_sectors(), 204800);
    assert_eq!(boot_sector.fat_length(), 200);
    assert_eq!(boot_sector.root_cluster(), 2);
    assert_eq!(boot_sector.fs_info_sector(), 1);
    assert_eq!(boot_sector.backup_boot_sector(), 6);
    assert_eq!(boot_sector.volume_id(), 0x1234_5678);
    assert_eq!(boot_sector.volume_label().as_bytes(), b"TEST       ");
    assert_eq!(boot_sector.boot_signature(), BOOT_SIGNATURE);
    assert_eq!(boot_sector.cluster_count(), 25546);
    assert!(boot_sector.is_fat32());
}

#[test]
fn boot_sector_bytes() {
    let size: u64 = 100 * crate::MB as u64;
    let options = super::test_options(size)
        .sectors_per_track(32)
        .tracks_per_cylinder(64)
        .hidden_sectors(2048)
        .build()
        .unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    let boot_sector = BootSector::new(&fat32);
    let bytes = bytes_of(&boot_sector);

    assert_eq!(&bytes[3..11], b"MSWIN4.1");
    assert_eq!(bytes[11..13], 512u16.to_le_bytes());
    assert_eq!(bytes[24..26], 32u16.to_le_bytes());
    assert_eq!(bytes[26..28], 64u16.to_le_bytes());
    assert_eq!(bytes[28..32], 2048u32.to_le_bytes());
    assert_eq!(bytes[66], 0x29);
    assert_eq!(&bytes[71..82], b"NO NAME    ");
    assert_eq!(&bytes[82..90], b"FAT32   ");
    assert!(bytes[90..510].iter().all(|b| *b == 0));
    assert_eq!(bytes[510..], [0x55, 0xAA]);
}
