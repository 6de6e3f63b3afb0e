use std::io::{Seek, Write};

use bytemuck::cast_slice;

use crate::{disk, error::Fat32Error, fat::FatEntry};

use super::{
    Fat32, FormatStage,
    util::{FAT_CHUNK_SIZE, MEDIA_DESCRIPTOR},
};

impl Fat32 {
    /// Attempts to write the FAT with the given (zero-based) index. The first sector holds the
    /// reserved entries `0` & `1` and the end of the root directory chain, all other entries are
    /// free.
    pub(super) fn write_fat<T: Write + Seek>(&self, f: &mut T, index: u8) -> Result<(), Fat32Error> {
        let stage = if index == 0 {
            FormatStage::PrimaryFat
        } else {
            FormatStage::SecondaryFat
        };
        let bytes_per_sector = self.format_options.bytes_per_sector as usize;
        let offset_sectors = self.fat_offset(index);

        let mut buffer = disk::zeroed(FAT_CHUNK_SIZE.max(bytes_per_sector))
            .map_err(Fat32Error::alloc(stage))?;

        let reserved = [
            FatEntry::media_type(MEDIA_DESCRIPTOR),
            FatEntry::eoc(),
            // root directory is a single cluster
            FatEntry::eoc(),
        ];
        let reserved: &[u8] = cast_slice(&reserved[..]);
        buffer[..reserved.len()].copy_from_slice(reserved);

        // write first sector
        disk::write_at(
            f,
            &buffer[..bytes_per_sector],
            self.offset_sector_bytes(offset_sectors),
        )
        .map_err(Fat32Error::io(stage))?;

        buffer[..reserved.len()].fill(0);

        // zero the remaining sectors in chunks
        let sectors_per_chunk = (buffer.len() / bytes_per_sector) as u64;
        let mut sector = 1u64;
        while sector < self.fat_length as u64 {
            let count = sectors_per_chunk.min(self.fat_length as u64 - sector);
            disk::write_at(
                f,
                &buffer[..count as usize * bytes_per_sector],
                self.offset_sector_bytes(offset_sectors + sector),
            )
            .map_err(Fat32Error::io(stage))?;
            sector += count;
        }

        Ok(())
    }
}

#[test]
fn fat_creation() {
    use std::io::Cursor;

    let size: u64 = 100 * crate::MB as u64;
    let options = super::test_options(size).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    let mut f = Cursor::new(vec![0xAAu8; size as usize]);

    fat32.write_fat(&mut f, 0).unwrap();
    fat32.write_fat(&mut f, 1).unwrap();

    let data = f.get_ref();
    let reserved = [
        0xF8, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F,
    ];
    for index in 0..2 {
        let start = fat32.offset_sector_bytes(fat32.fat_offset(index)) as usize;
        let end = start + fat32.fat_length as usize * 512;

        assert_eq!(data[start..start + 12], reserved);
        assert!(data[start + 12..end].iter().all(|b| *b == 0));
    }

    // surrounding sectors are untouched
    let before = fat32.offset_sector_bytes(fat32.fat_offset(0)) as usize;
    let after = fat32.offset_sector_bytes(fat32.data_offset()) as usize;
    assert_eq!(data[before - 1], 0xAA);
    assert_eq!(data[after], 0xAA);
}

#[test]
fn large_fat_is_written_in_chunks() {
    use std::io::Cursor;

    // 300 FAT sectors need multiple 64KB chunks
    let size: u64 = 150 * crate::MB as u64;
    let options = super::test_options(size).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    assert!(fat32.fat_length as usize * 512 > 2 * FAT_CHUNK_SIZE);

    let mut f = Cursor::new(vec![0xAAu8; size as usize]);
    fat32.write_fat(&mut f, 1).unwrap();

    let start = fat32.offset_sector_bytes(fat32.fat_offset(1)) as usize;
    let end = fat32.offset_sector_bytes(fat32.data_offset()) as usize;
    let data = f.get_ref();
    assert!(data[start + 12..end].iter().all(|b| *b == 0));
    assert_eq!(data[end], 0xAA);
}
