use std::io::{Seek, Write};

use log::debug;

use crate::{disk, error::Fat32Error};

use super::{Fat32, FormatStage};

impl Fat32 {
    /// Attempts to write the (empty) root directory, which occupies a single cluster.
    pub(super) fn write_root_directory<T: Write + Seek>(&self, f: &mut T) -> Result<(), Fat32Error> {
        let stage = FormatStage::RootDirectory;
        let cluster =
            disk::zeroed(self.bytes_per_cluster as usize).map_err(Fat32Error::alloc(stage))?;

        let offset = self.root_offset_bytes();
        debug!("first data sector = {}", self.data_offset());
        debug!("root directory offset = {offset:#x}");

        disk::write_at(f, &cluster, offset).map_err(Fat32Error::io(stage))
    }
}

#[test]
fn root_directory_is_zeroed() {
    use std::io::Cursor;

    let size: u64 = 100 * crate::MB as u64;
    let options = super::test_options(size).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();
    let mut f = Cursor::new(vec![0xAAu8; size as usize]);

    fat32.write_root_directory(&mut f).unwrap();

    let start = fat32.root_offset_bytes() as usize;
    let end = start + fat32.bytes_per_cluster() as usize;
    let data = f.get_ref();
    assert_eq!(start, 221184);
    assert!(data[start..end].iter().all(|b| *b == 0));
    assert_eq!(data[start - 1], 0xAA);
    assert_eq!(data[end], 0xAA);
}

#[test]
fn write_failure_aborts_format() {
    use std::io::{self, Cursor, SeekFrom};

    /// Fails every write at or beyond `limit`.
    struct FailingDevice {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl Write for FailingDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.position() + buf.len() as u64 > self.limit {
                return Err(io::Error::other("device error"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FailingDevice {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    let size: u64 = 100 * crate::MB as u64;
    let options = super::test_options(size).build().unwrap();
    let fat32 = Fat32::try_from(options).unwrap();

    // the secondary FAT starts beyond the limit
    let limit = fat32.offset_sector_bytes(fat32.fat_offset(1));
    let mut f = FailingDevice {
        inner: Cursor::new(vec![0xAAu8; size as usize]),
        limit,
    };

    let err = fat32.write(&mut f).unwrap_err();
    assert!(matches!(
        err,
        Fat32Error::Io {
            stage: FormatStage::SecondaryFat,
            ..
        }
    ));
    assert_eq!(err.io_error().unwrap().to_string(), "device error");

    // nothing after the failure was written
    let root = fat32.root_offset_bytes() as usize;
    assert!(f.inner.get_ref()[root..root + 4096].iter().all(|b| *b == 0xAA));
    // but the primary FAT was
    let fat = fat32.offset_sector_bytes(fat32.fat_offset(0)) as usize;
    assert_eq!(f.inner.get_ref()[fat], 0xF8);
}
