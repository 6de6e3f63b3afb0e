use std::{
    collections::TryReserveError,
    io::{self, Cursor, ErrorKind, Seek, SeekFrom, Write},
};

/// Writes zeroes to a file from the given absolute offset (in bytes), up to the given size.
pub fn write_zeroes<T>(f: &mut T, size: u64, offset: u64) -> io::Result<()>
where
    T: Write + Seek,
{
    let zeroes = [0u8; 4 * crate::KB as usize];
    f.seek(SeekFrom::Start(offset))?;

    let mut remaining = size;
    while remaining > 0 {
        // at most 4KB
        let len = remaining.min(zeroes.len() as u64) as usize;
        f.write_all(&zeroes[..len])?;
        remaining -= len as u64;
    }
    Ok(())
}

/// Writes the whole buffer at the given absolute offset (in bytes).
pub fn write_at<T>(f: &mut T, bytes: &[u8], offset: u64) -> io::Result<()>
where
    T: Write + Seek,
{
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(bytes)
}

/// Allocates a zero-filled staging buffer, reporting allocation failure instead of aborting.
pub fn zeroed(len: usize) -> Result<Vec<u8>, TryReserveError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Positional reads from a device.
pub trait ReadOffset {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize>;

    fn read_exact_at(&self, mut offset: u64, mut buffer: &mut [u8]) -> io::Result<()> {
        while !buffer.is_empty() {
            match self.read_at(offset, buffer) {
                Ok(0) => return Err(io::Error::from(ErrorKind::UnexpectedEof)),
                Ok(n) => {
                    buffer = &mut buffer[n..];
                    offset = offset
                        .checked_add(n as u64)
                        .ok_or(io::Error::from(ErrorKind::UnexpectedEof))?;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<T: ReadOffset> ReadOffset for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (*self).read_at(offset, buf)
    }
}

impl<T: AsRef<[u8]>> ReadOffset for Cursor<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.get_ref().as_ref();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }
}

impl ReadOffset for std::fs::File {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

#[test]
fn zeroes_are_written_at_offset() {
    let mut f = Cursor::new(vec![0xAAu8; 10 * crate::KB as usize]);
    write_zeroes(&mut f, 5000, 100).unwrap();

    let data = f.get_ref();
    assert!(data[..100].iter().all(|b| *b == 0xAA));
    assert!(data[100..5100].iter().all(|b| *b == 0));
    assert!(data[5100..].iter().all(|b| *b == 0xAA));
}

#[test]
fn cursor_read_past_end() {
    let f = Cursor::new(vec![1u8; 16]);
    let mut buf = [0u8; 8];

    assert_eq!(f.read_at(12, &mut buf).unwrap(), 4);
    assert_eq!(f.read_at(16, &mut buf).unwrap(), 0);
    assert_eq!(
        f.read_exact_at(12, &mut buf).unwrap_err().kind(),
        ErrorKind::UnexpectedEof
    );
}

#[test]
fn file_read_at() {
    let mut file = tempfile::tempfile().unwrap();
    write_at(&mut file, b"fat32", 512).unwrap();

    let mut buf = [0u8; 5];
    file.read_exact_at(512, &mut buf).unwrap();
    assert_eq!(&buf, b"fat32");
}

#[test]
fn zeroes_survive_short_writes() {
    /// Accepts at most 100 bytes per call.
    struct Trickle(Cursor<Vec<u8>>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let len = buf.len().min(100);
            self.0.write(&buf[..len])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Trickle {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    let mut f = Trickle(Cursor::new(vec![0xAAu8; 10 * crate::KB as usize]));
    write_zeroes(&mut f, 9000, 512).unwrap();

    let data = f.0.get_ref();
    assert_eq!(data[511], 0xAA);
    assert!(data[512..9512].iter().all(|b| *b == 0));
    assert_eq!(data[9512], 0xAA);
}
