use core::fmt;

use bytemuck::{Pod, Zeroable};

/// Length of a FAT volume label in bytes
pub const LABEL_LENGTH: usize = 11;

/// Volume label stored in the extended BIOS Parameter Block.
///
/// Labels are space padded to [`LABEL_LENGTH`] bytes and silently truncated if longer.
/// Characters outside of ASCII are replaced by `_`. The case of the label is preserved.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct Label([u8; LABEL_LENGTH]);

impl Label {
    pub fn new(label: &str) -> Label {
        let mut bytes = [b' '; LABEL_LENGTH];
        for (byte, c) in bytes.iter_mut().zip(label.chars()) {
            *byte = if c.is_ascii() && !c.is_ascii_control() {
                c as u8
            } else {
                b'_'
            };
        }
        Label(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LABEL_LENGTH] {
        &self.0
    }
}

impl Default for Label {
    /// The label used by FAT implementations for volumes without a name.
    fn default() -> Self {
        Label(*b"NO NAME    ")
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Label::new(value)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // bytes are always ASCII
        let s = core::str::from_utf8(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(s.trim_end())
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", self.to_string())
    }
}

#[test]
fn short_label_is_padded() {
    assert_eq!(Label::new("DATA").as_bytes(), b"DATA       ");
}

#[test]
fn long_label_is_truncated() {
    assert_eq!(Label::new("A VERY LONG LABEL").as_bytes(), b"A VERY LONG");
}

#[test]
fn default_label() {
    assert_eq!(Label::default().as_bytes(), b"NO NAME    ");
    assert_eq!(Label::default().to_string(), "NO NAME");
}

#[test]
fn case_is_preserved_and_non_ascii_replaced() {
    assert_eq!(Label::new("Größe").as_bytes(), b"Gr__e      ");
}
