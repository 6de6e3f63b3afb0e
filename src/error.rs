use std::{collections::TryReserveError, io, time::SystemTimeError};

use crate::format::FormatStage;

#[derive(Debug, thiserror::Error)]
pub enum Fat32FormatError {
    #[error("Invalid bytes per sector. Must be a power of `2` and between `512` and `4096`: {0}.")]
    InvalidBytesPerSector(u16),
    #[error(
        "Invalid cluster size: {0}. Must be a power of `2`, a multiple of the sector size and at most 64KB."
    )]
    InvalidClusterSize(u32),
    #[error("Invalid volume size: {0}. The sector count must fit into 32 bits.")]
    InvalidSize(u64),
    #[error("Volume of {0} sectors is too small to hold the reserved region, both FATs and the root directory.")]
    VolumeTooSmall(u64),
    #[error("Too many clusters: {0}. FAT32 supports at most `0x0FFFFFF5` clusters.")]
    TooManyClusters(u64),
    #[error(
        "Invalid backup boot sector: {0}. Must be `0` or lie within the reserved region, apart from the FSInfo sector."
    )]
    InvalidBackupBootSector(u16),
    #[error("FAT length did not converge within {0} iterations.")]
    FatLengthDiverged(u32),
    #[error("Device is smaller ({actual} bytes) than the requested volume size ({expected} bytes).")]
    InvalidFileSize { expected: u64, actual: u64 },
    #[error("Unable to generate volume serial number. Error: {0}")]
    NoSerial(#[from] SystemTimeError),
}

#[derive(Debug, thiserror::Error)]
pub enum Fat32Error {
    #[error("{0}")]
    Format(#[from] Fat32FormatError),
    #[error("I/O error while writing the {stage}: {source}.")]
    Io {
        stage: FormatStage,
        #[source]
        source: io::Error,
    },
    #[error("Unable to allocate the {stage} staging buffer: {source}.")]
    Alloc {
        stage: FormatStage,
        #[source]
        source: TryReserveError,
    },
}

impl Fat32Error {
    pub(crate) fn io(stage: FormatStage) -> impl FnOnce(io::Error) -> Fat32Error {
        move |source| Fat32Error::Io { stage, source }
    }

    pub(crate) fn alloc(stage: FormatStage) -> impl FnOnce(TryReserveError) -> Fat32Error {
        move |source| Fat32Error::Alloc { stage, source }
    }

    /// The underlying I/O error, if the format failed while writing.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Fat32Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("I/O error: {0}.")]
    Io(#[from] io::Error),
    #[error("Invalid boot sector signature: {0:#06x}.")]
    InvalidBootSignature(u16),
    #[error("The provided volume is not a FAT32 filesystem.")]
    WrongFs,
    #[error("Invalid bytes per sector detected: {0}. Must be a power of `2` between `512` and `4096`")]
    InvalidBytesPerSector(u16),
    #[error("Invalid sectors per cluster detected: {0}.")]
    InvalidSectorsPerCluster(u8),
    #[error("Invalid number of reserved sectors detected: {0}. Must hold the boot and FSInfo sector.")]
    InvalidReservedSectors(u16),
    #[error("Too many clusters detected: {0}. FAT32 supports at most `0x0FFFFFF5` clusters.")]
    TooManyClusters(u32),
    #[error("Device ends before the last sector of the volume ({0} bytes).")]
    Truncated(u64),
    #[error("Invalid number of FATs detected: {0}. Must be either `1` or `2`.")]
    InvalidNumberOfFats(u8),
    #[error(
        "Invalid index of root directory cluster detected: {0}. Must be at least `2` and at most `cluster_count + 1`"
    )]
    InvalidRootDirectoryClusterIndex(u32),
    #[error("Backup boot sector #{0} does not match the main boot sector.")]
    BackupBootSectorMismatch(u16),
    #[error("FSInfo sector #{0} carries invalid signatures.")]
    InvalidFsInfo(u16),
    #[error("Fat could not be parsed: {0}.")]
    Fat(#[from] FatLoadError),
    #[error("FAT #{index} differs from the first FAT at entry #{entry}.")]
    FatMismatch { index: u8, entry: u32 },
    #[error("Reserved FAT entry #{index} has an invalid value: {value:#010x}.")]
    InvalidReservedEntry { index: u32, value: u32 },
    #[error("Root directory cluster chain is broken at cluster #{0}.")]
    BrokenRootChain(u32),
    #[error("Cluster #{0} is not part of the data region.")]
    InvalidClusterIndex(u32),
    #[error("Buffer of {actual} bytes does not match the cluster size of {expected} bytes.")]
    InvalidBufferLength { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum FatLoadError {
    #[error("FAT starts at invalid offset.")]
    InvalidOffset,
    #[error("FAT #{0} does not exist.")]
    InvalidIndex(u8),
    #[error("Read failed at: {0:#x}.")]
    ReadFailed(u64, #[source] io::Error),
    #[error("Unable to allocate the FAT buffer: {0}.")]
    Alloc(#[from] TryReserveError),
}
