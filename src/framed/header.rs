//! The frame descriptor: FLG/BD bytes and the block size table.

#![allow(non_upper_case_globals)]

use thiserror::Error;
use fehler::{throw, throws};
use bitflags::bitflags;

bitflags! {
    pub(crate) struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

/// Errors in the FLG/BD descriptor bytes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("reserved block size code {0}")]
    UnsupportedBlocksize(u8),
    #[error("frame version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits in flags set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in bd set")]
    ReservedBdBitsSet,
}

impl Flags {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != 1 {
            throw!(ParseError::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }
}

/// Maximum uncompressed size of a single block, as carried in the BD byte.
///
/// The frame format defines four nominal sizes; `Auto` is resolved against
/// the input length before any header byte is emitted, so it never appears
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    Max64KB,
    Max256KB,
    Max1MB,
    Max4MB,
    /// Smallest nominal size that covers the whole input in one block,
    /// capped at 4 MiB.
    Auto,
}

impl BlockSize {
    pub(crate) fn resolve(self, input_len: usize) -> BlockSize {
        match self {
            BlockSize::Auto if input_len <= 64 * 1024 => BlockSize::Max64KB,
            BlockSize::Auto if input_len <= 256 * 1024 => BlockSize::Max256KB,
            BlockSize::Auto if input_len <= 1024 * 1024 => BlockSize::Max1MB,
            BlockSize::Auto => BlockSize::Max4MB,
            concrete => concrete,
        }
    }

    /// The BD size code, valid only after `resolve`.
    pub(crate) fn code(self) -> u8 {
        match self {
            BlockSize::Max64KB => 4,
            BlockSize::Max256KB => 5,
            BlockSize::Max1MB => 6,
            BlockSize::Max4MB => 7,
            BlockSize::Auto => unreachable!("Auto is resolved before the descriptor is built"),
        }
    }

    /// Nominal uncompressed byte limit.
    ///
    /// Panics for `Auto`, which has no fixed limit until resolved against an
    /// input length.
    pub fn limit(self) -> usize {
        1 << (self.code() * 2 + 8)
    }
}

pub(crate) struct BlockDescriptor(pub u8);
impl BlockDescriptor {
    pub fn new(block_size: BlockSize) -> Self {
        BlockDescriptor(block_size.code() << 4)
    }

    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(ParseError)]
    pub fn block_maxsize(&self) -> usize {
        let size = (self.0 >> 4) & 0b111;
        if (4..8).contains(&size) {
            1 << (size * 2 + 8)
        } else {
            throw!(ParseError::UnsupportedBlocksize(size))
        }
    }
}
