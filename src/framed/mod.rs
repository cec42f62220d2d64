//! The LZ4 frame format: a self-describing container around raw blocks,
//! carrying optional metadata and integrity checksums.

mod compress;
mod decompress;
mod header;

use std::hash::Hasher;
use twox_hash::XxHash32;

/// The four magic bytes at the start of every LZ4 frame.
const MAGIC: u32 = 0x184D2204;
/// The frame format sets the high bit of a block size field to indicate that
/// the block data was stored uncompressed.
const INCOMPRESSIBLE: u32 = 1 << 31;
/// The raw format cannot address matches further back than 64 KiB, so linked
/// blocks carry exactly this much context across block boundaries.
const WINDOW_SIZE: usize = 64 * 1024;

/// All three frame checksums (header, block, content) derive from this hash.
fn xxh32(data: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(data);
    hasher.finish() as u32
}

pub use compress::*;
pub use decompress::*;
pub use header::{BlockSize, ParseError};
