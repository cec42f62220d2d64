//! The raw LZ4 block format.
//!
//! Using this directly saves you the overhead of framing (~11 bytes) but you
//! lose several features, most notably the fallback mechanism for
//! incompressible data: a frame stores the uncompressed bytes of a block
//! whenever the compressed version would be larger, so the compression ratio
//! of a frame is never negative. A raw block comes with no such guarantee,
//! and no checksums either.

mod compress;
mod decompress;

pub use compress::*;
pub use decompress::*;
