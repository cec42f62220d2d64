//! A self-contained codec for the LZ4 frame format.
//!
//! A frame is a self-describing container around one or more LZ4-compressed
//! blocks, carrying optional metadata (declared content size, dictionary id)
//! and optional integrity checks (header, per-block and whole-content
//! xxHash32 checksums). Any compliant consumer can decompress and verify a
//! frame without out-of-band knowledge of the original size or the
//! compression parameters:
//!
//! ```
//! use lz4_frame::CompressionSettings;
//!
//! let frame = CompressionSettings::default().compress(b"Hello, world!");
//! assert_eq!(lz4_frame::decompress(&frame).unwrap(), b"Hello, world!");
//! ```
//!
//! The [`raw`] module exposes the block layer underneath the framing, and
//! [`compress_prepend_size`]/[`decompress_size_prepended`] offer a minimal
//! non-frame container for callers that only need a single block with its
//! original length.

#![forbid(unsafe_code)]

pub mod framed;
pub mod raw;

use byteorder::{ByteOrder, LE};

pub use crate::framed::{
    decompress_frame, BlockSize, CompressionSettings, DecoderState, DecompressionError,
    FrameDecoder,
};
pub use crate::raw::DecodeError;

/// Compresses `data` into a single LZ4 frame according to `settings`.
///
/// Same as [`CompressionSettings::compress`]; this free function is the
/// boundary most bindings call.
pub fn compress(data: &[u8], settings: &CompressionSettings) -> Vec<u8> {
    settings.compress(data)
}

/// Decompresses a single LZ4 frame, verifying whatever checksums and
/// declared sizes it carries.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecompressionError> {
    framed::decompress_frame(data)
}

/// Compresses `data` into one raw block prefixed with its uncompressed
/// length as a little-endian u32.
///
/// This is not the frame format: there are no checksums and no stored-block
/// fallback, just the minimum needed to size the output buffer when
/// decompressing. Both ends must agree on this container out-of-band.
pub fn compress_prepend_size(data: &[u8]) -> Vec<u8> {
    let mut output = vec![0u8; 4];
    LE::write_u32(&mut output, data.len() as u32);

    if data.len() <= u16::max_value() as usize {
        raw::compress_block::<_, raw::U16Table>(data, 0, &mut Default::default(), &mut output)
    } else {
        raw::compress_block::<_, raw::U32Table>(data, 0, &mut Default::default(), &mut output)
    }
    .expect("writing to a Vec<u8> does not fail");
    output
}

/// Inverse of [`compress_prepend_size`]: reads the length prefix, decodes
/// the block, and verifies the prefix matched exactly.
pub fn decompress_size_prepended(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if data.len() < 4 {
        return Err(DecodeError::UnexpectedEnd);
    }
    let uncompressed_size = LE::read_u32(data) as usize;

    // the prefix is untrusted, so it must not size an allocation on its own:
    // a block cannot expand beyond 255 bytes per input byte, and the vector
    // still grows normally if the cap undershoots
    let capacity = uncompressed_size.min(data.len().saturating_mul(255));
    let mut output = Vec::with_capacity(capacity);
    raw::decompress_block(&data[4..], &[], &mut output, uncompressed_size)?;
    if output.len() != uncompressed_size {
        return Err(DecodeError::UncompressedSizeMismatch);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::str;
    use crate::raw::{compress_block, decompress, U16Table, U32Table};

    fn compress(input: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        if input.len() <= 0xFFFF {
            compress_block::<_, U16Table>(input, 0, &mut Default::default(), &mut buf).unwrap();
        } else {
            compress_block::<_, U32Table>(input, 0, &mut Default::default(), &mut buf).unwrap();
        }
        buf
    }

    /// Test that the compressed string decompresses to the original string.
    fn inverse(s: &str) {
        let compressed = compress(s.as_bytes());
        println!("Compressed '{}' into {:?}", s, compressed);
        let decompressed = decompress(&compressed).unwrap();
        println!("Decompressed it into {:?}", str::from_utf8(&decompressed).unwrap());
        assert_eq!(decompressed, s.as_bytes());
    }

    #[test]
    fn shakespear() {
        inverse("to live or not to live");
        inverse("Love is a wonderful terrible thing");
        inverse("There is nothing either good or bad, but thinking makes it so.");
        inverse("I burn, I pine, I perish.");
    }

    #[test]
    fn save_the_pandas() {
        inverse("To cute to die! Save the red panda!");
        inverse("You are 60% water. Save 60% of yourself!");
        inverse("Save water, it doesn't grow on trees.");
        inverse("The panda bear has an amazing black-and-white fur.");
        inverse("The average panda eats as much as 9 to 14 kg of bamboo shoots a day.");
        inverse("The Empress Dowager Bo was buried with a panda skull in her vault");
    }

    #[test]
    fn not_compressible() {
        inverse("as6yhol.;jrew5tyuikbfewedfyjltre22459ba");
        inverse("jhflkdjshaf9p8u89ybkvjsdbfkhvg4ut08yfrr");
    }

    #[test]
    fn short() {
        inverse("ahhd");
        inverse("ahd");
        inverse("x-29");
        inverse("x");
        inverse("k");
        inverse(".");
        inverse("ajsdh");
    }

    #[test]
    fn empty_string() {
        inverse("");
    }

    #[test]
    fn nulls() {
        inverse("\0\0\0\0\0\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn compression_works() {
        let s = "The Read trait allows for reading bytes from a source. Implementors of the Read trait are called 'readers'. Readers are defined by one required method, read().";

        inverse(s);

        assert!(compress(s.as_bytes()).len() < s.len());
    }

    #[test]
    fn big_compression() {
        let mut s = Vec::with_capacity(2_000_000);

        for n in 0..2_000_000 {
            s.push((n as u8).wrapping_mul(0xA).wrapping_add(33) ^ 0xA2);
        }

        assert_eq!(&decompress(&compress(&s)).unwrap(), &s);
    }

    #[test]
    fn size_prepended_round_trip() {
        for input in [&b""[..], b"Hello, world!", b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"].iter() {
            let compressed = crate::compress_prepend_size(input);
            assert_eq!(crate::decompress_size_prepended(&compressed).unwrap(), *input);
        }
    }

    #[test]
    fn size_prepended_rejects_wrong_prefix() {
        let mut compressed = crate::compress_prepend_size(b"some reasonably compressible input here");
        compressed[0] ^= 1;
        crate::decompress_size_prepended(&compressed).unwrap_err();

        assert_eq!(
            crate::decompress_size_prepended(&[1, 0]),
            Err(crate::DecodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn size_prepended_huge_prefix_does_not_preallocate() {
        // a 4 GiB size prefix on a tiny body must be rejected, not allocated
        let bogus = [0xFF, 0xFF, 0xFF, 0xFF, 0x10, b'a'];
        assert_eq!(
            crate::decompress_size_prepended(&bogus),
            Err(crate::DecodeError::UncompressedSizeMismatch)
        );
    }
}
