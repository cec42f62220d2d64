//! The block decompression algorithm: replays literal/match tokens.

use byteorder::{ReadBytesExt, LE};
use std::io::{Cursor, Read};
use thiserror::Error;

use super::compress::MINMATCH;

/// Errors when decoding a raw LZ4 block.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("compressed block ends in the middle of a token")]
    UnexpectedEnd,
    /// The backward distance of a match is zero or reaches before the start
    /// of the window. This may be caused by a missing or incomplete prefix.
    #[error("match offset points outside the decoded window")]
    InvalidOffset,
    /// The block claims to decompress to more data than the caller allows.
    /// Always a sign of corruption, as a conforming encoder respects the
    /// negotiated maximum block size.
    #[error("block decompresses to more data than allowed")]
    OutputLimitExceeded,
    /// The size prefix of a size-prepended block does not match the number of
    /// bytes the block actually decompressed to.
    #[error("block did not decompress to its stated size")]
    UncompressedSizeMismatch,
}

/// Reads the extension of a length whose token nibble saturated at 15:
/// every byte adds to the total, each 255 promising another byte after it.
fn read_extended_length(initial: u8, reader: &mut Cursor<&[u8]>) -> Result<usize, DecodeError> {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = reader.read_u8().map_err(|_| DecodeError::UnexpectedEnd)?;
            value += more as usize;
            if more != 0xFF {
                break;
            }
        }
    }
    Ok(value)
}

/// Decompress a single LZ4 block.
///
/// Matches may reach back into `prefix`, which holds the window carried over
/// from earlier blocks in linked mode (pass an empty slice for independent
/// blocks). At most `limit` bytes are appended to `output`; a block claiming
/// more is rejected rather than decoded.
pub fn decompress_block(
    input: &[u8],
    prefix: &[u8],
    output: &mut Vec<u8>,
    limit: usize,
) -> Result<(), DecodeError> {
    let base = output.len();
    let mut reader = Cursor::new(input);
    loop {
        let token = match reader.read_u8() {
            Ok(x) => x,
            // the only clean way for a block to end is right after a token group
            _ => break,
        };

        // literal run
        let literal_length = match read_extended_length(token >> 4, &mut reader) {
            Ok(x) => x,
            Err(e) => {
                output.truncate(base);
                return Err(e);
            }
        };
        if literal_length > limit - (output.len() - base) {
            output.truncate(base);
            return Err(DecodeError::OutputLimitExceeded);
        }

        let literal_start = output.len();
        output.resize(literal_start + literal_length, 0);
        if reader.read_exact(&mut output[literal_start..]).is_err() {
            output.truncate(base);
            return Err(DecodeError::UnexpectedEnd);
        }

        // the final group of a block carries no match
        if reader.position() as usize == input.len() {
            break;
        }

        let offset = match reader.read_u16::<LE>() {
            Ok(x) => x as usize,
            _ => {
                output.truncate(base);
                return Err(DecodeError::UnexpectedEnd);
            }
        };
        let match_len = match read_extended_length(token & 0xF, &mut reader) {
            Ok(x) => MINMATCH + x,
            Err(e) => {
                output.truncate(base);
                return Err(e);
            }
        };

        if match_len > limit - (output.len() - base) {
            output.truncate(base);
            return Err(DecodeError::OutputLimitExceeded);
        }
        if let Err(e) = copy_match(offset, match_len, prefix, output) {
            output.truncate(base);
            return Err(e);
        }
    }
    Ok(())
}

/// Copies `match_len` bytes starting `offset` bytes before the end of
/// `output` onto its end.
///
/// Source and destination may overlap whenever the match is longer than its
/// offset, so the copy must proceed in forward byte order; every branch below
/// preserves that, the fast paths merely move more than one byte per step.
fn copy_match(
    offset: usize,
    match_len: usize,
    prefix: &[u8],
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let old_len = output.len();
    match offset {
        0 => return Err(DecodeError::InvalidOffset),

        i if i > old_len => {
            // the match starts inside the carried-over window
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                return Err(DecodeError::InvalidOffset);
            }
            let bytes_from_prefix = std::cmp::min(prefix_needed, match_len);
            output.extend_from_slice(
                &prefix[prefix.len() - prefix_needed..][..bytes_from_prefix],
            );
            let remaining = match_len - bytes_from_prefix;
            if remaining != 0 {
                // offset is unchanged: the output grew by exactly the bytes taken from the prefix
                return copy_match(offset, remaining, &[], output);
            }
        }

        // fastpath: a single repeated byte is a memset
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: source and destination do not overlap
            // (extend with zeroes first, then memcpy, to appease the borrow checker)
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }

        2 | 4 | 8 => {
            // fastpath: overlapping with a small power-of-two period,
            // so a 16 byte pattern buffer tiles the destination exactly
            let mut pattern = [0u8; 16];
            for chunk in pattern.chunks_mut(offset) {
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            output.resize(old_len + match_len, 0);
            for target in output[old_len..].chunks_mut(pattern.len()) {
                target.copy_from_slice(&pattern[..target.len()]);
            }
        }

        _ => {
            // slowest path: copy single bytes
            output.reserve(match_len);
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
    Ok(())
}

/// Decompress all bytes of `input` without an output bound.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut vec = Vec::new();
    decompress_block(input, &[], &mut vec, usize::max_value())?;
    Ok(vec)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aaaaaaaaaaa_lots_of_aaaaaaaaa() {
        assert_eq!(decompress(&[0x11, b'a', 1, 0]).unwrap(), b"aaaaaa");
    }

    #[test]
    fn multiple_repeated_blocks() {
        assert_eq!(
            decompress(&[0x11, b'a', 1, 0, 0x22, b'b', b'c', 2, 0]).unwrap(),
            b"aaaaaabcbcbcbc"
        );
    }

    #[test]
    fn all_literal() {
        assert_eq!(decompress(&[0x30, b'a', b'4', b'9']).unwrap(), b"a49");
    }

    #[test]
    fn offset_oob() {
        assert_eq!(decompress(&[0x10, b'a', 2, 0]), Err(DecodeError::InvalidOffset));
        assert_eq!(decompress(&[0x40, b'a', 1, 0]), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn zero_offset() {
        assert_eq!(decompress(&[0x14, b'a', 0, 0]), Err(DecodeError::InvalidOffset));
    }

    #[test]
    fn truncated_literals() {
        assert_eq!(decompress(&[0x30, b'a']), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn truncated_length_extension() {
        // literal nibble saturated but no extension byte follows
        assert_eq!(decompress(&[0xF0]), Err(DecodeError::UnexpectedEnd));
        // match length extension runs past the input end
        assert_eq!(decompress(&[0x1F, b'a', 1, 0, 0xFF]), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn match_into_prefix() {
        // minimum-length match taken entirely from the carried-over window
        let mut out = Vec::new();
        decompress_block(&[0x00, 4, 0], b"wxyz", &mut out, usize::max_value()).unwrap();
        assert_eq!(out, b"wxyz");

        // match straddling the window boundary into fresh output
        let mut out = Vec::new();
        decompress_block(&[0x02, 3, 0], b"xyz", &mut out, usize::max_value()).unwrap();
        assert_eq!(out, b"xyzxyz");
    }

    #[test]
    fn output_limit_enforced() {
        let mut out = Vec::new();
        let err = decompress_block(&[0x11, b'a', 1, 0], &[], &mut out, 3).unwrap_err();
        assert_eq!(err, DecodeError::OutputLimitExceeded);
        assert!(out.is_empty(), "rejected decode must not leave partial output");

        let mut out = Vec::new();
        decompress_block(&[0x11, b'a', 1, 0], &[], &mut out, 6).unwrap();
        assert_eq!(out, b"aaaaaa");
    }

    #[test]
    fn output_limit_enforced_for_literals() {
        // the first group fits, the literal run of the second does not
        let mut out = Vec::new();
        let err = decompress_block(&[0x11, b'a', 1, 0, 0x30, b'x', b'y', b'z'], &[], &mut out, 8)
            .unwrap_err();
        assert_eq!(err, DecodeError::OutputLimitExceeded);
        assert!(out.is_empty(), "rejected decode must not leave partial output");
    }

    #[test]
    fn truncated_extension_discards_earlier_groups() {
        let mut out = Vec::new();
        let err = decompress_block(&[0x11, b'a', 1, 0, 0xF0], &[], &mut out, 100).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEnd);
        assert!(out.is_empty(), "rejected decode must not leave partial output");
    }
}
