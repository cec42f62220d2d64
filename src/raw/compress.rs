//! The block compression algorithm.
//!
//! Matching is done through a hash table that maps the next four bytes to the
//! most recent position they were seen at. This gives a reasonable compression
//! ratio at high speed and fixed memory usage.

use std::cmp;
use std::convert::TryInto;
use std::io::Write;
use std::mem;

use byteorder::{ByteOrder, NativeEndian, WriteBytesExt, LE};
use fehler::throws;

type Error = std::io::Error;

/// Number of slots in the match table.
///
/// Fewer slots means more collisions, hurting the compression ratio but not
/// correctness (a colliding candidate simply fails the byte comparison).
const TABLE_SIZE: usize = 1 << HASHLOG;
const HASHLOG: usize = 12;

/// Matches shorter than this cannot be encoded by the token grammar.
pub const MINMATCH: usize = 4;

/// Below this many remaining bytes the matcher gives up and emits literals.
/// The format requires the final five input bytes to be literals; this floor
/// additionally leaves room for the minimum match before them.
pub const MATCH_FLOOR: usize = 12;

/// The table of recent positions. Scoped to a single compression call (or one
/// linked-block sequence) so concurrent calls never share state.
pub trait PositionTable: Default {
    fn payload_size_limit() -> usize;
    /// Stores `pos` under the hash of the four bytes at `input[pos..]` and
    /// returns the previous occupant. `pos` must not exceed `payload_size_limit`.
    fn replace(&mut self, input: &[u8], pos: usize) -> usize;
}

/// Position table for inputs up to 4 GiB.
pub struct U32Table {
    slots: [u32; TABLE_SIZE],
}
impl Default for U32Table {
    fn default() -> Self {
        U32Table { slots: [0; TABLE_SIZE] }
    }
}

// on 64 bit systems we load 64 bits and hash 5 bytes instead of 4,
// which noticeably reduces collisions
#[cfg(target_pointer_width = "64")]
fn hash_for_u32(input: &[u8]) -> usize {
    // the load may come up short only in the literal tail, where no match may start anyway
    let v = input.get(..8).map(NativeEndian::read_u64).unwrap_or(0);

    #[cfg(target_endian = "little")] fn mix(v: u64) -> u64 { (v << 24).wrapping_mul(889523592379) }
    #[cfg(target_endian = "big")] fn mix(v: u64) -> u64 { (v >> 24).wrapping_mul(11400714785074694791) }
    (mix(v) >> (64 - HASHLOG)) as usize
}
#[cfg(not(target_pointer_width = "64"))]
fn hash_for_u32(input: &[u8]) -> usize {
    hash_for_u16(input) >> 1 // one more shift because this table has half as many slots
}

fn hash_for_u16(input: &[u8]) -> usize {
    let v = NativeEndian::read_u32(input);
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG - 1)) as usize
}

impl PositionTable for U32Table {
    fn replace(&mut self, input: &[u8], pos: usize) -> usize {
        let mut value = pos.try_into().expect("PositionTable contract violated");
        mem::swap(&mut self.slots[hash_for_u32(&input[pos..])], &mut value);
        value.try_into().expect("16-bit archs are not supported")
    }
    fn payload_size_limit() -> usize { u32::max_value() as usize }
}

/// Position table for inputs up to 64 KiB, using half the memory per slot to
/// fit twice as many slots.
pub struct U16Table {
    slots: [u16; TABLE_SIZE * 2],
}
impl Default for U16Table {
    fn default() -> Self {
        U16Table { slots: [0; TABLE_SIZE * 2] }
    }
}
impl PositionTable for U16Table {
    fn replace(&mut self, input: &[u8], pos: usize) -> usize {
        let mut value = pos.try_into().expect("PositionTable contract violated");
        mem::swap(&mut self.slots[hash_for_u16(&input[pos..])], &mut value);
        value.into()
    }
    fn payload_size_limit() -> usize { u16::max_value() as usize }
}

#[derive(Copy, Clone, Debug)]
struct Match {
    /// Backward distance from the cursor to where the duplicate starts.
    offset: u16,

    /// Match length beyond the implicit minimum of four bytes.
    extra_bytes: usize,
}

fn count_matching_bytes(a: &[u8], b: &[u8]) -> usize {
    const REGSIZE: usize = mem::size_of::<usize>();
    fn load_usize(b: &[u8]) -> usize {
        let mut buf = [0u8; REGSIZE];
        buf.copy_from_slice(&b[..REGSIZE]);
        usize::from_ne_bytes(buf)
    }
    #[cfg(target_endian = "little")] fn first_mismatch_bits(i: usize) -> u32 { i.trailing_zeros() }
    #[cfg(target_endian = "big")] fn first_mismatch_bits(i: usize) -> u32 { i.leading_zeros() }

    // compare a full register at a time instead of single bytes
    let mut matching = 0;
    for (a, b) in a.chunks_exact(REGSIZE).zip(b.chunks_exact(REGSIZE)) {
        let xor = load_usize(a) ^ load_usize(b);
        if xor == 0 {
            matching += REGSIZE;
        } else {
            matching += (first_mismatch_bits(xor) / 8) as usize;
            return matching;
        }
    }

    // all full registers matched, up to REGSIZE-1 stragglers remain
    let trailing = a.iter().zip(b).skip(matching).take_while(|&(a, b)| a == b).count();
    matching + trailing
}

// For every 64 positions without a match, start skipping ahead in larger steps.
// This is the search-effort budget: it caps time spent on barely-compressible
// input at the cost of missing some matches in it.
const ACCELERATION: usize = 1;
const SKIP_TRIGGER: usize = 6;

#[throws]
fn write_group<W: Write>(mut writer: &mut W, literal: &[u8], dup: Match) {
    let mut token = 0;
    write_length_nibble(&mut token, 4, literal.len());
    write_length_nibble(&mut token, 0, dup.extra_bytes);

    writer.write_u8(token)?;
    write_length_tail(&mut writer, literal.len())?;
    writer.write_all(literal)?;
    writer.write_u16::<LE>(dup.offset)?;
    write_length_tail(&mut writer, dup.extra_bytes)?;
}

/// Compresses `input[cursor..]` into `writer`, using everything before
/// `cursor` as match history. The caller owns the table, so linked blocks can
/// keep feeding the same one while independent blocks start fresh.
#[throws]
pub fn compress_block<W: Write, T: PositionTable>(input: &[u8], cursor: usize, table: &mut T, mut writer: W) {
    // positions are absolute, so the whole addressed range must fit a slot
    assert!(input.len() <= T::payload_size_limit());

    let init_cursor = cursor;
    let mut cursor = cursor;
    while cursor < input.len() {
        let literal_start = cursor;

        let mut step_counter = ACCELERATION << SKIP_TRIGGER;
        let mut step = 1;
        // look for a duplicate
        let duplicate = loop {
            if input.len().saturating_sub(cursor) < MATCH_FLOOR {
                // end with a literal-only group covering the rest of the input
                let literal_len = input.len() - literal_start;

                let mut token = 0;
                write_length_nibble(&mut token, 4, literal_len);
                writer.write_u8(token)?;
                write_length_tail(&mut writer, literal_len)?;
                writer.write_all(&input[literal_start..][..literal_len])?;
                return;
            }

            // the last five bytes must be literals, so no match may cover them
            let current_batch = &input[cursor..(input.len() - 5)];
            let candidate = table.replace(input, cursor);

            if (cursor != init_cursor) // the empty-slot sentinel is indistinguishable from position zero
                && cursor - candidate <= 0xFFFF { // must be an addressable offset
                let candidate_batch = &input[candidate..];
                let matching_bytes = count_matching_bytes(current_batch, candidate_batch);

                if let Some(mut extra_bytes) = matching_bytes.checked_sub(MINMATCH) {
                    // anything shorter was just a hash collision
                    let offset = (cursor - candidate) as u16;

                    // the end of the literal run may extend the match backwards
                    let max_backtrack = cursor - literal_start;
                    let backtrack = input[..cursor].iter().rev()
                        .zip(input[..candidate].iter().rev())
                        .take(max_backtrack)
                        .take_while(|&(a, b)| a == b)
                        .count();
                    // offset remains unchanged
                    extra_bytes += backtrack;
                    cursor += matching_bytes;

                    // remember the position just before the match end as well
                    table.replace(input, cursor - 2);

                    break Match { offset, extra_bytes };
                }
            }

            // no match, keep scanning
            cursor += step;
            step = step_counter >> SKIP_TRIGGER;
            if literal_start + 1 != cursor {
                step_counter += 1
            }
        };

        // cursor now points past the match
        let literal_end = cursor - duplicate.extra_bytes - MINMATCH;
        write_group(&mut writer, &input[literal_start..literal_end], duplicate)?;
    }
}

fn write_length_nibble(token: &mut u8, shift: usize, value: usize) {
    let i = cmp::min(value, 0xF) as u8;
    *token |= i << shift;
}

/// Writes the extension bytes for a length whose nibble saturated at 15:
/// a run of 255s followed by the remainder.
#[throws]
fn write_length_tail<W: Write>(writer: &mut W, mut value: usize) {
    if value < 0xF {
        return;
    }

    value -= 0xF;

    while value >= 4 * 0xFF {
        writer.write_u32::<NativeEndian>(u32::max_value())?;
        value -= 4 * 0xFF;
    }
    while value >= 0xFF {
        writer.write_u8(0xFF)?;
        value -= 0xFF;
    }
    writer.write_u8(value as u8)?;
}
