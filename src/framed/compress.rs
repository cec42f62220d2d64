use byteorder::{LE, WriteBytesExt};
use std::cmp;
use std::io::{self, ErrorKind, Write};
use std::mem;
use fehler::throws;

use super::{xxh32, INCOMPRESSIBLE, MAGIC};
use super::header::{BlockDescriptor, BlockSize, Flags};
use crate::raw::{compress_block, U32Table, MATCH_FLOOR};

type Error = io::Error;

/// A builder-style struct that configures compression settings.
/// This is how you compress LZ4 frames.
/// (An LZ4 file usually consists of a single frame.)
///
/// Create it using `Default::default()`.
pub struct CompressionSettings {
    independent_blocks: bool,
    block_checksums: bool,
    content_checksum: bool,
    content_size: bool,
    block_size: BlockSize,
    dictionary_id: Option<u32>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            independent_blocks: true,
            block_checksums: false,
            content_checksum: true,
            content_size: false,
            block_size: BlockSize::Auto,
            dictionary_id: None,
        }
    }
}

impl CompressionSettings {
    /// In independent mode, blocks are not allowed to reference data from
    /// previous blocks, so every block can be decoded on its own (and, if you
    /// arrange for it, in parallel). Linked blocks compress slightly better
    /// because matches may reach up to 64 KiB into the previous block.
    ///
    /// Linked mode addresses match positions absolutely across the whole
    /// input, so a single linked frame is limited to 4 GiB; compressing more
    /// than that in one frame panics. Independent frames have no such limit.
    ///
    /// Blocks are independent by default.
    pub fn independent_blocks(&mut self, v: bool) -> &mut Self {
        self.independent_blocks = v;
        self
    }

    /// Block checksums can help detect data corruption in storage and transit.
    /// They do not offer error correction though.
    ///
    /// In most cases, block checksums are not very helpful because you
    /// generally want a lower layer to deal with data corruption more
    /// comprehensively.
    ///
    /// Block checksums are disabled by default.
    pub fn block_checksums(&mut self, v: bool) -> &mut Self {
        self.block_checksums = v;
        self
    }

    /// The content checksum (also called frame checksum) is calculated over
    /// the contents of the entire frame, which makes its size overhead
    /// constant and lets it protect against incorrect decompression.
    ///
    /// Note that a decoder can only verify it *after* producing the entire
    /// output, which is the downside of content checksums.
    ///
    /// Content checksums are enabled by default.
    pub fn content_checksum(&mut self, v: bool) -> &mut Self {
        self.content_checksum = v;
        self
    }

    /// Whether to declare the original input length in the frame header.
    /// A decoder verifies the declared length against what it actually
    /// produced, so this doubles as an integrity check on top of letting
    /// consumers preallocate.
    ///
    /// Disabled by default.
    pub fn content_size(&mut self, v: bool) -> &mut Self {
        self.content_size = v;
        self
    }

    /// Upper bound for the uncompressed size of every block in the frame.
    ///
    /// The default, `BlockSize::Auto`, picks the smallest nominal size that
    /// fits the whole input in a single block.
    pub fn block_size(&mut self, v: BlockSize) -> &mut Self {
        self.block_size = v;
        self
    }

    /// An application-specific identifier telling the decompressing party
    /// which (externally agreed) dictionary the frame refers to. This codec
    /// only carries the id; it never resolves or applies dictionary content.
    ///
    /// By default no id is written.
    pub fn dictionary_id(&mut self, id: u32) -> &mut Self {
        self.dictionary_id = Some(id);
        self
    }

    /// Compresses `input` into a fresh frame.
    ///
    /// Compression of an in-memory buffer cannot fail: invalid configurations
    /// are unrepresentable and every input, however incompressible, has a
    /// stored-block encoding. The one exception is a linked frame over 4 GiB
    /// of input, which panics (see [`independent_blocks`]).
    ///
    /// [`independent_blocks`]: CompressionSettings::independent_blocks
    pub fn compress(&self, input: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();
        self.compress_into(input, &mut output)
            .expect("writing to a Vec<u8> does not fail");
        output
    }

    /// Compresses `input` as one frame written to `writer`.
    #[throws]
    pub fn compress_into<W: Write>(&self, input: &[u8], mut writer: W) {
        let block_size = self.block_size.resolve(input.len());
        let block_limit = block_size.limit();

        let mut flags = Flags::empty();
        if self.independent_blocks {
            flags |= Flags::IndependentBlocks;
        }
        if self.block_checksums {
            flags |= Flags::BlockChecksums;
        }
        if self.content_checksum {
            flags |= Flags::ContentChecksum;
        }
        if self.content_size {
            flags |= Flags::ContentSize;
        }
        if self.dictionary_id.is_some() {
            flags |= Flags::DictionaryId;
        }

        let version = 1 << 6;
        let flag_byte = version | flags.bits();
        let bd_byte = BlockDescriptor::new(block_size).0;

        let mut header = Vec::new();
        header.write_u32::<LE>(MAGIC)?;
        header.write_u8(flag_byte)?;
        header.write_u8(bd_byte)?;
        if self.content_size {
            header.write_u64::<LE>(input.len() as u64)?;
        }
        if let Some(id) = self.dictionary_id {
            header.write_u32::<LE>(id)?;
        }
        // the header checksum covers everything after the magic
        header.write_u8((xxh32(&header[4..]) >> 8) as u8)?;
        writer.write_all(&header)?;

        let mut table = U32Table::default();
        let mut scratch = vec![0u8; block_limit];
        let mut block_start = 0;
        while block_start < input.len() {
            let block_end = cmp::min(block_start + block_limit, input.len());
            let block = self.encode_block(input, block_start, block_end, &mut table, &mut scratch);

            writer.write_u32::<LE>(block.size_field())?;
            writer.write_all(block.payload())?;
            if flags.contains(Flags::BlockChecksums) {
                writer.write_u32::<LE>(xxh32(block.payload()))?;
            }

            block_start = block_end;
        }
        writer.write_u32::<LE>(0)?;

        if flags.contains(Flags::ContentChecksum) {
            writer.write_u32::<LE>(xxh32(input))?;
        }
    }

    /// Compresses one block, falling back to storing the input bytes verbatim
    /// whenever that is at least as small.
    fn encode_block<'b>(
        &self,
        input: &'b [u8],
        start: usize,
        end: usize,
        table: &mut U32Table,
        scratch: &'b mut [u8],
    ) -> BlockData<'b> {
        let raw_block = &input[start..end];

        // tiny independent blocks can never shrink, skip the matcher entirely
        if self.independent_blocks && raw_block.len() < MATCH_FLOOR {
            return BlockData::Stored(raw_block);
        }

        // capping the scratch space one byte below the input size means the
        // compressor aborts as soon as a block stops shrinking
        let budget = raw_block.len().saturating_sub(1);
        let (result, written) = {
            let mut cursor = NoPartialWrites(&mut scratch[..budget]);
            let result = if self.independent_blocks {
                *table = U32Table::default();
                compress_block(raw_block, 0, table, &mut cursor)
            } else {
                // linked mode addresses the whole input so far, letting
                // matches reach back into earlier blocks; offsets stay
                // bounded by the 64 KiB addressing limit of the raw format
                compress_block(&input[..end], start, table, &mut cursor)
            };
            let written = budget - cursor.0.len();
            (result, written)
        };

        match result {
            Ok(()) => BlockData::Compressed(&scratch[..written]),
            Err(e) => {
                debug_assert_eq!(e.kind(), ErrorKind::ConnectionAborted);
                BlockData::Stored(raw_block)
            }
        }
    }
}

/// A block as it goes on the wire. The stored/compressed distinction is a
/// proper sum type so both the encoder here and the decoder branch on it
/// exhaustively; on the wire it becomes the high bit of the size field.
enum BlockData<'a> {
    Compressed(&'a [u8]),
    Stored(&'a [u8]),
}

impl<'a> BlockData<'a> {
    fn size_field(&self) -> u32 {
        match *self {
            BlockData::Compressed(data) => data.len() as u32,
            BlockData::Stored(data) => data.len() as u32 | INCOMPRESSIBLE,
        }
    }

    fn payload(&self) -> &'a [u8] {
        match *self {
            BlockData::Compressed(data) | BlockData::Stored(data) => data,
        }
    }
}

/// Helper struct to allow more efficient code generation when using the Write
/// trait on byte buffers.
///
/// The underlying problem is that the Write impl on [u8] (and everything
/// similar, e.g. Cursor<[u8]>) is specified to write as many bytes as
/// possible before returning an error. This is a problem because it forces
/// e.g. a 32-bit write to compile to four 8-bit writes with a range check
/// every time, rather than a single 32-bit write with a range check.
///
/// This wrapper simply writes nothing in case we fail the bounds check, as we
/// throw away the entire buffer in that case anyway.
struct NoPartialWrites<'a>(&'a mut [u8]);
impl<'a> Write for NoPartialWrites<'a> {
    #[inline]
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.0.len() < data.len() {
            // quite frankly it doesn't matter what we specify here
            return Err(ErrorKind::ConnectionAborted.into());
        }

        let amt = data.len();
        let (a, b) = mem::replace(&mut self.0, &mut []).split_at_mut(data.len());
        a.copy_from_slice(data);
        self.0 = b;
        Ok(amt)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
