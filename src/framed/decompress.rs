use byteorder::{ReadBytesExt, LE};
use std::hash::Hasher;
use std::io::{self, Cursor};
use twox_hash::XxHash32;
use thiserror::Error;
use fehler::{throw, throws};

use super::{xxh32, INCOMPRESSIBLE, MAGIC, WINDOW_SIZE};
use super::header::{self, BlockDescriptor, Flags};
use crate::raw::{self, DecodeError};

/// Errors when decompressing an LZ4 frame.
///
/// All of these are terminal: the decoder fails closed, discards whatever it
/// accumulated, and retrying on the same bytes cannot succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressionError {
    #[error("wrong magic number in frame header: {0:08x}")]
    BadMagic(u32),
    #[error("frame version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("invalid frame descriptor")]
    MalformedHeader(#[source] header::ParseError),
    #[error("the header checksum was invalid")]
    HeaderChecksumMismatch,
    #[error("a block failed to decode (data corruption?)")]
    MalformedBlock(#[source] DecodeError),
    #[error("a block checksum was invalid")]
    BlockChecksumMismatch,
    #[error("the content checksum was invalid")]
    ContentChecksumMismatch,
    #[error("decompressed to {actual} bytes but the header declared {declared}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("the frame ends in the middle of a field")]
    UnexpectedEndOfStream,
}
type Error = DecompressionError; // do it this way for better docs

impl From<header::ParseError> for DecompressionError {
    fn from(e: header::ParseError) -> Self {
        match e {
            header::ParseError::UnsupportedVersion(v) => DecompressionError::UnsupportedVersion(v),
            other => DecompressionError::MalformedHeader(other),
        }
    }
}

impl From<DecodeError> for DecompressionError {
    fn from(e: DecodeError) -> Self {
        DecompressionError::MalformedBlock(e)
    }
}

// The decoder only ever reads from an in-memory cursor, where the one
// possible io failure is running off the end of the input.
impl From<io::Error> for DecompressionError {
    fn from(_: io::Error) -> Self {
        DecompressionError::UnexpectedEndOfStream
    }
}

/// Where the decoder currently is inside the frame. Exposed so malformed
/// input can be diagnosed down to the exact parsing stage that rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    ExpectMagic,
    ExpectDescriptor,
    ExpectOptionalFields,
    ExpectBlocks,
    ExpectContentChecksum,
    Done,
}

/// Decoder-side mirror of the wire encoding of one block: the high bit of
/// the size field says whether the payload is raw bytes or tokens.
enum Block<'a> {
    Compressed(&'a [u8]),
    Stored(&'a [u8]),
}

/// Decodes a single frame from an in-memory buffer, one state transition at
/// a time.
///
/// Most callers just want [`decompress_frame`]; driving [`step`] manually is
/// for consumers that want to inspect header fields (or the failure state)
/// before commiting to decode the blocks.
///
/// [`step`]: FrameDecoder::step
pub struct FrameDecoder<'a> {
    reader: Cursor<&'a [u8]>,
    state: DecoderState,
    flags: Flags,
    block_maxsize: usize,
    content_size: Option<u64>,
    dictionary_id: Option<u32>,
    content_hasher: Option<XxHash32>,
    window: Option<Vec<u8>>,
    block_buf: Vec<u8>,
    output: Vec<u8>,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        FrameDecoder {
            reader: Cursor::new(input),
            state: DecoderState::ExpectMagic,
            flags: Flags::empty(),
            block_maxsize: 0,
            content_size: None,
            dictionary_id: None,
            content_hasher: None,
            window: None,
            block_buf: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn state(&self) -> DecoderState { self.state }

    /// The declared original length, known once the header has been parsed.
    pub fn content_size(&self) -> Option<u64> { self.content_size }

    /// The dictionary id carried in the header, if any. This codec does not
    /// resolve dictionaries; the id is passed through for the caller.
    pub fn dictionary_id(&self) -> Option<u32> { self.dictionary_id }

    /// Performs one state transition: parses one header section or decodes
    /// one block. Any error is terminal; the decoder stays in the state that
    /// rejected the input.
    #[throws]
    pub fn step(&mut self) {
        match self.state {
            DecoderState::ExpectMagic => {
                let magic = self.reader.read_u32::<LE>()?;
                if magic != MAGIC {
                    throw!(Error::BadMagic(magic));
                }
                self.state = DecoderState::ExpectDescriptor;
            }

            DecoderState::ExpectDescriptor => {
                let flags = Flags::parse(self.reader.read_u8()?)?;
                let bd = BlockDescriptor::parse(self.reader.read_u8()?)?;
                self.block_maxsize = bd.block_maxsize()?;

                if flags.content_checksum() {
                    self.content_hasher = Some(XxHash32::with_seed(0));
                }
                if !flags.independent_blocks() {
                    self.window = Some(Vec::with_capacity(WINDOW_SIZE));
                }
                self.flags = flags;
                self.state = DecoderState::ExpectOptionalFields;
            }

            DecoderState::ExpectOptionalFields => {
                if self.flags.content_size() {
                    self.content_size = Some(self.reader.read_u64::<LE>()?);
                }
                if self.flags.dictionary_id() {
                    self.dictionary_id = Some(self.reader.read_u32::<LE>()?);
                }

                // the checksum byte covers everything between magic and itself
                let header_end = self.reader.position() as usize;
                let expected = (xxh32(&self.reader.get_ref()[4..header_end]) >> 8) as u8;
                if self.reader.read_u8()? != expected {
                    throw!(Error::HeaderChecksumMismatch);
                }
                self.state = DecoderState::ExpectBlocks;
            }

            DecoderState::ExpectBlocks => self.decode_block()?,

            DecoderState::ExpectContentChecksum => {
                if let Some(hasher) = self.content_hasher.take() {
                    let stored = self.reader.read_u32::<LE>()?;
                    if hasher.finish() as u32 != stored {
                        throw!(Error::ContentChecksumMismatch);
                    }
                }
                if let Some(declared) = self.content_size {
                    if self.output.len() as u64 != declared {
                        throw!(Error::SizeMismatch {
                            declared,
                            actual: self.output.len() as u64,
                        });
                    }
                }
                self.state = DecoderState::Done;
            }

            DecoderState::Done => {}
        }
    }

    /// Runs the state machine to completion and returns the decoded content.
    #[throws]
    pub fn decode(mut self) -> Vec<u8> {
        while self.state != DecoderState::Done {
            self.step()?;
        }
        self.output
    }

    /// Decodes one block, or transitions onward when the end marker appears.
    #[throws]
    fn decode_block(&mut self) {
        let size_field = self.reader.read_u32::<LE>()?;
        if size_field == 0 {
            // the terminator is a size field of zero, never a real block
            self.state = DecoderState::ExpectContentChecksum;
            return;
        }

        let payload_len = (size_field & !INCOMPRESSIBLE) as usize;
        if payload_len > self.block_maxsize {
            // stored payloads are bounded by the block size directly, and a
            // conforming encoder stores any block its compressor would have
            // grown, so either kind exceeding the limit proves corruption
            throw!(Error::MalformedBlock(DecodeError::OutputLimitExceeded));
        }
        let payload = self.take(payload_len)?;

        if self.flags.block_checksums() {
            let stored = self.reader.read_u32::<LE>()?;
            if xxh32(payload) != stored {
                throw!(Error::BlockChecksumMismatch);
            }
        }

        let block = if size_field & INCOMPRESSIBLE == 0 {
            Block::Compressed(payload)
        } else {
            Block::Stored(payload)
        };

        self.block_buf.clear();
        let decoded: &[u8] = match block {
            Block::Stored(data) => data,
            Block::Compressed(data) => {
                let prefix = self.window.as_deref().unwrap_or(&[]);
                raw::decompress_block(data, prefix, &mut self.block_buf, self.block_maxsize)?;
                &self.block_buf
            }
        };

        // stored blocks are part of the match window too
        if let Some(window) = self.window.as_mut() {
            if decoded.len() >= WINDOW_SIZE {
                window.clear();
                window.extend_from_slice(&decoded[decoded.len() - WINDOW_SIZE..]);
            } else {
                let surplus = (window.len() + decoded.len()).saturating_sub(WINDOW_SIZE);
                window.drain(..surplus);
                window.extend_from_slice(decoded);
            }
        }

        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(decoded);
        }
        self.output.extend_from_slice(decoded);
    }

    /// Takes the next `len` input bytes without copying them.
    #[throws]
    fn take(&mut self, len: usize) -> &'a [u8] {
        let whole: &'a [u8] = *self.reader.get_ref();
        let start = self.reader.position() as usize;
        let slice = whole.get(start..start + len).ok_or(Error::UnexpectedEndOfStream)?;
        self.reader.set_position((start + len) as u64);
        slice
    }
}

/// Decodes one complete frame, failing closed on any structural or integrity
/// violation.
#[throws]
pub fn decompress_frame(input: &[u8]) -> Vec<u8> {
    FrameDecoder::new(input).decode()?
}
