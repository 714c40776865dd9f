//! Checksummed frame parsing for recorder-submitted profile streams.
//!
//! A profile stream opens with an encoding version varint, a length-delimited
//! recording header, and an Adler-32 checksum varint covering both. Bytes
//! arrive in arbitrarily sized chunks, so the parser works over a resumable
//! buffer: it marks its position after every fully consumed section and resets
//! to the last mark when a section is still incomplete.


use adler32::RollingAdler32;
use prost::Message;

use crate::wire;

/// The largest varint encoding accepted, in bytes.
const MAX_VARINT_LEN: usize = 10;

/// Errors surfaced while parsing a profile stream.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The checksum declared in the stream does not match the received bytes.
    #[error("frame checksum mismatch, declared {declared} computed {computed}")]
    ChecksumMismatch { declared: u32, computed: u32 },
    /// A length-delimited message exceeds the configured size cap.
    #[error("frame message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: u64, max: usize },
    /// A varint ran past its maximum encoded length without terminating.
    #[error("malformed varint in frame")]
    MalformedVarint,
    /// A length-delimited message failed protobuf decoding.
    #[error("error decoding frame message")]
    Decode(#[from] prost::DecodeError),
}

/// The outcome of a parse attempt over the bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The target structure has been fully parsed.
    Complete,
    /// More bytes are needed; feed the buffer and parse again.
    Incomplete,
}

/// A byte accumulator with mark/reset semantics for resumable parsing.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    pos: usize,
    mark: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly received chunk to the buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Commit everything consumed so far, discarding it from the buffer.
    ///
    /// A later `reset` rewinds only to this point.
    pub fn mark(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.mark = 0;
    }

    /// Rewind the read position to the last mark.
    pub fn reset(&mut self) {
        self.pos = self.mark;
    }

    /// Read a varint, returning `None` when the buffer holds a partial encoding.
    pub fn read_varint(&mut self) -> Result<Option<u64>, FramingError> {
        let mut value = 0u64;
        for (idx, &byte) in self.buf[self.pos..].iter().enumerate() {
            if idx >= MAX_VARINT_LEN {
                return Err(FramingError::MalformedVarint);
            }
            value |= ((byte & 0x7f) as u64) << (idx * 7);
            if byte & 0x80 == 0 {
                self.pos += idx + 1;
                return Ok(Some(value));
            }
        }
        if self.buf.len() - self.pos >= MAX_VARINT_LEN {
            return Err(FramingError::MalformedVarint);
        }
        Ok(None)
    }

    /// Take the next `len` bytes, returning `None` if that many are not yet buffered.
    pub fn take(&mut self, len: usize) -> Option<&[u8]> {
        if self.buf.len() - self.pos < len {
            return None;
        }
        let start = self.pos;
        self.pos += len;
        Some(&self.buf[start..self.pos])
    }

    /// Fold every byte consumed since the last mark into the given checksum.
    pub fn update_checksum_since_mark(&self, checksum: &mut RollingAdler32) {
        checksum.update_buffer(&self.buf[self.mark..self.pos]);
    }
}

/// A resumable parser for the header section of a profile stream.
///
/// Feed received chunks into a [`FrameBuffer`] and call [`parse`] after each;
/// once it returns [`Progress::Complete`] the verified header is available.
///
/// [`parse`]: ProfileHeaderParser::parse
pub struct ProfileHeaderParser {
    max_message_size: usize,
    encoding_version: Option<u32>,
    header: Option<wire::RecordingHeader>,
    checksum: RollingAdler32,
    checksum_verified: bool,
}

impl ProfileHeaderParser {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            encoding_version: None,
            header: None,
            checksum: RollingAdler32::new(),
            checksum_verified: false,
        }
    }

    /// Attempt to parse the header from the bytes buffered so far.
    ///
    /// Safe to call repeatedly as chunks arrive; partially received sections
    /// are re-parsed from the last committed mark on the next call.
    pub fn parse(&mut self, buf: &mut FrameBuffer) -> Result<Progress, FramingError> {
        if self.header.is_none() {
            buf.reset();
            let version = match buf.read_varint()? {
                Some(version) => version,
                None => return Ok(Progress::Incomplete),
            };
            let len = match buf.read_varint()? {
                Some(len) => len,
                None => return Ok(Progress::Incomplete),
            };
            if len > self.max_message_size as u64 {
                return Err(FramingError::MessageTooLarge { len, max: self.max_message_size });
            }
            let header = {
                let bytes = match buf.take(len as usize) {
                    Some(bytes) => bytes,
                    None => return Ok(Progress::Incomplete),
                };
                wire::RecordingHeader::decode(bytes)?
            };
            buf.update_checksum_since_mark(&mut self.checksum);
            buf.mark();
            self.encoding_version = Some(version as u32);
            self.header = Some(header);
        }
        if !self.checksum_verified {
            buf.reset();
            let declared = match buf.read_varint()? {
                Some(declared) => declared,
                None => return Ok(Progress::Incomplete),
            };
            let computed = self.checksum.hash();
            if declared as u32 != computed {
                return Err(FramingError::ChecksumMismatch { declared: declared as u32, computed });
            }
            buf.mark();
            self.checksum_verified = true;
        }
        Ok(Progress::Complete)
    }

    /// The parsed header, available once `parse` has returned `Complete`.
    pub fn header(&self) -> Option<&wire::RecordingHeader> {
        if self.checksum_verified {
            self.header.as_ref()
        } else {
            None
        }
    }

    /// The stream's declared encoding version, available alongside the header.
    #[allow(dead_code)]
    pub fn encoding_version(&self) -> Option<u32> {
        self.encoding_version
    }
}
