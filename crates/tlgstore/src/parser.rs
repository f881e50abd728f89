//! Record log format parser using nom
//!
//! File format:
//! ```text
//! TLGSTOR1\n
//! [version: u32]
//! [record_count: u32]
//! ...records...
//! ```
//!
//! Record format (all integers little-endian):
//! ```text
//! [op: u8][key_len: u32][val_len: u32][key bytes][value bytes]
//! ```
//! `op` is 1 for a put and 2 for an invalidation tombstone (val_len 0).

use nom::{
    bytes::complete::tag,
    bytes::streaming::take,
    combinator::map_opt,
    number::complete::le_u32 as header_u32,
    number::streaming::{le_u32, u8 as op_byte},
    sequence::tuple,
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for store files
pub const STORE_MAGIC: &[u8] = b"TLGSTOR1\n";

/// Current on-disk format version
pub const STORE_VERSION: u32 = 1;

/// Total header length in bytes
pub const HEADER_LEN: usize = STORE_MAGIC.len() + 8;

/// Fixed bytes preceding a record's key
pub const RECORD_PREFIX_LEN: usize = 9;

/// Store file header
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    /// File format version
    pub version: u32,
    /// Number of records written when the file was last synced
    pub record_count: u32,
}

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    /// Value written for a key
    Put,
    /// Key invalidated
    Invalidate,
}

impl RecordOp {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(RecordOp::Put),
            2 => Some(RecordOp::Invalidate),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            RecordOp::Put => 1,
            RecordOp::Invalidate => 2,
        }
    }
}

/// A record borrowed from the mapped file
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    /// Operation
    pub op: RecordOp,
    /// Key bytes
    pub key: &'a [u8],
    /// Value bytes (empty for tombstones)
    pub value: &'a [u8],
}

/// Parse the store file header
pub fn parse_header(input: &[u8]) -> Result<StoreHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    let parsed: IResult<&[u8], (&[u8], u32, u32)> =
        tuple((tag(STORE_MAGIC), header_u32, header_u32))(input);

    match parsed {
        Ok((_, (_, version, record_count))) => Ok(StoreHeader {
            version,
            record_count,
        }),
        Err(_) => Err(Error::Parse("Invalid store magic header".to_string())),
    }
}

/// Create a store file header
pub fn create_header(version: u32, record_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(STORE_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&record_count.to_le_bytes());
    header
}

/// Parse a single record.
///
/// Returns `nom::Err::Incomplete` when the input ends inside a record,
/// which the store treats as a torn trailing write.
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    let (input, op) = map_opt(op_byte, RecordOp::from_byte)(input)?;
    let (input, key_len) = le_u32(input)?;
    let (input, val_len) = le_u32(input)?;
    let (input, key) = take(key_len)(input)?;
    let (input, value) = take(val_len)(input)?;
    Ok((input, Record { op, key, value }))
}

/// Encode a record for appending to the log
pub fn encode_record(op: RecordOp, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_PREFIX_LEN + key.len() + value.len());
    buf.push(op.as_byte());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}
