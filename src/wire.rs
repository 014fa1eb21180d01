//! The wire representation of symbol data.
//!
//! Exact byte layout matters here: these messages are what travels
//! between the processes of a distributed tool, and both sides may be
//! built from different revisions. All integers are little-endian. A
//! string is a `u64` byte length followed by that many bytes of UTF-8. A
//! sequence is a `u64` element count followed by the elements.
//!
//! The address bitmap payload carries no explicit length; it always has
//! exactly `max(1, ceil(width / 8))` bytes, derived from the range that
//! precedes it. Bit `i` of byte `i / 8` at position `i % 8` (LSB-first)
//! corresponds to address `range.begin() + i`. Padding bits past the
//! last address are written as zero and ignored on decode.

use std::str;

use crate::range::AddressRange;
use crate::Error;
use crate::Result;


/// The number of payload bytes of a packed bitmap over `range`.
///
/// Computed from the bound difference rather than `width()` so that
/// even the full address range, whose width is not representable,
/// cannot overflow on the decode path.
pub(crate) fn packed_len(range: AddressRange) -> u64 {
    ((range.end() - range.begin()) / 8) + 1
}

/// A cursor-style reader over a byte slice, advancing past whatever it
/// returns.
pub(crate) trait ReadRaw<'data> {
    /// Ensure that `len` bytes are available for consumption.
    fn ensure(&self, len: usize) -> Option<()>;

    /// Consume and return `len` bytes.
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]>;

    /// Read a `u32` value.
    fn read_u32(&mut self) -> Option<u32> {
        let data = self.read_slice(4)?;
        // SANITY: The slice has exactly four bytes if the read succeeded.
        Some(u32::from_le_bytes(data.try_into().unwrap()))
    }

    /// Read a `u64` value.
    fn read_u64(&mut self) -> Option<u64> {
        let data = self.read_slice(8)?;
        // SANITY: The slice has exactly eight bytes if the read succeeded.
        Some(u64::from_le_bytes(data.try_into().unwrap()))
    }
}

impl<'data> ReadRaw<'data> for &'data [u8] {
    fn ensure(&self, len: usize) -> Option<()> {
        (len <= self.len()).then_some(())
    }

    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.split_at(len);
        *self = tail;
        Some(head)
    }
}


fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_u64(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn put_range(out: &mut Vec<u8>, range: AddressRange) {
    put_u64(out, range.begin());
    put_u64(out, range.end());
}

fn read_str<'data>(data: &mut &'data [u8]) -> Result<&'data str> {
    let len = data
        .read_u64()
        .ok_or_else(|| Error::malformed("truncated string length"))?;
    let len = usize::try_from(len).map_err(|_err| Error::malformed("oversized string length"))?;
    let bytes = data
        .read_slice(len)
        .ok_or_else(|| Error::malformed("truncated string"))?;
    str::from_utf8(bytes).map_err(|_err| Error::malformed("string is not valid UTF-8"))
}

fn read_range(data: &mut &[u8]) -> Result<AddressRange> {
    let begin = data
        .read_u64()
        .ok_or_else(|| Error::malformed("truncated address range"))?;
    let end = data
        .read_u64()
        .ok_or_else(|| Error::malformed("truncated address range"))?;
    if end < begin {
        return Err(Error::malformed(format!(
            "inverted address range [{begin:#x}, {end:#x}]"
        )))
    }
    Ok(AddressRange::new(begin, end))
}

/// Read a sequence element count, rejecting counts that could not
/// possibly fit into the remaining data given a per-element minimum of
/// `min_size` bytes.
fn read_count(data: &mut &[u8], min_size: usize) -> Result<usize> {
    let count = data
        .read_u64()
        .ok_or_else(|| Error::malformed("truncated element count"))?;
    let count = usize::try_from(count).map_err(|_err| Error::malformed("oversized element count"))?;
    if count.checked_mul(min_size).map_or(true, |total| total > data.len()) {
        return Err(Error::malformed("element count exceeds message size"))
    }
    Ok(count)
}


/// A packed address bitmap: an address range and one bit of occupancy
/// per address in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapMessage {
    /// The range of addresses the bitmap covers.
    pub range: AddressRange,
    /// The packed per-address bits; see the module documentation for the
    /// exact layout.
    pub bitmap: Vec<u8>,
}

impl BitmapMessage {
    /// Append the encoded form of this message to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_range(out, self.range);
        out.extend_from_slice(&self.bitmap);
    }

    /// Decode a message from the front of `data`, advancing it.
    pub fn decode(data: &mut &[u8]) -> Result<Self> {
        let range = read_range(data)?;
        let len = usize::try_from(packed_len(range))
            .map_err(|_err| Error::malformed("oversized address bitmap"))?;
        let bitmap = data
            .read_slice(len)
            .ok_or_else(|| Error::malformed("truncated address bitmap"))?;
        Ok(Self {
            range,
            bitmap: bitmap.to_vec(),
        })
    }
}


/// The name of a file, identified by path and content checksum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileNameMessage {
    /// The full path of the file.
    pub path: String,
    /// The checksum of the file's contents; 0 means "not computed".
    pub checksum: u64,
}

impl FileNameMessage {
    /// Append the encoded form of this message to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.path);
        put_u64(out, self.checksum);
    }

    /// Decode a message from the front of `data`, advancing it.
    pub fn decode(data: &mut &[u8]) -> Result<Self> {
        let path = read_str(data)?.to_string();
        let checksum = data
            .read_u64()
            .ok_or_else(|| Error::malformed("truncated checksum"))?;
        Ok(Self { path, checksum })
    }
}


/// One address range of a function, together with its mangled name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionEntry {
    /// An address range occupied by the function.
    pub range: AddressRange,
    /// The mangled name of the function.
    pub name: String,
}

/// One address range of a statement, together with its source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementEntry {
    /// An address range occupied by the statement.
    pub range: AddressRange,
    /// The name of the statement's source file.
    pub file: FileNameMessage,
    /// The line number of the statement.
    pub line: u32,
    /// The column number of the statement.
    pub column: u32,
}

/// The full symbol table of one linked object.
///
/// An entity with multiple disjoint address ranges appears as multiple
/// entries sharing its name (or source position); decoding groups them
/// back together in entry order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// The name of the linked object file the table describes.
    pub file: FileNameMessage,
    /// The function entries of the table.
    pub functions: Vec<FunctionEntry>,
    /// The statement entries of the table.
    pub statements: Vec<StatementEntry>,
}

impl SymbolTableMessage {
    /// An address range plus a string length: the least bytes any
    /// function entry can occupy.
    const MIN_FUNCTION_SIZE: usize = 24;
    /// An address range, an empty file name message, a line, and a
    /// column: the least bytes any statement entry can occupy.
    const MIN_STATEMENT_SIZE: usize = 40;

    /// Append the encoded form of this message to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.file.encode(out);
        put_u64(out, self.functions.len() as u64);
        for entry in &self.functions {
            put_range(out, entry.range);
            put_str(out, &entry.name);
        }
        put_u64(out, self.statements.len() as u64);
        for entry in &self.statements {
            put_range(out, entry.range);
            entry.file.encode(out);
            put_u32(out, entry.line);
            put_u32(out, entry.column);
        }
    }

    /// Decode a message from the front of `data`, advancing it.
    pub fn decode(data: &mut &[u8]) -> Result<Self> {
        let file = FileNameMessage::decode(data)?;

        let count = read_count(data, Self::MIN_FUNCTION_SIZE)?;
        let mut functions = Vec::with_capacity(count);
        for _i in 0..count {
            let range = read_range(data)?;
            let name = read_str(data)?.to_string();
            functions.push(FunctionEntry { range, name });
        }

        let count = read_count(data, Self::MIN_STATEMENT_SIZE)?;
        let mut statements = Vec::with_capacity(count);
        for _i in 0..count {
            let range = read_range(data)?;
            let file = FileNameMessage::decode(data)?;
            let line = data
                .read_u32()
                .ok_or_else(|| Error::malformed("truncated line number"))?;
            let column = data
                .read_u32()
                .ok_or_else(|| Error::malformed("truncated column number"))?;
            statements.push(StatementEntry {
                range,
                file,
                line,
                column,
            });
        }

        Ok(Self {
            file,
            functions,
            statements,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    /// Check that a bitmap message encodes to the exact documented byte
    /// sequence.
    #[test]
    fn bitmap_message_layout() {
        let msg = BitmapMessage {
            range: AddressRange::new(0, 9),
            // Addresses 0, 1, 2, and 5 occupied.
            bitmap: vec![0b0010_0111, 0x00],
        };
        let mut encoded = Vec::new();
        msg.encode(&mut encoded);

        let mut expected = Vec::new();
        expected.extend_from_slice(&0u64.to_le_bytes());
        expected.extend_from_slice(&9u64.to_le_bytes());
        expected.extend_from_slice(&[0b0010_0111, 0x00]);
        assert_eq!(encoded, expected);

        let mut data = encoded.as_slice();
        let decoded = BitmapMessage::decode(&mut data).unwrap();
        assert_eq!(decoded, msg);
        assert!(data.is_empty());
    }

    /// Check that truncated and inverted inputs are rejected.
    #[test]
    fn bitmap_message_rejects_malformed() {
        let mut encoded = Vec::new();
        BitmapMessage {
            range: AddressRange::new(0, 9),
            bitmap: vec![0xff, 0x03],
        }
        .encode(&mut encoded);

        // Truncate the payload.
        let mut data = &encoded[..encoded.len() - 1];
        let err = BitmapMessage::decode(&mut data).unwrap_err();
        assert!(format!("{err}").contains("truncated"));

        // Invert the range.
        let mut inverted = Vec::new();
        inverted.extend_from_slice(&9u64.to_le_bytes());
        inverted.extend_from_slice(&0u64.to_le_bytes());
        inverted.extend_from_slice(&[0xff]);
        let mut data = inverted.as_slice();
        let err = BitmapMessage::decode(&mut data).unwrap_err();
        assert!(format!("{err}").contains("inverted"));
    }

    /// Check the file name message round trip and its byte layout.
    #[test]
    fn file_name_message_layout() {
        let msg = FileNameMessage {
            path: "/usr/lib/libm.so".to_string(),
            checksum: 0xdead_beef_cafe_f00d,
        };
        let mut encoded = Vec::new();
        msg.encode(&mut encoded);

        let mut expected = Vec::new();
        expected.extend_from_slice(&16u64.to_le_bytes());
        expected.extend_from_slice(b"/usr/lib/libm.so");
        expected.extend_from_slice(&0xdead_beef_cafe_f00du64.to_le_bytes());
        assert_eq!(encoded, expected);

        let mut data = encoded.as_slice();
        assert_eq!(FileNameMessage::decode(&mut data).unwrap(), msg);
    }

    /// Check that a symbol table message survives a round trip.
    #[test]
    fn symbol_table_message_round_trip() {
        let msg = SymbolTableMessage {
            file: FileNameMessage {
                path: "/usr/bin/app".to_string(),
                checksum: 1,
            },
            functions: vec![
                FunctionEntry {
                    range: AddressRange::new(0x100, 0x1ff),
                    name: "_Z4mainv".to_string(),
                },
                FunctionEntry {
                    range: AddressRange::new(0x400, 0x40f),
                    name: "_Z4mainv".to_string(),
                },
            ],
            statements: vec![StatementEntry {
                range: AddressRange::new(0x100, 0x103),
                file: FileNameMessage {
                    path: "main.c".to_string(),
                    checksum: 0,
                },
                line: 42,
                column: 1,
            }],
        };
        let mut encoded = Vec::new();
        msg.encode(&mut encoded);

        let mut data = encoded.as_slice();
        assert_eq!(SymbolTableMessage::decode(&mut data).unwrap(), msg);
        assert!(data.is_empty());
    }

    /// Check that an absurd element count is rejected instead of being
    /// allocated for.
    #[test]
    fn symbol_table_message_rejects_oversized_count() {
        let mut encoded = Vec::new();
        FileNameMessage {
            path: String::new(),
            checksum: 0,
        }
        .encode(&mut encoded);
        encoded.extend_from_slice(&u64::MAX.to_le_bytes());

        let mut data = encoded.as_slice();
        let err = SymbolTableMessage::decode(&mut data).unwrap_err();
        assert!(format!("{err}").contains("element count"));
    }
}
