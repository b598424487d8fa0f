//! Low-level Object Container File framing: header parsing, block reads,
//! sync-marker resynchronization and zig-zag varint decoding.
//!
//! Everything in this module operates on a raw `Read + Seek` stream and
//! never invokes the Avro value codec itself; callers that need decoded
//! records layer [`apache_avro::Reader`] or [`apache_avro::Writer`] on top.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Length in bytes of an OCF sync marker.
pub const SYNC_SIZE: usize = 16;

/// The 4-byte magic that opens every OCF file: `Obj` followed by `0x01`.
pub const MAGIC: [u8; 4] = [b'O', b'b', b'j', 0x01];

/// Default chunk size used while scanning forward for a sync marker.
pub const SCAN_CHUNK_SIZE: usize = 8192;

/// Parsed OCF header: schema JSON, codec name, and sync marker.
#[derive(Debug, Clone)]
pub struct Header {
    pub schema_json: String,
    pub codec: String,
    pub sync: [u8; SYNC_SIZE],
}

/// Outcome of attempting to read one block from a stream.
#[derive(Debug)]
pub enum BlockOutcome {
    /// A well-formed block: record count, compressed payload, matching sync.
    Block { count: i64, payload: Vec<u8> },
    /// The stream ended cleanly (no partial block data was read).
    EndOfStream,
    /// A block was present but its payload size overran the stream, its
    /// trailing bytes didn't match the expected sync, or the framing was
    /// otherwise malformed. The stream position after this is unspecified;
    /// callers that want to recover call [`scan_to_next_sync`].
    Corrupt,
}

/// Reads the OCF header from the current stream position (which must be
/// the start of the file), leaving the stream positioned at the first block.
pub fn read_header<R: Read>(stream: &mut R) -> Result<Header> {
    let mut magic = [0u8; 4];
    read_exact_or_err(stream, &mut magic, "reading OCF magic")?;
    if magic != MAGIC {
        return Err(Error::framing("not an Avro object container file: bad magic"));
    }

    let meta = read_meta_map(stream)?;
    let schema_json = meta
        .get("avro.schema")
        .cloned()
        .ok_or_else(|| Error::framing("OCF header missing avro.schema metadata"))?;
    let codec = meta
        .get("avro.codec")
        .cloned()
        .unwrap_or_else(|| "null".to_string());

    let mut sync = [0u8; SYNC_SIZE];
    read_exact_or_err(stream, &mut sync, "reading OCF sync marker")?;

    Ok(Header {
        schema_json,
        codec,
        sync,
    })
}

/// Reads the block-count/value-count metadata map that follows the magic
/// bytes: a zig-zag-varint-counted sequence of (long-block-count, pairs),
/// terminated by a zero-length block, matching Avro's generic "map of
/// bytes" encoding used for OCF header metadata.
fn read_meta_map<R: Read>(stream: &mut R) -> Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    loop {
        let block_count = read_varint_zigzag(stream)?;
        if block_count == 0 {
            break;
        }
        let count = block_count.unsigned_abs();
        if block_count < 0 {
            // a negative count is followed by the block's encoded byte
            // size, present only so a decoder could skip it; we always
            // decode item-by-item so it's read and discarded.
            let _block_bytes = read_varint_zigzag(stream)?;
        }
        for _ in 0..count {
            let key_len = read_varint_zigzag(stream)?;
            let mut key = vec![0u8; key_len as usize];
            read_exact_or_err(stream, &mut key, "reading metadata key")?;
            let val_len = read_varint_zigzag(stream)?;
            let mut val = vec![0u8; val_len as usize];
            read_exact_or_err(stream, &mut val, "reading metadata value")?;
            map.insert(
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&val).into_owned(),
            );
        }
    }
    Ok(map)
}

/// Reads one block: `(count, size)` as zig-zag varints, `size` payload
/// bytes, then [`SYNC_SIZE`] trailing bytes compared against `sync`.
pub fn read_block<R: Read>(stream: &mut R, sync: &[u8; SYNC_SIZE]) -> Result<BlockOutcome> {
    let count = match try_read_varint_zigzag(stream)? {
        Some(v) => v,
        None => return Ok(BlockOutcome::EndOfStream),
    };
    let size = match try_read_varint_zigzag(stream)? {
        Some(v) => v,
        None => return Ok(BlockOutcome::Corrupt),
    };
    if size < 0 {
        return Ok(BlockOutcome::Corrupt);
    }
    let mut payload = vec![0u8; size as usize];
    if stream.read_exact(&mut payload).is_err() {
        return Ok(BlockOutcome::Corrupt);
    }
    let mut trailing = [0u8; SYNC_SIZE];
    if stream.read_exact(&mut trailing).is_err() {
        return Ok(BlockOutcome::Corrupt);
    }
    if &trailing != sync {
        return Ok(BlockOutcome::Corrupt);
    }
    Ok(BlockOutcome::Block { count, payload })
}

/// Scans forward from the current position in [`SCAN_CHUNK_SIZE`] chunks
/// looking for `sync`, leaving the stream positioned immediately after a
/// match. Returns `Ok(true)` on a match, `Ok(false)` on clean EOF with no
/// match found. Correctly handles a marker that straddles a chunk boundary
/// by retaining the last `sync.len() - 1` bytes of each chunk.
pub fn scan_to_next_sync<R: Read + Seek>(stream: &mut R, sync: &[u8; SYNC_SIZE]) -> Result<bool> {
    let mut carry: Vec<u8> = Vec::with_capacity(SYNC_SIZE - 1);
    let mut chunk = vec![0u8; SCAN_CHUNK_SIZE];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(false);
        }

        let mut window = Vec::with_capacity(carry.len() + n);
        window.extend_from_slice(&carry);
        window.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_subslice(&window, sync) {
            let consumed_from_chunk = (pos + SYNC_SIZE) as i64 - carry.len() as i64;
            let overshoot = n as i64 - consumed_from_chunk;
            stream.seek(SeekFrom::Current(-overshoot))?;
            return Ok(true);
        }

        let keep = SYNC_SIZE.saturating_sub(1).min(window.len());
        carry = window[window.len() - keep..].to_vec();
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads an unsigned LEB128-accumulated value and zig-zag decodes it.
pub fn read_varint_zigzag<R: Read>(stream: &mut R) -> Result<i64> {
    try_read_varint_zigzag(stream)?.ok_or_else(|| Error::framing("unexpected EOF reading varint"))
}

/// Like [`read_varint_zigzag`] but returns `Ok(None)` on a clean EOF at the
/// very first byte (used to distinguish end-of-stream from a truncated
/// varint in the middle of a block). Exposed for callers, like the fast
/// counter, that need to detect end-of-stream before the first field of a
/// block.
pub fn try_read_varint_or_eof<R: Read>(stream: &mut R) -> Result<Option<i64>> {
    try_read_varint_zigzag(stream)
}

fn try_read_varint_zigzag<R: Read>(stream: &mut R) -> Result<Option<i64>> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut first = true;
    loop {
        let mut byte = [0u8; 1];
        match stream.read(&mut byte)? {
            0 if first => return Ok(None),
            0 => return Err(Error::framing("unexpected EOF reading varint")),
            _ => {}
        }
        first = false;
        result |= ((byte[0] & 0x7f) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::framing("varint too long"));
        }
    }
    Ok(Some(zigzag_decode(result)))
}

fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Writes a long as a zig-zag LEB128 varint.
pub fn write_varint_zigzag<W: io::Write>(stream: &mut W, value: i64) -> Result<()> {
    let mut n = zigzag_encode(value);
    loop {
        let mut byte = (n & 0x7f) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
        }
        stream.write_all(&[byte])?;
        if n == 0 {
            break;
        }
    }
    Ok(())
}

fn read_exact_or_err<R: Read>(stream: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    stream
        .read_exact(buf)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::framing(format!("unexpected EOF while {what}")),
            _ => Error::Io { source: e },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn zigzag_roundtrip() {
        for v in [0i64, 1, -1, 2, -2, i64::MAX, i64::MIN, 12345, -98765] {
            let mut buf = Vec::new();
            write_varint_zigzag(&mut buf, v).unwrap();
            let mut cursor = Cursor::new(buf);
            let decoded = read_varint_zigzag(&mut cursor).unwrap();
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn scan_finds_marker_across_chunk_boundary() {
        let sync = [7u8; SYNC_SIZE];
        let mut data = vec![0u8; SCAN_CHUNK_SIZE - 4];
        data.extend_from_slice(&sync);
        data.extend_from_slice(b"trailer");
        let mut cursor = Cursor::new(data);
        assert!(scan_to_next_sync(&mut cursor, &sync).unwrap());
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"trailer");
    }

    #[test]
    fn scan_returns_false_on_eof_without_match() {
        let sync = [9u8; SYNC_SIZE];
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        assert!(!scan_to_next_sync(&mut cursor, &sync).unwrap());
    }
}
