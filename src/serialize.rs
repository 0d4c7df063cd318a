//! Compact blob encoding for built trees.
//!
//! # Format
//!
//! ```text
//! QATL blob v1
//!
//! Header:
//!   magic: "QATL" (4B)
//!   version: u8
//!   precision: u8
//!   root rect: x0, y0, x1, y1 as u32 (LE)
//!   country table:
//!     code_len: u8 (always 3)
//!     entry_count: u16 (LE)
//!     entries: entry_count x code_len ASCII bytes, entry k = code for id k
//!              (id 0 is the reserved empty code, stored as spaces)
//!
//! Body: preorder node stream
//!   node: tag varint (0 = leaf, 1 = internal)
//!     leaf: country id varint
//!     internal: children in NW, NE, SW, SE order, suppressed children
//!               omitted; presence is derived from the rectangle the
//!               decoder tracks from the root, never stored
//! ```
//!
//! Varints are unsigned little-endian base-128 with a continuation bit.
//! Serialization is a pure function of the tree: equal trees produce
//! byte-identical blobs. The whole blob may additionally be zstd-compressed;
//! decoding sniffs the zstd magic and inflates into a contiguous buffer
//! first.

use crate::country::{CountryTable, CODE_LEN};
use crate::error::{AtlasError, Result};
use crate::quadtree::{Node, QuadTree, Rect};
use crate::quantize::Grid;
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Blob magic bytes.
pub const MAGIC: &[u8; 4] = b"QATL";

/// Current blob format version.
pub const VERSION: u8 = 1;

/// Zstd frame magic, used to sniff compressed blobs.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Append an unsigned LEB128 varint.
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint from the front of `data`, advancing it.
pub fn get_varint(data: &mut &[u8]) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = data
            .split_first()
            .ok_or_else(|| AtlasError::Decode("truncated varint".into()))?;
        *data = rest;
        if shift >= 64 {
            return Err(AtlasError::Decode("varint overflows u64".into()));
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Encode a tree and its country table into an uncompressed blob.
///
/// # Panics
///
/// Panics if an internal node's child pattern disagrees with its rectangle's
/// subdivision; trees from [`crate::builder`] and [`decode`] always agree.
pub fn encode(tree: &QuadTree, table: &CountryTable) -> Result<Bytes> {
    let mut buf = BytesMut::new();

    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(tree.grid.precision());

    let root = tree.grid.root_rect();
    buf.put_u32_le(root.x0);
    buf.put_u32_le(root.y0);
    buf.put_u32_le(root.x1);
    buf.put_u32_le(root.y1);

    let codes = table.dense_codes();
    if codes.len() > usize::from(u16::MAX) {
        return Err(AtlasError::InvalidConfig(format!(
            "country table has {} entries, the header caps at {}",
            codes.len(),
            u16::MAX
        )));
    }
    buf.put_u8(CODE_LEN as u8);
    buf.put_u16_le(codes.len() as u16);
    for code in codes {
        buf.put_slice(code);
    }

    encode_node(&tree.root, root, &mut buf);
    Ok(buf.freeze())
}

fn encode_node(node: &Node, rect: Rect, buf: &mut BytesMut) {
    match node {
        Node::Leaf(id) => {
            put_varint(buf, 0);
            put_varint(buf, u64::from(*id));
        }
        Node::Internal(children) => {
            put_varint(buf, 1);
            for (child, child_rect) in children.iter().zip(rect.subdivide()) {
                match (child, child_rect) {
                    (Some(child), Some(child_rect)) => encode_node(child, child_rect, buf),
                    (None, None) => {}
                    _ => panic!("internal node child pattern disagrees with its rectangle"),
                }
            }
        }
    }
}

/// Decode a blob (compressed or not) back into a tree and country table.
pub fn decode(blob: &[u8]) -> Result<(QuadTree, CountryTable)> {
    let blob = maybe_decompress(blob)?;
    let mut data = blob.as_ref();

    let (grid, table) = decode_header(&mut data)?;
    let root = decode_node(&mut data, grid.root_rect())?;
    if !data.is_empty() {
        return Err(AtlasError::Decode(format!(
            "{} trailing bytes after node stream",
            data.len()
        )));
    }
    Ok((QuadTree::new(root, grid), table))
}

/// Parse and validate the header, leaving `data` at the start of the body.
pub(crate) fn decode_header(data: &mut &[u8]) -> Result<(Grid, CountryTable)> {
    let magic = take(data, MAGIC.len())?;
    if magic != MAGIC {
        return Err(AtlasError::Decode("bad magic".into()));
    }
    let version = take(data, 1)?[0];
    if version != VERSION {
        return Err(AtlasError::Decode(format!(
            "unsupported blob version {version} (expected {VERSION})"
        )));
    }

    let precision = take(data, 1)?[0];
    let grid = Grid::new(precision)
        .map_err(|_| AtlasError::Decode(format!("precision {precision} out of range")))?;

    let x0 = take_u32(data)?;
    let y0 = take_u32(data)?;
    let x1 = take_u32(data)?;
    let y1 = take_u32(data)?;
    let expected = grid.root_rect();
    if (x0, y0, x1, y1) != (expected.x0, expected.y0, expected.x1, expected.y1) {
        return Err(AtlasError::Decode(format!(
            "root rectangle ({x0},{y0})..({x1},{y1}) does not match precision {precision}"
        )));
    }

    let code_len = take(data, 1)?[0] as usize;
    if code_len != CODE_LEN {
        return Err(AtlasError::Decode(format!(
            "unsupported country code width {code_len}"
        )));
    }
    let count = usize::from(u16::from_le_bytes(take(data, 2)?.try_into().unwrap()));
    if count == 0 {
        return Err(AtlasError::Decode("country table missing reserved entry".into()));
    }
    let mut codes = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = take(data, CODE_LEN)?;
        if !raw.is_ascii() {
            return Err(AtlasError::Decode("non-ASCII country code".into()));
        }
        codes.push(<[u8; CODE_LEN]>::try_from(raw).unwrap());
    }

    Ok((grid, CountryTable::from_dense(codes)))
}

fn decode_node(data: &mut &[u8], rect: Rect) -> Result<Node> {
    match get_varint(data)? {
        0 => {
            let id = get_varint(data)?;
            let id = u16::try_from(id)
                .map_err(|_| AtlasError::Decode(format!("country id {id} exceeds u16")))?;
            Ok(Node::Leaf(id))
        }
        1 => {
            if rect.is_point() {
                return Err(AtlasError::Decode(
                    "internal node at a single-point rectangle".into(),
                ));
            }
            let mut children: [Option<Node>; 4] = [None, None, None, None];
            for (slot, child_rect) in children.iter_mut().zip(rect.subdivide()) {
                if let Some(child_rect) = child_rect {
                    *slot = Some(decode_node(data, child_rect)?);
                }
            }
            Ok(Node::Internal(Box::new(children)))
        }
        tag => Err(AtlasError::Decode(format!("unknown node tag {tag}"))),
    }
}

fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if data.len() < n {
        return Err(AtlasError::Decode("truncated blob".into()));
    }
    let (head, rest) = data.split_at(n);
    *data = rest;
    Ok(head)
}

fn take_u32(data: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(take(data, 4)?.try_into().unwrap()))
}

/// Compress a blob with zstd. Orthogonal to the structural format; every
/// decode path accepts both forms.
pub fn compress(blob: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(blob, 3).map_err(AtlasError::Io)
}

/// Inflate a blob if it carries the zstd frame magic, otherwise borrow it.
pub fn maybe_decompress(blob: &[u8]) -> Result<Cow<'_, [u8]>> {
    if blob.starts_with(&ZSTD_MAGIC) {
        Ok(Cow::Owned(zstd::decode_all(blob).map_err(AtlasError::Io)?))
    } else {
        Ok(Cow::Borrowed(blob))
    }
}
