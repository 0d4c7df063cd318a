//! Runtime lookup over a serialized blob.
//!
//! [`LookupTable`] owns the (decompressed) blob, parses the header once, and
//! answers queries by streaming the preorder body: at each internal node it
//! picks the child containing the query point and skips the earlier
//! siblings' subtrees byte by byte. No per-lookup allocation, no decoded
//! tree. This is the algorithm the generated header reproduces bit for bit,
//! so any change here must be mirrored in [`crate::codegen`].

use crate::country::CountryTable;
use crate::error::{AtlasError, Result};
use crate::quadtree::Rect;
use crate::quantize::Grid;
use crate::serialize::{decode_header, get_varint, maybe_decompress};

/// A decoded lookup table. Construction validates the whole blob, so every
/// query afterwards is total: it always returns an id, 0 for ocean.
pub struct LookupTable {
    data: Vec<u8>,
    body_start: usize,
    grid: Grid,
    countries: CountryTable,
}

impl LookupTable {
    /// Decode a blob, inflating it first if it is zstd-compressed.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let data = maybe_decompress(blob)?.into_owned();

        let mut cursor = data.as_slice();
        let (grid, countries) = decode_header(&mut cursor)?;
        let body_start = data.len() - cursor.len();

        // Walk the body once so traversal can rely on it being well-formed.
        let mut body = cursor;
        skip_node(&mut body, grid.root_rect())?;
        if !body.is_empty() {
            return Err(AtlasError::Decode(format!(
                "{} trailing bytes after node stream",
                body.len()
            )));
        }

        Ok(Self {
            data,
            body_start,
            grid,
            countries,
        })
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn countries(&self) -> &CountryTable {
        &self.countries
    }

    /// Country id for WGS84 coordinates. Out-of-range and non-finite input
    /// clamps into the lattice.
    pub fn lookup(&self, lat: f64, lon: f64) -> u16 {
        let (ilat, ilon) = self.grid.quantize(lat, lon);
        self.lookup_grid(ilat, ilon)
    }

    /// Country id for a lattice point. Indices beyond the lattice clamp to
    /// its edge.
    pub fn lookup_grid(&self, ilat: u32, ilon: u32) -> u16 {
        let ilat = ilat.min(self.grid.max_ilat());
        let ilon = ilon.min(self.grid.max_ilon());

        let mut rect = self.grid.root_rect();
        let mut data = &self.data[self.body_start..];
        loop {
            let tag = read_checked(&mut data);
            if tag == 0 {
                return read_checked(&mut data) as u16;
            }
            let target = rect.child_index(ilon, ilat);
            let children = rect.subdivide();
            for (idx, child_rect) in children.into_iter().enumerate() {
                if let Some(child_rect) = child_rect {
                    if idx == target {
                        rect = child_rect;
                        break;
                    }
                    // Blob validated at construction; skipping cannot fail.
                    let _ = skip_node(&mut data, child_rect);
                }
            }
        }
    }

    /// ISO code for the country at the given coordinates; empty over ocean.
    pub fn country_iso(&self, lat: f64, lon: f64) -> &str {
        self.countries.code(self.lookup(lat, lon))
    }

    /// Country id for an ISO code, 0 if unknown.
    pub fn id_for_iso(&self, code: &str) -> u16 {
        self.countries.id_for_code(code)
    }
}

// Only called on a body that `from_blob` fully validated.
fn read_checked(data: &mut &[u8]) -> u64 {
    get_varint(data).expect("node stream validated at construction")
}

/// Skip one serialized subtree, advancing `data` past it.
fn skip_node(data: &mut &[u8], rect: Rect) -> Result<()> {
    match get_varint(data)? {
        0 => {
            get_varint(data)?;
            Ok(())
        }
        1 => {
            if rect.is_point() {
                return Err(AtlasError::Decode(
                    "internal node at a single-point rectangle".into(),
                ));
            }
            for child_rect in rect.subdivide().into_iter().flatten() {
                skip_node(data, child_rect)?;
            }
            Ok(())
        }
        tag => Err(AtlasError::Decode(format!("unknown node tag {tag}"))),
    }
}
