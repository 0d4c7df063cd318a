//! Polygon-backed oracle over a GeoJSON FeatureCollection.
//!
//! Each feature is one country (Polygon or MultiPolygon geometry). Feature
//! bounding boxes go into an R-tree so a lattice query only runs
//! point-in-polygon against the handful of candidates whose box contains the
//! point. Ids are assigned 1..N in file order, so the same file always
//! yields the same table; when polygons overlap, the lowest id wins, which
//! keeps the oracle deterministic for the builder.

use crate::error::{AtlasError, Result};
use crate::oracle::{Oracle, OCEAN_ID};
use crate::quantize::Grid;
use geo::{BoundingRect, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use geojson::{FeatureCollection, GeoJson, Value};
use rstar::{RTree, RTreeObject, AABB};
use std::path::Path;

/// Property keys probed for an ISO code, most specific first.
const ISO_KEYS: [&str; 4] = ["ADM0_ISO", "ISO_A3", "ADM0_A3", "iso_a3"];

struct CountryShape {
    id: u16,
    shape: MultiPolygon<f64>,
    bbox: AABB<[f64; 2]>,
}

impl RTreeObject for CountryShape {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

/// Oracle answering lattice queries from country polygons.
pub struct GeoJsonOracle {
    grid: Grid,
    index: RTree<CountryShape>,
    codes: Vec<(u16, String)>,
}

impl GeoJsonOracle {
    /// Load a FeatureCollection from a file.
    pub fn from_path<P: AsRef<Path>>(path: P, grid: Grid) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson(&text, grid)
    }

    /// Parse a FeatureCollection from GeoJSON text.
    pub fn from_geojson(text: &str, grid: Grid) -> Result<Self> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|e| AtlasError::InvalidGeometry(format!("GeoJSON parse failure: {e}")))?;
        let collection = FeatureCollection::try_from(geojson)
            .map_err(|e| AtlasError::InvalidGeometry(format!("not a FeatureCollection: {e}")))?;

        let mut shapes = Vec::new();
        let mut codes = Vec::new();
        for (index, feature) in collection.features.iter().enumerate() {
            if index >= usize::from(u16::MAX) {
                return Err(AtlasError::InvalidGeometry(
                    "more features than representable country ids".into(),
                ));
            }
            let id = (index + 1) as u16;

            let geometry = feature.geometry.as_ref().ok_or_else(|| {
                AtlasError::InvalidGeometry(format!("feature {index} has no geometry"))
            })?;
            let shape = multi_polygon_from_geojson(&geometry.value)?;
            let bbox = shape.bounding_rect().ok_or_else(|| {
                AtlasError::InvalidGeometry(format!("feature {index} has an empty geometry"))
            })?;

            shapes.push(CountryShape {
                id,
                shape,
                bbox: AABB::from_corners(
                    [bbox.min().x, bbox.min().y],
                    [bbox.max().x, bbox.max().y],
                ),
            });
            codes.push((id, iso_code_for(feature, index)));
        }

        Ok(Self {
            grid,
            index: RTree::bulk_load(shapes),
            codes,
        })
    }

    /// Number of countries loaded.
    pub fn country_count(&self) -> usize {
        self.codes.len()
    }
}

impl Oracle for GeoJsonOracle {
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16> {
        let (lat, lon) = self.grid.dequantize(ilat, ilon);
        let point = Point::new(lon, lat);

        let mut best = OCEAN_ID;
        for candidate in self
            .index
            .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
        {
            if (best == OCEAN_ID || candidate.id < best) && candidate.shape.contains(&point) {
                best = candidate.id;
            }
        }
        Ok(best)
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        self.codes.clone()
    }
}

/// Pull an ISO code out of the feature properties, falling back to a
/// synthetic `Fnn` code so the table stays dense and non-empty.
fn iso_code_for(feature: &geojson::Feature, index: usize) -> String {
    for key in ISO_KEYS {
        if let Some(value) = feature.property(key) {
            if let Some(code) = value.as_str() {
                // Natural Earth marks missing codes with "-99".
                if !code.is_empty() && code != "-99" {
                    return code.chars().take(3).collect();
                }
            }
        }
    }
    format!("F{:02}", (index + 1) % 100)
}

fn multi_polygon_from_geojson(value: &Value) -> Result<MultiPolygon<f64>> {
    match value {
        Value::Polygon(rings) => Ok(MultiPolygon::new(vec![polygon_from_rings(rings)?])),
        Value::MultiPolygon(polygons) => Ok(MultiPolygon::new(
            polygons
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => {
            let kind = match other {
                Value::Point(_) => "Point",
                Value::MultiPoint(_) => "MultiPoint",
                Value::LineString(_) => "LineString",
                Value::MultiLineString(_) => "MultiLineString",
                Value::GeometryCollection(_) => "GeometryCollection",
                _ => "geometry",
            };
            Err(AtlasError::InvalidGeometry(format!(
                "expected Polygon or MultiPolygon, got {kind}"
            )))
        }
    }
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let mut converted = rings.iter().map(|ring| {
        let coords: Result<Vec<Coord<f64>>> = ring
            .iter()
            .map(|position| match position.as_slice() {
                [x, y, ..] => Ok(Coord { x: *x, y: *y }),
                _ => Err(AtlasError::InvalidGeometry(
                    "ring position with fewer than 2 coordinates".into(),
                )),
            })
            .collect();
        Ok(LineString::from(coords?))
    });

    let exterior = converted
        .next()
        .ok_or_else(|| AtlasError::InvalidGeometry("polygon without an exterior ring".into()))??;
    let interiors = converted.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}
