//! Coordinate quantization between WGS84 degrees and integer lattice indices.
//!
//! Precision `p` means decimal places, so `Q = 10^p`. Longitude indices run
//! over `[0, 360*Q]` for `[-180, +180]` degrees and latitude indices over
//! `[0, 180*Q]` for `[-90, +90]`. Rounding is half-away-from-zero; the same
//! rule is reproduced verbatim in the generated header so builder and runtime
//! agree on every lattice point.

use crate::error::{AtlasError, Result};
use crate::quadtree::Rect;
use serde::{Deserialize, Serialize};

/// Highest supported precision; above this the longitude index overflows u32.
pub const MAX_PRECISION: u8 = 7;

/// The quantized lattice for one precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    precision: u8,
    q: u32,
    max_ilon: u32,
    max_ilat: u32,
}

impl Grid {
    /// Create a grid for the given precision.
    pub fn new(precision: u8) -> Result<Self> {
        if precision > MAX_PRECISION {
            return Err(AtlasError::InvalidConfig(format!(
                "precision must be at most {MAX_PRECISION}, got {precision}"
            )));
        }
        let q = 10u32.pow(u32::from(precision));
        Ok(Self {
            precision,
            q,
            max_ilon: 360 * q,
            max_ilat: 180 * q,
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Lattice points per degree.
    pub fn q(&self) -> u32 {
        self.q
    }

    /// Largest valid longitude index (inclusive).
    pub fn max_ilon(&self) -> u32 {
        self.max_ilon
    }

    /// Largest valid latitude index (inclusive).
    pub fn max_ilat(&self) -> u32 {
        self.max_ilat
    }

    /// The rectangle covering the whole lattice.
    pub fn root_rect(&self) -> Rect {
        Rect::new(0, 0, self.max_ilon, self.max_ilat)
    }

    /// Quantize WGS84 coordinates to `(ilat, ilon)` lattice indices.
    ///
    /// Out-of-range inputs are clamped to the valid WGS84 ranges first, so
    /// the result is always a valid lattice point. Non-finite inputs clamp
    /// too (NaN lands on the lower bound); use [`Grid::quantize_checked`]
    /// when garbage input should be an error instead.
    pub fn quantize(&self, lat: f64, lon: f64) -> (u32, u32) {
        let lat = lat.clamp(-90.0, 90.0);
        let lon = lon.clamp(-180.0, 180.0);
        let q = f64::from(self.q);

        let ilat = round_half_away_from_zero((lat + 90.0) * q);
        let ilon = round_half_away_from_zero((lon + 180.0) * q);

        (
            ilat.clamp(0, i64::from(self.max_ilat)) as u32,
            ilon.clamp(0, i64::from(self.max_ilon)) as u32,
        )
    }

    /// Quantize, rejecting non-finite coordinates.
    pub fn quantize_checked(&self, lat: f64, lon: f64) -> Result<(u32, u32)> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(AtlasError::InvalidCoordinate { lat, lon });
        }
        Ok(self.quantize(lat, lon))
    }

    /// Convert lattice indices back to degrees.
    ///
    /// Returns the exact coordinate the indices represent, which is the
    /// center of the quantized cell rather than any original input.
    pub fn dequantize(&self, ilat: u32, ilon: u32) -> (f64, f64) {
        let q = f64::from(self.q);
        let lat = f64::from(ilat) / q - 90.0;
        let lon = f64::from(ilon) / q - 180.0;
        (lat, lon)
    }
}

/// Round to the nearest integer with ties away from zero, matching C's
/// `round()` so the generated header quantizes identically.
fn round_half_away_from_zero(x: f64) -> i64 {
    if x >= 0.0 {
        (x + 0.5) as i64
    } else {
        (x - 0.5) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dimensions() {
        let g = Grid::new(0).unwrap();
        assert_eq!(g.max_ilon(), 360);
        assert_eq!(g.max_ilat(), 180);

        let g = Grid::new(2).unwrap();
        assert_eq!(g.q(), 100);
        assert_eq!(g.max_ilon(), 36_000);
        assert_eq!(g.max_ilat(), 18_000);
    }

    #[test]
    fn test_precision_too_large() {
        assert!(Grid::new(8).is_err());
        assert!(Grid::new(MAX_PRECISION).is_ok());
    }

    #[test]
    fn test_corners_hit_endpoints() {
        let g = Grid::new(1).unwrap();
        assert_eq!(g.quantize(-90.0, -180.0), (0, 0));
        assert_eq!(g.quantize(90.0, 180.0), (g.max_ilat(), g.max_ilon()));
        // The date line ends are distinct lattice points.
        let (_, west) = g.quantize(0.0, -180.0);
        let (_, east) = g.quantize(0.0, 180.0);
        assert_eq!(west, 0);
        assert_eq!(east, g.max_ilon());
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_half_away_from_zero(0.5), 1);
        assert_eq!(round_half_away_from_zero(1.5), 2);
        assert_eq!(round_half_away_from_zero(2.4), 2);
        assert_eq!(round_half_away_from_zero(-0.5), -1);
        assert_eq!(round_half_away_from_zero(-1.4), -1);
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        let g = Grid::new(0).unwrap();
        assert_eq!(g.quantize(-123.0, -999.0), (0, 0));
        assert_eq!(g.quantize(123.0, 999.0), (180, 360));
        assert_eq!(g.quantize(f64::NAN, 0.0).1, 180);
    }

    #[test]
    fn test_quantize_checked_rejects_non_finite() {
        let g = Grid::new(0).unwrap();
        assert!(g.quantize_checked(f64::NAN, 0.0).is_err());
        assert!(g.quantize_checked(0.0, f64::INFINITY).is_err());
        assert!(g.quantize_checked(45.0, -60.0).is_ok());
    }

    #[test]
    fn test_monotone_in_each_axis() {
        let g = Grid::new(2).unwrap();
        let mut prev = 0;
        let mut lat = -90.0;
        while lat <= 90.0 {
            let (ilat, _) = g.quantize(lat, 0.0);
            assert!(ilat >= prev, "ilat decreased at lat={lat}");
            prev = ilat;
            lat += 0.013;
        }
    }

    #[test]
    fn test_dequantize_inverse() {
        let g = Grid::new(2).unwrap();
        let (lat, lon) = g.dequantize(9_000, 18_000);
        assert!((lat - 0.0).abs() < 1e-9);
        assert!((lon - 0.0).abs() < 1e-9);

        // Quantizing a cell center returns the same indices.
        let (ilat, ilon) = g.quantize(lat, lon);
        assert_eq!((ilat, ilon), (9_000, 18_000));
    }

    #[test]
    fn test_known_values() {
        let g = Grid::new(2).unwrap();
        assert_eq!(g.quantize(40.71, -74.01), (13_071, 10_599));
        assert_eq!(g.quantize(0.0, 0.0), (9_000, 18_000));
    }
}
