//! Oracle abstraction for ground-truth country lookup.
//!
//! An oracle answers "which country owns this lattice point" and is only
//! consulted while building. It must be referentially transparent for the
//! duration of a build, and `Sync` so the four top-level subtrees can be
//! built concurrently. Id `0` is reserved for "no country".
//!
//! The synthetic oracles here make build expectations computable in tests;
//! the polygon-backed oracle lives in [`crate::geo_oracle`].

use crate::error::Result;
use crate::quantize::Grid;

/// Id reserved for points outside every country.
pub const OCEAN_ID: u16 = 0;

/// Ground truth for the builder.
pub trait Oracle: Sync {
    /// Country id at a lattice point. Errors abort the build.
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16>;

    /// Batch lookup; the default loops over [`Oracle::country_at`].
    /// Implementations backed by a database can override this to cut
    /// round trips.
    fn country_at_batch(&self, points: &[(u32, u32)]) -> Result<Vec<u16>> {
        points
            .iter()
            .map(|&(ilat, ilon)| self.country_at(ilat, ilon))
            .collect()
    }

    /// Every `(id, ISO code)` pair this oracle can return, excluding the
    /// reserved id 0.
    fn country_codes(&self) -> Vec<(u16, String)>;
}

/// Adapter for a plain closure, mostly for tests.
pub struct FnOracle<F> {
    func: F,
    codes: Vec<(u16, String)>,
}

impl<F: Fn(u32, u32) -> u16 + Sync> FnOracle<F> {
    pub fn new(func: F) -> Self {
        Self { func, codes: Vec::new() }
    }

    pub fn with_codes(func: F, codes: Vec<(u16, String)>) -> Self {
        Self { func, codes }
    }
}

impl<F: Fn(u32, u32) -> u16 + Sync> Oracle for FnOracle<F> {
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16> {
        Ok((self.func)(ilat, ilon))
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        self.codes.clone()
    }
}

/// Hemispheres split by an equatorial ocean band: north is 1, south is 2,
/// and everything within five degrees of the equator is ocean.
pub struct SimpleOracle {
    grid: Grid,
}

impl SimpleOracle {
    pub fn new(grid: Grid) -> Self {
        Self { grid }
    }
}

impl Oracle for SimpleOracle {
    fn country_at(&self, ilat: u32, _ilon: u32) -> Result<u16> {
        let equator = 90 * self.grid.q();
        let band = 5 * self.grid.q();
        let dist = ilat.abs_diff(equator);
        Ok(if dist < band {
            OCEAN_ID
        } else if ilat > equator {
            1
        } else {
            2
        })
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        vec![(1, "NOR".into()), (2, "SOU".into())]
    }
}

/// Five axis-aligned boxes standing in for countries; everything else is
/// ocean. Box extents scale with precision so the map looks the same at any
/// lattice resolution.
pub struct RectangleOracle {
    regions: Vec<(u32, u32, u32, u32, u16)>,
    codes: Vec<(u16, String)>,
}

impl RectangleOracle {
    pub fn new(grid: Grid) -> Self {
        let q = grid.q();
        let r = |x0: u32, y0: u32, x1: u32, y1: u32, id: u16| (x0 * q, y0 * q, x1 * q, y1 * q, id);
        Self {
            regions: vec![
                r(60, 100, 120, 140, 1),
                r(110, 50, 150, 90, 2),
                r(170, 115, 210, 160, 3),
                r(255, 100, 300, 140, 4),
                r(290, 40, 330, 75, 5),
            ],
            codes: vec![
                (1, "USA".into()),
                (2, "BRA".into()),
                (3, "EUR".into()),
                (4, "CHN".into()),
                (5, "AUS".into()),
            ],
        }
    }
}

impl Oracle for RectangleOracle {
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16> {
        for &(x0, y0, x1, y1, id) in &self.regions {
            if x0 <= ilon && ilon <= x1 && y0 <= ilat && ilat <= y1 {
                return Ok(id);
            }
        }
        Ok(OCEAN_ID)
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        self.codes.clone()
    }
}

/// Five discs in open ocean; exercises border refinement on curved edges.
pub struct CircleOracle {
    circles: Vec<(i64, i64, i64, u16)>,
    codes: Vec<(u16, String)>,
}

impl CircleOracle {
    pub fn new(grid: Grid) -> Self {
        let q = i64::from(grid.q());
        let c = |cx: i64, cy: i64, r: i64, id: u16| (cx * q, cy * q, r * q, id);
        Self {
            circles: vec![
                c(150, 120, 20, 1),
                c(190, 135, 15, 2),
                c(280, 125, 25, 3),
                c(130, 60, 18, 4),
                c(310, 55, 12, 5),
            ],
            codes: (1..=5).map(|id| (id, format!("C{id:02}"))).collect(),
        }
    }
}

impl Oracle for CircleOracle {
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16> {
        let (x, y) = (i64::from(ilon), i64::from(ilat));
        for &(cx, cy, r, id) in &self.circles {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r * r {
                return Ok(id);
            }
        }
        Ok(OCEAN_ID)
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        self.codes.clone()
    }
}

/// Alternating two-country checkerboard; worst case for the builder since
/// every cell boundary is a border.
pub struct CheckerboardOracle {
    cell_size: u32,
}

impl CheckerboardOracle {
    /// `cells_per_degree` controls the pattern frequency.
    pub fn new(grid: Grid, cells_per_degree: u32) -> Self {
        Self {
            cell_size: (grid.q() / cells_per_degree).max(1),
        }
    }
}

impl Oracle for CheckerboardOracle {
    fn country_at(&self, ilat: u32, ilon: u32) -> Result<u16> {
        let cell = (ilon / self.cell_size) + (ilat / self.cell_size);
        Ok(if cell % 2 == 0 { 1 } else { 2 })
    }

    fn country_codes(&self) -> Vec<(u16, String)> {
        vec![(1, "AAA".into()), (2, "BBB".into())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_oracle_bands() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        assert_eq!(oracle.country_at(90, 0).unwrap(), OCEAN_ID);
        assert_eq!(oracle.country_at(94, 10).unwrap(), OCEAN_ID);
        assert_eq!(oracle.country_at(95, 10).unwrap(), 1);
        assert_eq!(oracle.country_at(85, 10).unwrap(), 2);
        assert_eq!(oracle.country_at(180, 360).unwrap(), 1);
        assert_eq!(oracle.country_at(0, 0).unwrap(), 2);
    }

    #[test]
    fn test_rectangle_oracle_membership() {
        let grid = Grid::new(0).unwrap();
        let oracle = RectangleOracle::new(grid);
        assert_eq!(oracle.country_at(120, 90).unwrap(), 1);
        assert_eq!(oracle.country_at(120, 59).unwrap(), OCEAN_ID);
        // Inclusive edges.
        assert_eq!(oracle.country_at(100, 60).unwrap(), 1);
        assert_eq!(oracle.country_at(140, 120).unwrap(), 1);
    }

    #[test]
    fn test_circle_oracle_contains_center() {
        let grid = Grid::new(0).unwrap();
        let oracle = CircleOracle::new(grid);
        assert_eq!(oracle.country_at(120, 150).unwrap(), 1);
        assert_eq!(oracle.country_at(0, 0).unwrap(), OCEAN_ID);
    }

    #[test]
    fn test_checkerboard_alternates() {
        let grid = Grid::new(1).unwrap();
        let oracle = CheckerboardOracle::new(grid, 1);
        let a = oracle.country_at(0, 0).unwrap();
        let b = oracle.country_at(0, 10).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_batch_matches_single() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let points = vec![(0, 0), (90, 180), (180, 360)];
        let batch = oracle.country_at_batch(&points).unwrap();
        for (i, &(ilat, ilon)) in points.iter().enumerate() {
            assert_eq!(batch[i], oracle.country_at(ilat, ilon).unwrap());
        }
    }
}
