//! Prove-or-split quadtree builder.
//!
//! The builder recursively proves rectangles uniform against the oracle or
//! subdivides them. Sampling (corners, center, stratified thirds, plus
//! rectangle-seeded pseudo-random probes) detects mixed regions cheaply;
//! rectangles at or below `brute_force_threshold` points are proven by
//! exhaustive evaluation. Everything is a deterministic function of
//! `(oracle, config)`: the PRNG is re-seeded from each rectangle, never
//! shared, so two builds produce identical trees byte for byte.

use crate::error::{AtlasError, Result};
use crate::oracle::Oracle;
use crate::quadtree::{Node, QuadTree, Rect};
use crate::quantize::Grid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder tuning. Loadable from JSON with per-field defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Decimal places retained by quantization.
    pub precision: u8,

    /// Pseudo-random interior probes per rectangle, on top of the corners,
    /// center, and stratified third points.
    #[serde(default = "BuildConfig::default_sample_k")]
    pub sample_k: usize,

    /// Largest lattice-point count a rectangle may have and still be proven
    /// uniform by exhaustive evaluation.
    #[serde(default = "BuildConfig::default_brute_force_threshold")]
    pub brute_force_threshold: u64,

    /// Recursion depth cap. Should exceed `ceil(log2(max(Xmax, Ymax))) + 2`;
    /// rectangles still unresolved at the cap are settled by a full scan.
    #[serde(default = "BuildConfig::default_max_depth")]
    pub max_depth: usize,

    /// Seed mixed into every rectangle's sampling PRNG.
    #[serde(default = "BuildConfig::default_seed")]
    pub seed: u64,

    /// Build the four top-level subtrees concurrently. The result is
    /// identical to a serial build; the oracle's `Sync` bound is all it
    /// takes.
    #[serde(default)]
    pub parallel: bool,
}

impl BuildConfig {
    const fn default_sample_k() -> usize {
        16
    }

    const fn default_brute_force_threshold() -> u64 {
        16_384
    }

    const fn default_max_depth() -> usize {
        64
    }

    const fn default_seed() -> u64 {
        42
    }

    pub fn new(precision: u8) -> Self {
        Self {
            precision,
            sample_k: Self::default_sample_k(),
            brute_force_threshold: Self::default_brute_force_threshold(),
            max_depth: Self::default_max_depth(),
            seed: Self::default_seed(),
            parallel: false,
        }
    }

    pub fn with_sample_k(mut self, sample_k: usize) -> Self {
        self.sample_k = sample_k;
        self
    }

    pub fn with_brute_force_threshold(mut self, threshold: u64) -> Self {
        self.brute_force_threshold = threshold;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Validate tuning values.
    pub fn validate(&self) -> Result<()> {
        Grid::new(self.precision)?;
        if self.sample_k == 0 {
            return Err(AtlasError::InvalidConfig("sample_k must be at least 1".into()));
        }
        if self.brute_force_threshold == 0 {
            return Err(AtlasError::InvalidConfig(
                "brute_force_threshold must be at least 1".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(AtlasError::InvalidConfig("max_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// The depth below which the cap can trigger the full-scan fallback on a
    /// pristine lattice.
    pub fn recommended_max_depth(&self) -> Result<usize> {
        let grid = Grid::new(self.precision)?;
        let extent = grid.max_ilon().max(grid.max_ilat()).max(1);
        Ok((u32::BITS - extent.leading_zeros()) as usize + 2)
    }
}

/// Counters collected during a build. All fields are totals for one
/// `build()` call; concurrent subtree tasks update them atomically.
#[derive(Debug, Default)]
pub struct BuildStats {
    pub oracle_calls: AtomicU64,
    pub brute_force_proofs: AtomicU64,
    pub sampling_detected_mixed: AtomicU64,
    pub brute_force_detected_mixed: AtomicU64,
    pub depth_limit_fallbacks: AtomicU64,
    pub collapsed_internals: AtomicU64,
    pub max_depth_reached: AtomicU64,
}

impl BuildStats {
    fn record_depth(&self, depth: usize) {
        self.max_depth_reached.fetch_max(depth as u64, Ordering::Relaxed);
    }

    fn add_oracle_calls(&self, n: usize) {
        self.oracle_calls.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Merge four same-id leaf children into their parent leaf, keeping the
    /// tree canonical: no internal node retains only same-id leaf children.
    fn collapse(&self, children: [Option<Node>; 4]) -> Node {
        let mut shared: Option<u16> = None;
        for child in children.iter().flatten() {
            match (child, shared) {
                (Node::Leaf(id), None) => shared = Some(*id),
                (Node::Leaf(id), Some(prev)) if *id == prev => {}
                _ => return Node::Internal(Box::new(children)),
            }
        }
        match shared {
            Some(id) => {
                self.collapsed_internals.fetch_add(1, Ordering::Relaxed);
                Node::Leaf(id)
            }
            // Subdivide always yields SW, so an all-empty split cannot occur.
            None => Node::Internal(Box::new(children)),
        }
    }
}

/// Prove-or-split builder over one oracle.
pub struct TreeBuilder<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    config: BuildConfig,
    grid: Grid,
    cancel: Option<Arc<AtomicBool>>,
    stats: BuildStats,
}

impl<'a, O: Oracle + ?Sized> TreeBuilder<'a, O> {
    pub fn new(oracle: &'a O, config: BuildConfig) -> Result<Self> {
        config.validate()?;
        let grid = Grid::new(config.precision)?;
        Ok(Self {
            oracle,
            config,
            grid,
            cancel: None,
            stats: BuildStats::default(),
        })
    }

    /// Install a cancellation flag, checked at every recursive entry. Once
    /// raised, the build aborts with [`AtlasError::Cancelled`] and returns
    /// no partial tree.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    /// Build the tree over the whole lattice.
    pub fn build(&self) -> Result<QuadTree> {
        let recommended = self.config.recommended_max_depth()?;
        if self.config.max_depth < recommended {
            warn!(
                max_depth = self.config.max_depth,
                recommended,
                "max_depth below the lattice's natural depth; expect full-scan fallbacks"
            );
        }

        info!(
            precision = self.config.precision,
            max_ilon = self.grid.max_ilon(),
            max_ilat = self.grid.max_ilat(),
            parallel = self.config.parallel,
            "building quadtree"
        );
        let root = self.build_node(self.grid.root_rect(), 0)?;

        debug!(
            oracle_calls = self.stats.oracle_calls.load(Ordering::Relaxed),
            brute_force_proofs = self.stats.brute_force_proofs.load(Ordering::Relaxed),
            max_depth_reached = self.stats.max_depth_reached.load(Ordering::Relaxed),
            "build finished"
        );
        Ok(QuadTree::new(root, self.grid))
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(AtlasError::Cancelled),
            _ => Ok(()),
        }
    }

    fn build_node(&self, rect: Rect, depth: usize) -> Result<Node> {
        self.check_cancelled()?;
        self.stats.record_depth(depth);

        if rect.is_point() {
            self.stats.add_oracle_calls(1);
            let id = self.oracle.country_at(rect.y0, rect.x0)?;
            return Ok(Node::Leaf(id));
        }

        if depth >= self.config.max_depth {
            return self.depth_limit_fallback(rect);
        }

        match self.sample_uniform(rect)? {
            None => {
                self.stats.sampling_detected_mixed.fetch_add(1, Ordering::Relaxed);
                self.split(rect, depth)
            }
            Some(candidate) => {
                if rect.point_count() <= self.config.brute_force_threshold {
                    if self.prove_uniform(rect, candidate)? {
                        Ok(Node::Leaf(candidate))
                    } else {
                        self.stats
                            .brute_force_detected_mixed
                            .fetch_add(1, Ordering::Relaxed);
                        self.split(rect, depth)
                    }
                } else {
                    // Samples agree but the rectangle is too large to prove.
                    self.split(rect, depth)
                }
            }
        }
    }

    /// Evaluate the deterministic sample set. `Some(id)` means unanimous.
    fn sample_uniform(&self, rect: Rect) -> Result<Option<u16>> {
        let points = sample_points(rect, self.config.seed, self.config.sample_k);
        let oracle_points: Vec<(u32, u32)> = points.iter().map(|&(x, y)| (y, x)).collect();
        self.stats.add_oracle_calls(oracle_points.len());
        let ids = self.oracle.country_at_batch(&oracle_points)?;

        let first = ids[0];
        if ids.iter().all(|&id| id == first) {
            Ok(Some(first))
        } else {
            Ok(None)
        }
    }

    /// Exhaustively check that every lattice point in `rect` maps to
    /// `expected`. Rows are batched to keep oracle round trips bounded.
    fn prove_uniform(&self, rect: Rect, expected: u16) -> Result<bool> {
        self.stats.brute_force_proofs.fetch_add(1, Ordering::Relaxed);
        for y in rect.y0..=rect.y1 {
            let row: Vec<(u32, u32)> = (rect.x0..=rect.x1).map(|x| (y, x)).collect();
            self.stats.add_oracle_calls(row.len());
            let ids = self.oracle.country_at_batch(&row)?;
            if ids.iter().any(|&id| id != expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn split(&self, rect: Rect, depth: usize) -> Result<Node> {
        let child_rects = rect.subdivide();
        let mut children: [Option<Node>; 4] = [None, None, None, None];

        if depth == 0 && self.config.parallel {
            let mut results: [Option<Result<Node>>; 4] = [None, None, None, None];
            rayon::scope(|s| {
                for (slot, child_rect) in results.iter_mut().zip(child_rects) {
                    if let Some(child_rect) = child_rect {
                        s.spawn(move |_| *slot = Some(self.build_node(child_rect, depth + 1)));
                    }
                }
            });
            for (slot, result) in children.iter_mut().zip(results) {
                if let Some(result) = result {
                    *slot = Some(result?);
                }
            }
        } else {
            for (slot, child_rect) in children.iter_mut().zip(child_rects) {
                if let Some(child_rect) = child_rect {
                    *slot = Some(self.build_node(child_rect, depth + 1)?);
                }
            }
        }

        Ok(self.stats.collapse(children))
    }

    /// Forced brute force once the depth cap is hit: evaluate every lattice
    /// point, then bisect over the evaluated grid until every region is
    /// uniform or a single point. Correct regardless of how adversarial the
    /// oracle's boundary is, at full-scan cost.
    fn depth_limit_fallback(&self, rect: Rect) -> Result<Node> {
        self.stats.depth_limit_fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            x0 = rect.x0,
            y0 = rect.y0,
            x1 = rect.x1,
            y1 = rect.y1,
            "depth limit reached, scanning rectangle exhaustively"
        );

        let width = rect.width() as usize;
        let mut values = Vec::with_capacity(rect.point_count() as usize);
        for y in rect.y0..=rect.y1 {
            self.check_cancelled()?;
            let row: Vec<(u32, u32)> = (rect.x0..=rect.x1).map(|x| (y, x)).collect();
            self.stats.add_oracle_calls(row.len());
            values.extend(self.oracle.country_at_batch(&row)?);
        }

        let value_at =
            move |x: u32, y: u32| values[(y - rect.y0) as usize * width + (x - rect.x0) as usize];
        Ok(self.bisect_grid(rect, &value_at))
    }

    fn bisect_grid(&self, rect: Rect, value_at: &impl Fn(u32, u32) -> u16) -> Node {
        let first = value_at(rect.x0, rect.y0);
        if rect.is_point() || rect.points().all(|(x, y)| value_at(x, y) == first) {
            return Node::Leaf(first);
        }

        let mut children: [Option<Node>; 4] = [None, None, None, None];
        for (slot, child_rect) in children.iter_mut().zip(rect.subdivide()) {
            if let Some(child_rect) = child_rect {
                *slot = Some(self.bisect_grid(child_rect, value_at));
            }
        }
        self.stats.collapse(children)
    }
}

/// Build a tree with the given oracle and tuning; convenience over
/// [`TreeBuilder`].
pub fn build_tree<O: Oracle + ?Sized>(oracle: &O, config: BuildConfig) -> Result<QuadTree> {
    TreeBuilder::new(oracle, config)?.build()
}

/// Deterministic per-rectangle seed: a hash of the bounds and the global
/// seed, so sampling depends on nothing but `(rect, seed)`.
fn rect_seed(rect: Rect, seed: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u32(rect.x0);
    hasher.write_u32(rect.y0);
    hasher.write_u32(rect.x1);
    hasher.write_u32(rect.y1);
    hasher.write_u64(seed);
    hasher.finish()
}

/// The deterministic sample set for a rectangle: its corners, center,
/// stratified third points, and `sample_k` PRNG probes, deduplicated in
/// first-seen order. Returns `(x, y)` pairs.
fn sample_points(rect: Rect, seed: u64, sample_k: usize) -> Vec<(u32, u32)> {
    let (xm, ym) = rect.midpoints();
    let mut points = vec![
        (rect.x0, rect.y0),
        (rect.x1, rect.y0),
        (rect.x0, rect.y1),
        (rect.x1, rect.y1),
        (xm, ym),
    ];

    if rect.width() > 2 {
        points.push((rect.x0 + rect.width() / 3, ym));
        points.push((rect.x0 + 2 * rect.width() / 3, ym));
    }
    if rect.height() > 2 {
        points.push((xm, rect.y0 + rect.height() / 3));
        points.push((xm, rect.y0 + 2 * rect.height() / 3));
    }

    let mut rng = StdRng::seed_from_u64(rect_seed(rect, seed));
    for _ in 0..sample_k {
        points.push((rng.gen_range(rect.x0..=rect.x1), rng.gen_range(rect.y0..=rect.y1)));
    }

    let mut seen = FxHashSet::default();
    points.retain(|p| seen.insert(*p));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FnOracle, SimpleOracle};
    use std::sync::atomic::AtomicUsize;

    fn config(precision: u8) -> BuildConfig {
        BuildConfig::new(precision).with_brute_force_threshold(4096)
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let cfg = BuildConfig::new(2)
            .with_sample_k(8)
            .with_seed(7)
            .with_max_depth(32)
            .with_parallel(true);
        assert_eq!(cfg.sample_k, 8);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.max_depth, 32);
        assert!(cfg.parallel);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_defaults() {
        let cfg: BuildConfig = serde_json::from_str(r#"{"precision": 1}"#).unwrap();
        assert_eq!(cfg.sample_k, 16);
        assert_eq!(cfg.brute_force_threshold, 16_384);
        assert_eq!(cfg.max_depth, 64);
        assert_eq!(cfg.seed, 42);
        assert!(!cfg.parallel);
    }

    #[test]
    fn test_config_validation() {
        assert!(BuildConfig::new(9).validate().is_err());
        assert!(BuildConfig::new(0).with_sample_k(0).validate().is_err());
        assert!(BuildConfig::new(0).with_max_depth(0).validate().is_err());
        assert!(BuildConfig::new(0).with_brute_force_threshold(0).validate().is_err());
    }

    #[test]
    fn test_uniform_oracle_single_leaf() {
        let oracle = FnOracle::new(|_, _| 7);
        let tree = build_tree(&oracle, config(0)).unwrap();
        assert_eq!(tree.root, Node::Leaf(7));
        assert_eq!(tree.get_coords(0.0, 0.0), 7);
        assert_eq!(tree.get_coords(-90.0, -180.0), 7);
    }

    #[test]
    fn test_hemispheres_split_on_latitude() {
        let oracle = FnOracle::new(|ilat, _| if ilat > 90 { 1 } else { 2 });
        let tree = build_tree(&oracle, config(0)).unwrap();
        assert_eq!(tree.get_coords(45.0, 0.0), 1);
        assert_eq!(tree.get_coords(-45.0, 0.0), 2);
        // The midpoint row belongs to the south child.
        assert_eq!(tree.get(90, 180), 2);
    }

    #[test]
    fn test_leaves_are_proven_uniform() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let tree = build_tree(&oracle, config(0)).unwrap();
        tree.for_each_leaf(|rect, id| {
            for (x, y) in rect.points() {
                assert_eq!(oracle.country_at(y, x).unwrap(), id);
            }
        });
    }

    #[test]
    fn test_leaves_tile_root() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let tree = build_tree(&oracle, config(0)).unwrap();
        let mut covered = 0u64;
        tree.for_each_leaf(|rect, _| covered += rect.point_count());
        assert_eq!(covered, grid.root_rect().point_count());
    }

    #[test]
    fn test_canonical_no_uniform_internal() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let tree = build_tree(&oracle, config(0)).unwrap();

        fn assert_canonical(node: &Node) {
            if let Node::Internal(children) = node {
                let mut leaf_ids = Vec::new();
                let mut all_leaves = true;
                for child in children.iter().flatten() {
                    match child {
                        Node::Leaf(id) => leaf_ids.push(*id),
                        _ => all_leaves = false,
                    }
                    assert_canonical(child);
                }
                if all_leaves {
                    assert!(
                        leaf_ids.windows(2).any(|w| w[0] != w[1]),
                        "internal node with uniform leaf children survived"
                    );
                }
            }
        }
        assert_canonical(&tree.root);
    }

    #[test]
    fn test_deterministic_across_builds() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let a = build_tree(&oracle, config(0)).unwrap();
        let b = build_tree(&oracle, config(0)).unwrap();
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let grid = Grid::new(0).unwrap();
        let oracle = SimpleOracle::new(grid);
        let serial = build_tree(&oracle, config(0)).unwrap();
        let parallel = build_tree(&oracle, config(0).with_parallel(true)).unwrap();
        assert_eq!(serial.root, parallel.root);
    }

    #[test]
    fn test_cancellation_aborts() {
        let oracle = FnOracle::new(|ilat, _| (ilat % 7) as u16);
        let flag = Arc::new(AtomicBool::new(true));
        let builder = TreeBuilder::new(&oracle, config(0)).unwrap().cancel_flag(flag);
        match builder.build() {
            Err(AtlasError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn test_oracle_error_aborts() {
        let calls = AtomicUsize::new(0);
        struct Failing<'a>(&'a AtomicUsize);
        impl Oracle for Failing<'_> {
            fn country_at(&self, _: u32, _: u32) -> Result<u16> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Err(AtlasError::Oracle("backend went away".into()))
            }
            fn country_codes(&self) -> Vec<(u16, String)> {
                Vec::new()
            }
        }
        let result = build_tree(&Failing(&calls), config(0));
        assert!(matches!(result, Err(AtlasError::Oracle(_))));
        assert!(calls.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_depth_limit_fallback_still_correct() {
        // One-point island; cap the depth well below what isolating it needs.
        let oracle = FnOracle::new(|ilat, ilon| u16::from(ilat == 100 && ilon == 200) * 9);
        let cfg = config(0).with_max_depth(4);
        let builder = TreeBuilder::new(&oracle, cfg).unwrap();
        let tree = builder.build().unwrap();
        assert!(builder.stats().depth_limit_fallbacks.load(Ordering::Relaxed) > 0);

        assert_eq!(tree.get(100, 200), 9);
        for (dy, dx) in [(-1i64, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)] {
            let (ny, nx) = ((100i64 + dy) as u32, (200i64 + dx) as u32);
            assert_eq!(tree.get(ny, nx), 0, "neighbor ({nx},{ny})");
        }
    }

    #[test]
    fn test_sample_points_deterministic() {
        let rect = Rect::new(0, 0, 100, 100);
        let a = sample_points(rect, 42, 16);
        let b = sample_points(rect, 42, 16);
        assert_eq!(a, b);

        let c = sample_points(rect, 43, 16);
        assert_ne!(a, c, "different seeds should move the random probes");
    }

    #[test]
    fn test_sample_points_no_duplicates_and_in_bounds() {
        let rect = Rect::new(10, 20, 14, 22);
        let points = sample_points(rect, 1, 32);
        let mut seen = FxHashSet::default();
        for &(x, y) in &points {
            assert!(rect.contains(x, y));
            assert!(seen.insert((x, y)));
        }
    }
}
