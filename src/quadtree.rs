//! Quadtree model: integer rectangles, subdivision geometry, and the node
//! sum type the builder produces.
//!
//! Rectangles are inclusive on all four edges. Child order is fixed as
//! NW, NE, SW, SE; NW is the geometric upper-left (high `ilat`, low `ilon`).
//! The midpoint column belongs to the west children and the midpoint row to
//! the south children, and every consumer of the tree (builder, serializer,
//! runtime, generated header) relies on that tie rule.

use crate::quantize::Grid;
use serde::{Deserialize, Serialize};

/// Child slot indices, in serialization order.
pub const NW: usize = 0;
pub const NE: usize = 1;
pub const SW: usize = 2;
pub const SE: usize = 3;

/// An axis-aligned rectangle on the lattice, inclusive on both ends.
///
/// `x` is the longitude index (`ilon`), `y` the latitude index (`ilat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    /// Create a rectangle. Panics if the bounds are inverted; rectangles
    /// only ever come from the root lattice or from `subdivide`, so an
    /// inverted box is a logic error, not an input error.
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        assert!(x0 <= x1 && y0 <= y1, "inverted rect ({x0},{y0})..({x1},{y1})");
        Self { x0, y0, x1, y1 }
    }

    /// Number of lattice points along the x axis.
    pub fn width(&self) -> u32 {
        self.x1 - self.x0 + 1
    }

    /// Number of lattice points along the y axis.
    pub fn height(&self) -> u32 {
        self.y1 - self.y0 + 1
    }

    /// Total lattice points covered.
    pub fn point_count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// A rectangle covering exactly one lattice point.
    pub fn is_point(&self) -> bool {
        self.x0 == self.x1 && self.y0 == self.y1
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.x0 <= x && x <= self.x1 && self.y0 <= y && y <= self.y1
    }

    /// Midpoint indices for subdivision, floor division.
    pub fn midpoints(&self) -> (u32, u32) {
        // Indices are unsigned, so floor division can never round toward
        // zero differently from a signed platform; assert it stays that way.
        debug_assert!(self.x0 <= self.x1 && self.y0 <= self.y1);
        let xm = (self.x0 + self.x1) / 2;
        let ym = (self.y0 + self.y1) / 2;
        (xm, ym)
    }

    /// Subdivide into up to four children in NW, NE, SW, SE order.
    ///
    /// A width-0 rectangle suppresses the east column (NE and SE are `None`);
    /// a height-0 rectangle suppresses the north row (NW and NE are `None`).
    /// SW is always present. Single-point rectangles cannot be subdivided.
    pub fn subdivide(&self) -> [Option<Rect>; 4] {
        assert!(!self.is_point(), "cannot subdivide a single point");
        let (xm, ym) = self.midpoints();

        let has_east = xm + 1 <= self.x1;
        let has_north = ym + 1 <= self.y1;

        [
            has_north.then(|| Rect::new(self.x0, ym + 1, xm, self.y1)),
            (has_east && has_north).then(|| Rect::new(xm + 1, ym + 1, self.x1, self.y1)),
            Some(Rect::new(self.x0, self.y0, xm, ym)),
            has_east.then(|| Rect::new(xm + 1, self.y0, self.x1, ym)),
        ]
    }

    /// Which child slot contains `(x, y)`. The midpoint column is west and
    /// the midpoint row is south.
    pub fn child_index(&self, x: u32, y: u32) -> usize {
        debug_assert!(self.contains(x, y));
        let (xm, ym) = self.midpoints();
        match (y <= ym, x <= xm) {
            (false, true) => NW,
            (false, false) => NE,
            (true, true) => SW,
            (true, false) => SE,
        }
    }

    /// Iterate every lattice point, row-major from the south-west corner.
    pub fn points(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.y0..=self.y1).flat_map(move |y| (self.x0..=self.x1).map(move |x| (x, y)))
    }
}

/// A quadtree node: either a proven-uniform leaf or an internal split.
///
/// Internal nodes carry four child slots in NW, NE, SW, SE order; slots for
/// children suppressed by a degenerate axis are `None`, and the present
/// pattern always matches the node's rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(u16),
    Internal(Box<[Option<Node>; 4]>),
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Total nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Internal(children) => {
                1 + children
                    .iter()
                    .flatten()
                    .map(Node::node_count)
                    .sum::<usize>()
            }
        }
    }

    /// Leaves in this subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Internal(children) => children.iter().flatten().map(Node::leaf_count).sum(),
        }
    }

    /// Depth of this subtree; a leaf is depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Internal(children) => {
                1 + children.iter().flatten().map(Node::depth).max().unwrap_or(0)
            }
        }
    }

    /// Reference traversal: the country id at `(x, y)` within `rect`.
    ///
    /// Panics if a required child slot is empty, which the builder and the
    /// decoder both make impossible.
    pub fn get(&self, x: u32, y: u32, rect: Rect) -> u16 {
        match self {
            Node::Leaf(id) => *id,
            Node::Internal(children) => {
                let idx = rect.child_index(x, y);
                let child_rect = rect.subdivide()[idx].expect("child rect for contained point");
                let child = children[idx].as_ref().expect("child node for contained point");
                child.get(x, y, child_rect)
            }
        }
    }
}

/// A built tree together with the lattice it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuadTree {
    pub root: Node,
    pub grid: Grid,
}

impl QuadTree {
    pub fn new(root: Node, grid: Grid) -> Self {
        Self { root, grid }
    }

    /// Country id at a lattice point.
    pub fn get(&self, ilat: u32, ilon: u32) -> u16 {
        self.root.get(ilon, ilat, self.grid.root_rect())
    }

    /// Country id at WGS84 coordinates (clamping quantization).
    pub fn get_coords(&self, lat: f64, lon: f64) -> u16 {
        let (ilat, ilon) = self.grid.quantize(lat, lon);
        self.get(ilat, ilon)
    }

    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Visit every leaf with its rectangle, preorder.
    pub fn for_each_leaf<F: FnMut(Rect, u16)>(&self, mut f: F) {
        fn walk<F: FnMut(Rect, u16)>(node: &Node, rect: Rect, f: &mut F) {
            match node {
                Node::Leaf(id) => f(rect, *id),
                Node::Internal(children) => {
                    for (child, child_rect) in children.iter().zip(rect.subdivide()) {
                        if let (Some(child), Some(child_rect)) = (child, child_rect) {
                            walk(child, child_rect, f);
                        }
                    }
                }
            }
        }
        walk(&self.root, self.grid.root_rect(), &mut f);
    }
}
