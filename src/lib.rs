//! Offline compiler for country point-in-polygon lookup tables.
//!
//! `quadatlas` proves rectangles of a quantized lat/lon lattice uniform
//! against an oracle (or subdivides them), serializes the resulting sparse
//! quadtree into a compact blob, and emits a self-contained C++ header that
//! answers "which country is at this coordinate" with no runtime
//! dependencies.
//!
//! ```rust
//! use quadatlas::{build_tree, BuildConfig, FnOracle};
//!
//! let oracle = FnOracle::new(|_ilat, _ilon| 7);
//! let tree = build_tree(&oracle, BuildConfig::new(0))?;
//! assert_eq!(tree.get_coords(48.8, 2.3), 7);
//! # Ok::<(), quadatlas::AtlasError>(())
//! ```

pub mod builder;
pub mod codegen;
pub mod country;
pub mod error;
pub mod geo_oracle;
pub mod oracle;
pub mod quadtree;
pub mod quantize;
pub mod runtime;
pub mod serialize;

pub use builder::{build_tree, BuildConfig, BuildStats, TreeBuilder};
pub use codegen::{generate_cpp_header, CodegenOptions};
pub use country::CountryTable;
pub use error::{AtlasError, Result};
pub use geo_oracle::GeoJsonOracle;
pub use oracle::{
    CheckerboardOracle, CircleOracle, FnOracle, Oracle, RectangleOracle, SimpleOracle, OCEAN_ID,
};
pub use quadtree::{Node, QuadTree, Rect};
pub use quantize::Grid;
pub use runtime::LookupTable;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{build_tree, BuildConfig, TreeBuilder};

    pub use crate::{AtlasError, Result};

    pub use crate::{Grid, LookupTable, QuadTree};

    pub use crate::{CountryTable, Oracle, OCEAN_ID};
}
