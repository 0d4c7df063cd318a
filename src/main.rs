use clap::{Parser, Subcommand, ValueEnum};
use quadatlas::{
    generate_cpp_header, BuildConfig, CheckerboardOracle, CircleOracle, CodegenOptions,
    CountryTable, GeoJsonOracle, Grid, Oracle, RectangleOracle, SimpleOracle, TreeBuilder,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quadatlas", version, about = "Compile country lookup headers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a country lookup header
    Build {
        /// Decimal precision
        #[arg(short, long, default_value_t = 2)]
        precision: u8,

        /// Output path (default: country_lookup_p<precision>.hpp)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pseudo-random probes per rectangle
        #[arg(long, default_value_t = 16)]
        sample_k: usize,

        /// Max points to prove a rectangle by exhaustive evaluation
        #[arg(long, default_value_t = 16_384)]
        brute_force_threshold: u64,

        /// Maximum tree depth
        #[arg(long, default_value_t = 64)]
        max_depth: usize,

        /// Seed for deterministic sampling
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Build the four top-level subtrees concurrently
        #[arg(long)]
        parallel: bool,

        /// Skip zstd compression of the embedded blob
        #[arg(long)]
        no_compress: bool,

        /// C++ namespace for the generated header
        #[arg(long, default_value = "adm0")]
        namespace: String,

        /// Use a synthetic oracle instead of real data
        #[arg(long, value_enum, conflicts_with = "geojson")]
        mock_oracle: Option<MockKind>,

        /// GeoJSON FeatureCollection of country polygons
        #[arg(long)]
        geojson: Option<PathBuf>,
    },

    /// Show lattice statistics for a precision
    Stats {
        /// Decimal precision
        #[arg(short, long, default_value_t = 2)]
        precision: u8,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MockKind {
    Rectangle,
    Circle,
    Simple,
    Checkerboard,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quadatlas=info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Build {
            precision,
            output,
            sample_k,
            brute_force_threshold,
            max_depth,
            seed,
            parallel,
            no_compress,
            namespace,
            mock_oracle,
            geojson,
        } => {
            let grid = Grid::new(precision)?;
            let (oracle, oracle_source): (Box<dyn Oracle>, String) = match (mock_oracle, geojson) {
                (Some(kind), None) => {
                    let oracle: Box<dyn Oracle> = match kind {
                        MockKind::Rectangle => Box::new(RectangleOracle::new(grid)),
                        MockKind::Circle => Box::new(CircleOracle::new(grid)),
                        MockKind::Simple => Box::new(SimpleOracle::new(grid)),
                        MockKind::Checkerboard => Box::new(CheckerboardOracle::new(grid, 1)),
                    };
                    (oracle, format!("{kind:?}Oracle"))
                }
                (None, Some(path)) => {
                    info!(path = %path.display(), "loading country polygons");
                    let oracle = GeoJsonOracle::from_path(&path, grid)?;
                    info!(countries = oracle.country_count(), "loaded GeoJSON oracle");
                    (Box::new(oracle), format!("GeoJSON ({})", path.display()))
                }
                (None, None) => anyhow::bail!(
                    "no oracle selected; pass --geojson PATH or --mock-oracle KIND"
                ),
                (Some(_), Some(_)) => unreachable!("clap rejects conflicting oracles"),
            };

            let config = BuildConfig::new(precision)
                .with_sample_k(sample_k)
                .with_brute_force_threshold(brute_force_threshold)
                .with_max_depth(max_depth)
                .with_seed(seed)
                .with_parallel(parallel);

            let builder = TreeBuilder::new(oracle.as_ref(), config)?;
            let tree = builder.build()?;
            let stats = builder.stats();
            info!(
                nodes = tree.node_count(),
                leaves = tree.leaf_count(),
                depth = tree.depth(),
                oracle_calls = stats.oracle_calls.load(Ordering::Relaxed),
                brute_force_proofs = stats.brute_force_proofs.load(Ordering::Relaxed),
                sampling_detected_mixed = stats.sampling_detected_mixed.load(Ordering::Relaxed),
                brute_force_detected_mixed =
                    stats.brute_force_detected_mixed.load(Ordering::Relaxed),
                depth_limit_fallbacks = stats.depth_limit_fallbacks.load(Ordering::Relaxed),
                "tree built"
            );

            let table = CountryTable::from_pairs(&oracle.country_codes())?;
            let header = generate_cpp_header(
                &tree,
                &table,
                &CodegenOptions {
                    namespace,
                    oracle_source,
                    compress: !no_compress,
                },
            )?;

            let output =
                output.unwrap_or_else(|| PathBuf::from(format!("country_lookup_p{precision}.hpp")));
            std::fs::write(&output, &header)?;
            info!(path = %output.display(), bytes = header.len(), "wrote header");
        }

        Command::Stats { precision } => {
            let grid = Grid::new(precision)?;
            let total = grid.root_rect().point_count();
            println!("Lattice statistics for precision {precision}:");
            println!("  Q = 10^{precision} = {}", grid.q());
            println!("  Max longitude index: {}", grid.max_ilon());
            println!("  Max latitude index: {}", grid.max_ilat());
            println!("  Total lattice points: {total}");
            println!("  Cell size: {} degrees", 1.0 / f64::from(grid.q()));
        }
    }

    Ok(())
}
