//! Generated-header checks: structure, metadata, and the embedded blob.

use quadatlas::{
    build_tree, generate_cpp_header, BuildConfig, CodegenOptions, CountryTable, Grid, Oracle,
    RectangleOracle,
};
use tempfile::TempDir;

fn generate(precision: u8, compress: bool) -> String {
    let grid = Grid::new(precision).unwrap();
    let oracle = RectangleOracle::new(grid);
    let tree = build_tree(
        &oracle,
        BuildConfig::new(precision).with_brute_force_threshold(4096),
    )
    .unwrap();
    let table = CountryTable::from_pairs(&oracle.country_codes()).unwrap();
    generate_cpp_header(
        &tree,
        &table,
        &CodegenOptions {
            namespace: "adm0".into(),
            oracle_source: "RectangleOracle".into(),
            compress,
        },
    )
    .unwrap()
}

#[test]
fn emits_the_artifact_contract() {
    let header = generate(0, false);
    assert!(header.contains("inline uint16_t country_id(double lat, double lon)"));
    assert!(header.contains("inline std::string_view country_iso(double lat, double lon)"));
    assert!(header.contains("inline uint16_t country_id_from_iso(std::string_view code)"));
    assert!(header.contains("namespace adm0 {"));
}

#[test]
fn traversal_and_quantizer_are_embedded() {
    let header = generate(0, false);
    // The tie rule and rounding rule the Rust runtime uses, verbatim.
    assert!(header.contains("const bool go_east = ilon > xm;"));
    assert!(header.contains("const bool go_north = ilat > ym;"));
    assert!(header.contains("scaled >= 0.0 ? scaled + 0.5 : scaled - 0.5"));
    assert!(header.contains("skip_node"));
}

#[test]
fn country_codes_are_emitted_in_id_order() {
    let header = generate(0, false);
    let usa = header.find("\"USA\"").unwrap();
    let bra = header.find("\"BRA\"").unwrap();
    let aus = header.find("\"AUS\"").unwrap();
    assert!(usa < bra && bra < aus);
}

#[test]
fn precision_changes_constants_and_guard() {
    let header = generate(1, false);
    assert!(header.contains("ADM0_COUNTRY_LOOKUP_P1_HPP"));
    assert!(header.contains("inline constexpr double kQ = 10.0;"));
    assert!(header.contains("inline constexpr uint32_t kMaxIlon = 3600;"));
    assert!(header.contains("inline constexpr uint32_t kMaxIlat = 1800;"));
}

#[test]
fn compressed_header_carries_zstd_shim() {
    let header = generate(0, true);
    assert!(header.contains("#include <zstd.h>"));
    assert!(header.contains("ZSTD_decompress"));

    let raw = generate(0, false);
    assert!(!raw.contains("zstd"));
}

#[test]
fn header_writes_to_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("country_lookup_p0.hpp");
    let header = generate(0, true);
    std::fs::write(&path, &header).unwrap();

    let read_back = std::fs::read_to_string(&path).unwrap();
    assert_eq!(read_back, header);
    assert!(read_back.len() > 1024);
}
