//! Blob format integration tests: round trips, determinism, and rejection
//! of malformed input.

use quadatlas::serialize::{compress, decode, encode, MAGIC, VERSION};
use quadatlas::{build_tree, AtlasError, BuildConfig, CountryTable, Grid, Oracle, SimpleOracle};

fn built() -> (quadatlas::QuadTree, CountryTable) {
    let grid = Grid::new(0).unwrap();
    let oracle = SimpleOracle::new(grid);
    let tree = build_tree(&oracle, BuildConfig::new(0).with_brute_force_threshold(4096)).unwrap();
    let table = CountryTable::from_pairs(&oracle.country_codes()).unwrap();
    (tree, table)
}

#[test]
fn blob_starts_with_magic_and_version() {
    let (tree, table) = built();
    let blob = encode(&tree, &table).unwrap();
    assert_eq!(&blob[..4], MAGIC);
    assert_eq!(blob[4], VERSION);
}

#[test]
fn abstract_tree_round_trip() {
    let (tree, table) = built();
    let blob = encode(&tree, &table).unwrap();
    let (decoded_tree, decoded_table) = decode(&blob).unwrap();
    assert_eq!(decoded_tree, tree);
    assert_eq!(decoded_table, table);

    // Re-encoding the decoded tree reproduces the blob byte for byte.
    assert_eq!(encode(&decoded_tree, &decoded_table).unwrap(), blob);
}

#[test]
fn compression_is_transparent_and_smaller_on_real_trees() {
    let (tree, table) = built();
    let blob = encode(&tree, &table).unwrap();
    let packed = compress(&blob).unwrap();

    let (from_raw, _) = decode(&blob).unwrap();
    let (from_packed, _) = decode(&packed).unwrap();
    assert_eq!(from_raw, from_packed);
}

#[test]
fn truncated_blobs_rejected_at_every_prefix_length() {
    let (tree, table) = built();
    let blob = encode(&tree, &table).unwrap();
    for cut in 0..blob.len() {
        assert!(
            matches!(decode(&blob[..cut]), Err(AtlasError::Decode(_))),
            "prefix of {cut} bytes not rejected"
        );
    }
}

#[test]
fn country_table_survives_round_trip() {
    let (tree, _) = built();
    let table = CountryTable::from_pairs(&[
        (1, "USA".into()),
        (2, "BR".into()),
        (5, "FRA".into()),
    ])
    .unwrap();

    let blob = encode(&tree, &table).unwrap();
    let (_, decoded) = decode(&blob).unwrap();
    assert_eq!(decoded.code(1), "USA");
    assert_eq!(decoded.code(2), "BR");
    assert_eq!(decoded.code(3), "");
    assert_eq!(decoded.code(4), "");
    assert_eq!(decoded.code(5), "FRA");
    assert_eq!(decoded.id_for_code("FRA"), 5);
    assert_eq!(decoded.id_for_code("BR"), 2);
    assert_eq!(decoded.id_for_code("ZZZ"), 0);
}

#[test]
fn large_country_ids_round_trip() {
    // Ids that need multi-byte varints.
    let oracle = quadatlas::FnOracle::new(|ilat, _| if ilat > 90 { 300 } else { 40_000 });
    let tree = build_tree(&oracle, BuildConfig::new(0).with_brute_force_threshold(4096)).unwrap();
    let blob = encode(&tree, &CountryTable::empty()).unwrap();
    let (decoded, _) = decode(&blob).unwrap();
    assert_eq!(decoded.get(180, 0), 300);
    assert_eq!(decoded.get(0, 0), 40_000);
}

#[test]
fn different_seeds_same_answers() {
    // Sampling seeds may reshape the tree but never its semantics.
    let grid = Grid::new(0).unwrap();
    let oracle = SimpleOracle::new(grid);
    let a = build_tree(&oracle, BuildConfig::new(0).with_seed(1)).unwrap();
    let b = build_tree(&oracle, BuildConfig::new(0).with_seed(2)).unwrap();

    for ilat in (0..=grid.max_ilat()).step_by(7) {
        for ilon in (0..=grid.max_ilon()).step_by(11) {
            assert_eq!(
                a.get(ilat, ilon),
                oracle.country_at(ilat, ilon).unwrap(),
                "seed 1 wrong at ({ilat},{ilon})"
            );
            assert_eq!(a.get(ilat, ilon), b.get(ilat, ilon));
        }
    }
}
