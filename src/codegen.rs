//! C++ header emission.
//!
//! The generated header is self-contained: the serialized blob as a byte
//! array, the quantizer, and the streaming traversal, all reproducing
//! [`crate::quantize`] and [`crate::runtime`] exactly. Constants the
//! generator already knows (lattice bounds, body offset, country codes) are
//! emitted as constants rather than re-parsed from the blob at runtime.

use crate::country::CountryTable;
use crate::error::Result;
use crate::quadtree::QuadTree;
use crate::serialize::{compress, decode_header, encode};
use std::fmt::Write;

/// Options for the emitted header.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// C++ namespace wrapping the generated API.
    pub namespace: String,
    /// Human-readable oracle description for the header comment.
    pub oracle_source: String,
    /// Emit a zstd-compressed blob plus the decompression shim.
    pub compress: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            namespace: "adm0".into(),
            oracle_source: "unspecified".into(),
            compress: true,
        }
    }
}

/// Generate a self-contained C++17 lookup header for a built tree.
pub fn generate_cpp_header(
    tree: &QuadTree,
    table: &CountryTable,
    opts: &CodegenOptions,
) -> Result<String> {
    let blob = encode(tree, table)?;

    // The traversal starts after the header regardless of compression.
    let mut cursor = blob.as_ref();
    decode_header(&mut cursor)?;
    let body_start = blob.len() - cursor.len();

    let embedded: Vec<u8>;
    let raw_size = blob.len();
    if opts.compress {
        embedded = compress(&blob)?;
    } else {
        embedded = blob.to_vec();
    }

    let grid = tree.grid;
    let guard = format!(
        "{}_COUNTRY_LOOKUP_P{}_HPP",
        opts.namespace.to_uppercase(),
        grid.precision()
    );

    let mut out = String::new();
    let w = &mut out;

    writeln!(w, "#ifndef {guard}").unwrap();
    writeln!(w, "#define {guard}").unwrap();
    writeln!(w, "//").unwrap();
    writeln!(w, "// Generated by quadatlas; do not edit.").unwrap();
    writeln!(w, "//").unwrap();
    writeln!(w, "// Precision: {}", grid.precision()).unwrap();
    writeln!(w, "// Oracle: {}", opts.oracle_source).unwrap();
    writeln!(
        w,
        "// Tree statistics: {} nodes, {} leaves, depth {}",
        tree.node_count(),
        tree.leaf_count(),
        tree.depth()
    )
    .unwrap();
    if opts.compress {
        writeln!(
            w,
            "// Blob: {} bytes, zstd-compressed to {}",
            raw_size,
            embedded.len()
        )
        .unwrap();
    } else {
        writeln!(w, "// Blob: {raw_size} bytes, uncompressed").unwrap();
    }
    writeln!(w, "// Ocean policy: leaves with id 0 are stored explicitly.").unwrap();
    writeln!(w, "//").unwrap();
    writeln!(w).unwrap();
    writeln!(w, "#include <cstddef>").unwrap();
    writeln!(w, "#include <cstdint>").unwrap();
    writeln!(w, "#include <string_view>").unwrap();
    if opts.compress {
        writeln!(w, "#include <vector>").unwrap();
        writeln!(w, "#include <zstd.h>").unwrap();
    }
    writeln!(w).unwrap();
    writeln!(w, "namespace {} {{", opts.namespace).unwrap();
    writeln!(w, "namespace detail {{").unwrap();
    writeln!(w).unwrap();

    write_blob_array(w, &embedded);
    writeln!(w).unwrap();

    writeln!(w, "inline constexpr int kPrecision = {};", grid.precision()).unwrap();
    writeln!(w, "inline constexpr double kQ = {}.0;", grid.q()).unwrap();
    writeln!(w, "inline constexpr uint32_t kMaxIlon = {};", grid.max_ilon()).unwrap();
    writeln!(w, "inline constexpr uint32_t kMaxIlat = {};", grid.max_ilat()).unwrap();
    writeln!(w, "inline constexpr std::size_t kBodyStart = {body_start};").unwrap();
    if opts.compress {
        writeln!(w, "inline constexpr std::size_t kRawSize = {raw_size};").unwrap();
    }
    writeln!(w).unwrap();

    write_country_table(w, table);
    writeln!(w).unwrap();

    if opts.compress {
        writeln!(w, "{}", CPP_DECOMPRESS).unwrap();
    } else {
        writeln!(w, "{}", CPP_RAW_DATA).unwrap();
    }
    writeln!(w, "{}", CPP_DETAIL).unwrap();
    writeln!(w, "}} // namespace detail").unwrap();
    writeln!(w).unwrap();
    writeln!(w, "{}", CPP_API).unwrap();
    writeln!(w, "}} // namespace {}", opts.namespace).unwrap();
    writeln!(w).unwrap();
    writeln!(w, "#endif // {guard}").unwrap();

    Ok(out)
}

fn write_blob_array(w: &mut String, data: &[u8]) {
    writeln!(w, "inline constexpr unsigned char kBlob[] = {{").unwrap();
    for chunk in data.chunks(16) {
        let mut line = String::from("   ");
        for byte in chunk {
            write!(line, " 0x{byte:02x},").unwrap();
        }
        writeln!(w, "{line}").unwrap();
    }
    writeln!(w, "}};").unwrap();
    writeln!(w, "inline constexpr std::size_t kBlobSize = sizeof(kBlob);").unwrap();
}

fn write_country_table(w: &mut String, table: &CountryTable) {
    writeln!(w, "inline constexpr std::size_t kCountryCount = {};", table.len()).unwrap();
    writeln!(w, "inline constexpr std::string_view kCodes[] = {{").unwrap();
    for id in 0..table.len() {
        writeln!(w, "    \"{}\",", table.code(id as u16)).unwrap();
    }
    writeln!(w, "}};").unwrap();
}

const CPP_RAW_DATA: &str = r#"inline const unsigned char* blob_data() {
    return kBlob;
}
"#;

const CPP_DECOMPRESS: &str = r#"inline const unsigned char* blob_data() {
    static const std::vector<unsigned char> decompressed = [] {
        std::vector<unsigned char> out(kRawSize);
        ZSTD_decompress(out.data(), out.size(), kBlob, kBlobSize);
        return out;
    }();
    return decompressed.data();
}
"#;

const CPP_DETAIL: &str = r#"struct Rect {
    uint32_t x0, y0, x1, y1;
};

inline uint64_t read_varint(const unsigned char* data, std::size_t& pos) {
    uint64_t result = 0;
    int shift = 0;
    for (;;) {
        unsigned char byte = data[pos++];
        result |= static_cast<uint64_t>(byte & 0x7F) << shift;
        if ((byte & 0x80) == 0) {
            return result;
        }
        shift += 7;
    }
}

// Skip one serialized subtree. Child presence is derived from the
// rectangle, exactly as the encoder derived it.
inline void skip_node(const unsigned char* data, std::size_t& pos, Rect rect) {
    if (read_varint(data, pos) == 0) {
        read_varint(data, pos);
        return;
    }
    const uint32_t xm = (rect.x0 + rect.x1) / 2;
    const uint32_t ym = (rect.y0 + rect.y1) / 2;
    const bool east = xm + 1 <= rect.x1;
    const bool north = ym + 1 <= rect.y1;
    if (north) skip_node(data, pos, {rect.x0, ym + 1, xm, rect.y1});
    if (east && north) skip_node(data, pos, {xm + 1, ym + 1, rect.x1, rect.y1});
    skip_node(data, pos, {rect.x0, rect.y0, xm, ym});
    if (east) skip_node(data, pos, {xm + 1, rect.y0, rect.x1, ym});
}

// Round half away from zero, clamp into [0, max_index].
inline uint32_t quantize_axis(double value, double offset, uint32_t max_index) {
    const double scaled = (value + offset) * kQ;
    const double rounded = scaled >= 0.0 ? scaled + 0.5 : scaled - 0.5;
    int64_t index = static_cast<int64_t>(rounded);
    if (index < 0) index = 0;
    if (index > static_cast<int64_t>(max_index)) index = max_index;
    return static_cast<uint32_t>(index);
}

inline uint16_t lookup_grid(uint32_t ilat, uint32_t ilon) {
    const unsigned char* data = blob_data();
    std::size_t pos = kBodyStart;
    Rect rect{0, 0, kMaxIlon, kMaxIlat};
    for (;;) {
        if (read_varint(data, pos) == 0) {
            return static_cast<uint16_t>(read_varint(data, pos));
        }
        const uint32_t xm = (rect.x0 + rect.x1) / 2;
        const uint32_t ym = (rect.y0 + rect.y1) / 2;
        const bool east = xm + 1 <= rect.x1;
        const bool north = ym + 1 <= rect.y1;
        // The midpoint column is west, the midpoint row south.
        const bool go_east = ilon > xm;
        const bool go_north = ilat > ym;

        const Rect nw{rect.x0, ym + 1, xm, rect.y1};
        const Rect ne{xm + 1, ym + 1, rect.x1, rect.y1};
        const Rect sw{rect.x0, rect.y0, xm, ym};
        const Rect se{xm + 1, rect.y0, rect.x1, ym};

        if (north) {
            if (go_north && !go_east) { rect = nw; continue; }
            skip_node(data, pos, nw);
        }
        if (east && north) {
            if (go_north && go_east) { rect = ne; continue; }
            skip_node(data, pos, ne);
        }
        if (!go_north && !go_east) { rect = sw; continue; }
        skip_node(data, pos, sw);
        if (east) {
            if (!go_north && go_east) { rect = se; continue; }
            skip_node(data, pos, se);
        }
    }
}
"#;

const CPP_API: &str = r#"// Country id for WGS84 coordinates; 0 means no country. Out-of-range and
// non-finite input clamps into the lattice.
inline uint16_t country_id(double lat, double lon) {
    if (!(lat >= -90.0)) lat = -90.0;
    else if (lat > 90.0) lat = 90.0;
    if (!(lon >= -180.0)) lon = -180.0;
    else if (lon > 180.0) lon = 180.0;
    const uint32_t ilat = detail::quantize_axis(lat, 90.0, detail::kMaxIlat);
    const uint32_t ilon = detail::quantize_axis(lon, 180.0, detail::kMaxIlon);
    return detail::lookup_grid(ilat, ilon);
}

// ISO code for the country at the given coordinates; empty over ocean.
inline std::string_view country_iso(double lat, double lon) {
    const uint16_t id = country_id(lat, lon);
    return id < detail::kCountryCount ? detail::kCodes[id] : std::string_view{};
}

// Country id for an ISO code, 0 if unknown.
inline uint16_t country_id_from_iso(std::string_view code) {
    for (std::size_t id = 1; id < detail::kCountryCount; ++id) {
        if (detail::kCodes[id] == code) {
            return static_cast<uint16_t>(id);
        }
    }
    return 0;
}
"#;
