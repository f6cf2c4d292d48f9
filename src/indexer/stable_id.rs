use crate::indexer::extract::SymbolInput;
use blake3::Hasher;

/// Compute a stable symbol ID from location-independent content.
///
/// The ID is derived from:
/// - the file path that owns the symbol
/// - `qualname`, unique within that file
/// - `kind`
/// - the hash of the declaration's source text
///
/// Line numbers and byte offsets are NOT hashed, so adding blank lines above a
/// function keeps its ID. Editing the function body produces a new ID, which
/// lets refresh tell replaced symbols from untouched ones.
///
/// Returns `sym_{16_hex_chars}`: the first 64 bits of the blake3 digest.
pub fn compute_stable_symbol_id(file: &str, symbol: &SymbolInput) -> String {
    let mut hasher = Hasher::new();
    hasher.update(file.as_bytes());
    hasher.update(b"\x00");
    hasher.update(symbol.qualname.as_bytes());
    hasher.update(b"\x00");
    hasher.update(symbol.kind.as_str().as_bytes());
    hasher.update(b"\x00");
    hasher.update(symbol.content_hash.as_bytes());

    let hash = hasher.finalize();
    format!("sym_{}", &hash.to_hex()[..16])
}
