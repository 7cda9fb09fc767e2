// ABOUTME: Decodes the platform's serialized reference queries into candidate sketch entity ids
// ABOUTME: Compressed payloads are Base64 over a zlib stream; failures degrade to an empty candidate set

use std::collections::BTreeSet;
use std::io::Read;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::ZlibDecoder;
use tracing::{debug, warn};

use crate::{Result, SketchGraphError};

/// Only query strings containing this marker can reference sketch entities.
pub const REFERENCE_MARKER: &str = "query=qCompressed";

/// Present when the payload is stored as plain text instead of compressed.
pub const LITERAL_MARKER: &str = "$Query";

/// Framing around a literal payload.
const LITERAL_PREFIX_LEN: usize = 23;
/// Framing around a compressed payload.
const COMPRESSED_PREFIX_LEN: usize = 28;
const FRAME_SUFFIX_LEN: usize = 6;

/// Length of a sketch entity id.
pub const ENTITY_ID_LEN: usize = 12;

/// Symbol delimiter inside a decoded query.
pub const SYMBOL_DELIMITER: char = '$';

/// Remove `prefix` leading and `suffix` trailing characters. Strings too short
/// to hold both frames yield an empty payload.
fn strip_frame(query: &str, prefix: usize, suffix: usize) -> &str {
    let len = query.chars().count();
    if len <= prefix + suffix {
        return "";
    }
    let start = query
        .char_indices()
        .nth(prefix)
        .map(|(i, _)| i)
        .unwrap_or(query.len());
    let end = query
        .char_indices()
        .nth(len - suffix)
        .map(|(i, _)| i)
        .unwrap_or(query.len());
    &query[start..end]
}

/// Decode the symbol text of a reference query.
///
/// Returns `Ok(None)` for queries that cannot carry references and
/// `Err(DecodeFailure)` for a compressed payload that is not valid
/// Base64/zlib/UTF-8.
pub fn decode_query_symbols(query: &str) -> Result<Option<String>> {
    if !query.contains(REFERENCE_MARKER) {
        return Ok(None);
    }

    if query.contains(LITERAL_MARKER) {
        return Ok(Some(
            strip_frame(query, LITERAL_PREFIX_LEN, FRAME_SUFFIX_LEN).to_string(),
        ));
    }

    let payload = strip_frame(query, COMPRESSED_PREFIX_LEN, FRAME_SUFFIX_LEN);
    // Characters outside the Base64 alphabet are discarded before decoding.
    let filtered: String = payload
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    let compressed = BASE64
        .decode(filtered.as_bytes())
        .map_err(|e| SketchGraphError::DecodeFailure(format!("invalid base64 payload: {}", e)))?;

    let mut inflated = Vec::new();
    ZlibDecoder::new(&compressed[..])
        .read_to_end(&mut inflated)
        .map_err(|e| SketchGraphError::DecodeFailure(format!("invalid zlib stream: {}", e)))?;

    let text = String::from_utf8(inflated)
        .map_err(|e| SketchGraphError::DecodeFailure(format!("payload is not UTF-8: {}", e)))?;
    Ok(Some(text))
}

/// Candidate entity-id tokens of already decoded symbol text.
///
/// When any sketch id occurs in the text, the first [`ENTITY_ID_LEN`]
/// characters of every `$`-delimited segment become a candidate. Candidates
/// may be false positives and must be intersected with known entity ids.
pub fn candidate_tokens<S: AsRef<str>>(symbols: &str, sketch_ids: &[S]) -> BTreeSet<String> {
    let references_sketch = sketch_ids
        .iter()
        .any(|id| !id.as_ref().is_empty() && symbols.contains(id.as_ref()));
    if !references_sketch {
        return BTreeSet::new();
    }

    symbols
        .split(SYMBOL_DELIMITER)
        .map(|segment| segment.chars().take(ENTITY_ID_LEN).collect::<String>())
        .collect()
}

/// Decode one raw query string into candidate entity ids.
///
/// Never fails: malformed payloads are logged and produce an empty set.
pub fn decode_reference<S: AsRef<str>>(query: &str, sketch_ids: &[S]) -> BTreeSet<String> {
    match decode_query_symbols(query) {
        Ok(Some(symbols)) => candidate_tokens(&symbols, sketch_ids),
        Ok(None) => BTreeSet::new(),
        Err(err) => {
            warn!(error = %err, "skipping undecodable reference query");
            debug!(query, "undecodable query string");
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    const COMPRESSED_PREFIX: &str = "query=qCompressed(1.0,\"$Zip$";
    const LITERAL_PREFIX: &str = "query=qCompressed(1.0,\"";
    const SUFFIX: &str = "\",id);";

    fn compressed_query(symbols: &str) -> String {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(symbols.as_bytes()).unwrap();
        let encoded = BASE64.encode(encoder.finish().unwrap());
        format!("{}{}{}", COMPRESSED_PREFIX, encoded, SUFFIX)
    }

    #[test]
    fn frame_lengths_match_constants() {
        assert_eq!(COMPRESSED_PREFIX.len(), COMPRESSED_PREFIX_LEN);
        assert_eq!(LITERAL_PREFIX.len(), LITERAL_PREFIX_LEN);
        assert_eq!(SUFFIX.len(), FRAME_SUFFIX_LEN);
    }

    #[test]
    fn decodes_compressed_payload() {
        let symbols = "%B5$QueryM4$FSketch1xyz$abcdefghijklMORE$mnopqrstuvwx";
        let query = compressed_query(symbols);
        assert_eq!(decode_query_symbols(&query).unwrap().as_deref(), Some(symbols));

        let tokens = decode_reference(&query, &["FSketch1xyz"]);
        assert!(tokens.contains("abcdefghijkl"));
        assert!(tokens.contains("mnopqrstuvwx"));
        assert!(tokens.contains("FSketch1xyz"));
        assert!(tokens.contains("QueryM4"));
    }

    #[test]
    fn decodes_literal_payload() {
        let query = format!(
            "{}%B5$QueryM4$FSketch1xyz$abcdefghijkl{}",
            LITERAL_PREFIX, SUFFIX
        );
        let symbols = decode_query_symbols(&query).unwrap().unwrap();
        assert_eq!(symbols, "%B5$QueryM4$FSketch1xyz$abcdefghijkl");
        assert!(decode_reference(&query, &["FSketch1xyz"]).contains("abcdefghijkl"));
    }

    #[test]
    fn ignores_queries_without_marker() {
        assert_eq!(decode_query_symbols("query=qEverything()").unwrap(), None);
        assert!(decode_reference("query=qEverything()", &["F1"]).is_empty());
    }

    #[test]
    fn no_candidates_without_sketch_id() {
        let query = compressed_query("%B5$QueryM4$FOtherSketch$abcdefghijkl");
        assert!(decode_reference(&query, &["FSketch1xyz"]).is_empty());
    }

    #[test]
    fn malformed_payload_fails_soft() {
        let query = format!("{}!!!not-base64-zlib!!!{}", COMPRESSED_PREFIX, SUFFIX);
        assert!(matches!(
            decode_query_symbols(&query),
            Err(SketchGraphError::DecodeFailure(_))
        ));
        assert!(decode_reference(&query, &["FSketch1xyz"]).is_empty());
    }

    #[test]
    fn short_query_has_empty_payload() {
        assert_eq!(strip_frame("query=qCompressed", 23, 6), "");
        assert_eq!(
            decode_query_symbols("query=qCompressed$Query").unwrap(),
            Some(String::new())
        );
    }
}
