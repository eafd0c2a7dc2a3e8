//! Query string parsing.

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Parse a raw query string (without the leading `?`) into a map.
/// The first occurrence of a key wins; `+` decodes to a space.
pub fn parse(raw: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(raw) = raw else {
        return map;
    };
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        map.entry(decode_component(k))
            .or_insert_with(|| decode_component(v));
    }
    map
}

fn decode_component(s: &str) -> String {
    let unplussed = s.replace('+', " ");
    percent_decode_str(&unplussed)
        .decode_utf8_lossy()
        .into_owned()
}
