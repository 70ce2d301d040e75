//! Tender identity derivation and URL normalization.
//!
//! Every tender needs a stable natural-key ID and a canonical detail URL
//! before it can be reconciled against persisted state. Both derivations are
//! total: the ID falls back to a hash of the URL, and normalization returns
//! its input unchanged on any parse failure.

use md5::{Digest, Md5};
use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

use super::collapse_whitespace;
use super::extract::detail_by_label;

/// Query keys stripped during URL normalization (case-insensitive).
const VOLATILE_QUERY_KEYS: &[&str] = &[
    "session",
    "sessionid",
    "jsessionid",
    "sid",
    "phpsessid",
    "_",
    "ts",
    "timestamp",
];

/// Tokens never accepted as a tender ID by the heuristic scan.
const ID_STOPWORDS: &[&str] = &["TENDER", "TENDERID", "TENDERNO", "REF", "NO", "NIT", "ID"];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]").expect("static regex"))
}

fn label_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            Regex::new(r"(?i)tender\s*id\s*[:\-]\s*(\S+)").expect("static regex"),
            Regex::new(r"(?i)ref\.?\s*no\.?\s*[:\-]\s*(\S+)").expect("static regex"),
        ]
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9/_.\-]{3,}").expect("static regex"))
}

/// Derive a stable tender ID. Non-null by construction: the final tier
/// hashes the detail URL.
pub fn derive_tender_id(listing_text: &str, detail: Option<&Html>, tender_url: &str) -> String {
    // (a) explicit label on the detail page
    if let Some(doc) = detail {
        if let Some(id) = detail_by_label(doc, &["Tender ID", "Tender Id"], true) {
            let id = collapse_whitespace(&id);
            if !id.is_empty() {
                return id;
            }
        }
    }

    // (b) bracket token in the listing/title text
    if let Some(cap) = bracket_re().captures(listing_text) {
        let id = collapse_whitespace(&cap[1]);
        if !id.is_empty() {
            return id;
        }
    }

    // (c) label patterns in the title text
    for re in label_res() {
        if let Some(cap) = re.captures(listing_text) {
            let id = collapse_whitespace(&cap[1]);
            if !id.is_empty() {
                return id;
            }
        }
    }

    // (d) heuristic token scan
    if let Some(id) = scan_id_token(listing_text) {
        return id;
    }

    // (e) deterministic URL hash
    let digest = Md5::digest(tender_url.as_bytes());
    format!("URL_{}", &hex::encode(digest)[..12].to_uppercase())
}

/// Pick the most ID-like token: alphanumeric, length >= 4, containing a
/// separator, scored by (has-digit, has-alpha, has-separator) then length.
fn scan_id_token(text: &str) -> Option<String> {
    let mut best: Option<(u32, usize, String)> = None;
    for m in token_re().find_iter(text) {
        let token = m.as_str();
        if token.len() < 4 {
            continue;
        }
        let has_sep = token.contains(['/', '_', '-', '.']);
        if !has_sep {
            continue;
        }
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        if cleaned.is_empty() || ID_STOPWORDS.contains(&cleaned.as_str()) {
            continue;
        }
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
        let score = has_digit as u32 + has_alpha as u32 + has_sep as u32;
        let candidate = (score, token.len(), token.to_string());
        if best
            .as_ref()
            .map(|b| (candidate.0, candidate.1) > (b.0, b.1))
            .unwrap_or(true)
        {
            best = Some(candidate);
        }
    }
    best.map(|(_, _, t)| t)
}

/// Portal-name prefixes stripped from `<title>`-derived titles.
const TITLE_PREFIXES: &[&str] = &["eProcurement System", "e-Procurement System"];

/// Longest title accepted from the `<title>` element.
const MAX_TITLE_LEN: usize = 250;

/// Derive a display title for a tender. Trailing bracketed ref/id suffixes
/// are stripped (repeatedly, brackets may be chained); defaults to "N/A".
pub fn derive_tender_title(listing_text: &str, detail: Option<&Html>) -> String {
    let raw = detail
        .and_then(|doc| detail_by_label(doc, &["Title"], false))
        .or_else(|| {
            detail.and_then(|doc| {
                detail_by_label(
                    doc,
                    &["Title and Ref.No./Tender ID", "Title and Ref.No.", "Title"],
                    true,
                )
            })
        })
        .or_else(|| detail.and_then(document_title))
        .unwrap_or_else(|| listing_text.to_string());

    let cleaned = strip_bracket_suffixes(&raw);
    if cleaned.is_empty() {
        "N/A".to_string()
    } else {
        cleaned
    }
}

fn document_title(doc: &Html) -> Option<String> {
    let selector = scraper::Selector::parse("title").ok()?;
    let mut title = collapse_whitespace(&doc.select(&selector).next()?.text().collect::<String>());
    for prefix in TITLE_PREFIXES {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.trim_start_matches([':', '-', ' ']).to_string();
        }
    }
    if title.is_empty() {
        return None;
    }
    if title.len() > MAX_TITLE_LEN {
        let mut end = MAX_TITLE_LEN;
        while end > 0 && !title.is_char_boundary(end) {
            end -= 1;
        }
        title.truncate(end);
    }
    Some(title)
}

/// Remove trailing `[...]` suffixes, repeatedly, and collapse whitespace.
pub fn strip_bracket_suffixes(text: &str) -> String {
    let mut current = collapse_whitespace(text);
    loop {
        let trimmed = current.trim_end();
        if let (true, Some(open)) = (trimmed.ends_with(']'), trimmed.rfind('[')) {
            current = collapse_whitespace(&trimmed[..open]);
        } else {
            return collapse_whitespace(trimmed);
        }
    }
}

/// Canonicalize a tender detail URL for use as a dedup key.
///
/// Lowercases scheme and host, drops `;`-delimited session parameters from
/// path segments and query values, removes volatile query keys, sorts the
/// remaining pairs, and clears the fragment. Idempotent; returns the input
/// unchanged on parse failure.
pub fn normalize_tender_url(raw: &str) -> String {
    let mut parsed = match url::Url::parse(raw) {
        Ok(u) if u.has_host() => u,
        _ => return raw.to_string(),
    };

    // Path parameters: "/app;jsessionid=XYZ" -> "/app"
    let path = parsed.path().to_string();
    if path.contains(';') {
        let cleaned: Vec<&str> = path
            .split('/')
            .map(|seg| seg.split(';').next().unwrap_or(""))
            .collect();
        parsed.set_path(&cleaned.join("/"));
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_lowercase();
            !VOLATILE_QUERY_KEYS.contains(&key.as_str())
        })
        .map(|(k, v)| {
            // Session path parameters can also ride on query values.
            let v = v.split(';').next().unwrap_or("").to_string();
            (k.to_string(), v)
        })
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        parsed.set_query(Some(&serializer.finish()));
    }
    parsed.set_fragment(None);

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let urls = [
            "http://X/app?page=1;jsessionid=ABC&sid=1&x=2",
            "https://Etenders.Example.in/nicgep/app;jsessionid=DEAD?b=2&a=1#frag",
            "https://example.in/app?ts=123&page=Detail",
        ];
        for u in urls {
            let once = normalize_tender_url(u);
            assert_eq!(normalize_tender_url(&once), once, "not idempotent for {u}");
        }
    }

    #[test]
    fn normalize_strips_session_noise() {
        assert_eq!(
            normalize_tender_url("http://X/app?page=1;jsessionid=ABC&sid=1&x=2"),
            normalize_tender_url("http://x/app?page=1&x=2"),
        );
    }

    #[test]
    fn normalize_sorts_query_and_drops_fragment() {
        assert_eq!(
            normalize_tender_url("https://Example.in/app?b=2&a=1#top"),
            "https://example.in/app?a=1&b=2"
        );
    }

    #[test]
    fn normalize_keeps_unparsable_input() {
        assert_eq!(normalize_tender_url("not a url"), "not a url");
        assert_eq!(normalize_tender_url(""), "");
    }

    #[test]
    fn id_from_bracket_token() {
        assert_eq!(
            derive_tender_id("Road work [2024_PWD_12345_1]", None, "http://x/app?id=1"),
            "2024_PWD_12345_1"
        );
    }

    #[test]
    fn id_from_label_pattern() {
        assert_eq!(
            derive_tender_id("Tender ID: ABC/2024/99", None, "http://x"),
            "ABC/2024/99"
        );
        assert_eq!(
            derive_tender_id("Ref No: NIT-77-2024", None, "http://x"),
            "NIT-77-2024"
        );
    }

    #[test]
    fn id_from_token_scan_skips_stopwords() {
        // "Ref." cleans to the REF stopword; the real token must win.
        let id = derive_tender_id("Supply of pipes Ref. GWSSB/2024/771", None, "http://x");
        assert_eq!(id, "GWSSB/2024/771");
    }

    #[test]
    fn id_is_total_via_hash_fallback() {
        let id = derive_tender_id("no identifiers here", None, "http://x/app?id=1");
        assert!(id.starts_with("URL_"));
        assert_eq!(id.len(), 16);
        // Deterministic for the same URL.
        assert_eq!(
            id,
            derive_tender_id("different text", None, "http://x/app?id=1")
        );
        assert_ne!(id, derive_tender_id("", None, "http://x/app?id=2"));
    }

    #[test]
    fn id_from_detail_label_wins() {
        let doc = Html::parse_document(
            r#"<table><tr><td class="td_caption">Tender ID</td><td>2024_ABC_1</td></tr></table>"#,
        );
        assert_eq!(
            derive_tender_id("Road work [OTHER_9]", Some(&doc), "http://x"),
            "2024_ABC_1"
        );
    }

    #[test]
    fn title_strips_chained_brackets() {
        assert_eq!(
            strip_bracket_suffixes("Road widening work [Ref 1] [2024_PWD_1]"),
            "Road widening work"
        );
        assert_eq!(strip_bracket_suffixes("  [only brackets] "), "");
    }

    #[test]
    fn title_defaults_to_na() {
        assert_eq!(derive_tender_title("[2024_X_1]", None), "N/A");
        assert_eq!(derive_tender_title("", None), "N/A");
    }

    #[test]
    fn title_prefers_exact_detail_caption() {
        let doc = Html::parse_document(
            r#"<html><head><title>eProcurement System - fallback</title></head>
               <body><table><tr><td class="td_caption">Title</td>
               <td>Bridge construction [2024_B_2]</td></tr></table></body></html>"#,
        );
        assert_eq!(
            derive_tender_title("listing text", Some(&doc)),
            "Bridge construction"
        );
    }

    #[test]
    fn title_falls_back_to_document_title() {
        let doc = Html::parse_document(
            "<html><head><title>eProcurement System - Water supply scheme</title></head></html>",
        );
        assert_eq!(
            derive_tender_title("listing", Some(&doc)),
            "Water supply scheme"
        );
    }
}
