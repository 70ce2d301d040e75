//! Label-based field extraction from tender detail pages.
//!
//! Detail pages lay fields out as label/value cell pairs, but the markup is
//! inconsistent across portal skins. Each tier is a pure lookup evaluated in
//! order; the first hit wins:
//!
//! 1. exact match on caption-styled cells, value = following sibling cell
//! 2. exact match on bold/strong label nodes, climbing to the enclosing cell
//! 3. substring match on caption-styled cells (when `allow_contains`)
//! 4. substring match on any cell (when `allow_contains`)
//!
//! Some fields (e.g. "Tender Category") must be looked up with
//! `allow_contains = false`: partial label matches produce false positives
//! for them. That strictness is a per-field policy, not a default.

use scraper::{ElementRef, Html, Selector};

use super::collapse_whitespace;

/// Normalize a label for comparison: colons stripped, whitespace collapsed,
/// lowercased.
pub fn normalize_label(label: &str) -> String {
    collapse_whitespace(&label.replace(':', "")).to_lowercase()
}

/// Resolve a human-readable field from a detail document.
///
/// `labels` are variants tried per tier (e.g. `["Tender Value", "Value"]`).
/// Returns None when no tier matches or the matched value is empty.
pub fn detail_by_label(doc: &Html, labels: &[&str], allow_contains: bool) -> Option<String> {
    let wanted: Vec<String> = labels.iter().map(|l| normalize_label(l)).collect();

    let cell_sel = Selector::parse("td, th").expect("static selector");
    let bold_sel = Selector::parse("b, strong").expect("static selector");

    // Tier 1: exact match on caption-styled cells.
    for cell in doc.select(&cell_sel).filter(|c| is_caption_cell(*c)) {
        let label = normalize_label(&cell_text(cell));
        if wanted.iter().any(|w| *w == label) {
            if let Some(value) = sibling_value(cell) {
                return Some(value);
            }
        }
    }

    // Tier 2: exact match on bold/strong label nodes, climbing to the cell.
    for bold in doc.select(&bold_sel) {
        let label = normalize_label(&cell_text(bold));
        if wanted.iter().any(|w| *w == label) {
            if let Some(cell) = enclosing_cell(bold) {
                if let Some(value) = sibling_value(cell) {
                    return Some(value);
                }
            }
        }
    }

    if !allow_contains {
        return None;
    }

    // Tier 3: substring match on caption-styled cells.
    for cell in doc.select(&cell_sel).filter(|c| is_caption_cell(*c)) {
        let label = normalize_label(&cell_text(cell));
        if !label.is_empty() && wanted.iter().any(|w| label.contains(w.as_str())) {
            if let Some(value) = sibling_value(cell) {
                return Some(value);
            }
        }
    }

    // Tier 4: substring match on any cell.
    for cell in doc.select(&cell_sel) {
        let label = normalize_label(&cell_text(cell));
        if !label.is_empty() && wanted.iter().any(|w| label.contains(w.as_str())) {
            if let Some(value) = sibling_value(cell) {
                return Some(value);
            }
        }
    }

    None
}

/// Collapsed text content of an element.
pub fn cell_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn is_caption_cell(cell: ElementRef<'_>) -> bool {
    cell.value()
        .attr("class")
        .map(|c| c.to_lowercase().contains("caption"))
        .unwrap_or(false)
}

/// Text of the next sibling cell, if non-empty.
fn sibling_value(cell: ElementRef<'_>) -> Option<String> {
    let mut node = cell.next_sibling();
    while let Some(n) = node {
        if let Some(el) = ElementRef::wrap(n) {
            let name = el.value().name();
            if name == "td" || name == "th" {
                let value = cell_text(el);
                if value.is_empty() {
                    return None;
                }
                return Some(value);
            }
        }
        node = n.next_sibling();
    }
    None
}

/// Nearest td/th ancestor of a node.
fn enclosing_cell(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.ancestors().find_map(|n| {
        ElementRef::wrap(n).filter(|e| {
            let name = e.value().name();
            name == "td" || name == "th"
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn normalizes_labels() {
        assert_eq!(normalize_label("Tender Value :"), "tender value");
        assert_eq!(normalize_label("  EMD\n Amount"), "emd amount");
    }

    #[test]
    fn exact_caption_cell_wins() {
        let d = doc(
            r#"<table>
                <tr><td class="td_caption">Tender Value</td><td>12,50,000</td></tr>
               </table>"#,
        );
        assert_eq!(
            detail_by_label(&d, &["Tender Value"], true),
            Some("12,50,000".to_string())
        );
    }

    #[test]
    fn bold_label_climbs_to_cell() {
        let d = doc(
            r#"<table>
                <tr><td><b>EMD :</b></td><td>25,000</td></tr>
               </table>"#,
        );
        assert_eq!(
            detail_by_label(&d, &["EMD"], true),
            Some("25,000".to_string())
        );
    }

    #[test]
    fn contains_tier_matches_longer_label() {
        let d = doc(
            r#"<table>
                <tr><td class="caption">Tender Value in Rs.</td><td>99</td></tr>
               </table>"#,
        );
        assert_eq!(
            detail_by_label(&d, &["Tender Value"], true),
            Some("99".to_string())
        );
        // Strict lookup must not take the substring match.
        assert_eq!(detail_by_label(&d, &["Tender Value"], false), None);
    }

    #[test]
    fn any_cell_contains_is_last_resort() {
        let d = doc(
            r#"<table>
                <tr><td>Location of Work</td><td>Pune</td></tr>
               </table>"#,
        );
        assert_eq!(
            detail_by_label(&d, &["Location"], true),
            Some("Pune".to_string())
        );
    }

    #[test]
    fn empty_value_is_none() {
        let d = doc(
            r#"<table>
                <tr><td class="td_caption">Tender Value</td><td>   </td></tr>
               </table>"#,
        );
        assert_eq!(detail_by_label(&d, &["Tender Value"], true), None);
    }

    #[test]
    fn missing_label_is_none() {
        let d = doc("<table><tr><td>Nothing here</td></tr></table>");
        assert_eq!(detail_by_label(&d, &["Tender Value"], true), None);
    }
}
