//! Document-level deduplicator for serialized MusicXML.
//!
//! A safety net behind the in-memory pass: within each `<measure>`, a
//! `<direction>` whose words repeat an earlier one (same trimmed text, same
//! placement) is cut out of the text. Everything else, the declaration and
//! DOCTYPE included, is kept byte for byte.

use std::collections::HashSet;
use std::ops::Range;

use roxmltree::{Document, Node, ParsingOptions};
use tracing::{debug, info, warn};

use crate::warnings::WarningLog;

/// Remove repeated `<direction>` words per measure.
///
/// On a parse failure the input is returned unchanged and a warning is
/// recorded.
pub fn dedup_xml(xml: &str, warnings: &mut WarningLog) -> String {
    match duplicate_ranges(xml) {
        Ok(ranges) if ranges.is_empty() => {
            debug!("no duplicate directions");
            xml.to_string()
        }
        Ok(ranges) => {
            info!(removed = ranges.len(), "removed duplicate directions");
            splice_out(xml, &ranges)
        }
        Err(e) => {
            warn!("document-level dedup skipped: {e}");
            warnings.push(format!("Could not deduplicate annotations in document: {e}"));
            xml.to_string()
        }
    }
}

fn duplicate_ranges(xml: &str) -> Result<Vec<Range<usize>>, roxmltree::Error> {
    let opt = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, opt)?;

    let mut ranges = Vec::new();
    for measure in doc.descendants().filter(|n| n.has_tag_name("measure")) {
        let mut seen = HashSet::new();
        for direction in measure.descendants().filter(|n| n.has_tag_name("direction")) {
            let Some(words) = direction.descendants().find(|n| n.has_tag_name("words")) else {
                continue;
            };
            let text = words.text().unwrap_or("").trim().to_string();
            let placement = direction.attribute("placement").unwrap_or("above").to_string();
            if !seen.insert((text.clone(), placement.clone())) {
                debug!(text = %text, placement = %placement, "duplicate direction");
                ranges.push(with_leading_whitespace(xml, direction));
            }
        }
    }
    ranges.sort_by_key(|r| r.start);
    Ok(ranges)
}

/// The node's byte range, widened over the indentation before it.
fn with_leading_whitespace(xml: &str, node: Node) -> Range<usize> {
    let range = node.range();
    let prefix = &xml[..range.start];
    let trimmed = prefix.trim_end_matches([' ', '\t', '\r', '\n']);
    trimmed.len()..range.end
}

fn splice_out(xml: &str, ranges: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for range in ranges {
        if range.start < cursor {
            continue;
        }
        out.push_str(&xml[cursor..range.start]);
        cursor = range.end;
    }
    out.push_str(&xml[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PREAMBLE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n<!DOCTYPE score-partwise PUBLIC \"-//Recordare//DTD MusicXML 4.0 Partwise//EN\" \"http://www.musicxml.org/dtds/partwise.dtd\">\n";

    fn direction(text: &str, placement: Option<&str>) -> String {
        let attr = placement.map(|p| format!(" placement=\"{p}\"")).unwrap_or_default();
        format!("\n      <direction{attr}><direction-type><words>{text}</words></direction-type></direction>")
    }

    fn document(measure_one: &str, measure_two: &str) -> String {
        format!(
            "{PREAMBLE}<score-partwise version=\"4.0\">\n  <part id=\"P1\">\n    <measure number=\"1\">{measure_one}\n    </measure>\n    <measure number=\"2\">{measure_two}\n    </measure>\n  </part>\n</score-partwise>"
        )
    }

    #[test]
    fn keeps_first_direction_per_signature() {
        let one = [
            direction("Swing", Some("above")),
            direction(" Swing ", None),
            direction("Swing", Some("below")),
        ]
        .concat();
        let two = direction("Swing", Some("above"));
        let mut w = WarningLog::new();
        let out = dedup_xml(&document(&one, &two), &mut w);

        let expected_one = [direction("Swing", Some("above")), direction("Swing", Some("below"))].concat();
        assert_eq!(out, document(&expected_one, &two));
        assert!(out.starts_with(PREAMBLE));
        assert!(w.is_empty());
    }

    #[test]
    fn unchanged_without_duplicates() {
        let xml = document(&direction("A", None), &direction("A", None));
        assert_eq!(dedup_xml(&xml, &mut WarningLog::new()), xml);
    }

    #[test]
    fn malformed_input_passes_through() {
        let mut w = WarningLog::new();
        let broken = "<score-partwise><measure>";
        assert_eq!(dedup_xml(broken, &mut w), broken);
        assert_eq!(w.len(), 1);
    }
}
