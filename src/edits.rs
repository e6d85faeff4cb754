//! Position edits made in a renderer, written back into MusicXML.
//!
//! An edit id names an annotation the way a renderer shows it ("Swing-0");
//! every `<direction>` whose words occur in the id gets the edit's
//! `default-x`/`default-y`, in tenths.

use std::collections::BTreeMap;
use std::ops::Range;

use roxmltree::{Document, Node, ParsingOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CodecError;
use crate::writer::{escape, format_number, DOCTYPE};

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// New position of one annotation, in tenths. A missing axis is left as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionEdit {
    pub x_tenths: Option<f64>,
    pub y_tenths: Option<f64>,
}

/// Apply `edits` to the directions of `xml`.
///
/// The first edit (in id order) whose id contains a direction's words wins
/// for that direction. The result is the root element behind a fresh
/// declaration and DOCTYPE.
pub fn apply_position_edits(
    xml: &str,
    edits: &BTreeMap<String, PositionEdit>,
) -> Result<String, CodecError> {
    let opt = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, opt)?;
    let root = doc.root_element();

    let mut patches: Vec<(Range<usize>, String)> = Vec::new();
    for direction in root.descendants().filter(|n| n.has_tag_name("direction")) {
        let Some(words) = direction.descendants().find(|n| n.has_tag_name("words")) else {
            continue;
        };
        let text = words.text().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let Some((id, edit)) = edits.iter().find(|(id, _)| id.contains(text)) else {
            continue;
        };
        let Some(range) = start_tag_range(direction) else {
            continue;
        };
        info!(%id, text, x = ?edit.x_tenths, y = ?edit.y_tenths, "moving direction");
        patches.push((range, start_tag(direction, edit)));
    }
    debug!(patched = patches.len(), "position edits");

    let body = root.range();
    let mut out = String::with_capacity(xml.len() + 160);
    out.push_str(DECLARATION);
    out.push('\n');
    out.push_str(DOCTYPE);
    out.push('\n');

    let mut cursor = body.start;
    for (range, tag) in patches {
        out.push_str(&xml[cursor..range.start]);
        out.push_str(&tag);
        cursor = range.end;
    }
    out.push_str(&xml[cursor..body.end]);
    Ok(out)
}

/// Bytes of a node's start tag: from its `<` up to where its first child
/// begins. `None` for an empty element.
fn start_tag_range(node: Node) -> Option<Range<usize>> {
    let start = node.range().start;
    let end = node.first_child()?.range().start;
    Some(start..end)
}

fn start_tag(node: Node, edit: &PositionEdit) -> String {
    let mut tag = format!("<{}", node.tag_name().name());
    for attr in node.attributes() {
        let replaced = match attr.name() {
            "default-x" => edit.x_tenths.is_some(),
            "default-y" => edit.y_tenths.is_some(),
            _ => false,
        };
        if !replaced {
            tag.push_str(&format!(r#" {}="{}""#, attr.name(), escape(attr.value())));
        }
    }
    if let Some(x) = edit.x_tenths {
        tag.push_str(&format!(r#" default-x="{}""#, format_number(x)));
    }
    if let Some(y) = edit.y_tenths {
        tag.push_str(&format!(r#" default-y="{}""#, format_number(y)));
    }
    tag.push('>');
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCORE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<score-partwise version="4.0">
  <part id="P1">
    <measure number="1">
      <direction placement="above">
        <direction-type><words>Swing</words></direction-type>
      </direction>
      <direction placement="below" default-y="-40">
        <direction-type><words>rit.</words></direction-type>
      </direction>
    </measure>
  </part>
</score-partwise>"#;

    fn edit(x: Option<f64>, y: Option<f64>) -> PositionEdit {
        PositionEdit {
            x_tenths: x,
            y_tenths: y,
        }
    }

    #[test]
    fn moves_matching_directions() {
        let mut edits = BTreeMap::new();
        edits.insert("Swing-0".to_string(), edit(Some(12.5), Some(30.0)));
        let out = apply_position_edits(SCORE, &edits).unwrap();
        assert!(out.contains(r#"<direction placement="above" default-x="12.5" default-y="30">"#));
        assert!(out.contains(r#"<direction placement="below" default-y="-40">"#));
    }

    #[test]
    fn missing_axis_keeps_existing_value() {
        let mut edits = BTreeMap::new();
        edits.insert("rit.-0".to_string(), edit(Some(-5.0), None));
        let out = apply_position_edits(SCORE, &edits).unwrap();
        assert!(out.contains(r#"<direction placement="below" default-y="-40" default-x="-5">"#));
    }

    #[test]
    fn output_has_fresh_preamble() {
        let out = apply_position_edits(SCORE, &BTreeMap::new()).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(DECLARATION));
        assert_eq!(lines.next(), Some(DOCTYPE));
        assert_eq!(lines.next(), Some(r#"<score-partwise version="4.0">"#));
        assert!(out.ends_with("</score-partwise>"));
    }

    #[test]
    fn broken_documents_are_errors() {
        assert!(apply_position_edits("<score-partwise>", &BTreeMap::new()).is_err());
    }
}
