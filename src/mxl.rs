//! MXL file handler — reads and writes compressed MusicXML (.mxl) archives.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml  — declares the root MusicXML file path
//!   - <rootfile>.xml          — the actual MusicXML content (e.g., score.xml)
//!   - (optional) other files  — images, sounds, etc.

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::CodecError;

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String, CodecError> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| CodecError::Archive(format!("failed to open MXL archive: {e}")))?;

    let root_file_path = read_container_xml(&mut archive)?;

    let mut root_file = archive.by_name(&root_file_path).map_err(|e| {
        CodecError::Archive(format!("root file '{root_file_path}' not found in archive: {e}"))
    })?;

    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| CodecError::Archive(format!("failed to read '{root_file_path}': {e}")))?;

    Ok(xml)
}

/// Pack MusicXML text into an .mxl archive with a container manifest.
pub fn pack_mxl(xml: &str) -> Result<Vec<u8>, CodecError> {
    let archive_err = |e: &dyn std::fmt::Display| CodecError::Archive(format!("failed to write MXL: {e}"));
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer
        .start_file("META-INF/container.xml", options)
        .map_err(|e| archive_err(&e))?;
    writer
        .write_all(CONTAINER_XML.as_bytes())
        .map_err(|e| archive_err(&e))?;
    writer.start_file("score.xml", options).map_err(|e| archive_err(&e))?;
    writer.write_all(xml.as_bytes()).map_err(|e| archive_err(&e))?;

    let cursor = writer.finish().map_err(|e| archive_err(&e))?;
    Ok(cursor.into_inner())
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container>
  <rootfiles>
    <rootfile full-path="score.xml" media-type="application/vnd.recordare.musicxml+xml"/>
  </rootfiles>
</container>
"#;

/// Parse META-INF/container.xml to find the root MusicXML file path.
fn read_container_xml(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, CodecError> {
    let container_xml = {
        match archive.by_name("META-INF/container.xml") {
            Ok(mut container_file) => {
                let mut xml = String::new();
                container_file.read_to_string(&mut xml).map_err(|e| {
                    CodecError::Archive(format!("failed to read container.xml: {e}"))
                })?;
                Some(xml)
            }
            Err(_) => None,
        }
    }; // mutable borrow of archive is released here

    if let Some(xml) = container_xml {
        let doc = roxmltree::Document::parse(&xml)?;

        for node in doc.descendants() {
            if node.tag_name().name() == "rootfile" {
                if let Some(path) = node.attribute("full-path") {
                    return Ok(path.to_string());
                }
            }
        }

        return Err(CodecError::Archive(
            "no rootfile found in container.xml".to_string(),
        ));
    }

    // Fallback: look for common MusicXML filenames in the archive
    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .collect();

    names
        .iter()
        .find(|name| {
            !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        })
        .cloned()
        .ok_or_else(|| {
            CodecError::Archive(format!("no MusicXML file found in archive, files: {names:?}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_archive_reads_back() {
        let xml = "<?xml version=\"1.0\"?><score-partwise/>";
        let packed = pack_mxl(xml).unwrap();
        assert_eq!(extract_musicxml_from_mxl(&packed).unwrap(), xml);
    }

    #[test]
    fn garbage_is_an_archive_error() {
        assert!(matches!(
            extract_musicxml_from_mxl(b"not a zip"),
            Err(CodecError::Archive(_))
        ));
    }
}
