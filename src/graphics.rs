//! In-place edits of the game's XML settings files.
//!
//! The game keeps its graphics options in two XML files (Settings.xml and
//! DisplaySettings.xml). A mode switch overwrites the text content of known
//! elements in both files and leaves everything else byte-for-byte alone.
//!
//! Matching policy: for each configured key, the first element in document
//! order (equivalently: depth-first preorder) whose tag name equals the key
//! gets its content replaced. Repeated tag names are ambiguous by
//! construction; first match wins. Keys with no matching element are skipped.

use quick_xml::events::{BytesEnd, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected end of document")]
    Truncated,
}

/// Result of applying a settings map to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// File rewritten; `replaced` elements had their content overwritten.
    Applied { replaced: usize },
    /// Target file does not exist. Not an error; the game may never have
    /// written it on this machine.
    SkippedMissing,
}

/// Default locations of the two target files, under the game's options
/// directory in the local application data folder.
pub fn default_target_files() -> Vec<PathBuf> {
    let base = directories::BaseDirs::new()
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_default();

    let graphics_dir = base
        .join("Frontier Developments")
        .join("Elite Dangerous")
        .join("Options")
        .join("Graphics");

    vec![
        graphics_dir.join("Settings.xml"),
        graphics_dir.join("DisplaySettings.xml"),
    ]
}

/// Apply `settings` onto the XML file at `path`, rewriting it in place.
///
/// Idempotent: applying the same map twice produces identical bytes after the
/// first application (the first pass may expand self-closing tags).
pub fn apply_settings(
    path: &Path,
    settings: &BTreeMap<String, String>,
) -> Result<ApplyOutcome, GraphicsError> {
    if !path.exists() {
        return Ok(ApplyOutcome::SkippedMissing);
    }

    let xml = fs::read_to_string(path)?;
    let (output, replaced) = rewrite(&xml, settings)?;
    fs::write(path, output)?;

    Ok(ApplyOutcome::Applied { replaced })
}

/// Stream the document through, substituting element content on first match.
fn rewrite(
    xml: &str,
    settings: &BTreeMap<String, String>,
) -> Result<(Vec<u8>, usize), GraphicsError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    // Keys already applied; later elements with the same tag name pass through.
    let mut applied: HashSet<&str> = HashSet::new();
    let mut replaced = 0usize;

    loop {
        match reader.read_event()? {
            Event::Eof => break,

            Event::Start(e) => {
                match pending_key(settings, &applied, e.name().as_ref()) {
                    Some((key, value)) => {
                        applied.insert(key);
                        replaced += 1;

                        writer.write_event(Event::Start(e))?;
                        writer.write_event(Event::Text(BytesText::new(value)))?;
                        skip_element_content(&mut reader)?;
                        writer.write_event(Event::End(BytesEnd::new(key)))?;
                    }
                    None => writer.write_event(Event::Start(e))?,
                }
            }

            // A self-closing match gains a text child, like setting the value
            // of an empty element would.
            Event::Empty(e) => {
                match pending_key(settings, &applied, e.name().as_ref()) {
                    Some((key, value)) => {
                        applied.insert(key);
                        replaced += 1;

                        writer.write_event(Event::Start(e))?;
                        writer.write_event(Event::Text(BytesText::new(value)))?;
                        writer.write_event(Event::End(BytesEnd::new(key)))?;
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }

            event => writer.write_event(event)?,
        }
    }

    Ok((writer.into_inner().into_inner(), replaced))
}

/// Look up a not-yet-applied settings key matching this tag name.
fn pending_key<'a>(
    settings: &'a BTreeMap<String, String>,
    applied: &HashSet<&str>,
    tag: &[u8],
) -> Option<(&'a str, &'a str)> {
    let name = std::str::from_utf8(tag).ok()?;
    if applied.contains(name) {
        return None;
    }
    settings
        .get_key_value(name)
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Discard everything up to and including the end tag of the element whose
/// start tag was just consumed.
fn skip_element_content(reader: &mut Reader<&[u8]>) -> Result<(), GraphicsError> {
    let mut depth = 1usize;
    while depth > 0 {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(GraphicsError::Truncated),
            _ => {}
        }
    }
    Ok(())
}
