use crate::error::{ErrorKind, Result};
use crate::models::ParsedBook;
use crate::parser::{MetadataParser, has_extension};
use exn::{OptionExt, ResultExt};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Reads the Dublin Core title and creators from an EPUB's package document.
///
/// Only `.epub` candidates are considered. A file is recognised when it has
/// a non-empty title and at least one non-empty creator.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser;
impl EpubParser {
    pub const NAME: &'static str = "epub";

    fn read(path: &Path) -> Result<Option<ParsedBook>> {
        let file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        let mut archive = ZipArchive::new(file).or_raise(|| ErrorKind::MalformedEpub("not a zip archive"))?;
        let container = read_entry(&mut archive, "META-INF/container.xml")?;
        let package = rootfile(&container)?.ok_or_raise(|| ErrorKind::MalformedEpub("container lists no rootfile"))?;
        let (title, authors) = metadata(&read_entry(&mut archive, &package)?)?;
        Ok(title.filter(|_| !authors.is_empty()).map(|title| ParsedBook { authors, title, series: String::new() }))
    }
}
impl MetadataParser for EpubParser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parse(&self, files: &[PathBuf]) -> Option<ParsedBook> {
        files.iter().filter(|file| has_extension(file, &["epub"])).find_map(|file| match Self::read(file) {
            Ok(book) => book,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = ?e, "Could not read EPUB metadata");
                None
            },
        })
    }
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name).or_raise(|| ErrorKind::MalformedEpub("missing archive entry"))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).or_raise(|| ErrorKind::MalformedEpub("unreadable archive entry"))?;
    Ok(xml)
}

/// Path of the package document, from `META-INF/container.xml`.
fn rootfile(xml: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().or_raise(|| ErrorKind::MalformedEpub("invalid container.xml"))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                let path = e
                    .attributes()
                    .flatten()
                    .find(|attr| attr.key.as_ref() == b"full-path")
                    .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());
                if path.is_some() {
                    return Ok(path);
                }
            },
            Event::Eof => return Ok(None),
            _ => {},
        }
    }
}

/// First `dc:title` and every `dc:creator` in the package document.
fn metadata(xml: &str) -> Result<(Option<String>, Vec<String>)> {
    enum Field {
        Title,
        Creator,
    }
    let mut reader = Reader::from_str(xml);
    let (mut title, mut creators) = (None, Vec::new());
    let mut current = None;
    let mut text = String::new();
    loop {
        match reader.read_event().or_raise(|| ErrorKind::MalformedEpub("invalid package document"))? {
            Event::Start(e) => {
                current = match e.local_name().as_ref() {
                    b"title" => Some(Field::Title),
                    b"creator" => Some(Field::Creator),
                    _ => None,
                };
                text.clear();
            },
            Event::Text(t) if current.is_some() => {
                text.push_str(&t.unescape().or_raise(|| ErrorKind::MalformedEpub("invalid text"))?);
            },
            Event::CData(t) if current.is_some() => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(_) => {
                let value = text.trim();
                match current.take() {
                    Some(Field::Title) if title.is_none() && !value.is_empty() => title = Some(value.to_string()),
                    Some(Field::Creator) if !value.is_empty() => creators.push(value.to_string()),
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok((title, creators))
}
