use crate::error::{ErrorKind, Result};
use crate::models::ParsedBook;
use crate::parser::{MetadataParser, has_extension};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};

// PalmDB database header.
const PALM_TYPE: std::ops::Range<usize> = 60..68;
const PALM_RECORD_COUNT: usize = 76;
const PALM_RECORD_LIST: usize = 78;

// Offsets relative to the start of record zero.
const MOBI_HEADER: usize = 16;
const FULL_NAME_OFFSET: usize = 0x54;
const FULL_NAME_LENGTH: usize = 0x58;
const EXTH_FLAGS: usize = 0x80;
const EXTH_PRESENT: u32 = 0x40;

const EXTH_AUTHOR: u32 = 100;
const EXTH_UPDATED_TITLE: u32 = 503;

/// Reads title and authors from the EXTH header of MOBI/AZW3 files.
///
/// The title comes from EXTH record 503, falling back to the full name stored
/// in the MOBI header. Every EXTH 100 record is an author.
#[derive(Debug, Clone, Copy, Default)]
pub struct MobiParser;
impl MobiParser {
    pub const NAME: &'static str = "mobi";

    fn read(path: &Path) -> Result<Option<ParsedBook>> {
        let data = std::fs::read(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        let (title, authors) = metadata(&data)?;
        let title = title.trim();
        let authors: Vec<String> =
            authors.iter().map(|a| a.trim()).filter(|a| !a.is_empty()).map(str::to_string).collect();
        if title.is_empty() || authors.is_empty() {
            return Ok(None);
        }
        Ok(Some(ParsedBook { authors, title: title.to_string(), series: String::new() }))
    }
}
impl MetadataParser for MobiParser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parse(&self, files: &[PathBuf]) -> Option<ParsedBook> {
        files.iter().filter(|file| has_extension(file, &["mobi", "azw3"])).find_map(|file| match Self::read(file) {
            Ok(book) => book,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = ?e, "Could not read MOBI metadata");
                None
            },
        })
    }
}

fn be_u32(data: &[u8], at: usize) -> Result<u32> {
    let bytes = data.get(at..at + 4).ok_or_raise(|| ErrorKind::MalformedMobi("truncated header"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    data.get(at..at.saturating_add(len)).ok_or_raise(|| ErrorKind::MalformedMobi("record out of bounds"))
}

/// Title (EXTH 503 or full name) and the raw EXTH author records.
fn metadata(data: &[u8]) -> Result<(String, Vec<String>)> {
    if data.get(PALM_TYPE) != Some(b"BOOKMOBI".as_slice()) {
        exn::bail!(ErrorKind::MalformedMobi("not a MOBI database"));
    }
    let records = slice(data, PALM_RECORD_COUNT, 2)?;
    if u16::from_be_bytes([records[0], records[1]]) == 0 {
        exn::bail!(ErrorKind::MalformedMobi("no records"));
    }
    let record0 = be_u32(data, PALM_RECORD_LIST)? as usize;
    let mobi = record0 + MOBI_HEADER;
    if slice(data, mobi, 4)? != b"MOBI" {
        exn::bail!(ErrorKind::MalformedMobi("missing MOBI header"));
    }
    let header_length = be_u32(data, mobi + 4)? as usize;

    let name_offset = be_u32(data, record0 + FULL_NAME_OFFSET)? as usize;
    let name_length = be_u32(data, record0 + FULL_NAME_LENGTH)? as usize;
    let full_name = String::from_utf8_lossy(slice(data, record0 + name_offset, name_length)?).into_owned();

    let (mut title, mut authors) = (None, Vec::new());
    if be_u32(data, record0 + EXTH_FLAGS)? & EXTH_PRESENT != 0 {
        let exth = mobi + header_length;
        if slice(data, exth, 4)? != b"EXTH" {
            exn::bail!(ErrorKind::MalformedMobi("missing EXTH header"));
        }
        let count = be_u32(data, exth + 8)?;
        let mut at = exth + 12;
        for _ in 0..count {
            let kind = be_u32(data, at)?;
            let len = be_u32(data, at + 4)? as usize;
            if len < 8 {
                exn::bail!(ErrorKind::MalformedMobi("invalid EXTH record length"));
            }
            let value = String::from_utf8_lossy(slice(data, at + 8, len - 8)?).into_owned();
            match kind {
                EXTH_AUTHOR => authors.push(value),
                EXTH_UPDATED_TITLE if title.is_none() => title = Some(value),
                _ => {},
            }
            at += len;
        }
    }
    Ok((title.filter(|t| !t.trim().is_empty()).unwrap_or(full_name), authors))
}
