//! Append-only semicolon-delimited record store with id-based dedup.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::mem::take;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use seap_core::MatchedNotice;

pub const CRATE_NAME: &str = "seap-store";

pub const SEPARATOR: char = ';';

/// Column holding the dedup key.
pub const ID_COLUMN: &str = "publicNoticeNo";

pub const HEADER: &[&str] = &[
    "publicNoticeNo",
    "publicationDate",
    "contractingAuthorityName",
    "cpvCode",
    "directAcquisitionName",
    "closingValue",
    "sysAcquisitionContractType",
    "matchedKeyword",
    "link",
];

#[derive(Debug, Error)]
#[error("writing {}: {source}", path.display())]
pub struct StoreError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

/// Minimal quote-aware delimited parser (CRLF tolerant).
pub fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next(); // doubled-quote escape
                    cell.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == sep && !in_quotes => row.push(take(&mut cell)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut cell));
                if row.len() > 1 || !row[0].is_empty() {
                    rows.push(take(&mut row));
                } else {
                    row.clear(); // blank line
                }
            }
            _ => cell.push(ch),
        }
    }

    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}

/// Write one delimited row, quoting cells that embed the separator,
/// quotes or line breaks.
pub fn write_row<W: Write>(mut w: W, cells: &[String], sep: char) -> io::Result<()> {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            write!(w, "{sep}")?;
        }
        let needs_quotes =
            cell.contains(sep) || cell.contains('"') || cell.contains('\n') || cell.contains('\r');
        if needs_quotes {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    link_base: String,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, link_base: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            link_base: link_base.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All identifiers already persisted in the table. A missing file
    /// means an empty set; an unreadable or header-less file is logged
    /// as a warning and likewise yields an empty set, so the run
    /// proceeds (at the documented risk of duplicate rows).
    pub fn load_existing_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        if !self.path.exists() {
            return ids;
        }
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "could not read existing table, treating as empty");
                return ids;
            }
        };
        let mut rows = parse_rows(&text, SEPARATOR).into_iter();
        let Some(header) = rows.next() else {
            return ids;
        };
        let Some(id_column) = header.iter().position(|name| name == ID_COLUMN) else {
            warn!(path = %self.path.display(), "table header lacks the id column, treating as empty");
            return ids;
        };
        for row in rows {
            if let Some(id) = row.get(id_column) {
                if !id.is_empty() {
                    ids.insert(id.clone());
                }
            }
        }
        info!(count = ids.len(), path = %self.path.display(), "loaded existing record identifiers");
        ids
    }

    /// Append every notice whose identifier is not yet in
    /// `existing_ids`, writing the header only when the table is being
    /// created. Newly written ids enter the set immediately, so
    /// repeats later in the same batch are skipped too. Returns the
    /// number of rows actually written.
    pub fn append(
        &self,
        notices: &[MatchedNotice],
        existing_ids: &mut HashSet<String>,
    ) -> Result<usize, StoreError> {
        let fresh = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;

        if fresh {
            let header: Vec<String> = HEADER.iter().map(|c| c.to_string()).collect();
            write_row(&mut file, &header, SEPARATOR).map_err(|source| self.io_error(source))?;
        }

        let mut written = 0usize;
        for matched in notices {
            let id = &matched.notice.public_notice_no;
            if existing_ids.contains(id) {
                debug!(%id, "duplicate record skipped");
                continue;
            }
            write_row(&mut file, &self.project_row(matched), SEPARATOR)
                .map_err(|source| self.io_error(source))?;
            existing_ids.insert(id.clone());
            written += 1;
        }

        info!(written, path = %self.path.display(), "saved new records");
        Ok(written)
    }

    fn project_row(&self, matched: &MatchedNotice) -> Vec<String> {
        let n = &matched.notice;
        vec![
            n.public_notice_no.clone(),
            n.publication_date.clone(),
            n.contracting_authority_name.clone().unwrap_or_default(),
            n.cpv_code.clone().unwrap_or_default(),
            n.direct_acquisition_name.clone(),
            n.closing_value.map(|v| v.to_string()).unwrap_or_default(),
            n.sys_acquisition_contract_type
                .as_ref()
                .map(|t| t.text.clone())
                .unwrap_or_default(),
            matched.matched_keyword.clone(),
            n.detail_link(&self.link_base),
        ]
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError {
            path: self.path.clone(),
            source,
        }
    }
}
