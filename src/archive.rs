// 📦 Archive paths - `{year}/{slug}/{start}--{end}-{slug}.{ext}`
// Where an imported file or statement belongs in the archive tree. Copying
// files there is left to the caller; the ledger records the path.

use crate::error::{LedgerError, Result};
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePath {
    pub year: i32,
    pub slug: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Without the dot; None for extension-less statement stems
    pub extension: Option<String>,
}

/// Last `:` segment of an account full name
pub fn slug_for(full_name: &str) -> &str {
    full_name.rsplit(':').next().unwrap_or(full_name)
}

impl ArchivePath {
    /// Path for a file covering `[start, end]` of an account, filed under the start year
    pub fn for_account(full_name: &str, start: NaiveDate, end: NaiveDate, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        ArchivePath {
            year: start.year(),
            slug: slug_for(full_name).to_string(),
            start,
            end,
            extension: (!extension.is_empty()).then(|| extension.to_string()),
        }
    }

    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| LedgerError::InvalidPath(format!("{}: {}", path, reason));

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let [.., year, slug, filename] = parts.as_slice() else {
            return Err(invalid("expected year/slug/filename"));
        };

        if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("year must be four digits"));
        }
        let year: i32 = year.parse().map_err(|_| invalid("year must be four digits"))?;

        // {start}--{end}-{slug}[.{ext}]
        let (start, rest) = filename
            .split_once("--")
            .ok_or_else(|| invalid("missing '--' between dates"))?;
        let (end, tail) = rest
            .get(..10)
            .zip(rest.get(10..))
            .ok_or_else(|| invalid("missing end date"))?;
        let tail = tail
            .strip_prefix('-')
            .ok_or_else(|| invalid("missing '-' before slug"))?;

        let parse_date = |s: &str| {
            NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| invalid(&format!("bad date '{}': {}", s, e)))
        };
        let start = parse_date(start)?;
        let end = parse_date(end)?;

        let extension = match tail.strip_prefix(*slug) {
            Some("") => None,
            Some(ext) => match ext.strip_prefix('.') {
                Some(ext) if !ext.is_empty() => Some(ext.to_string()),
                _ => return Err(invalid("slug mismatch")),
            },
            None => return Err(invalid("slug mismatch")),
        };

        Ok(ArchivePath {
            year,
            slug: slug.to_string(),
            start,
            end,
            extension,
        })
    }

    /// Absolute location under an archive root
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.to_string())
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{}/{}--{}-{}",
            self.year,
            self.slug,
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT),
            self.slug
        )?;
        if let Some(ext) = &self.extension {
            write!(f, ".{}", ext)?;
        }
        Ok(())
    }
}

impl FromStr for ArchivePath {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        ArchivePath::parse(s)
    }
}
