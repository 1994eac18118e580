//! Row-level parsing of tab-separated input tables.
//!
//! A [`TableRecord`] knows which columns it needs and how to turn one row
//! into a typed value. [`RecordReader`] streams rows through the `csv`
//! crate, resolving column positions from the header and applying the
//! configured [`MalformedPolicy`].

use std::fmt::Display;
use std::io::Read;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use std::sync::Arc;

use csv::{
    ReaderBuilder,
    StringRecord,
    Trim,
};
use itertools::Itertools;
use log::{
    debug,
    warn,
};

use crate::data_structs::MalformedPolicy;
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::compression::open_input;

/// A record that can be parsed from one row of a named-column table.
pub trait TableRecord: Sized {
    /// Resolved positions of the columns this record reads.
    type Columns: Clone + Send;

    /// Resolves column positions from a header row.
    fn resolve_columns(header: &StringRecord) -> Result<Self::Columns>;

    /// Column layout assumed for headerless input whose first row has
    /// `width` fields.
    fn default_columns(width: usize) -> Self::Columns;

    /// Parses one data row. `line` is used for error context only.
    fn parse(
        row: &StringRecord,
        columns: &Self::Columns,
        line: u64,
    ) -> Result<Self>;
}

/// Position of the first of `names` present in `header`.
pub(crate) fn find_column(
    header: &StringRecord,
    names: &[&str],
) -> Option<usize> {
    names
        .iter()
        .find_map(|name| header.iter().position(|h| h == *name))
}

/// Like [`find_column`], but a missing column is a malformed header.
pub(crate) fn require_column(
    header: &StringRecord,
    names: &[&str],
) -> Result<usize> {
    find_column(header, names).ok_or_else(|| {
        CollapseError::malformed(
            header.position().map(|p| p.line()).unwrap_or(1),
            names[0],
            format!("required column missing from header (accepted names: {})", names.iter().join(", ")),
        )
    })
}

/// Raw, non-empty value of a required field.
pub(crate) fn field<'a>(
    row: &'a StringRecord,
    idx: usize,
    name: &str,
    line: u64,
) -> Result<&'a str> {
    match row.get(idx) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(CollapseError::malformed(line, name, "empty value")),
        None => {
            Err(CollapseError::malformed(
                line,
                name,
                format!("missing column (row has {} fields)", row.len()),
            ))
        },
    }
}

pub(crate) fn parse_field<T>(
    row: &StringRecord,
    idx: usize,
    name: &str,
    line: u64,
) -> Result<T>
where
    T: FromStr,
    T::Err: Display, {
    let value = field(row, idx, name, line)?;
    value.parse::<T>().map_err(|e| {
        CollapseError::malformed(line, name, format!("cannot parse '{value}': {e}"))
    })
}

/// Parses a float field and rejects NaN and infinities.
pub(crate) fn parse_finite(
    row: &StringRecord,
    idx: usize,
    name: &str,
    line: u64,
) -> Result<f64> {
    let value: f64 = parse_field(row, idx, name, line)?;
    if value.is_finite() {
        Ok(value)
    }
    else {
        Err(CollapseError::malformed(line, name, format!("non-finite value {value}")))
    }
}

/// Parses an optional column; an absent column or empty value is `None`.
pub(crate) fn parse_optional<T>(
    row: &StringRecord,
    idx: Option<usize>,
    name: &str,
    line: u64,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display, {
    match idx {
        Some(i) if !matches!(row.get(i), None | Some("")) => {
            parse_field(row, i, name, line).map(Some)
        },
        _ => Ok(None),
    }
}

/// Converts a `csv` error into the crate error, keeping line context.
pub(crate) fn map_csv_error(
    path: &Path,
    err: csv::Error,
) -> CollapseError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.into_kind() {
        csv::ErrorKind::Io(source) => CollapseError::io_at(path, line, source),
        other => CollapseError::malformed(line, "row", format!("{other:?}")),
    }
}

/// Streams typed records out of a tab-separated table.
pub struct RecordReader<R: TableRecord> {
    reader:  csv::Reader<Box<dyn Read + Send>>,
    columns: R::Columns,
    row:     StringRecord,
    path:    PathBuf,
    policy:  MalformedPolicy,
    skipped: Arc<AtomicU64>,
    /// `row` holds a data row that was read ahead
    pending: bool,
    done:    bool,
}

impl<R: TableRecord> RecordReader<R> {
    /// Opens `path` (decompressing by extension, `-` for stdin).
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        has_header: bool,
        policy: MalformedPolicy,
    ) -> Result<Self> {
        let handle = open_input(path.as_ref())?;
        Self::from_reader(handle, path, has_header, policy)
    }

    /// Wraps an already opened stream; `path` is only used in messages.
    pub fn from_reader<P: AsRef<Path>>(
        handle: Box<dyn Read + Send>,
        path: P,
        has_header: bool,
        policy: MalformedPolicy,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(handle);

        let mut row = StringRecord::new();
        let has_row = reader
            .read_record(&mut row)
            .map_err(|e| map_csv_error(&path, e))?;
        let (columns, pending) = match (has_row, has_header) {
            (true, true) => (R::resolve_columns(&row)?, false),
            (true, false) => (R::default_columns(row.len()), true),
            (false, _) => {
                debug!("{} is empty", path.display());
                (R::default_columns(0), false)
            },
        };

        Ok(Self {
            reader,
            columns,
            row,
            path,
            policy,
            skipped: Arc::new(AtomicU64::new(0)),
            pending,
            done: false,
        })
    }

    /// Shared counter of rows dropped under [`MalformedPolicy::SkipAndWarn`].
    pub fn skipped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.skipped)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: TableRecord> Iterator for RecordReader<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.pending {
                self.pending = false;
            }
            else {
                match self.reader.read_record(&mut self.row) {
                    Ok(true) => {},
                    Ok(false) => {
                        self.done = true;
                        return None;
                    },
                    Err(e) => {
                        self.done = true;
                        return Some(Err(map_csv_error(&self.path, e)));
                    },
                }
            }
            let line = self.row.position().map(|p| p.line()).unwrap_or(0);
            match R::parse(&self.row, &self.columns, line) {
                Ok(record) => return Some(Ok(record)),
                Err(e) if self.policy == MalformedPolicy::SkipAndWarn => {
                    warn!("Skipping row: {e}");
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Two-column table used to exercise the reader in isolation.
    #[derive(Debug, PartialEq)]
    struct Pair {
        name:  String,
        value: u32,
    }

    impl TableRecord for Pair {
        type Columns = (usize, usize);

        fn resolve_columns(header: &StringRecord) -> Result<Self::Columns> {
            Ok((
                require_column(header, &["name"])?,
                require_column(header, &["value", "val"])?,
            ))
        }

        fn default_columns(_width: usize) -> Self::Columns {
            (0, 1)
        }

        fn parse(
            row: &StringRecord,
            columns: &Self::Columns,
            line: u64,
        ) -> Result<Self> {
            Ok(Pair {
                name:  field(row, columns.0, "name", line)?.to_string(),
                value: parse_field(row, columns.1, "value", line)?,
            })
        }
    }

    fn reader(
        text: &str,
        has_header: bool,
        policy: MalformedPolicy,
    ) -> RecordReader<Pair> {
        let handle: Box<dyn Read + Send> = Box::new(Cursor::new(text.to_string()));
        RecordReader::from_reader(handle, "test.tsv", has_header, policy).unwrap()
    }

    #[test]
    fn test_header_resolution_and_extra_columns() {
        let rows = reader(
            "extra\tval\tname\na\t1\tx\t\tignored\nb\t2\ty  \n",
            true,
            MalformedPolicy::Fail,
        )
        .collect::<Result<Vec<_>>>()
        .unwrap();
        assert_eq!(rows, vec![
            Pair { name: "x".into(), value: 1 },
            Pair { name: "y".into(), value: 2 },
        ]);
    }

    #[test]
    fn test_headerless() {
        let rows = reader("x\t5\ny\t6\n", false, MalformedPolicy::Fail)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(rows, vec![
            Pair { name: "x".into(), value: 5 },
            Pair { name: "y".into(), value: 6 },
        ]);
        assert!(reader("", false, MalformedPolicy::Fail).next().is_none());
    }

    #[test]
    fn test_headerless_first_row_is_checked() {
        let mut it = reader("x\tabc\ny\t6\n", false, MalformedPolicy::Fail);
        assert!(matches!(
            it.next(),
            Some(Err(CollapseError::MalformedRecord { line: 1, .. }))
        ));
    }

    #[test]
    fn test_missing_header_column() {
        let handle: Box<dyn Read + Send> = Box::new(Cursor::new("name\tother\n".to_string()));
        let err = RecordReader::<Pair>::from_reader(handle, "t", true, MalformedPolicy::Fail)
            .err()
            .unwrap();
        match err {
            CollapseError::MalformedRecord { line, field, .. } => {
                assert_eq!(line, 1);
                assert_eq!(field, "value");
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_fail_reports_line_and_field() {
        let mut it = reader("name\tvalue\nx\t1\ny\tabc\nz\t3\n", true, MalformedPolicy::Fail);
        assert!(it.next().unwrap().is_ok());
        match it.next().unwrap() {
            Err(CollapseError::MalformedRecord { line, field, reason }) => {
                assert_eq!(line, 3);
                assert_eq!(field, "value");
                assert!(reason.contains("abc"));
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(it.next().is_none());
    }

    #[test]
    fn test_missing_value_column() {
        let mut it = reader("name\tvalue\nx\n", true, MalformedPolicy::Fail);
        assert!(matches!(
            it.next(),
            Some(Err(CollapseError::MalformedRecord { line: 2, .. }))
        ));
    }

    #[test]
    fn test_skip_and_warn() {
        let it = reader(
            "name\tvalue\nx\t1\ny\t-4\nz\t3\n\t7\n",
            true,
            MalformedPolicy::SkipAndWarn,
        );
        let counter = it.skipped_counter();
        let rows = it.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_empty_input() {
        let mut it = reader("", true, MalformedPolicy::Fail);
        assert!(it.next().is_none());
    }
}
