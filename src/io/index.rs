//! Byte-range index of a summary table, one row per partition
//! (per read for collapsed events, per contig for site frequencies).
//!
//! The index is written once, after the output has been closed, because
//! offsets are only known when every partition has been flushed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{
    BufWriter,
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::path::Path;

use csv::{
    QuoteStyle,
    ReaderBuilder,
    WriterBuilder,
};

use crate::error::{
    CollapseError,
    Result,
};
use crate::io::table::map_csv_error;

pub const OFFSET_COLUMN: &str = "offset";
pub const LENGTH_COLUMN: &str = "length";

/// Descriptive columns of one index row, written before offset/length.
pub trait IndexColumns {
    fn header() -> &'static [&'static str];
    fn fields(&self) -> Vec<String>;
}

/// Partition statistics plus the byte range its rows occupy.
#[derive(Debug, Clone)]
pub struct IndexEntry<P> {
    pub stats:  P,
    /// Offset of the first row of the partition
    pub offset: u64,
    /// Length in bytes of all rows of the partition
    pub length: u64,
}

#[derive(Debug, Clone)]
pub struct OutputIndex<P> {
    entries: Vec<IndexEntry<P>>,
}

impl<P> Default for OutputIndex<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> OutputIndex<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        entry: IndexEntry<P>,
    ) {
        self.entries.push(entry)
    }

    pub fn entries(&self) -> &[IndexEntry<P>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: IndexColumns> OutputIndex<P> {
    pub fn write<W: Write>(
        &self,
        sink: W,
    ) -> csv::Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .from_writer(sink);

        let mut header = P::header().to_vec();
        header.extend([OFFSET_COLUMN, LENGTH_COLUMN]);
        writer.write_record(&header)?;

        for entry in self.entries.iter() {
            let mut fields = entry.stats.fields();
            fields.push(entry.offset.to_string());
            fields.push(entry.length.to_string());
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_path<Q: AsRef<Path>>(
        &self,
        path: Q,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| CollapseError::io(path, e))?;
        self.write(BufWriter::new(file))
            .map_err(|e| map_csv_error(path, e))
    }
}

/// One row read back from an index file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub columns: BTreeMap<String, String>,
    pub offset:  u64,
    pub length:  u64,
}

impl IndexRecord {
    pub fn get(
        &self,
        column: &str,
    ) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }
}

/// Reads an index file written by [`OutputIndex::write_path`].
pub fn read_index<Q: AsRef<Path>>(path: Q) -> Result<Vec<IndexRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .from_reader(file);
    let header = reader
        .headers()
        .map_err(|e| map_csv_error(path, e))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| map_csv_error(path, e))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let mut columns = BTreeMap::new();
        let mut offset = None;
        let mut length = None;
        for (name, value) in header.iter().zip(row.iter()) {
            match name {
                OFFSET_COLUMN => offset = value.parse::<u64>().ok(),
                LENGTH_COLUMN => length = value.parse::<u64>().ok(),
                _ => {
                    columns.insert(name.to_string(), value.to_string());
                },
            }
        }
        records.push(IndexRecord {
            columns,
            offset: offset
                .ok_or_else(|| CollapseError::malformed(line, OFFSET_COLUMN, "missing or invalid"))?,
            length: length
                .ok_or_else(|| CollapseError::malformed(line, LENGTH_COLUMN, "missing or invalid"))?,
        });
    }
    Ok(records)
}

/// Reads the rows of one partition from an uncompressed output table.
pub fn read_partition<Q: AsRef<Path>>(
    output: Q,
    record: &IndexRecord,
) -> Result<String> {
    let path = output.as_ref();
    let mut file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
    file.seek(SeekFrom::Start(record.offset))
        .map_err(|e| CollapseError::io_at(path, record.offset, e))?;
    let mut text = String::with_capacity(record.length as usize);
    file.take(record.length)
        .read_to_string(&mut text)
        .map_err(|e| CollapseError::io_at(path, record.offset, e))?;
    Ok(text)
}
