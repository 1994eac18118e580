use std::fs::File;
use std::io::{
    self,
    BufWriter,
    Write,
};
use std::marker::PhantomData;
use std::path::{
    Path,
    PathBuf,
};

use csv::{
    QuoteStyle,
    WriterBuilder,
};
use log::debug;
use serde::Serialize;

use crate::error::{
    CollapseError,
    Result,
};
use crate::io::compression::{
    create_output,
    Compression,
    Encoder,
};
use crate::io::index::{
    IndexColumns,
    IndexEntry,
    OutputIndex,
};

/// A summary row with a fixed column order.
pub trait SummaryRecord: Serialize {
    /// Column names, in the order `Serialize` emits the fields.
    fn header() -> &'static [&'static str];
}

/// Per-partition statistics gathered while a partition is being written,
/// reported as one row of the output index.
pub trait PartitionStats<S>: IndexColumns + Default + Send {
    fn update(
        &mut self,
        summary: &S,
    );
}

/// Receiver of collapsed summaries.
pub trait SummarySink<S> {
    fn emit(
        &mut self,
        summary: S,
    ) -> Result<()>;

    /// Called after the last summary of a partition was emitted.
    fn end_partition(&mut self) -> Result<()>;
}

impl<S> SummarySink<S> for Vec<S> {
    fn emit(
        &mut self,
        summary: S,
    ) -> Result<()> {
        self.push(summary);
        Ok(())
    }

    fn end_partition(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counts bytes written through it (before any compression below it).
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// What is left once a [`SummaryWriter`] has been finished.
pub struct FinishedOutput<W, P> {
    pub inner: W,
    pub rows:  u64,
    /// Uncompressed bytes written, header included.
    pub bytes: u64,
    pub index: Option<OutputIndex<P>>,
}

/// Tab-separated summary writer that tracks partition byte ranges.
///
/// Offsets and lengths are measured in the uncompressed stream; with
/// compression enabled they describe the decompressed output.
pub struct SummaryWriter<S, P, W: Write> {
    writer:          csv::Writer<CountingWriter<Encoder<W>>>,
    path:            PathBuf,
    index:           Option<OutputIndex<P>>,
    current:         P,
    current_rows:    u64,
    partition_start: u64,
    rows:            u64,
    _summary:        PhantomData<fn(S)>,
}

impl<S, P> SummaryWriter<S, P, BufWriter<File>>
where
    S: SummaryRecord,
    P: PartitionStats<S>,
{
    pub fn create<Q: AsRef<Path>>(
        path: Q,
        compression: Compression,
        compression_level: u32,
        header: &[&str],
        with_index: bool,
    ) -> Result<Self> {
        let sink = create_output(path.as_ref(), compression, compression_level)?;
        debug!(
            "Writing {} with {} compression",
            path.as_ref().display(),
            compression.name()
        );
        Self::with_header(sink, path, header, with_index)
    }
}

impl<S, P, W> SummaryWriter<S, P, W>
where
    S: SummaryRecord,
    P: PartitionStats<S>,
    W: Write,
{
    /// Wraps `sink` and writes the header row. `path` is used in messages.
    pub fn new<Q: AsRef<Path>>(
        sink: Encoder<W>,
        path: Q,
        with_index: bool,
    ) -> Result<Self> {
        Self::with_header(sink, path, S::header(), with_index)
    }

    /// Like [`SummaryWriter::new`] with an explicit header; rows must have
    /// as many fields.
    pub fn with_header<Q: AsRef<Path>>(
        sink: Encoder<W>,
        path: Q,
        header: &[&str],
        with_index: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(QuoteStyle::Never)
            .from_writer(CountingWriter::new(sink));
        writer
            .write_record(header)
            .map_err(|e| csv_write_error(&path, 0, e))?;
        writer.flush().map_err(|e| CollapseError::io(&path, e))?;
        let partition_start = writer.get_ref().count();

        Ok(Self {
            writer,
            path,
            index: with_index.then(OutputIndex::new),
            current: P::default(),
            current_rows: 0,
            partition_start,
            rows: 0,
            _summary: PhantomData,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes, closes the encoder and hands back the index.
    pub fn finish(mut self) -> Result<FinishedOutput<W, P>> {
        self.end_partition()?;
        self.writer
            .flush()
            .map_err(|e| CollapseError::io(&self.path, e))?;
        let bytes = self.writer.get_ref().count();
        let counting = self.writer.into_inner().map_err(|e| {
            CollapseError::io_at(
                &self.path,
                bytes,
                io::Error::new(e.error().kind(), e.error().to_string()),
            )
        })?;
        let inner = counting
            .into_inner()
            .finish()
            .map_err(|e| CollapseError::io_at(&self.path, bytes, e))?;

        Ok(FinishedOutput {
            inner,
            rows: self.rows,
            bytes,
            index: self.index,
        })
    }
}

impl<S, P, W> SummarySink<S> for SummaryWriter<S, P, W>
where
    S: SummaryRecord,
    P: PartitionStats<S>,
    W: Write,
{
    fn emit(
        &mut self,
        summary: S,
    ) -> Result<()> {
        if self.index.is_some() {
            self.current.update(&summary);
        }
        let offset = self.writer.get_ref().count();
        self.writer
            .serialize(&summary)
            .map_err(|e| csv_write_error(&self.path, offset, e))?;
        self.current_rows += 1;
        self.rows += 1;
        Ok(())
    }

    fn end_partition(&mut self) -> Result<()> {
        if self.current_rows == 0 {
            return Ok(());
        }
        self.writer
            .flush()
            .map_err(|e| CollapseError::io_at(&self.path, self.partition_start, e))?;
        let end = self.writer.get_ref().count();
        let stats = std::mem::take(&mut self.current);
        if let Some(index) = self.index.as_mut() {
            index.push(IndexEntry {
                stats,
                offset: self.partition_start,
                length: end - self.partition_start,
            });
        }
        self.partition_start = end;
        self.current_rows = 0;
        Ok(())
    }
}

fn csv_write_error(
    path: &Path,
    offset: u64,
    err: csv::Error,
) -> CollapseError {
    match err.into_kind() {
        csv::ErrorKind::Io(source) => CollapseError::io_at(path, offset, source),
        other => CollapseError::Internal(format!("cannot serialize summary: {other:?}")),
    }
}
