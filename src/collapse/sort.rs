//! External merge sort used by [`SortMode::SortFirst`].
//!
//! Records are buffered in chunks of `buffer` records, each chunk is sorted
//! in parallel and spilled to an anonymous temporary file with `bincode`.
//! The sorted runs are then merged lazily through a binary heap. Ties on
//! the sort key keep input order, so the sort is stable.
//!
//! [`SortMode::SortFirst`]: crate::data_structs::SortMode::SortFirst

use std::cmp::{
    Ordering,
    Reverse,
};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
    Seek,
    SeekFrom,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};

use log::debug;
use rayon::slice::ParallelSliceMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{
    CollapseError,
    Result,
};

const MERGE_BUFFER_SIZE: usize = 1 << 16;

pub struct ExternalSorter {
    buffer:   usize,
    temp_dir: Option<PathBuf>,
}

impl ExternalSorter {
    /// `buffer` is the number of records held in memory per sorted run.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer:   buffer.max(1),
            temp_dir: None,
        }
    }

    pub fn temp_dir(
        mut self,
        path: Option<PathBuf>,
    ) -> Self {
        self.temp_dir = path;
        self
    }

    /// Consumes `records` and returns them ordered by `key_fn`.
    ///
    /// The first error produced by `records` aborts the sort and is
    /// returned as is.
    pub fn sort<R, K, F, I>(
        &self,
        records: I,
        key_fn: F,
    ) -> Result<SortedRecords<R, K, F>>
    where
        I: IntoIterator<Item = Result<R>>,
        R: Serialize + DeserializeOwned + Send,
        K: Ord + Send,
        F: Fn(&R) -> K, {
        let mut runs = Vec::new();
        let mut chunk: Vec<(K, u64, R)> = Vec::with_capacity(self.buffer.min(1 << 20));

        for (seq, record) in records.into_iter().enumerate() {
            let record = record?;
            chunk.push((key_fn(&record), seq as u64, record));
            if chunk.len() >= self.buffer {
                runs.push(self.spill(&mut chunk)?);
            }
        }

        if runs.is_empty() {
            sort_chunk(&mut chunk);
            debug!("Sorted {} records in memory", chunk.len());
            return Ok(SortedRecords {
                source: Source::Memory(chunk.into_iter()),
            });
        }
        if !chunk.is_empty() {
            runs.push(self.spill(&mut chunk)?);
        }
        debug!("Merging {} sorted runs", runs.len());

        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (idx, run) in runs.iter_mut().enumerate() {
            if let Some((seq, record)) = run.next::<R>()? {
                heap.push(Reverse(HeapEntry {
                    key: key_fn(&record),
                    seq,
                    record,
                    run: idx,
                }));
            }
        }
        Ok(SortedRecords {
            source: Source::Merge {
                runs,
                heap,
                key_fn,
                failed: false,
            },
        })
    }

    fn spill<K: Ord + Send, R: Serialize + Send>(
        &self,
        chunk: &mut Vec<(K, u64, R)>,
    ) -> Result<Run> {
        sort_chunk(chunk);
        let path = self.spill_path();
        let file = match &self.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|e| CollapseError::io(&path, e))?;

        let mut writer = BufWriter::new(file);
        for (_, seq, record) in chunk.iter() {
            bincode::serialize_into(&mut writer, &(seq, record))
                .map_err(|e| spill_error(&path, e))?;
        }
        writer.flush().map_err(|e| CollapseError::io(&path, e))?;
        let mut file = writer
            .into_inner()
            .map_err(|e| CollapseError::io(&path, e.into_error()))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| CollapseError::io(&path, e))?;

        let remaining = chunk.len() as u64;
        debug!("Spilled a run of {remaining} records");
        chunk.clear();
        Ok(Run {
            reader: BufReader::with_capacity(MERGE_BUFFER_SIZE, file),
            remaining,
            path,
        })
    }

    fn spill_path(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn sort_chunk<K: Ord + Send, R: Send>(chunk: &mut [(K, u64, R)]) {
    chunk.par_sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
}

fn spill_error(
    path: &Path,
    err: bincode::Error,
) -> CollapseError {
    match *err {
        bincode::ErrorKind::Io(source) => CollapseError::io(path, source),
        other => CollapseError::Internal(format!("sort spill: {other}")),
    }
}

/// One sorted run spilled to disk.
struct Run {
    reader:    BufReader<File>,
    remaining: u64,
    path:      PathBuf,
}

impl Run {
    fn next<R: DeserializeOwned>(&mut self) -> Result<Option<(u64, R)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        bincode::deserialize_from(&mut self.reader)
            .map(Some)
            .map_err(|e| spill_error(&self.path, e))
    }
}

struct HeapEntry<K, R> {
    key:    K,
    seq:    u64,
    record: R,
    run:    usize,
}

impl<K: Ord, R> PartialEq for HeapEntry<K, R> {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, R> Eq for HeapEntry<K, R> {}

impl<K: Ord, R> PartialOrd for HeapEntry<K, R> {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, R> Ord for HeapEntry<K, R> {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Records in sorted order, from memory or merged from spilled runs.
pub struct SortedRecords<R, K, F> {
    source: Source<R, K, F>,
}

enum Source<R, K, F> {
    Memory(std::vec::IntoIter<(K, u64, R)>),
    Merge {
        runs:   Vec<Run>,
        heap:   BinaryHeap<Reverse<HeapEntry<K, R>>>,
        key_fn: F,
        failed: bool,
    },
}

impl<R, K, F> Iterator for SortedRecords<R, K, F>
where
    R: DeserializeOwned,
    K: Ord,
    F: Fn(&R) -> K,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Memory(iter) => iter.next().map(|(_, _, record)| Ok(record)),
            Source::Merge {
                runs,
                heap,
                key_fn,
                failed,
            } => {
                if *failed {
                    return None;
                }
                let Reverse(entry) = heap.pop()?;
                match runs[entry.run].next::<R>() {
                    Ok(Some((seq, record))) => {
                        heap.push(Reverse(HeapEntry {
                            key: key_fn(&record),
                            seq,
                            record,
                            run: entry.run,
                        }))
                    },
                    Ok(None) => {},
                    Err(e) => {
                        *failed = true;
                        return Some(Err(e));
                    },
                }
                Some(Ok(entry.record))
            },
        }
    }
}
