//! Partition-parallel collapsing.
//!
//! A reader thread cuts the stream into batches and hands them to a pool of
//! workers over a bounded channel. A batch ends either with its partition or
//! at a point inside it where every open group has been closed, so no group
//! ever spans two workers and a batch holds at most about `batch_size`
//! records. The reader also tracks closed keys, which keeps reappearing
//! groups an error across batch cuts. The calling thread puts the finished
//! batches back into input order with a [`ReorderBuffer`] and feeds them to
//! the sink.

use std::collections::VecDeque;
use std::thread;

use crossbeam::channel::{
    bounded,
    Sender,
};
use hashbrown::HashSet;
use log::debug;

use super::collapser::ClosedKeys;
use super::{
    CancelToken,
    Collapse,
    CollapseStats,
    Collapser,
};
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::SummarySink;

/// Releases items in sequence order, whatever order they arrive in.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    /// Slot `i` holds sequence number `next_seq + i`.
    buffer:   VecDeque<Option<T>>,
    next_seq: u64,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            buffer:   VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn insert(
        &mut self,
        seq: u64,
        item: T,
    ) {
        debug_assert!(seq >= self.next_seq, "sequence {seq} already released");
        let index = (seq - self.next_seq) as usize;
        while self.buffer.len() <= index {
            self.buffer.push_back(None);
        }
        self.buffer[index] = Some(item);
    }

    /// Pops the next item in sequence, if it has arrived.
    pub fn try_pop_next(&mut self) -> Option<T> {
        match self.buffer.front() {
            Some(Some(_)) => {
                self.next_seq += 1;
                self.buffer.pop_front().flatten()
            },
            _ => None,
        }
    }
}

/// Consecutive records of one partition, closed groups only.
struct Batch<R> {
    seq:            u64,
    records:        Vec<R>,
    /// Last batch of its partition
    ends_partition: bool,
}

struct BatchResult<S> {
    seq:            u64,
    ends_partition: bool,
    result:         Result<(Vec<S>, CollapseStats)>,
}

/// Collapses `records` with `threads` workers, emitting summaries to
/// `sink` in input order.
///
/// Errors are reported in stream order: a failing batch wins over a read
/// error that happened after it, which wins over nothing.
pub fn run_partitioned<C, I, S>(
    collapse: &C,
    records: I,
    sink: &mut S,
    threads: usize,
    batch_size: usize,
    cancel: &CancelToken,
) -> Result<CollapseStats>
where
    C: Collapse,
    I: Iterator<Item = Result<C::Record>> + Send,
    S: SummarySink<C::Summary>, {
    let threads = threads.max(1);
    let batch_size = batch_size.max(1);
    debug!("Collapsing batches of {batch_size} records with {threads} workers");

    thread::scope(|scope| {
        let (batch_tx, batch_rx) = bounded::<Batch<C::Record>>(threads * 2);
        let (out_tx, out_rx) = bounded::<BatchResult<C::Summary>>(threads * 2);

        let reader =
            scope.spawn(move || split_batches(collapse, records, batch_size, batch_tx, cancel));

        let workers = (0..threads)
            .map(|_| {
                let batch_rx = batch_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    for batch in batch_rx {
                        let done = BatchResult {
                            seq:            batch.seq,
                            ends_partition: batch.ends_partition,
                            result:         collapse_batch(collapse, batch.records, cancel),
                        };
                        if out_tx.send(done).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        drop(batch_rx);
        drop(out_tx);

        let consumed = (|| -> Result<CollapseStats> {
            let mut stats = CollapseStats::default();
            let mut reorder = ReorderBuffer::new();
            for done in out_rx.iter() {
                reorder.insert(done.seq, done);
                while let Some(done) = reorder.try_pop_next() {
                    let (rows, mut batch_stats) = done.result?;
                    for row in rows {
                        sink.emit(row)?;
                    }
                    batch_stats.partitions = 0;
                    if done.ends_partition {
                        sink.end_partition()?;
                        batch_stats.partitions = 1;
                    }
                    stats.merge(&batch_stats);
                }
            }
            Ok(stats)
        })();
        drop(out_rx);

        let read = reader
            .join()
            .unwrap_or_else(|_| Err(CollapseError::Internal("reader thread panicked".into())));
        let mut panicked = false;
        for worker in workers {
            panicked |= worker.join().is_err();
        }

        let stats = consumed?;
        read?;
        if panicked {
            return Err(CollapseError::Internal("worker thread panicked".into()));
        }
        Ok(stats)
    })
}

/// Cuts the stream into batches at partition changes, and inside a
/// partition once `batch_size` records are buffered and the next record
/// closes every open group.
///
/// A partition, or a key of the current partition, that shows up again
/// after it was closed is an error.
fn split_batches<C, I>(
    collapse: &C,
    records: I,
    batch_size: usize,
    batch_tx: Sender<Batch<C::Record>>,
    cancel: &CancelToken,
) -> Result<()>
where
    C: Collapse,
    I: Iterator<Item = Result<C::Record>>, {
    let mut finished: HashSet<C::Partition> = HashSet::new();
    let mut closed = ClosedKeys::new(C::ORDERED_CLOSE);
    let mut open: Vec<C::Key> = Vec::new();
    let mut partition: Option<C::Partition> = None;
    let mut batch: Vec<C::Record> = Vec::new();
    let mut seq = 0u64;

    // A closed channel means the consumer already failed; its error wins.
    let mut send = |records: Vec<C::Record>, ends_partition: bool| {
        let sent = batch_tx
            .send(Batch {
                seq,
                records,
                ends_partition,
            })
            .is_ok();
        seq += 1;
        sent
    };

    for record in records {
        if cancel.is_cancelled() {
            return Err(CollapseError::Cancelled);
        }
        let record = record?;

        match partition.as_ref() {
            Some(current) if collapse.in_partition(&record, current) => {
                let (passed, still_open): (Vec<_>, Vec<_>) = open
                    .drain(..)
                    .partition(|key| collapse.is_closed_by(key, &record));
                open = still_open;
                for key in passed {
                    closed.insert(key);
                }
                if open.is_empty()
                    && batch.len() >= batch_size
                    && !send(std::mem::take(&mut batch), false)
                {
                    return Ok(());
                }
            },
            _ => {
                if let Some(done) = partition.take() {
                    if !send(std::mem::take(&mut batch), true) {
                        return Ok(());
                    }
                    finished.insert(done);
                }
                let next = collapse.partition(&record);
                if finished.contains(&next) {
                    return Err(CollapseError::NonContiguousGroup {
                        key: format!("{next:?}"),
                    });
                }
                partition = Some(next);
                closed.clear();
                open.clear();
            },
        }

        for key in collapse.keys(&record) {
            if closed.contains(&key) {
                return Err(CollapseError::NonContiguousGroup {
                    key: format!("{key:?}"),
                });
            }
            if !open.contains(&key) {
                open.push(key);
            }
        }
        batch.push(record);
    }

    if partition.is_some() {
        send(batch, true);
    }
    Ok(())
}

fn collapse_batch<C: Collapse>(
    collapse: &C,
    records: Vec<C::Record>,
    cancel: &CancelToken,
) -> Result<(Vec<C::Summary>, CollapseStats)> {
    let mut collapser = Collapser::new(collapse, cancel.clone());
    let mut rows = Vec::new();
    for record in records {
        collapser.push(record, &mut rows)?;
    }
    let stats = collapser.finish(&mut rows)?;
    Ok((rows, stats))
}
