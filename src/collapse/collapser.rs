use std::collections::BTreeMap;
use std::hash::Hash;

use hashbrown::HashSet;
use log::debug;

use super::{
    Aggregator,
    CancelToken,
    Collapse,
    CollapseStats,
};
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::SummarySink;

/// Keys already closed within the current partition.
pub(super) enum ClosedKeys<K> {
    Set(HashSet<K>),
    /// Largest closed key; valid when groups close in key order.
    Watermark(Option<K>),
}

impl<K: Ord + Hash + Clone> ClosedKeys<K> {
    pub(super) fn new(ordered: bool) -> Self {
        if ordered {
            ClosedKeys::Watermark(None)
        }
        else {
            ClosedKeys::Set(HashSet::new())
        }
    }

    pub(super) fn insert(
        &mut self,
        key: K,
    ) {
        match self {
            ClosedKeys::Set(set) => {
                set.insert(key);
            },
            ClosedKeys::Watermark(mark) => {
                if mark.as_ref().map_or(true, |m| key > *m) {
                    *mark = Some(key);
                }
            },
        }
    }

    pub(super) fn contains(
        &self,
        key: &K,
    ) -> bool {
        match self {
            ClosedKeys::Set(set) => set.contains(key),
            ClosedKeys::Watermark(mark) => mark.as_ref().map_or(false, |m| key <= m),
        }
    }

    pub(super) fn clear(&mut self) {
        match self {
            ClosedKeys::Set(set) => set.clear(),
            ClosedKeys::Watermark(mark) => *mark = None,
        }
    }
}

/// Where the collapser is in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseState {
    AwaitingFirst,
    InGroup,
    Drained,
}

enum State<C: Collapse> {
    AwaitingFirst,
    InGroup {
        partition: C::Partition,
        /// Open groups ordered by key. Holds a single group unless the
        /// transform fans records out to several keys.
        open:      BTreeMap<C::Key, C::Acc>,
    },
    Drained,
}

/// Drives records through group-boundary detection and aggregation.
///
/// Records are pushed one at a time; every closed group is handed to the
/// sink immediately. A key, or a whole partition, that shows up again after
/// it was closed is reported as [`CollapseError::NonContiguousGroup`].
pub struct Collapser<'a, C: Collapse> {
    collapse: &'a C,
    state:    State<C>,
    closed:   ClosedKeys<C::Key>,
    finished: HashSet<C::Partition>,
    cancel:   CancelToken,
    stats:    CollapseStats,
}

impl<'a, C: Collapse> Collapser<'a, C> {
    pub fn new(
        collapse: &'a C,
        cancel: CancelToken,
    ) -> Self {
        Self {
            collapse,
            state: State::AwaitingFirst,
            closed: ClosedKeys::new(C::ORDERED_CLOSE),
            finished: HashSet::new(),
            cancel,
            stats: CollapseStats::default(),
        }
    }

    pub fn state(&self) -> CollapseState {
        match self.state {
            State::AwaitingFirst => CollapseState::AwaitingFirst,
            State::InGroup { .. } => CollapseState::InGroup,
            State::Drained => CollapseState::Drained,
        }
    }

    pub fn stats(&self) -> &CollapseStats {
        &self.stats
    }

    #[cfg(test)]
    fn open_groups(&self) -> usize {
        match &self.state {
            State::InGroup { open, .. } => open.len(),
            _ => 0,
        }
    }

    pub fn push<S: SummarySink<C::Summary>>(
        &mut self,
        record: C::Record,
        sink: &mut S,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            // Open groups are dropped without emitting anything.
            self.state = State::Drained;
            return Err(CollapseError::Cancelled);
        }

        let (partition, mut open) =
            match std::mem::replace(&mut self.state, State::Drained) {
                State::Drained => {
                    return Err(CollapseError::Internal(
                        "record pushed after the stream was drained".to_string(),
                    ))
                },
                State::AwaitingFirst => self.start_partition(&record)?,
                State::InGroup { partition, open }
                    if !self.collapse.in_partition(&record, &partition) =>
                {
                    self.close_partition(partition, open, sink)?;
                    self.start_partition(&record)?
                },
                State::InGroup { partition, mut open } => {
                    self.close_passed(&mut open, &record, sink)?;
                    (partition, open)
                },
            };

        for key in self.collapse.keys(&record) {
            if self.closed.contains(&key) {
                return Err(CollapseError::NonContiguousGroup {
                    key: format!("{key:?}"),
                });
            }
            open.entry(key)
                .or_insert_with_key(|k| self.collapse.open(k))
                .accumulate(&record);
        }
        self.stats.records += 1;
        self.state = State::InGroup { partition, open };
        Ok(())
    }

    /// Closes every open group and moves to `Drained`.
    pub fn finish<S: SummarySink<C::Summary>>(
        &mut self,
        sink: &mut S,
    ) -> Result<CollapseStats> {
        match std::mem::replace(&mut self.state, State::Drained) {
            State::InGroup { partition, open } => {
                self.close_partition(partition, open, sink)?
            },
            State::AwaitingFirst | State::Drained => {},
        }
        Ok(self.stats)
    }

    fn start_partition(
        &mut self,
        record: &C::Record,
    ) -> Result<(C::Partition, BTreeMap<C::Key, C::Acc>)> {
        let partition = self.collapse.partition(record);
        if self.finished.contains(&partition) {
            return Err(CollapseError::NonContiguousGroup {
                key: format!("{partition:?}"),
            });
        }
        Ok((partition, BTreeMap::new()))
    }

    fn close_partition<S: SummarySink<C::Summary>>(
        &mut self,
        partition: C::Partition,
        open: BTreeMap<C::Key, C::Acc>,
        sink: &mut S,
    ) -> Result<()> {
        for (key, acc) in open {
            self.close_group(key, acc, sink)?;
        }
        sink.end_partition()?;
        debug!("Closed partition {partition:?}");
        self.finished.insert(partition);
        self.closed.clear();
        self.stats.partitions += 1;
        Ok(())
    }

    /// Closes the open groups that `record` proves complete.
    fn close_passed<S: SummarySink<C::Summary>>(
        &mut self,
        open: &mut BTreeMap<C::Key, C::Acc>,
        record: &C::Record,
        sink: &mut S,
    ) -> Result<()> {
        let passed = open
            .keys()
            .filter(|key| self.collapse.is_closed_by(key, record))
            .cloned()
            .collect::<Vec<_>>();
        for key in passed {
            if let Some(acc) = open.remove(&key) {
                self.close_group(key, acc, sink)?;
            }
        }
        Ok(())
    }

    fn close_group<S: SummarySink<C::Summary>>(
        &mut self,
        key: C::Key,
        acc: C::Acc,
        sink: &mut S,
    ) -> Result<()> {
        let summary = acc.close()?;
        self.closed.insert(key);
        if self.collapse.retain(&summary) {
            sink.emit(summary)?;
            self.stats.groups += 1;
        }
        else {
            self.stats.filtered += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse::testing::{
        item,
        total,
        Item,
        SumCollapse,
        Total,
    };

    /// Records emitted summaries and partition boundaries.
    #[derive(Default)]
    struct Recorder {
        rows:       Vec<Total>,
        boundaries: Vec<usize>,
    }

    impl SummarySink<Total> for Recorder {
        fn emit(
            &mut self,
            summary: Total,
        ) -> Result<()> {
            self.rows.push(summary);
            Ok(())
        }

        fn end_partition(&mut self) -> Result<()> {
            self.boundaries.push(self.rows.len());
            Ok(())
        }
    }

    fn collapse_all(
        collapse: &SumCollapse,
        items: Vec<Item>,
    ) -> Result<(Recorder, CollapseStats)> {
        let mut collapser = Collapser::new(collapse, CancelToken::new());
        let mut sink = Recorder::default();
        for it in items {
            collapser.push(it, &mut sink)?;
        }
        let stats = collapser.finish(&mut sink)?;
        Ok((sink, stats))
    }

    #[test]
    fn test_contiguous_groups() {
        let (sink, stats) = collapse_all(&SumCollapse::default(), vec![
            item("a", 1, 2),
            item("a", 1, 3),
            item("a", 4, 1),
            item("b", 1, 10),
        ])
        .unwrap();
        assert_eq!(sink.rows, vec![
            total("a", 1, 2, 5),
            total("a", 4, 1, 1),
            total("b", 1, 1, 10),
        ]);
        assert_eq!(sink.boundaries, vec![2, 3]);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.groups, 3);
        assert_eq!(stats.partitions, 2);
    }

    #[test]
    fn test_state_transitions() {
        let collapse = SumCollapse::default();
        let mut collapser = Collapser::new(&collapse, CancelToken::new());
        let mut sink = Vec::new();
        assert_eq!(collapser.state(), CollapseState::AwaitingFirst);
        collapser.push(item("a", 1, 1), &mut sink).unwrap();
        assert_eq!(collapser.state(), CollapseState::InGroup);
        collapser.finish(&mut sink).unwrap();
        assert_eq!(collapser.state(), CollapseState::Drained);
        assert!(matches!(
            collapser.push(item("a", 2, 1), &mut sink),
            Err(CollapseError::Internal(_))
        ));
    }

    #[test]
    fn test_empty_stream() {
        let (sink, stats) = collapse_all(&SumCollapse::default(), vec![]).unwrap();
        assert!(sink.rows.is_empty());
        assert!(sink.boundaries.is_empty());
        assert_eq!(stats, CollapseStats::default());
    }

    #[test]
    fn test_reappearing_key() {
        let err = collapse_all(&SumCollapse::default(), vec![
            item("a", 1, 1),
            item("a", 2, 1),
            item("a", 1, 1),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, CollapseError::NonContiguousGroup { .. }));
    }

    #[test]
    fn test_reappearing_partition() {
        let err = collapse_all(&SumCollapse::default(), vec![
            item("a", 1, 1),
            item("b", 1, 1),
            item("a", 5, 1),
        ])
        .err()
        .unwrap();
        match err {
            CollapseError::NonContiguousGroup { key } => assert!(key.contains('a')),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fan_out_window() {
        let collapse = SumCollapse {
            fan_out: true,
            ..Default::default()
        };
        let mut collapser = Collapser::new(&collapse, CancelToken::new());
        let mut sink = Recorder::default();
        collapser.push(item("a", 1, 1), &mut sink).unwrap();
        assert_eq!(collapser.open_groups(), 2);
        collapser.push(item("a", 2, 10), &mut sink).unwrap();
        // key 1 closed, keys 2 and 3 open
        assert_eq!(sink.rows, vec![total("a", 1, 1, 1)]);
        assert_eq!(collapser.open_groups(), 2);
        collapser.finish(&mut sink).unwrap();
        assert_eq!(sink.rows, vec![
            total("a", 1, 1, 1),
            total("a", 2, 2, 11),
            total("a", 3, 1, 10),
        ]);
    }

    #[test]
    fn test_retain_filters() {
        let collapse = SumCollapse {
            min_sum: Some(5),
            ..Default::default()
        };
        let (sink, stats) = collapse_all(&collapse, vec![
            item("a", 1, 2),
            item("a", 2, 7),
        ])
        .unwrap();
        assert_eq!(sink.rows, vec![total("a", 2, 1, 7)]);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn test_cancel_discards_open_group() {
        let collapse = SumCollapse::default();
        let cancel = CancelToken::new();
        let mut collapser = Collapser::new(&collapse, cancel.clone());
        let mut sink = Recorder::default();
        collapser.push(item("a", 1, 1), &mut sink).unwrap();
        cancel.cancel();
        assert!(matches!(
            collapser.push(item("a", 1, 1), &mut sink),
            Err(CollapseError::Cancelled)
        ));
        collapser.finish(&mut sink).unwrap();
        assert!(sink.rows.is_empty());
        assert_eq!(collapser.state(), CollapseState::Drained);
    }

    #[test]
    fn test_closed_set_tracks_unordered_keys() {
        let mut closed = ClosedKeys::new(false);
        closed.insert(5u64);
        closed.insert(2);
        assert!(closed.contains(&2));
        assert!(!closed.contains(&3));
        closed.clear();
        assert!(!closed.contains(&5));

        let mut mark = ClosedKeys::new(true);
        mark.insert(5u64);
        mark.insert(2);
        assert!(mark.contains(&3));
        assert!(!mark.contains(&6));
    }
}
