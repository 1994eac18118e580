//! Minimal transform used by the engine tests: sums `value` per
//! `(part, key)`, optionally fanning each record out to `key + 1` too.

use csv::StringRecord;
use serde::{
    Deserialize,
    Serialize,
};
use smallvec::smallvec;

use super::{
    Aggregator,
    Collapse,
};
use crate::data_structs::KeySet;
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::table::{
    field,
    parse_field,
    require_column,
};
use crate::io::{
    IndexColumns,
    PartitionStats,
    SummaryRecord,
    TableRecord,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub part:  String,
    pub key:   u64,
    pub value: i64,
}

pub fn item(
    part: &str,
    key: u64,
    value: i64,
) -> Item {
    Item {
        part: part.to_string(),
        key,
        value,
    }
}

impl TableRecord for Item {
    type Columns = [usize; 3];

    fn resolve_columns(header: &StringRecord) -> Result<Self::Columns> {
        Ok([
            require_column(header, &["part"])?,
            require_column(header, &["key"])?,
            require_column(header, &["value"])?,
        ])
    }

    fn default_columns(_width: usize) -> Self::Columns {
        [0, 1, 2]
    }

    fn parse(
        row: &StringRecord,
        columns: &Self::Columns,
        line: u64,
    ) -> Result<Self> {
        Ok(Item {
            part:  field(row, columns[0], "part", line)?.to_string(),
            key:   parse_field(row, columns[1], "key", line)?,
            value: parse_field(row, columns[2], "value", line)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Total {
    pub part: String,
    pub key:  u64,
    pub n:    u64,
    pub sum:  i64,
}

impl SummaryRecord for Total {
    fn header() -> &'static [&'static str] {
        &["part", "key", "n", "sum"]
    }
}

pub struct SumAcc {
    part: String,
    key:  u64,
    n:    u64,
    sum:  i64,
}

impl Aggregator for SumAcc {
    type Record = Item;
    type Summary = Total;

    fn accumulate(
        &mut self,
        record: &Item,
    ) {
        self.n += 1;
        self.sum += record.value;
    }

    fn merge(
        &mut self,
        other: Self,
    ) {
        self.n += other.n;
        self.sum += other.sum;
    }

    fn count(&self) -> u64 {
        self.n
    }

    fn close(self) -> Result<Total> {
        if self.n == 0 {
            return Err(CollapseError::EmptyGroup {
                key: format!("({}, {})", self.part, self.key),
            });
        }
        Ok(Total {
            part: self.part,
            key:  self.key,
            n:    self.n,
            sum:  self.sum,
        })
    }
}

#[derive(Debug, Default)]
pub struct PartRows {
    pub part: String,
    pub rows: u64,
}

impl IndexColumns for PartRows {
    fn header() -> &'static [&'static str] {
        &["part", "rows"]
    }

    fn fields(&self) -> Vec<String> {
        vec![self.part.clone(), self.rows.to_string()]
    }
}

impl PartitionStats<Total> for PartRows {
    fn update(
        &mut self,
        summary: &Total,
    ) {
        self.part = summary.part.clone();
        self.rows += 1;
    }
}

#[derive(Default)]
pub struct SumCollapse {
    pub fan_out: bool,
    /// Drop totals below this sum
    pub min_sum: Option<i64>,
}

impl Collapse for SumCollapse {
    type Acc = SumAcc;
    type Key = (String, u64);
    type Partition = String;
    type Record = Item;
    type SortKey = (String, u64);
    type Stats = PartRows;
    type Summary = Total;

    const ORDERED_CLOSE: bool = true;

    fn keys(
        &self,
        record: &Item,
    ) -> KeySet<Self::Key> {
        if self.fan_out {
            smallvec![
                (record.part.clone(), record.key),
                (record.part.clone(), record.key + 1)
            ]
        }
        else {
            smallvec![(record.part.clone(), record.key)]
        }
    }

    fn partition(
        &self,
        record: &Item,
    ) -> String {
        record.part.clone()
    }

    fn in_partition(
        &self,
        record: &Item,
        partition: &String,
    ) -> bool {
        record.part == *partition
    }

    fn sort_key(
        &self,
        record: &Item,
    ) -> Self::SortKey {
        (record.part.clone(), record.key)
    }

    fn is_closed_by(
        &self,
        key: &Self::Key,
        next: &Item,
    ) -> bool {
        key.1 < next.key
    }

    fn open(
        &self,
        key: &Self::Key,
    ) -> SumAcc {
        SumAcc {
            part: key.0.clone(),
            key:  key.1,
            n:    0,
            sum:  0,
        }
    }

    fn retain(
        &self,
        summary: &Total,
    ) -> bool {
        self.min_sum.map_or(true, |min| summary.sum >= min)
    }
}

pub fn total(
    part: &str,
    key: u64,
    n: u64,
    sum: i64,
) -> Total {
    Total {
        part: part.to_string(),
        key,
        n,
        sum,
    }
}
