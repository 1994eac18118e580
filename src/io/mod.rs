pub mod compression;
pub mod index;
pub mod table;
pub mod write;

pub use compression::{
    open_input,
    Compression,
};
pub use index::{
    read_index,
    read_partition,
    IndexColumns,
    IndexEntry,
    IndexRecord,
    OutputIndex,
};
pub use table::{
    RecordReader,
    TableRecord,
};
pub use write::{
    PartitionStats,
    SummaryRecord,
    SummarySink,
    SummaryWriter,
};
