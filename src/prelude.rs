pub use crate::collapse::{
    pipeline::run_records,
    run,
    Aggregator,
    CancelToken,
    Collapse,
    CollapseState,
    CollapseStats,
    Collapser,
    PipelineConfig,
};
pub use crate::data_structs::typedef::*;
pub use crate::data_structs::*;
pub use crate::error::{
    CollapseError,
    Result,
};
pub use crate::io::{
    read_index,
    read_partition,
    Compression,
    IndexRecord,
    RecordReader,
    SummaryRecord,
    SummarySink,
    SummaryWriter,
    TableRecord,
};
pub use crate::tools::eventalign::{
    CollapsedKmerMerge,
    EventalignCollapse,
    EventalignCollapseConfig,
};
pub use crate::tools::freq_meth::{
    FreqMethCollapse,
    FreqMethConfig,
};
pub use crate::tools::OutputOptions;
pub use crate::utils::index_path_for;
