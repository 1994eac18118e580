//! Streaming collapse of nanopore signal-alignment tables.
//!
//! Two transforms share one group-by engine ([`collapse`]):
//!
//! - [`tools::eventalign`] folds the events nanopolish `eventalign` reports
//!   for one kmer of one read into a single dwell-weighted row;
//! - [`tools::freq_meth`] turns per-read methylation calls into per-site
//!   methylation frequencies.
//!
//! Both read (optionally compressed) tab-separated tables, keep only open
//! groups in memory, and write a tab-separated summary together with a
//! byte-range index of its partitions.

pub mod collapse;
pub mod data_structs;
pub mod error;
pub mod exports;
pub mod io;
pub mod prelude;
pub mod tools;
pub mod utils;
