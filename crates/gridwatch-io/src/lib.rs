//! Configuration loading and the SQLite reading source (spec §4.1's CSV
//! inputs, §4.2/§6's reading source).

pub mod config;
pub mod reading_source;

pub use reading_source::{Reading, ReadingSource, SiteTotals};
