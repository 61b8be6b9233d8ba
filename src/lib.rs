pub mod catalog;
pub mod config;
pub mod limits;
pub mod matching;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
