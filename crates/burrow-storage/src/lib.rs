//! BurrowDB storage: paged data file, page cache and transaction glue.
//!
//! This crate provides the concrete collaborators around the
//! write-ahead log: the data file recovery writes into, the dirty-page
//! bookkeeping that drives FLUSH_PAGE records, and the database handle
//! reconciling recovery modes at open and close time.

pub mod cache;
pub mod db;
pub mod pagefile;
pub mod txn;

pub use cache::{Page, PageCache};
pub use db::Database;
pub use pagefile::PageFile;
pub use txn::Transaction;
