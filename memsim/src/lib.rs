pub mod addressing;
pub mod bits;
pub mod cache;
pub mod config;
pub mod geometry;
pub mod io;
pub mod page_table;
pub mod sim;

#[cfg(feature = "stat")]
pub mod stat;
