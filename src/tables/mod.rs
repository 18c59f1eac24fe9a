//! Persisted tables.
//!
//! Each table is an ordered map held in memory and written to a single file.

mod table;

pub use table::{Table, TABLE_EXTENSION};
