//! Console Module
//!
//! Line-oriented front end for a string cache. Each input line is one
//! command; each reply is one JSON object.
//!
//! # Commands
//! - `SET key value [ttl_secs]` - Store a value
//! - `GET key` - Retrieve a value with its metadata
//! - `DEL key` - Delete a key
//! - `PIN key value` - Store a value no reduction may evict
//! - `KEYS` - List keys in insertion order
//! - `STATS` - Cache statistics
//! - `TIDY` - Run one tidy cycle now
//! - `CLEAR` - Remove and dispose every entry
//! - `HELP`, `QUIT`

pub mod dispatch;
pub mod handlers;

pub use dispatch::{dispatch, run_console, Reply};
pub use handlers::ConsoleState;
