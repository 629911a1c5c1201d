//! Command and response models for the cache console
//!
//! Commands are parsed from text lines; responses serialize to JSON.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{validate_key, Command};
pub use responses::{
    ClearResponse, DeleteResponse, ErrorResponse, GetResponse, HelpResponse, KeysResponse,
    SetResponse, StatsResponse, TidyResponse,
};
