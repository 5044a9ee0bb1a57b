//! Built-in tools and helpers for handling model output.

pub mod http;
pub mod parse;

pub use http::HttpTool;
pub use parse::{extract_json, strip_code_fences};
