//! Outpost Exec - adapters between capabilities and the outside world
//!
//! - `process`: run external tools, streaming or buffering their output
//! - `http`: single round-trip REST helper with optional JSON decoding
//! - `dns`: public address resolution
//! - `text`: hostname extraction from loose tool output

pub mod dns;
pub mod http;
pub mod process;
pub mod text;

pub use dns::Resolver;
pub use http::{is_valid_website, next_link, HttpClient, HttpResponse};
pub use process::{command_line, run, run_stdout, run_with_input, stream, Lines, MAX_RECORD_BYTES};
pub use text::normalize;
