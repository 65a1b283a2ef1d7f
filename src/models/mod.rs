//! Data models for the wiki: documents, revisions and rendered output.

mod document;
mod rendering;
mod revision;

pub use document::*;
pub use rendering::*;
pub use revision::*;
