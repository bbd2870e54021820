//! # fdf-parser
//!
//! Front end of the FDF compiler: preprocessing and parsing of flash
//! description files into an in-memory [`document::Document`].
//!
//! The pipeline is two fixed passes over a 2-D character buffer:
//!
//! 1. [`preprocess`]: comment stripping, `!include` splicing with
//!    per-include line remapping, `!if`/`!ifdef` conditional elimination,
//!    and `DEFINE`/`SET` capture. Processed text is blanked in place so
//!    every surviving character keeps its original line.
//! 2. [`parse`]: backtracking recursive descent over the flattened buffer,
//!    producing the read-only document model the generation back end
//!    consumes.
//!
//! All diagnostics carry a [`error::Location`] remapped to the originating
//! file, never to the flattened buffer.

pub mod document;
pub mod error;
pub mod expr;
pub mod parse;
pub mod preprocess;
pub mod reader;
pub mod scope;
pub mod session;
pub mod source;

pub use document::Document;
pub use error::{FdfError, Location, Result};
pub use parse::parse;
pub use preprocess::{preprocess, preprocess_source};
pub use session::CompileSession;
pub use source::SourceBuffer;

/// Run both front-end passes over the session's FDF file.
pub fn compile_document(session: &mut CompileSession) -> Result<Document> {
    let buf = preprocess(session)?;
    parse(&buf, session)
}

/// Run both front-end passes over in-memory text. The session still
/// supplies macro layers and include search roots.
pub fn compile_document_source(text: &str, session: &mut CompileSession) -> Result<Document> {
    let buf = preprocess_source(text, session)?;
    parse(&buf, session)
}
