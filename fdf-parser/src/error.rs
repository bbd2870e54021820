//! Diagnostic types for the FDF compiler
//!
//! Every diagnostic is fatal: the compiler does not recover or produce
//! partial output. Each error carries a [`Location`] whose line number has
//! already been remapped through any `!include` nesting, so the reported
//! position is in the originating source file, not the flattened buffer.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A source position in an originating (pre-flattening) file.
///
/// Lines are 1-based for display; column information is tracked internally
/// by the preprocessor but diagnostics report `file:line` only.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Malformed token, quote, or GUID literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("{location}: unterminated quoted string")]
    UnterminatedString { location: Location },
    #[error("{location}: malformed GUID literal '{text}'")]
    MalformedGuid { location: Location, text: String },
    #[error("{location}: malformed numeric literal '{text}'")]
    MalformedNumber { location: Location, text: String },
    #[error("{location}: unterminated block comment")]
    UnterminatedComment { location: Location },
}

/// `!include` resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncludeError {
    #[error(
        "{location}: include file not found: '{path}' \
         (searched FDF, platform, and workspace directories)"
    )]
    NotFound { location: Location, path: String },
    #[error("{location}: include loop detected: '{path}' is already being expanded")]
    Loop { location: Location, path: String },
    #[error("{location}: cannot read include file '{path}': {reason}")]
    Unreadable {
        location: Location,
        path: String,
        reason: String,
    },
}

/// Conditional-directive and macro failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("{location}: '{directive}' without matching !endif")]
    UnbalancedConditional {
        location: Location,
        directive: String,
    },
    #[error("{location}: '{directive}' without preceding !if")]
    DanglingDirective {
        location: Location,
        directive: String,
    },
    #[error("{location}: undefined macro '{name}'")]
    UndefinedMacro { location: Location, name: String },
    #[error("{location}: cannot evaluate expression '{expression}': {reason}")]
    BadExpression {
        location: Location,
        expression: String,
        reason: String,
    },
    #[error("{location}: malformed directive '{text}'")]
    Malformed { location: Location, text: String },
}

/// A partial construct match that cannot be completed, or structural
/// violations such as out-of-order section headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("{location}: expected {expected}, found '{found}'")]
    Expected {
        location: Location,
        expected: String,
        found: String,
    },
    #[error("{location}: unexpected end of file while parsing {context}")]
    UnexpectedEof { location: Location, context: String },
    #[error("{location}: section '[{header}]' is out of order or unrecognized")]
    BadSectionHeader { location: Location, header: String },
}

/// Violations of document-level rules: duplicate names, missing required
/// keywords, illegal values, layout-invariant breaks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("{location}: duplicate {kind} name '{name}'")]
    DuplicateName {
        location: Location,
        kind: &'static str,
        name: String,
    },
    #[error("{location}: missing required keyword '{keyword}' in [{section}]")]
    MissingKeyword {
        location: Location,
        keyword: &'static str,
        section: String,
    },
    #[error("{location}: illegal alignment '{value}'")]
    IllegalAlignment { location: Location, value: String },
    #[error("{location}: illegal value '{value}' for {field}")]
    IllegalValue {
        location: Location,
        field: &'static str,
        value: String,
    },
    #[error("{location}: cannot resolve GUID symbol '{symbol}'")]
    UnresolvedGuid { location: Location, symbol: String },
    #[error("{location}: FD '{fd}' block list totals {blocks:#x} bytes but Size declares {declared:#x}")]
    BlockSizeMismatch {
        location: Location,
        fd: String,
        blocks: u64,
        declared: u64,
    },
    #[error("{location}: region at {offset:#x} is not in ascending offset order (previous region starts at {previous:#x})")]
    RegionOrder {
        location: Location,
        offset: u64,
        previous: u64,
    },
    #[error("{location}: region at {offset:#x} overlaps previous region [{previous:#x}, {previous_end:#x})")]
    RegionOverlap {
        location: Location,
        offset: u64,
        previous: u64,
        previous_end: u64,
    },
    #[error("{location}: FD '{fd}' of size {size:#x} is too small for region ending at {end:#x}")]
    FdTooSmall {
        location: Location,
        fd: String,
        size: u64,
        end: u64,
    },
    #[error(
        "{location}: region content is {content:#x} bytes but the region declares \
         only {declared:#x}"
    )]
    RegionOverflow {
        location: Location,
        content: u64,
        declared: u64,
    },
    #[error(
        "{location}: FMP payload '{name}' must declare CERTIFICATE_GUID and \
         MONOTONIC_COUNT together or not at all"
    )]
    FmpCertificateMismatch { location: Location, name: String },
    #[error("{location}: FMP payload '{name}' declares more than one vendor-code file")]
    FmpVendorCodeCardinality { location: Location, name: String },
    #[error("cannot resolve Depex symbol '{symbol}' referenced by module '{module}'")]
    UnresolvedDepexSymbol { symbol: String, module: String },
    #[error("no build rule matches arch '{arch}', module type '{module_type}' for '{module}'")]
    NoMatchingRule {
        arch: String,
        module_type: String,
        module: String,
    },
    #[error(
        "firmware volume '{name}' is referenced both as a direct FD region and \
         as capsule payload"
    )]
    VolumeInFdAndCapsule { name: String },
    #[error("unknown {kind} '{name}' referenced from '{referrer}'")]
    UnknownReference {
        kind: &'static str,
        name: String,
        referrer: String,
    },
}

/// FD/FV/Capsule containment cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("containment cycle detected starting at {kind} '{name}'")]
    Containment { kind: &'static str, name: String },
}

/// A collaborator invocation failed or produced no output.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("external tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
    #[error("external tool '{tool}' produced no output")]
    EmptyOutput { tool: String },
    #[error("cannot invoke external tool '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level diagnostic type: the union of every failure category.
#[derive(Debug, Error)]
pub enum FdfError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Include(#[from] IncludeError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),
    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for FdfError {
    fn from(err: std::io::Error) -> Self {
        FdfError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FdfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_renders_file_colon_line() {
        let loc = Location::new("Platform.fdf", 42);
        assert_eq!(loc.to_string(), "Platform.fdf:42");
    }

    #[test]
    fn diagnostics_embed_remapped_location() {
        let err = IncludeError::Loop {
            location: Location::new("Common.fdf", 7),
            path: "Platform.fdf".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("Common.fdf:7: "));
        assert!(rendered.contains("Platform.fdf"));
    }

    #[test]
    fn semantic_errors_name_the_missing_keyword() {
        let err = SemanticError::MissingKeyword {
            location: Location::new("a.fdf", 3),
            keyword: "ErasePolarity",
            section: "FD.BOOT".into(),
        };
        assert!(err.to_string().contains("ErasePolarity"));
    }
}
