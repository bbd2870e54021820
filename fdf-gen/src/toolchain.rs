//! External collaborator seam.
//!
//! The compiler plans images; byte-level encoding of sections, files, and
//! volumes is delegated through [`Toolchain`]. Two implementations ship:
//! [`StubToolchain`] wraps payloads in a deterministic tag/length framing
//! (used by tests and `--dry-run`), and [`CommandToolchain`] shells out to
//! the platform's encoder binaries.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use fdf_parser::document::{CompressType, DepexKind, Fv};
use fdf_parser::error::{ExternalToolError, Result};

use crate::depex::{self, DepexOp};

/// One build output of a module, keyed by its build file type.
#[derive(Debug, Clone)]
pub struct ModuleOutput {
    pub file_type: String,
    pub extension: String,
    pub data: Vec<u8>,
}

/// Everything generation needs to know about a referenced module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub guid: String,
    pub module_type: String,
    pub outputs: Vec<ModuleOutput>,
}

/// How a leaf or encapsulation section should be framed.
#[derive(Debug, Clone)]
pub enum SectionEncoding {
    Ui(String),
    Version { string: String, build_num: u32 },
    Raw,
    FvImage,
    Depex(DepexKind),
    Typed(String),
    Compressed(CompressType),
    Guided {
        guid: String,
        processing_required: bool,
        auth_status_valid: bool,
        extra_header_size: u32,
    },
}

/// FFS file framing parameters.
#[derive(Debug, Clone)]
pub struct FileEncoding {
    pub file_type: String,
    pub guid: String,
    pub alignment: u64,
    pub fixed: bool,
    pub checksum: bool,
}

/// The external-encoder contract. A failing call aborts the whole run;
/// there is no retry.
pub trait Toolchain {
    /// Load metadata and build outputs for a module INF path.
    fn resolve_module(&self, path: &Path) -> Result<ModuleInfo>;

    /// Map a Depex symbol name to its registry-format GUID, if known.
    fn resolve_symbol(&self, symbol: &str) -> Option<String>;

    /// Compress a blob.
    fn compress(&self, compress_type: CompressType, data: &[u8]) -> Result<Vec<u8>>;

    /// Pipe a blob through a named transform (signing, vendor wrapping).
    fn transform(&self, name: &str, data: &[u8]) -> Result<Vec<u8>>;

    /// Strip or convert an executable payload for its section type
    /// (PE32, PIC, TE) before framing.
    fn encode_image(&self, section_type: &str, data: &[u8]) -> Result<Vec<u8>>;

    /// Serialize a compiled Depex opcode stream for a dispatch phase.
    fn encode_depex(&self, kind: DepexKind, ops: &[DepexOp]) -> Result<Vec<u8>>;

    /// Frame a section payload.
    fn encode_section(&self, encoding: &SectionEncoding, payload: &[u8]) -> Result<Vec<u8>>;

    /// Frame an FFS file around its encoded sections.
    fn encode_file(&self, encoding: &FileEncoding, sections: &[Vec<u8>]) -> Result<Vec<u8>>;

    /// Frame a firmware volume around its encoded files.
    fn encode_volume(&self, fv: &Fv, files: &[Vec<u8>]) -> Result<Vec<u8>>;
}

/// Deterministic framing: `[tag][len:u32 LE][payload]`.
///
/// Sizes are exact functions of the input, which is what the layout
/// invariants need; no real codec is involved. Modules and symbols are
/// registered up front.
#[derive(Debug, Default)]
pub struct StubToolchain {
    modules: HashMap<String, ModuleInfo>,
    symbols: HashMap<String, String>,
}

impl StubToolchain {
    pub const TAG_SECTION: u8 = 0x53;
    pub const TAG_FILE: u8 = 0x46;
    pub const TAG_VOLUME: u8 = 0x56;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_module(&mut self, path: impl Into<String>, info: ModuleInfo) {
        self.modules.insert(path.into(), info);
    }

    pub fn insert_symbol(&mut self, name: impl Into<String>, guid: impl Into<String>) {
        self.symbols.insert(name.into(), guid.into());
    }

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.push(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }
}

impl Toolchain for StubToolchain {
    fn resolve_module(&self, path: &Path) -> Result<ModuleInfo> {
        let key = path.to_string_lossy();
        self.modules.get(key.as_ref()).cloned().ok_or_else(|| {
            ExternalToolError::Failed {
                tool: "module resolver".into(),
                reason: format!("unknown module '{}'", key),
            }
            .into()
        })
    }

    fn resolve_symbol(&self, symbol: &str) -> Option<String> {
        self.symbols.get(symbol).cloned()
    }

    fn compress(&self, _compress_type: CompressType, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn transform(&self, _name: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encode_image(&self, _section_type: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encode_depex(&self, _kind: DepexKind, ops: &[DepexOp]) -> Result<Vec<u8>> {
        Ok(depex::encode(ops))
    }

    fn encode_section(&self, _encoding: &SectionEncoding, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::frame(Self::TAG_SECTION, payload))
    }

    fn encode_file(&self, _encoding: &FileEncoding, sections: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::frame(Self::TAG_FILE, &sections.concat()))
    }

    fn encode_volume(&self, _fv: &Fv, files: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::frame(Self::TAG_VOLUME, &files.concat()))
    }
}

/// Module descriptor loaded from the JSON sidecar a platform build drops
/// next to each INF.
#[derive(Debug, Deserialize)]
struct ModuleDescriptor {
    name: String,
    guid: String,
    module_type: String,
    outputs: Vec<OutputDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OutputDescriptor {
    file_type: String,
    extension: String,
    path: PathBuf,
}

/// Shells out to per-operation encoder commands.
///
/// Each operation maps to a configured program invoked with the payload on
/// stdin and the result read from stdout. Symbol resolution reads a
/// `name guid` table file once at construction.
pub struct CommandToolchain {
    commands: HashMap<String, Vec<String>>,
    symbols: HashMap<String, String>,
}

impl CommandToolchain {
    /// `commands` maps operation names (`compress`, `transform.<name>`,
    /// `section`, `file`, `volume`) to argv vectors.
    pub fn new(commands: HashMap<String, Vec<String>>) -> Self {
        Self {
            commands,
            symbols: HashMap::new(),
        }
    }

    /// Load a whitespace-separated `symbol guid` table.
    pub fn load_symbol_table(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(name), Some(guid)) = (fields.next(), fields.next()) {
                self.symbols.insert(name.to_string(), guid.to_string());
            }
        }
        Ok(())
    }

    fn run(&self, operation: &str, input: &[u8]) -> Result<Vec<u8>> {
        let argv = self.commands.get(operation).ok_or_else(|| {
            ExternalToolError::Failed {
                tool: operation.to_string(),
                reason: "no command configured".into(),
            }
        })?;
        let (program, args) = argv.split_first().ok_or_else(|| {
            ExternalToolError::Failed {
                tool: operation.to_string(),
                reason: "empty command line".into(),
            }
        })?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalToolError::Spawn {
                tool: operation.to_string(),
                source,
            })?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ExternalToolError::Failed {
                tool: operation.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        if output.stdout.is_empty() {
            return Err(ExternalToolError::EmptyOutput {
                tool: operation.to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }
}

impl Toolchain for CommandToolchain {
    fn resolve_module(&self, path: &Path) -> Result<ModuleInfo> {
        let descriptor_path = path.with_extension("json");
        let text = std::fs::read_to_string(&descriptor_path).map_err(|e| {
            ExternalToolError::Failed {
                tool: "module resolver".into(),
                reason: format!("cannot read '{}': {}", descriptor_path.display(), e),
            }
        })?;
        let descriptor: ModuleDescriptor =
            serde_json::from_str(&text).map_err(|e| ExternalToolError::Failed {
                tool: "module resolver".into(),
                reason: format!("malformed descriptor '{}': {}", descriptor_path.display(), e),
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut outputs = Vec::with_capacity(descriptor.outputs.len());
        for out in descriptor.outputs {
            let data = std::fs::read(base.join(&out.path))?;
            outputs.push(ModuleOutput {
                file_type: out.file_type,
                extension: out.extension,
                data,
            });
        }
        Ok(ModuleInfo {
            name: descriptor.name,
            guid: descriptor.guid,
            module_type: descriptor.module_type,
            outputs,
        })
    }

    fn resolve_symbol(&self, symbol: &str) -> Option<String> {
        self.symbols.get(symbol).cloned()
    }

    fn compress(&self, compress_type: CompressType, data: &[u8]) -> Result<Vec<u8>> {
        match compress_type {
            CompressType::PiNone => Ok(data.to_vec()),
            CompressType::PiStd => self.run("compress", data),
        }
    }

    fn transform(&self, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.run(&format!("transform.{}", name), data)
    }

    fn encode_image(&self, section_type: &str, data: &[u8]) -> Result<Vec<u8>> {
        // Conversion tools are optional; an unconfigured type passes
        // the payload through unchanged.
        let operation = format!("image.{}", section_type.to_ascii_lowercase());
        if self.commands.contains_key(&operation) {
            self.run(&operation, data)
        } else {
            Ok(data.to_vec())
        }
    }

    fn encode_depex(&self, kind: DepexKind, ops: &[DepexOp]) -> Result<Vec<u8>> {
        let encoded = depex::encode(ops);
        let operation = match kind {
            DepexKind::Pei => "depex.pei",
            DepexKind::Dxe => "depex.dxe",
            DepexKind::Smm => "depex.smm",
        };
        if self.commands.contains_key(operation) {
            self.run(operation, &encoded)
        } else {
            Ok(encoded)
        }
    }

    fn encode_section(&self, _encoding: &SectionEncoding, payload: &[u8]) -> Result<Vec<u8>> {
        self.run("section", payload)
    }

    fn encode_file(&self, _encoding: &FileEncoding, sections: &[Vec<u8>]) -> Result<Vec<u8>> {
        self.run("file", &sections.concat())
    }

    fn encode_volume(&self, _fv: &Fv, files: &[Vec<u8>]) -> Result<Vec<u8>> {
        self.run("volume", &files.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_framing_is_tag_length_payload() {
        let framed = StubToolchain::frame(StubToolchain::TAG_SECTION, b"abc");
        assert_eq!(framed, vec![0x53, 3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn stub_reports_unknown_modules() {
        let stub = StubToolchain::new();
        assert!(stub.resolve_module(Path::new("Missing.inf")).is_err());
    }

    #[test]
    fn stub_depex_encoding_is_end_terminated_pi_form() {
        let stub = StubToolchain::new();
        let ops = vec![DepexOp::Push([0x11; 16]), DepexOp::End];
        let bytes = stub.encode_depex(DepexKind::Dxe, &ops).unwrap();
        assert_eq!(bytes.len(), 1 + 16 + 1);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[17], 0x08);
    }

    #[test]
    fn stub_image_encoding_preserves_the_payload() {
        let stub = StubToolchain::new();
        assert_eq!(stub.encode_image("PE32", b"MZ..").unwrap(), b"MZ..");
    }

    #[test]
    fn command_image_encoding_passes_through_when_unconfigured() {
        let toolchain = CommandToolchain::new(HashMap::new());
        assert_eq!(toolchain.encode_image("TE", b"VZ..").unwrap(), b"VZ..");
    }

    #[test]
    fn stub_symbol_lookup_round_trips() {
        let mut stub = StubToolchain::new();
        stub.insert_symbol("gProto", "8C8CE578-8A3D-4F1C-9935-896185C32DD3");
        assert_eq!(
            stub.resolve_symbol("gProto").as_deref(),
            Some("8C8CE578-8A3D-4F1C-9935-896185C32DD3")
        );
        assert!(stub.resolve_symbol("gOther").is_none());
    }
}
