//! # fdf-gen
//!
//! Image generation back end of the FDF compiler. Consumes the read-only
//! [`Document`] the front end produced, validates cross-references and
//! layout invariants, and composes flash device images, firmware volumes,
//! capsules, and option ROMs. Byte-level encoding is delegated to a
//! [`toolchain::Toolchain`] collaborator.
//!
//! All per-run state (memoized volumes, resolved modules, Depex symbols)
//! lives in [`GenContext`]; nothing is shared across runs.

pub mod capsule;
pub mod depex;
pub mod fd;
pub mod fv;
pub mod guid;
pub mod optionrom;
pub mod section;
pub mod toolchain;
pub mod xref;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::info;

use fdf_parser::document::Document;
use fdf_parser::error::{FdfError, Result, SemanticError};

use toolchain::{ModuleInfo, Toolchain};

/// One planned output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// Per-run generation state: the document, the encoder seam, and the
/// memo caches that guarantee each volume, module, and symbol is resolved
/// at most once per run.
pub struct GenContext<'a> {
    document: &'a Document,
    toolchain: &'a dyn Toolchain,
    base_dir: PathBuf,
    output_dir: PathBuf,
    fv_cache: HashMap<String, Vec<u8>>,
    capsule_cache: HashMap<String, Vec<u8>>,
    module_cache: HashMap<String, ModuleInfo>,
    symbol_cache: HashMap<String, Option<String>>,
}

impl<'a> GenContext<'a> {
    pub fn new(
        document: &'a Document,
        toolchain: &'a dyn Toolchain,
        base_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            document,
            toolchain,
            base_dir: base_dir.into(),
            output_dir: output_dir.into(),
            fv_cache: HashMap::new(),
            capsule_cache: HashMap::new(),
            module_cache: HashMap::new(),
            symbol_cache: HashMap::new(),
        }
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Check cross-references, then compose every declared artifact.
    /// Nothing is written to disk.
    pub fn plan(&mut self) -> Result<Vec<Artifact>> {
        let document = self.document;
        xref::check(document)?;
        let mut artifacts = Vec::new();
        for fd in &document.fds {
            let data = fd::assemble_fd(self, fd)?;
            let file = fd
                .create_file
                .clone()
                .unwrap_or_else(|| format!("{}.fd", fd.name.to_ascii_uppercase()));
            artifacts.push(Artifact {
                path: self.output_dir.join(file),
                data,
            });
        }
        for fv in &document.fvs {
            let data = self.fv_bytes(&fv.name, "top level")?;
            artifacts.push(Artifact {
                path: self
                    .output_dir
                    .join(format!("{}.Fv", fv.name.to_ascii_uppercase())),
                data,
            });
        }
        for capsule in &document.capsules {
            let data = self.capsule_bytes(&capsule.name, "top level")?;
            artifacts.push(Artifact {
                path: self
                    .output_dir
                    .join(format!("{}.Cap", capsule.name.to_ascii_uppercase())),
                data,
            });
        }
        for rom in &document.option_roms {
            let data =
                optionrom::build_option_rom(document, self.toolchain, &self.base_dir, rom)?;
            artifacts.push(Artifact {
                path: self
                    .output_dir
                    .join(format!("{}.rom", rom.name.to_ascii_uppercase())),
                data,
            });
        }
        Ok(artifacts)
    }

    /// Plan and write every artifact under the output directory.
    pub fn generate(&mut self) -> Result<Vec<PathBuf>> {
        let artifacts = self.plan()?;
        std::fs::create_dir_all(&self.output_dir)?;
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            info!(
                "writing {} ({} bytes)",
                artifact.path.display(),
                artifact.data.len()
            );
            std::fs::write(&artifact.path, &artifact.data)?;
            written.push(artifact.path);
        }
        Ok(written)
    }

    pub(crate) fn toolchain(&self) -> &'a dyn Toolchain {
        self.toolchain
    }

    /// Bytes of a firmware volume, built at most once per run.
    pub(crate) fn fv_bytes(&mut self, name: &str, referrer: &str) -> Result<Vec<u8>> {
        let key = name.to_ascii_uppercase();
        if let Some(cached) = self.fv_cache.get(&key) {
            return Ok(cached.clone());
        }
        let document = self.document;
        let fv = document.fv(name).ok_or_else(|| SemanticError::UnknownReference {
            kind: "FV",
            name: name.to_string(),
            referrer: referrer.to_string(),
        })?;
        let data = fv::build_fv(self, fv)?;
        self.fv_cache.insert(key, data.clone());
        Ok(data)
    }

    /// Bytes of a capsule, built at most once per run.
    pub(crate) fn capsule_bytes(&mut self, name: &str, referrer: &str) -> Result<Vec<u8>> {
        let key = name.to_ascii_uppercase();
        if let Some(cached) = self.capsule_cache.get(&key) {
            return Ok(cached.clone());
        }
        let document = self.document;
        let cap = document
            .capsule(name)
            .ok_or_else(|| SemanticError::UnknownReference {
                kind: "capsule",
                name: name.to_string(),
                referrer: referrer.to_string(),
            })?;
        let data = capsule::build_capsule(self, cap)?;
        self.capsule_cache.insert(key, data.clone());
        Ok(data)
    }

    /// Resolved module metadata, loaded at most once per run.
    pub(crate) fn module_info(&mut self, inf_path: &str) -> Result<ModuleInfo> {
        if let Some(cached) = self.module_cache.get(inf_path) {
            return Ok(cached.clone());
        }
        let resolved = self.resolve_input_path(inf_path);
        let info = self.toolchain.resolve_module(&resolved)?;
        self.module_cache.insert(inf_path.to_string(), info.clone());
        Ok(info)
    }

    /// Depex symbol resolution, memoized including misses.
    pub(crate) fn symbol_guid(&mut self, symbol: &str) -> Option<String> {
        if let Some(cached) = self.symbol_cache.get(symbol) {
            return cached.clone();
        }
        let resolved = self.toolchain.resolve_symbol(symbol);
        self.symbol_cache.insert(symbol.to_string(), resolved.clone());
        resolved
    }

    pub(crate) fn resolve_input_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub(crate) fn read_input(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve_input_path(path);
        std::fs::read(&resolved)
            .map_err(|e| FdfError::Io(format!("cannot read '{}': {}", resolved.display(), e)))
    }
}
