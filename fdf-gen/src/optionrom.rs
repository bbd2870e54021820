//! Option ROM composition: driver images and pre-built blobs concatenated
//! in declaration order.

use std::path::Path;

use fdf_parser::document::{Document, OptionRom, OptionRomEntry};
use fdf_parser::error::{FdfError, Result};

use crate::toolchain::Toolchain;

pub fn build_option_rom(
    _document: &Document,
    toolchain: &dyn Toolchain,
    base_dir: &Path,
    rom: &OptionRom,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in &rom.entries {
        match entry {
            OptionRomEntry::Inf(inf) => {
                let info = toolchain.resolve_module(&base_dir.join(&inf.path))?;
                for output in &info.outputs {
                    out.extend_from_slice(&output.data);
                }
            }
            OptionRomEntry::File { path, .. } => {
                let resolved = base_dir.join(path);
                out.extend(std::fs::read(&resolved).map_err(|e| {
                    FdfError::Io(format!("cannot read '{}': {}", resolved.display(), e))
                })?);
            }
        }
    }
    Ok(out)
}
