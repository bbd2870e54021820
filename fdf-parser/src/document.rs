//! In-memory document model for a parsed FDF file
//!
//! The [`Document`] is built once per compile invocation and is read-only
//! afterwards. Polymorphic families (region contents, section specs, capsule
//! payloads) are sum types matched exhaustively at each consumption site;
//! encapsulation sections own their children directly, the tree is acyclic
//! by construction.
//!
//! Name maps are case-insensitive-unique: insertion rejects duplicates that
//! differ only in case, and lookup ignores case.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Location, SemanticError};

/// Legal alignment values: `Auto` or a power of two up to 16M, spelled in
/// bytes or with a K/M suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alignment {
    Auto,
    Bytes(u64),
}

impl Alignment {
    const LEGAL: &'static [u64] = &[
        1,
        2,
        4,
        8,
        16,
        32,
        64,
        128,
        256,
        512,
        1 << 10,
        2 << 10,
        4 << 10,
        8 << 10,
        16 << 10,
        32 << 10,
        64 << 10,
        128 << 10,
        256 << 10,
        512 << 10,
        1 << 20,
        2 << 20,
        4 << 20,
        8 << 20,
        16 << 20,
    ];

    /// Parse an alignment token. Returns `None` for anything outside the
    /// enumerated legal set.
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("Auto") {
            return Some(Alignment::Auto);
        }
        let (digits, unit) = match token.chars().last() {
            Some('K') | Some('k') => (&token[..token.len() - 1], 1u64 << 10),
            Some('M') | Some('m') => (&token[..token.len() - 1], 1u64 << 20),
            _ => (token, 1),
        };
        let n: u64 = digits.parse().ok()?;
        let bytes = n.checked_mul(unit)?;
        Self::LEGAL.contains(&bytes).then_some(Alignment::Bytes(bytes))
    }

    /// Alignment in bytes; `Auto` normalizes to 1 (the encoder chooses).
    pub fn bytes(self) -> u64 {
        match self {
            Alignment::Auto => 1,
            Alignment::Bytes(n) => n,
        }
    }
}

/// One `BlockSize`/`NumBlocks` pair of an FD, with optional PCD bindings
/// recording where the values should be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockEntry {
    pub size: u64,
    pub count: u64,
    pub size_pcd: Option<String>,
}

/// What a region holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegionContent {
    /// One or more firmware volumes, concatenated.
    Fv(Vec<String>),
    /// One or more capsules, concatenated.
    Capsule(Vec<String>),
    /// Existing files read verbatim.
    File(Vec<String>),
    /// Literal inline bytes.
    Data(Vec<u8>),
    /// Modules placed directly by path.
    Inf(Vec<String>),
    /// Untyped: pad fill only.
    Pad,
}

/// A byte range within an FD assigned one content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub offset: u64,
    pub size: u64,
    /// PCD names bound to (offset, size), from a `Pcd|Pcd` sub-line.
    pub pcd_pair: Option<(String, String)>,
    pub content: RegionContent,
    pub location: Location,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A flash device image declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fd {
    pub name: String,
    pub base_address: u64,
    pub size: u64,
    /// Selects the pad byte: polarity 1 pads with 0xFF, 0 with 0x00.
    pub erase_polarity: u8,
    pub create_file: Option<String>,
    pub blocks: Vec<BlockEntry>,
    pub regions: Vec<Region>,
    pub location: Location,
}

impl Fd {
    pub fn pad_byte(&self) -> u8 {
        if self.erase_polarity == 1 {
            0xFF
        } else {
            0x00
        }
    }

    pub fn block_total(&self) -> u64 {
        self.blocks.iter().map(|b| b.size * b.count).sum()
    }
}

/// PEI/DXE dispatch-order hint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AprioriKind {
    Pei,
    Dxe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Apriori {
    pub kind: AprioriKind,
    /// INF paths whose module GUIDs form the hint list, in order.
    pub entries: Vec<String>,
    pub location: Location,
}

/// `FV_EXT_ENTRY` data blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FvExtEntry {
    pub entry_type: u32,
    pub data: ExtEntryData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExtEntryData {
    File(String),
    Data(Vec<u8>),
}

/// The kind of Depex being compiled; selects the external encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DepexKind {
    Pei,
    Dxe,
    Smm,
}

/// Compression sub-type for a Compress encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressType {
    PiStd,
    PiNone,
}

/// A leaf section's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LeafKind {
    /// User-interface string section.
    Ui(String),
    /// Version string section.
    Version(String),
    /// Raw file contents.
    Raw(Vec<String>),
    /// A nested firmware volume image, by FV name.
    FvImage(String),
    /// Dependency expression compiled to an opcode stream.
    Depex { kind: DepexKind, expression: String },
    /// Typed build-output leaf: files selected by (file-type, extension)
    /// against the owning module's outputs, or an explicit file.
    TypedOutput {
        section_type: String,
        file_type: String,
        extension: Option<String>,
        filename: Option<String>,
        optional: bool,
    },
}

/// One node of a section tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SectionSpec {
    Leaf {
        kind: LeafKind,
        alignment: Option<Alignment>,
        build_num: Option<u32>,
    },
    Compress {
        compress_type: CompressType,
        alignment: Option<Alignment>,
        children: Vec<SectionSpec>,
    },
    GuidDefined {
        guid: String,
        processing_required: bool,
        auth_status_valid: bool,
        extra_header_size: u32,
        /// Named external transform to pipe the concatenated children
        /// through before the final wrap.
        transform: Option<String>,
        alignment: Option<Alignment>,
        children: Vec<SectionSpec>,
    },
}

impl SectionSpec {
    pub fn declared_alignment(&self) -> Option<Alignment> {
        match self {
            SectionSpec::Leaf { alignment, .. }
            | SectionSpec::Compress { alignment, .. }
            | SectionSpec::GuidDefined { alignment, .. } => *alignment,
        }
    }
}

/// An explicit in-document FFS file built from a section list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatement {
    pub file_type: String,
    pub guid: String,
    pub alignment: Option<Alignment>,
    pub fixed: bool,
    pub checksum: bool,
    pub sections: Vec<SectionSpec>,
    pub location: Location,
}

/// A reference to an already-built module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfStatement {
    pub path: String,
    pub arch: Option<String>,
    pub rule_override: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FvFile {
    Inf(InfStatement),
    File(FileStatement),
}

/// A firmware volume declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fv {
    pub name: String,
    pub alignment: Option<Alignment>,
    pub base_address: Option<u64>,
    pub force_rebase: Option<bool>,
    /// Named boolean attribute set (ERASE_POLARITY, MEMORY_MAPPED, ...).
    pub attributes: BTreeMap<String, bool>,
    pub name_guid: Option<String>,
    pub name_string: Option<String>,
    pub blocks: Vec<BlockEntry>,
    pub ext_entries: Vec<FvExtEntry>,
    pub apriori: Vec<Apriori>,
    pub files: Vec<FvFile>,
    pub location: Location,
}

/// Key of a build rule: architecture, module type, optional template name.
/// All components compare case-insensitively (stored uppercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleKey {
    pub arch: String,
    pub module_type: String,
    pub template: Option<String>,
}

impl RuleKey {
    pub fn new(arch: &str, module_type: &str, template: Option<&str>) -> Self {
        Self {
            arch: arch.to_ascii_uppercase(),
            module_type: module_type.to_ascii_uppercase(),
            template: template.map(|t| t.to_ascii_uppercase()),
        }
    }
}

/// A template describing how a module's build outputs become FFS sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub key: RuleKey,
    pub file_type: String,
    pub guid: Option<String>,
    pub alignment: Option<Alignment>,
    pub fixed: bool,
    pub checksum: bool,
    /// Simple rules carry exactly one leaf; complex rules an explicit tree.
    pub sections: Vec<SectionSpec>,
    pub location: Location,
}

/// One capsule payload entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CapsulePayload {
    Inf(String),
    Fv(String),
    Fd(String),
    /// `FILE DATA = <path>`: arbitrary file bytes.
    File(String),
    /// `APPEND = <path>`: raw blob appended after the payload list.
    Append(String),
    /// `FMP_PAYLOAD = <name>`: reference to an `[FmpPayload]` section.
    Fmp(String),
}

/// An update capsule declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capsule {
    pub name: String,
    /// Header token/value map (CAPSULE_GUID, CAPSULE_HEADER_SIZE, ...).
    pub tokens: BTreeMap<String, String>,
    pub payloads: Vec<CapsulePayload>,
    pub location: Location,
}

impl Capsule {
    pub fn token(&self, name: &str) -> Option<&str> {
        self.tokens.get(&name.to_ascii_uppercase()).map(String::as_str)
    }
}

/// A firmware-management-protocol payload block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FmpPayload {
    pub name: String,
    pub header_init_version: u32,
    pub image_type_id: String,
    pub image_index: u32,
    pub hardware_instance: u64,
    /// Certificate GUID and monotonic count: both present or both absent.
    pub certificate_guid: Option<String>,
    pub monotonic_count: Option<u64>,
    pub image_file: Option<String>,
    pub vendor_code_file: Option<String>,
    pub location: Location,
}

/// An option-ROM image declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionRom {
    pub name: String,
    pub entries: Vec<OptionRomEntry>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OptionRomEntry {
    Inf(InfStatement),
    File { file_type: String, path: String },
}

/// The parsed FDF document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Document {
    pub fds: Vec<Fd>,
    pub fvs: Vec<Fv>,
    pub capsules: Vec<Capsule>,
    pub rules: Vec<Rule>,
    pub option_roms: Vec<OptionRom>,
    pub fmp_payloads: Vec<FmpPayload>,
    /// `SET` bindings captured during preprocessing, carried for tooling.
    pub pcds: BTreeMap<String, String>,
}

impl Document {
    pub fn fd(&self, name: &str) -> Option<&Fd> {
        self.fds.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn fv(&self, name: &str) -> Option<&Fv> {
        self.fvs.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn capsule(&self, name: &str) -> Option<&Capsule> {
        self.capsules
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn fmp_payload(&self, name: &str) -> Option<&FmpPayload> {
        self.fmp_payloads
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn option_rom(&self, name: &str) -> Option<&OptionRom> {
        self.option_roms
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn insert_fd(&mut self, fd: Fd) -> Result<(), SemanticError> {
        if self.fd(&fd.name).is_some() {
            return Err(SemanticError::DuplicateName {
                location: fd.location.clone(),
                kind: "FD",
                name: fd.name,
            });
        }
        self.fds.push(fd);
        Ok(())
    }

    pub fn insert_fv(&mut self, fv: Fv) -> Result<(), SemanticError> {
        if self.fv(&fv.name).is_some() {
            return Err(SemanticError::DuplicateName {
                location: fv.location.clone(),
                kind: "FV",
                name: fv.name,
            });
        }
        self.fvs.push(fv);
        Ok(())
    }

    pub fn insert_capsule(&mut self, capsule: Capsule) -> Result<(), SemanticError> {
        if self.capsule(&capsule.name).is_some() {
            return Err(SemanticError::DuplicateName {
                location: capsule.location.clone(),
                kind: "capsule",
                name: capsule.name,
            });
        }
        self.capsules.push(capsule);
        Ok(())
    }

    pub fn insert_fmp_payload(&mut self, payload: FmpPayload) -> Result<(), SemanticError> {
        if self.fmp_payload(&payload.name).is_some() {
            return Err(SemanticError::DuplicateName {
                location: payload.location.clone(),
                kind: "FMP payload",
                name: payload.name,
            });
        }
        self.fmp_payloads.push(payload);
        Ok(())
    }

    pub fn insert_option_rom(&mut self, rom: OptionRom) -> Result<(), SemanticError> {
        if self.option_rom(&rom.name).is_some() {
            return Err(SemanticError::DuplicateName {
                location: rom.location.clone(),
                kind: "option ROM",
                name: rom.name,
            });
        }
        self.option_roms.push(rom);
        Ok(())
    }

    pub fn insert_rule(&mut self, rule: Rule) -> Result<(), SemanticError> {
        if self.rules.iter().any(|r| r.key == rule.key) {
            return Err(SemanticError::DuplicateName {
                location: rule.location.clone(),
                kind: "rule",
                name: format!(
                    "{}.{}{}",
                    rule.key.arch,
                    rule.key.module_type,
                    rule.key
                        .template
                        .as_deref()
                        .map(|t| format!(".{}", t))
                        .unwrap_or_default()
                ),
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Rule lookup: architecture-specific first, then the COMMON fallback.
    pub fn find_rule(
        &self,
        arch: &str,
        module_type: &str,
        template: Option<&str>,
    ) -> Option<&Rule> {
        let exact = RuleKey::new(arch, module_type, template);
        self.rules
            .iter()
            .find(|r| r.key == exact)
            .or_else(|| {
                let common = RuleKey::new("COMMON", module_type, template);
                self.rules.iter().find(|r| r.key == common)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new("test.fdf", 1)
    }

    #[rstest::rstest]
    #[case("Auto", Some(Alignment::Auto))]
    #[case("8", Some(Alignment::Bytes(8)))]
    #[case("4K", Some(Alignment::Bytes(4096)))]
    #[case("16M", Some(Alignment::Bytes(16 << 20)))]
    #[case("3", None)]
    #[case("32M", None)]
    #[case("banana", None)]
    fn alignment_parses_the_legal_set_only(
        #[case] token: &str,
        #[case] expected: Option<Alignment>,
    ) {
        assert_eq!(Alignment::parse(token), expected);
    }

    #[test]
    fn name_maps_are_case_insensitive_unique() {
        let mut doc = Document::default();
        let fv = Fv {
            name: "FvMain".into(),
            alignment: None,
            base_address: None,
            force_rebase: None,
            attributes: BTreeMap::new(),
            name_guid: None,
            name_string: None,
            blocks: Vec::new(),
            ext_entries: Vec::new(),
            apriori: Vec::new(),
            files: Vec::new(),
            location: loc(),
        };
        doc.insert_fv(fv.clone()).unwrap();
        let mut dup = fv;
        dup.name = "FVMAIN".into();
        assert!(matches!(
            doc.insert_fv(dup),
            Err(SemanticError::DuplicateName { .. })
        ));
        assert!(doc.fv("fvmain").is_some());
    }

    #[test]
    fn rule_lookup_falls_back_to_common_arch() {
        let mut doc = Document::default();
        doc.insert_rule(Rule {
            key: RuleKey::new("COMMON", "PEIM", None),
            file_type: "PEIM".into(),
            guid: None,
            alignment: None,
            fixed: false,
            checksum: false,
            sections: Vec::new(),
            location: loc(),
        })
        .unwrap();
        assert!(doc.find_rule("IA32", "PEIM", None).is_some());
        assert!(doc.find_rule("IA32", "DXE_DRIVER", None).is_none());
    }

    #[test]
    fn fd_pad_byte_follows_erase_polarity() {
        let fd = Fd {
            name: "B".into(),
            base_address: 0,
            size: 0x1000,
            erase_polarity: 1,
            create_file: None,
            blocks: vec![BlockEntry {
                size: 0x1000,
                count: 1,
                size_pcd: None,
            }],
            regions: Vec::new(),
            location: loc(),
        };
        assert_eq!(fd.pad_byte(), 0xFF);
        assert_eq!(fd.block_total(), 0x1000);
    }
}
