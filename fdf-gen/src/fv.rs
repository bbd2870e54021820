//! Firmware volume composition: apriori files, rule-driven module files,
//! and explicit FILE statements, wrapped by the volume encoder.

use fdf_parser::document::{Apriori, AprioriKind, FileStatement, Fv, FvFile, InfStatement};
use fdf_parser::error::{Result, SemanticError};
use fdf_parser::scope::COMMON_ARCH;

use crate::guid;
use crate::section::{self, BuiltSection};
use crate::toolchain::FileEncoding;
use crate::GenContext;

/// Well-known file GUIDs of the PEI and DXE dispatch-hint lists.
const PEI_APRIORI_GUID: &str = "1B45CC0A-156A-428A-AF62-49864DA0E6E6";
const DXE_APRIORI_GUID: &str = "FC510EE7-FFDC-11D4-BD41-0080C73C8881";

pub fn build_fv(ctx: &mut GenContext, fv: &Fv) -> Result<Vec<u8>> {
    let mut files: Vec<Vec<u8>> = Vec::new();
    // The PEI hint list always precedes the DXE one, whatever order the
    // source declares them in.
    let (pei, dxe): (Vec<_>, Vec<_>) = fv
        .apriori
        .iter()
        .partition(|a| a.kind == AprioriKind::Pei);
    for apriori in pei.into_iter().chain(dxe) {
        files.push(build_apriori(ctx, apriori)?);
    }
    for file in &fv.files {
        match file {
            FvFile::Inf(inf) => files.push(build_module_file(ctx, inf)?),
            FvFile::File(stmt) => files.push(build_file_statement(ctx, stmt)?),
        }
    }
    ctx.toolchain().encode_volume(fv, &files)
}

/// The apriori file is a RAW-section file whose payload is the ordered
/// module GUID list.
fn build_apriori(ctx: &mut GenContext, apriori: &Apriori) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(apriori.entries.len() * 16);
    for inf_path in &apriori.entries {
        let info = ctx.module_info(inf_path)?;
        payload.extend_from_slice(&guid::parse(&info.guid)?);
    }
    let section = ctx
        .toolchain()
        .encode_section(&crate::toolchain::SectionEncoding::Raw, &payload)?;
    let file_guid = match apriori.kind {
        AprioriKind::Pei => PEI_APRIORI_GUID,
        AprioriKind::Dxe => DXE_APRIORI_GUID,
    };
    let encoding = FileEncoding {
        file_type: "FREEFORM".into(),
        guid: file_guid.into(),
        alignment: 1,
        fixed: false,
        checksum: false,
    };
    ctx.toolchain().encode_file(&encoding, &[section])
}

/// Apply the matching build rule to a referenced module.
fn build_module_file(ctx: &mut GenContext, inf: &InfStatement) -> Result<Vec<u8>> {
    let info = ctx.module_info(&inf.path)?;
    let arch = inf.arch.as_deref().unwrap_or(COMMON_ARCH);
    let rule = ctx
        .document()
        .find_rule(arch, &info.module_type, inf.rule_override.as_deref())
        .ok_or_else(|| SemanticError::NoMatchingRule {
            arch: arch.to_string(),
            module_type: info.module_type.clone(),
            module: inf.path.clone(),
        })?;

    let mut sections: Vec<Vec<u8>> = Vec::new();
    for spec in &rule.sections {
        if let Some(BuiltSection { data, .. }) =
            section::build_section(ctx, spec, &inf.path, Some(&info))?
        {
            sections.push(data);
        }
    }
    let encoding = FileEncoding {
        file_type: rule.file_type.clone(),
        // A literal rule GUID pins the file; otherwise the module's own.
        guid: rule.guid.clone().unwrap_or_else(|| info.guid.clone()),
        alignment: rule.alignment.map(|a| a.bytes()).unwrap_or(1),
        fixed: rule.fixed,
        checksum: rule.checksum,
    };
    ctx.toolchain().encode_file(&encoding, &sections)
}

fn build_file_statement(ctx: &mut GenContext, stmt: &FileStatement) -> Result<Vec<u8>> {
    let owner = format!("FILE {} = {}", stmt.file_type, stmt.guid);
    let mut sections: Vec<Vec<u8>> = Vec::new();
    for spec in &stmt.sections {
        if let Some(BuiltSection { data, .. }) =
            section::build_section(ctx, spec, &owner, None)?
        {
            sections.push(data);
        }
    }
    let encoding = FileEncoding {
        file_type: stmt.file_type.clone(),
        guid: stmt.guid.clone(),
        alignment: stmt.alignment.map(|a| a.bytes()).unwrap_or(1),
        fixed: stmt.fixed,
        checksum: stmt.checksum,
    };
    ctx.toolchain().encode_file(&encoding, &sections)
}

#[cfg(test)]
mod tests {
    use crate::toolchain::{ModuleInfo, ModuleOutput, StubToolchain};
    use crate::GenContext;
    use fdf_parser::{CompileSession, SourceBuffer};

    fn stub_with_module() -> StubToolchain {
        let mut stub = StubToolchain::new();
        stub.insert_module(
            "./Drivers/Main.inf",
            ModuleInfo {
                name: "Main".into(),
                guid: "9E21FD93-9C72-4C15-8C4B-E77F1DB2D792".into(),
                module_type: "DXE_DRIVER".into(),
                outputs: vec![ModuleOutput {
                    file_type: "PE32".into(),
                    extension: ".efi".into(),
                    data: vec![0xAA; 64],
                }],
            },
        );
        stub
    }

    const FV_WITH_RULE: &str = "\
[FV.FVMAIN]
INF Drivers/Main.inf

[Rule.Common.DXE_DRIVER]
FILE DRIVER = $(NAMED_GUID) {
  SECTION PE32 PE32
  SECTION UI = \"$(MODULE_NAME)\"
}
";

    #[test]
    fn module_file_is_built_through_its_rule() {
        let buf = SourceBuffer::new("t.fdf", FV_WITH_RULE);
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let stub = stub_with_module();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let data = ctx.fv_bytes("FVMAIN", "test").unwrap();
        assert_eq!(data[0], StubToolchain::TAG_VOLUME);
        // volume > file > two sections > 64-byte PE32 payload
        assert!(data.len() > 64 + 15);
    }

    #[test]
    fn missing_rule_is_fatal() {
        let buf = SourceBuffer::new("t.fdf", "[FV.FVMAIN]\nINF Drivers/Main.inf\n");
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let stub = stub_with_module();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        assert!(ctx.fv_bytes("FVMAIN", "test").is_err());
    }

    #[test]
    fn pei_apriori_file_precedes_the_dxe_one() {
        let text = "\
[FV.FVMAIN]
APRIORI DXE {
  INF Drivers/DxeCore.inf
}
APRIORI PEI {
  INF Drivers/PeiCore.inf
}
";
        const PEI_GUID: &str = "52C05B14-0B98-496C-BC3B-04B50211D680";
        const DXE_GUID: &str = "D6A2CB7F-6A18-4E2F-B43B-9920A733700A";
        let mut stub = StubToolchain::new();
        for (path, guid) in [
            ("./Drivers/PeiCore.inf", PEI_GUID),
            ("./Drivers/DxeCore.inf", DXE_GUID),
        ] {
            stub.insert_module(
                path,
                ModuleInfo {
                    name: "Core".into(),
                    guid: guid.into(),
                    module_type: "DXE_DRIVER".into(),
                    outputs: Vec::new(),
                },
            );
        }
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let data = ctx.fv_bytes("FVMAIN", "test").unwrap();
        // volume frame (5) > first file frame (5) > raw section frame (5)
        // > the hint-list GUID, which must be the PEI module's
        let expected = crate::guid::parse(PEI_GUID).unwrap();
        assert_eq!(&data[15..31], expected.as_slice());
    }

    #[test]
    fn volumes_are_memoized_per_run() {
        let buf = SourceBuffer::new("t.fdf", FV_WITH_RULE);
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let stub = stub_with_module();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let first = ctx.fv_bytes("FVMAIN", "test").unwrap();
        let second = ctx.fv_bytes("fvmain", "test").unwrap();
        assert_eq!(first, second);
    }
}
