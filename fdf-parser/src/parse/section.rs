//! `FILE` statements and the recursive `SECTION` grammar shared by FV file
//! statements and rule bodies.
//!
//! Leaf forms:
//!   SECTION [Align=..] [BUILD_NUM=..] UI = "<string>"
//!   SECTION [Align=..] [BUILD_NUM=..] VERSION = "<string>"
//!   SECTION [Align=..] RAW = <path>
//!   SECTION [Align=..] FV_IMAGE = <fv-name>
//!   SECTION [Align=..] PEI_DEPEX_EXP|DXE_DEPEX_EXP|SMM_DEPEX_EXP = { <expr> }
//!   SECTION [Align=..] <type> = <path>
//!   SECTION [Align=..] <type> <file-type> [EXT <.ext>] [FILE <path>] [OPTIONAL]
//!
//! Encapsulation forms:
//!   SECTION [Align=..] COMPRESS [PI_STD|PI_NONE] { <sections> }
//!   SECTION [Align=..] GUIDED <guid> [PROCESSING_REQUIRED=..]
//!           [AUTH_STATUS_VALID=..] [EXTRA_HEADER_SIZE=..] { <sections> }

use crate::document::{
    Alignment, CompressType, DepexKind, FileStatement, LeafKind, SectionSpec,
};
use crate::error::{Result, SemanticError, SyntaxError};

use super::Parser;

/// The part of a `FILE` statement after the `FILE` keyword:
/// `<ffs-type> = <guid> [Align=..] [FIXED] [CHECKSUM] { <sections> }`.
pub(super) fn parse_file_statement(parser: &mut Parser) -> Result<FileStatement> {
    let type_tok = parser.reader.require_token("an FFS file type")?;
    let location = type_tok.location.clone();
    parser.reader.expect("=")?;
    let guid = parser.guid_value("an FFS file GUID")?;

    let mut alignment = None;
    let mut fixed = false;
    let mut checksum = false;
    loop {
        if parser.reader.try_keyword("Align") {
            parser.reader.expect("=")?;
            alignment = Some(parser.alignment_value()?);
            continue;
        }
        if parser.reader.try_keyword("FIXED") {
            fixed = true;
            continue;
        }
        if parser.reader.try_keyword("CHECKSUM") {
            checksum = true;
            continue;
        }
        break;
    }

    parser.reader.expect("{")?;
    let sections = parse_section_list(parser)?;
    Ok(FileStatement {
        file_type: type_tok.text.to_ascii_uppercase(),
        guid,
        alignment,
        fixed,
        checksum,
        sections,
        location,
    })
}

/// Section statements up to the closing `}` (consumed).
pub(super) fn parse_section_list(parser: &mut Parser) -> Result<Vec<SectionSpec>> {
    let mut sections = Vec::new();
    loop {
        if parser.reader.try_separator('}') {
            return Ok(sections);
        }
        parser.reader.expect("SECTION")?;
        sections.push(parse_section(parser)?);
    }
}

pub(super) fn parse_section(parser: &mut Parser) -> Result<SectionSpec> {
    let mut alignment: Option<Alignment> = None;
    let mut build_num: Option<u32> = None;
    loop {
        if parser.reader.try_keyword("Align") {
            parser.reader.expect("=")?;
            alignment = Some(parser.alignment_value()?);
            continue;
        }
        if parser.reader.try_keyword("BUILD_NUM") {
            parser.reader.expect("=")?;
            let (n, tok) = parser.integer_value("BUILD_NUM")?;
            build_num = Some(u32::try_from(n).map_err(|_| SemanticError::IllegalValue {
                location: tok.location,
                field: "BUILD_NUM",
                value: tok.text,
            })?);
            continue;
        }
        break;
    }

    if parser.reader.try_keyword("COMPRESS") {
        let compress_type = if parser.reader.try_keyword("PI_NONE") {
            CompressType::PiNone
        } else {
            // PI_STD is the default and may be spelled out.
            parser.reader.try_keyword("PI_STD");
            CompressType::PiStd
        };
        parser.reader.expect("{")?;
        let children = parse_section_list(parser)?;
        return Ok(SectionSpec::Compress {
            compress_type,
            alignment,
            children,
        });
    }

    if parser.reader.try_keyword("GUIDED") {
        let guid = parser.guid_value("a section GUID")?;
        let mut processing_required = false;
        let mut auth_status_valid = false;
        let mut extra_header_size = 0u32;
        let mut transform = None;
        loop {
            if parser.reader.try_keyword("PROCESSING_REQUIRED") {
                parser.reader.expect("=")?;
                processing_required = parser.bool_value("PROCESSING_REQUIRED")?;
                continue;
            }
            if parser.reader.try_keyword("AUTH_STATUS_VALID") {
                parser.reader.expect("=")?;
                auth_status_valid = parser.bool_value("AUTH_STATUS_VALID")?;
                continue;
            }
            if parser.reader.try_keyword("EXTRA_HEADER_SIZE") {
                parser.reader.expect("=")?;
                let (n, tok) = parser.integer_value("EXTRA_HEADER_SIZE")?;
                extra_header_size =
                    u32::try_from(n).map_err(|_| SemanticError::IllegalValue {
                        location: tok.location,
                        field: "EXTRA_HEADER_SIZE",
                        value: tok.text,
                    })?;
                continue;
            }
            if parser.reader.try_keyword("TRANSFORM") {
                parser.reader.expect("=")?;
                transform = Some(parser.value_token("a transform name")?.text);
                continue;
            }
            break;
        }
        parser.reader.expect("{")?;
        let children = parse_section_list(parser)?;
        return Ok(SectionSpec::GuidDefined {
            guid,
            processing_required,
            auth_status_valid,
            extra_header_size,
            transform,
            alignment,
            children,
        });
    }

    let kind = parse_leaf(parser)?;
    Ok(SectionSpec::Leaf {
        kind,
        alignment,
        build_num,
    })
}

fn parse_leaf(parser: &mut Parser) -> Result<LeafKind> {
    if parser.reader.try_keyword("UI") {
        parser.reader.expect("=")?;
        return Ok(LeafKind::Ui(parser.value_token("a UI string")?.text));
    }
    if parser.reader.try_keyword("VERSION") {
        parser.reader.expect("=")?;
        return Ok(LeafKind::Version(
            parser.value_token("a version string")?.text,
        ));
    }
    if parser.reader.try_keyword("RAW") {
        parser.reader.expect("=")?;
        let mut paths = vec![parser.value_token("a raw file path")?.text];
        while parser.reader.try_separator('|') {
            paths.push(parser.value_token("a raw file path")?.text);
        }
        return Ok(LeafKind::Raw(paths));
    }
    if parser.reader.try_keyword("FV_IMAGE") {
        parser.reader.expect("=")?;
        return Ok(LeafKind::FvImage(parser.value_token("an FV name")?.text));
    }
    for (keyword, kind) in [
        ("PEI_DEPEX_EXP", DepexKind::Pei),
        ("DXE_DEPEX_EXP", DepexKind::Dxe),
        ("SMM_DEPEX_EXP", DepexKind::Smm),
    ] {
        if parser.reader.try_keyword(keyword) {
            parser.reader.expect("=")?;
            return Ok(LeafKind::Depex {
                kind,
                expression: parse_depex_text(parser)?,
            });
        }
    }

    // Typed build-output leaf.
    let section_type = parser.reader.require_token("a section type")?;
    if section_type.is_separator('}') || section_type.is_separator('[') {
        return Err(SyntaxError::Expected {
            location: section_type.location,
            expected: "a section type".into(),
            found: section_type.text,
        }
        .into());
    }
    // `SECTION <type> = <path>` names an explicit file for the leaf.
    if parser.reader.try_separator('=') {
        let path = parser.value_token("a section file path")?;
        return Ok(LeafKind::TypedOutput {
            section_type: section_type.text.to_ascii_uppercase(),
            file_type: section_type.text.to_ascii_uppercase(),
            extension: None,
            filename: Some(path.text),
            optional: false,
        });
    }
    let file_type = parser.reader.require_token("a build-output file type")?;
    let mut extension = None;
    let mut filename = None;
    let mut optional = false;
    loop {
        if parser.reader.try_keyword("EXT") {
            extension = Some(parser.value_token("an extension")?.text);
            continue;
        }
        if parser.reader.try_keyword("FILE") {
            filename = Some(parser.value_token("a file path")?.text);
            continue;
        }
        if parser.reader.try_keyword("OPTIONAL") {
            optional = true;
            continue;
        }
        break;
    }
    Ok(LeafKind::TypedOutput {
        section_type: section_type.text.to_ascii_uppercase(),
        file_type: file_type.text.to_ascii_uppercase(),
        extension,
        filename,
        optional,
    })
}

/// `{ <tokens> }` captured as one whitespace-joined expression string; the
/// Depex sub-compiler tokenizes it later.
fn parse_depex_text(parser: &mut Parser) -> Result<String> {
    parser.reader.expect("{")?;
    let mut parts: Vec<String> = Vec::new();
    loop {
        let tok = parser.reader.require_token("a Depex expression or '}'")?;
        if tok.is_separator('}') {
            return Ok(parts.join(" "));
        }
        parts.push(tok.text);
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{CompressType, DepexKind, FvFile, LeafKind, SectionSpec};
    use crate::session::CompileSession;
    use crate::source::SourceBuffer;

    fn parse_text(text: &str) -> crate::document::Document {
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        super::super::parse(&buf, &mut session).unwrap()
    }

    const NESTED_FILE: &str = "\
[FV.A]
FILE FV_IMAGE = 9E21FD93-9C72-4C15-8C4B-E77F1DB2D792 {
  SECTION GUIDED EE4E5898-3914-4259-9D6E-DC7BD79403CF PROCESSING_REQUIRED = TRUE {
    SECTION COMPRESS PI_STD {
      SECTION Align=16 FV_IMAGE = FVMAIN
    }
  }
}
";

    #[test]
    fn encapsulation_sections_nest() {
        let doc = parse_text(NESTED_FILE);
        let fv = doc.fv("A").unwrap();
        let file = match &fv.files[0] {
            FvFile::File(f) => f,
            other => panic!("expected a FILE statement, got {:?}", other),
        };
        assert_eq!(file.file_type, "FV_IMAGE");
        let SectionSpec::GuidDefined {
            guid,
            processing_required,
            children,
            ..
        } = &file.sections[0]
        else {
            panic!("expected a guided section");
        };
        assert_eq!(guid, "EE4E5898-3914-4259-9D6E-DC7BD79403CF");
        assert!(processing_required);
        let SectionSpec::Compress {
            compress_type,
            children: inner,
            ..
        } = &children[0]
        else {
            panic!("expected a compress section");
        };
        assert_eq!(*compress_type, CompressType::PiStd);
        assert!(matches!(
            &inner[0],
            SectionSpec::Leaf {
                kind: LeafKind::FvImage(name),
                ..
            } if name == "FVMAIN"
        ));
    }

    #[test]
    fn depex_expression_text_is_captured() {
        let doc = parse_text(
            "[FV.A]\nFILE DRIVER = 1A1E2341-A373-4A98-A3E6-D7E6FDAB3CCC {\n\
             SECTION DXE_DEPEX_EXP = { gEfiVariableArchProtocolGuid AND gEfiBdsArchProtocolGuid }\n\
             SECTION PE32 PE32 OPTIONAL\n}\n",
        );
        let fv = doc.fv("A").unwrap();
        let FvFile::File(file) = &fv.files[0] else {
            panic!("expected a FILE statement");
        };
        assert!(matches!(
            &file.sections[0],
            SectionSpec::Leaf {
                kind: LeafKind::Depex { kind: DepexKind::Dxe, expression },
                ..
            } if expression == "gEfiVariableArchProtocolGuid AND gEfiBdsArchProtocolGuid"
        ));
        assert!(matches!(
            &file.sections[1],
            SectionSpec::Leaf {
                kind: LeafKind::TypedOutput { optional: true, .. },
                ..
            }
        ));
    }
}
