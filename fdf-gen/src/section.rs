//! Recursive section composition.
//!
//! Every section spec becomes encoded bytes plus the alignment its parent
//! must honor. Leaves either carry their payload in the document (UI,
//! VERSION, inline data), name an input file, reference a nested FV, or
//! select build outputs of the owning module; encapsulations build their
//! children first, pad a sibling only when it declares an alignment, and
//! wrap the concatenation. An encapsulation's effective alignment is the
//! maximum of its own declared alignment and its children's.
//!
//! An `OPTIONAL` typed leaf whose module has no matching output vanishes
//! without error; any other unmatched selection is fatal.

use fdf_parser::document::{LeafKind, SectionSpec};
use fdf_parser::error::{Result, SemanticError};

use crate::depex;
use crate::toolchain::{ModuleInfo, SectionEncoding};
use crate::GenContext;

/// An encoded section and the alignment the parent must place it at.
pub struct BuiltSection {
    pub data: Vec<u8>,
    pub alignment: u64,
}

/// Build one section. `owner` names the enclosing module or file statement
/// for diagnostics; `module` is present when the section tree comes from a
/// rule applied to a module.
pub fn build_section(
    ctx: &mut GenContext,
    spec: &SectionSpec,
    owner: &str,
    module: Option<&ModuleInfo>,
) -> Result<Option<BuiltSection>> {
    let declared = spec.declared_alignment().map(|a| a.bytes()).unwrap_or(1);
    match spec {
        SectionSpec::Leaf {
            kind, build_num, ..
        } => build_leaf(ctx, kind, build_num.unwrap_or(0), owner, module).map(|opt| {
            opt.map(|data| BuiltSection {
                data,
                alignment: declared,
            })
        }),
        SectionSpec::Compress {
            compress_type,
            children,
            ..
        } => {
            let (payload, children_align) = build_children(ctx, children, owner, module)?;
            let compressed = ctx.toolchain().compress(*compress_type, &payload)?;
            let data = ctx
                .toolchain()
                .encode_section(&SectionEncoding::Compressed(*compress_type), &compressed)?;
            Ok(Some(BuiltSection {
                data,
                alignment: declared.max(children_align),
            }))
        }
        SectionSpec::GuidDefined {
            guid,
            processing_required,
            auth_status_valid,
            extra_header_size,
            transform,
            children,
            ..
        } => {
            let (mut payload, children_align) = build_children(ctx, children, owner, module)?;
            if let Some(name) = transform {
                payload = ctx.toolchain().transform(name, &payload)?;
            }
            let encoding = SectionEncoding::Guided {
                guid: guid.clone(),
                processing_required: *processing_required,
                auth_status_valid: *auth_status_valid,
                extra_header_size: *extra_header_size,
            };
            let data = ctx.toolchain().encode_section(&encoding, &payload)?;
            Ok(Some(BuiltSection {
                data,
                alignment: declared.max(children_align),
            }))
        }
    }
}

/// Concatenate child sections, padding a sibling only up to the alignment
/// it declares, and report the strictest child alignment so the parent
/// can propagate it outward.
fn build_children(
    ctx: &mut GenContext,
    children: &[SectionSpec],
    owner: &str,
    module: Option<&ModuleInfo>,
) -> Result<(Vec<u8>, u64)> {
    let mut out: Vec<u8> = Vec::new();
    let mut max_align = 1u64;
    for child in children {
        let Some(built) = build_section(ctx, child, owner, module)? else {
            continue;
        };
        if let Some(align) = child.declared_alignment().map(|a| a.bytes() as usize) {
            let pad = (align - out.len() % align) % align;
            out.resize(out.len() + pad, 0);
        }
        max_align = max_align.max(built.alignment);
        out.extend_from_slice(&built.data);
    }
    Ok((out, max_align))
}

fn build_leaf(
    ctx: &mut GenContext,
    kind: &LeafKind,
    build_num: u32,
    owner: &str,
    module: Option<&ModuleInfo>,
) -> Result<Option<Vec<u8>>> {
    match kind {
        LeafKind::Ui(text) => {
            let payload = utf16_payload(&substitute_module(text, module));
            let data = ctx
                .toolchain()
                .encode_section(&SectionEncoding::Ui(text.clone()), &payload)?;
            Ok(Some(data))
        }
        LeafKind::Version(text) => {
            let string = substitute_module(text, module);
            let mut payload = build_num.to_le_bytes().to_vec();
            payload.extend(utf16_payload(&string));
            let encoding = SectionEncoding::Version {
                string,
                build_num,
            };
            Ok(Some(ctx.toolchain().encode_section(&encoding, &payload)?))
        }
        LeafKind::Raw(paths) => {
            let mut payload = Vec::new();
            for path in paths {
                payload.extend(ctx.read_input(&substitute_module(path, module))?);
            }
            Ok(Some(
                ctx.toolchain()
                    .encode_section(&SectionEncoding::Raw, &payload)?,
            ))
        }
        LeafKind::FvImage(name) => {
            let payload = ctx.fv_bytes(name, owner)?;
            Ok(Some(
                ctx.toolchain()
                    .encode_section(&SectionEncoding::FvImage, &payload)?,
            ))
        }
        LeafKind::Depex { kind, expression } => {
            let ops = depex::compile(expression, owner, |sym| ctx.symbol_guid(sym))?;
            let payload = ctx.toolchain().encode_depex(*kind, &ops)?;
            Ok(Some(
                ctx.toolchain()
                    .encode_section(&SectionEncoding::Depex(*kind), &payload)?,
            ))
        }
        LeafKind::TypedOutput {
            section_type,
            file_type,
            extension,
            filename,
            optional,
        } => {
            let payload = if let Some(file) = filename {
                ctx.read_input(&substitute_module(file, module))?
            } else {
                let Some(info) = module else {
                    return Err(SemanticError::UnknownReference {
                        kind: "build output",
                        name: file_type.clone(),
                        referrer: owner.to_string(),
                    }
                    .into());
                };
                let matched: Vec<&[u8]> = info
                    .outputs
                    .iter()
                    .filter(|o| {
                        o.file_type.eq_ignore_ascii_case(file_type)
                            && extension
                                .as_deref()
                                .map(|e| o.extension.eq_ignore_ascii_case(e))
                                .unwrap_or(true)
                    })
                    .map(|o| o.data.as_slice())
                    .collect();
                if matched.is_empty() {
                    if *optional {
                        return Ok(None);
                    }
                    return Err(SemanticError::UnknownReference {
                        kind: "build output",
                        name: file_type.clone(),
                        referrer: owner.to_string(),
                    }
                    .into());
                }
                matched.concat()
            };
            // Executable payloads may need relocation stripping or TE
            // conversion before framing.
            let payload = match section_type.to_ascii_uppercase().as_str() {
                "PE32" | "PIC" | "TE" => ctx.toolchain().encode_image(section_type, &payload)?,
                _ => payload,
            };
            Ok(Some(ctx.toolchain().encode_section(
                &SectionEncoding::Typed(section_type.clone()),
                &payload,
            )?))
        }
    }
}

/// Expand `$(MODULE_NAME)` against the owning module, when there is one.
fn substitute_module(text: &str, module: Option<&ModuleInfo>) -> String {
    match module {
        Some(info) => text.replace("$(MODULE_NAME)", &info.name),
        None => text.to_string(),
    }
}

/// UTF-16LE with a terminating NUL, the layout UI and VERSION payloads use.
fn utf16_payload(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((text.len() + 1) * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdf_parser::document::{Alignment, CompressType, Document};
    use fdf_parser::document::{DepexKind, LeafKind, SectionSpec};
    use crate::toolchain::StubToolchain;

    fn leaf_ui(text: &str) -> SectionSpec {
        SectionSpec::Leaf {
            kind: LeafKind::Ui(text.into()),
            alignment: None,
            build_num: None,
        }
    }

    #[test]
    fn guided_wrap_is_longer_than_its_payload() {
        let document = Document::default();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let spec = SectionSpec::GuidDefined {
            guid: "EE4E5898-3914-4259-9D6E-DC7BD79403CF".into(),
            processing_required: true,
            auth_status_valid: false,
            extra_header_size: 0,
            transform: None,
            alignment: Some(Alignment::Bytes(8)),
            children: vec![leaf_ui("Shell")],
        };
        let inner = build_section(&mut ctx, &leaf_ui("Shell"), "t", None)
            .unwrap()
            .unwrap();
        let wrapped = build_section(&mut ctx, &spec, "t", None).unwrap().unwrap();
        assert!(wrapped.data.len() > inner.data.len());
        assert_eq!(wrapped.alignment, 8);
    }

    #[test]
    fn compress_section_wraps_children() {
        let document = Document::default();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let spec = SectionSpec::Compress {
            compress_type: CompressType::PiStd,
            alignment: None,
            children: vec![leaf_ui("A"), leaf_ui("B")],
        };
        let built = build_section(&mut ctx, &spec, "t", None).unwrap().unwrap();
        // stub framing: outer tag+len plus two framed children
        assert_eq!(built.data[0], StubToolchain::TAG_SECTION);
        assert!(built.data.len() > 10);
    }

    #[test]
    fn encapsulation_alignment_is_max_of_children() {
        let document = Document::default();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let spec = SectionSpec::GuidDefined {
            guid: "EE4E5898-3914-4259-9D6E-DC7BD79403CF".into(),
            processing_required: false,
            auth_status_valid: false,
            extra_header_size: 0,
            transform: None,
            alignment: Some(Alignment::Bytes(8)),
            children: vec![SectionSpec::Leaf {
                kind: LeafKind::Ui("Shell".into()),
                alignment: Some(Alignment::Bytes(64)),
                build_num: None,
            }],
        };
        let built = build_section(&mut ctx, &spec, "t", None).unwrap().unwrap();
        assert_eq!(built.alignment, 64);
    }

    #[test]
    fn untransformed_guided_length_is_header_plus_leaves() {
        let document = Document::default();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let inner: usize = ["A", "B"]
            .iter()
            .map(|t| {
                build_section(&mut ctx, &leaf_ui(t), "t", None)
                    .unwrap()
                    .unwrap()
                    .data
                    .len()
            })
            .sum();
        let spec = SectionSpec::GuidDefined {
            guid: "EE4E5898-3914-4259-9D6E-DC7BD79403CF".into(),
            processing_required: false,
            auth_status_valid: false,
            extra_header_size: 0,
            transform: None,
            alignment: None,
            children: vec![leaf_ui("A"), leaf_ui("B")],
        };
        let wrapped = build_section(&mut ctx, &spec, "t", None).unwrap().unwrap();
        // unaligned siblings pack tightly: header + exact leaf sum
        assert_eq!(wrapped.data.len(), 5 + inner);
    }

    #[test]
    fn optional_typed_leaf_without_match_vanishes() {
        let document = Document::default();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let module = ModuleInfo {
            name: "M".into(),
            guid: "8C8CE578-8A3D-4F1C-9935-896185C32DD3".into(),
            module_type: "DXE_DRIVER".into(),
            outputs: Vec::new(),
        };
        let spec = SectionSpec::Leaf {
            kind: LeafKind::TypedOutput {
                section_type: "PE32".into(),
                file_type: "PE32".into(),
                extension: None,
                filename: None,
                optional: true,
            },
            alignment: None,
            build_num: None,
        };
        assert!(build_section(&mut ctx, &spec, "t", Some(&module))
            .unwrap()
            .is_none());

        let required = SectionSpec::Leaf {
            kind: LeafKind::TypedOutput {
                section_type: "PE32".into(),
                file_type: "PE32".into(),
                extension: None,
                filename: None,
                optional: false,
            },
            alignment: None,
            build_num: None,
        };
        assert!(build_section(&mut ctx, &required, "t", Some(&module)).is_err());
    }

    #[test]
    fn depex_leaf_encodes_through_the_symbol_cache() {
        let document = Document::default();
        let mut stub = StubToolchain::new();
        stub.insert_symbol("gProto", "8C8CE578-8A3D-4F1C-9935-896185C32DD3");
        let mut ctx = GenContext::new(&document, &stub, ".", ".");
        let spec = SectionSpec::Leaf {
            kind: LeafKind::Depex {
                kind: DepexKind::Dxe,
                expression: "gProto".into(),
            },
            alignment: None,
            build_num: None,
        };
        let built = build_section(&mut ctx, &spec, "t", None).unwrap().unwrap();
        // framed payload: PUSH + guid + END
        assert_eq!(built.data.len(), 5 + 18);
    }
}
