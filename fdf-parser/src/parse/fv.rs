//! `[FV.<name>]` sections: volume attributes, ext entries, apriori lists,
//! INF references and explicit FILE statements.

use std::collections::BTreeMap;

use crate::document::{
    Apriori, AprioriKind, BlockEntry, ExtEntryData, Fv, FvExtEntry, FvFile, InfStatement,
};
use crate::error::{Location, Result, SemanticError, SyntaxError};

use super::{parse_bool, section, Parser};

pub(super) fn parse_fv(parser: &mut Parser, name: &str, location: Location) -> Result<()> {
    let mut fv = Fv {
        name: name.to_string(),
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
        location,
    };

    while !parser.at_section_end()? {
        if parser.reader.try_keyword("FvAlignment") {
            parser.reader.expect("=")?;
            fv.alignment = Some(parser.alignment_value()?);
            continue;
        }
        if parser.reader.try_keyword("FvBaseAddress") {
            parser.reader.expect("=")?;
            fv.base_address = Some(parser.integer_value("FvBaseAddress")?.0);
            continue;
        }
        if parser.reader.try_keyword("FvForceRebase") {
            parser.reader.expect("=")?;
            fv.force_rebase = Some(parser.bool_value("FvForceRebase")?);
            continue;
        }
        if parser.reader.try_keyword("FvNameGuid") {
            parser.reader.expect("=")?;
            fv.name_guid = Some(parser.guid_value("FvNameGuid")?);
            continue;
        }
        if parser.reader.try_keyword("FvNameString") {
            parser.reader.expect("=")?;
            fv.name_string = Some(parser.value_token("FvNameString")?.text);
            continue;
        }
        if parser.reader.try_keyword("BlockSize") {
            parser.reader.expect("=")?;
            let (size, _) = parser.integer_value("BlockSize")?;
            let count = if parser.reader.try_keyword("NumBlocks") {
                parser.reader.expect("=")?;
                parser.integer_value("NumBlocks")?.0
            } else {
                1
            };
            fv.blocks.push(BlockEntry {
                size,
                count,
                size_pcd: None,
            });
            continue;
        }
        if parser.reader.try_keyword("FV_EXT_ENTRY") {
            fv.ext_entries.push(parse_ext_entry(parser)?);
            continue;
        }
        if parser.reader.try_keyword("APRIORI") {
            fv.apriori.push(parse_apriori(parser)?);
            continue;
        }
        if parser.reader.try_keyword("INF") {
            fv.files.push(FvFile::Inf(parse_inf(parser)?));
            continue;
        }
        if parser.reader.try_keyword("FILE") {
            fv.files.push(FvFile::File(section::parse_file_statement(parser)?));
            continue;
        }
        // Remaining `NAME = TRUE|FALSE` lines are volume attributes.
        let key = parser.reader.require_token("a volume attribute")?;
        parser.reader.expect("=")?;
        let value = parser.value_token("TRUE or FALSE")?;
        match parse_bool(&value.text) {
            Some(b) => {
                fv.attributes.insert(key.text.to_ascii_uppercase(), b);
            }
            None => {
                return Err(SemanticError::IllegalValue {
                    location: value.location,
                    field: "volume attribute",
                    value: value.text,
                }
                .into());
            }
        }
    }

    parser.document.insert_fv(fv)?;
    Ok(())
}

/// `FV_EXT_ENTRY TYPE = <n> { FILE DATA = <path> | DATA = { .. } }`
fn parse_ext_entry(parser: &mut Parser) -> Result<FvExtEntry> {
    parser.reader.expect("TYPE")?;
    parser.reader.expect("=")?;
    let (entry_type, tok) = parser.integer_value("an ext entry type")?;
    let entry_type = u32::try_from(entry_type).map_err(|_| SemanticError::IllegalValue {
        location: tok.location,
        field: "ext entry type",
        value: tok.text,
    })?;
    parser.reader.expect("{")?;
    let data = if parser.reader.try_keyword("FILE") {
        parser.reader.expect("DATA")?;
        parser.reader.expect("=")?;
        ExtEntryData::File(parser.value_token("a data file path")?.text)
    } else {
        parser.reader.expect("DATA")?;
        parser.reader.expect("=")?;
        ExtEntryData::Data(parser.data_block()?)
    };
    parser.reader.expect("}")?;
    Ok(FvExtEntry { entry_type, data })
}

/// `APRIORI PEI|DXE { INF <path> ... }`
fn parse_apriori(parser: &mut Parser) -> Result<Apriori> {
    let kind_tok = parser.reader.require_token("PEI or DXE")?;
    let kind = if kind_tok.is("PEI") {
        AprioriKind::Pei
    } else if kind_tok.is("DXE") {
        AprioriKind::Dxe
    } else {
        return Err(SyntaxError::Expected {
            location: kind_tok.location,
            expected: "PEI or DXE".into(),
            found: kind_tok.text,
        }
        .into());
    };
    let location = kind_tok.location;
    parser.reader.expect("{")?;
    let mut entries = Vec::new();
    loop {
        if parser.reader.try_separator('}') {
            break;
        }
        parser.reader.expect("INF")?;
        entries.push(parse_inf(parser)?.path);
    }
    Ok(Apriori {
        kind,
        entries,
        location,
    })
}

/// The part of an INF statement after the `INF` keyword:
/// `[RuleOverride=<template>] [USE=<arch>] <path>`.
pub(super) fn parse_inf(parser: &mut Parser) -> Result<InfStatement> {
    let mut arch = None;
    let mut rule_override = None;
    loop {
        if parser.reader.try_keyword("RuleOverride") {
            parser.reader.expect("=")?;
            rule_override = Some(parser.value_token("a rule template name")?.text);
            continue;
        }
        if parser.reader.try_keyword("USE") {
            parser.reader.expect("=")?;
            arch = Some(parser.value_token("an architecture")?.text);
            continue;
        }
        break;
    }
    let path = parser.value_token("a module INF path")?;
    Ok(InfStatement {
        path: path.text,
        arch,
        rule_override,
        location: path.location,
    })
}
