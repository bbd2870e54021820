//! `[Rule.<arch>.<module-type>[.<template>]]` sections.
//!
//! A rule body is one `FILE` template:
//!   FILE <ffs-type> = <guid|$(NAMED_GUID)> [Align=..] [FIXED] [CHECKSUM]
//! followed either by a braced section tree (complex rule) or a single
//! `SECTION` statement (simple rule).

use crate::document::{Rule, RuleKey};
use crate::error::{Location, Result, SemanticError};

use super::{section, Parser};

pub(super) fn parse_rule(
    parser: &mut Parser,
    arch: &str,
    module_type: &str,
    template: Option<&str>,
    location: Location,
) -> Result<()> {
    parser.reader.expect("FILE")?;
    let type_tok = parser.reader.require_token("an FFS file type")?;
    parser.reader.expect("=")?;

    // Rule GUIDs are usually `$(NAMED_GUID)`, filled per module at
    // generation time; a literal pins every file produced by the rule.
    // Checked before macro substitution so the placeholder survives.
    let guid_tok = parser.reader.require_token("a file GUID")?;
    let guid = if guid_tok.is("$(NAMED_GUID)") {
        None
    } else if guid_tok.is_guid_literal() {
        Some(guid_tok.text.to_ascii_uppercase())
    } else {
        Some(parser.resolve_guid(&guid_tok)?)
    };

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

    let sections = if parser.reader.try_separator('{') {
        section::parse_section_list(parser)?
    } else {
        parser.reader.expect("SECTION")?;
        vec![section::parse_section(parser)?]
    };
    if sections.is_empty() {
        return Err(SemanticError::IllegalValue {
            location: location.clone(),
            field: "rule sections",
            value: "empty".into(),
        }
        .into());
    }

    parser.document.insert_rule(Rule {
        key: RuleKey::new(arch, module_type, template),
        file_type: type_tok.text.to_ascii_uppercase(),
        guid,
        alignment,
        fixed,
        checksum,
        sections,
        location,
    })?;
    Ok(())
}
