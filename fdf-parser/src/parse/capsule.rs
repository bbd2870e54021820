//! `[Capsule.<name>]` sections: header token/value pairs and the ordered
//! payload list.

use std::collections::BTreeMap;

use crate::document::{Capsule, CapsulePayload};
use crate::error::{Location, Result, SemanticError};

use super::Parser;

pub(super) fn parse_capsule(parser: &mut Parser, name: &str, location: Location) -> Result<()> {
    let mut tokens = BTreeMap::new();
    let mut payloads = Vec::new();

    while !parser.at_section_end()? {
        if parser.reader.try_keyword("INF") {
            payloads.push(CapsulePayload::Inf(
                parser.value_token("a module INF path")?.text,
            ));
            continue;
        }
        if parser.reader.try_keyword("FV") {
            parser.reader.expect("=")?;
            payloads.push(CapsulePayload::Fv(parser.value_token("an FV name")?.text));
            continue;
        }
        if parser.reader.try_keyword("FD") {
            parser.reader.expect("=")?;
            payloads.push(CapsulePayload::Fd(parser.value_token("an FD name")?.text));
            continue;
        }
        if parser.reader.try_keyword("FILE") {
            parser.reader.expect("DATA")?;
            parser.reader.expect("=")?;
            payloads.push(CapsulePayload::File(
                parser.value_token("a data file path")?.text,
            ));
            continue;
        }
        if parser.reader.try_keyword("APPEND") {
            parser.reader.expect("=")?;
            payloads.push(CapsulePayload::Append(
                parser.value_token("a file path")?.text,
            ));
            continue;
        }
        if parser.reader.try_keyword("FMP_PAYLOAD") {
            parser.reader.expect("=")?;
            payloads.push(CapsulePayload::Fmp(
                parser.value_token("an FMP payload name")?.text,
            ));
            continue;
        }
        // Anything else is a header token. GUID-valued tokens resolve
        // through scope; comma-separated flag lists are rejoined.
        let key = parser.reader.require_token("a capsule token")?;
        parser.reader.expect("=")?;
        let first = parser.value_token("a token value")?;
        let value = if key.is("CAPSULE_GUID") {
            parser.resolve_guid(&first)?
        } else {
            let mut parts = vec![first.text];
            while parser.reader.try_separator(',') {
                parts.push(parser.value_token("a token value")?.text);
            }
            parts.join(",")
        };
        tokens.insert(key.text.to_ascii_uppercase(), value);
    }

    if !tokens.contains_key("CAPSULE_GUID") {
        return Err(SemanticError::MissingKeyword {
            location,
            keyword: "CAPSULE_GUID",
            section: format!("Capsule.{}", name),
        }
        .into());
    }

    parser.document.insert_capsule(Capsule {
        name: name.to_string(),
        tokens,
        payloads,
        location,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::document::CapsulePayload;
    use crate::error::{FdfError, SemanticError};
    use crate::session::CompileSession;
    use crate::source::SourceBuffer;

    fn parse_text(text: &str) -> crate::error::Result<crate::document::Document> {
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        super::super::parse(&buf, &mut session)
    }

    const UPDATE_CAPSULE: &str = "\
[Capsule.Update]
CAPSULE_GUID         = 6DCBD5ED-E82D-4C44-BDA1-7194199AD92A
CAPSULE_HEADER_SIZE  = 0x20
CAPSULE_FLAGS        = PersistAcrossReset,InitiateReset

FV = FVMAIN
FMP_PAYLOAD = FmpMain
APPEND = Trailer.bin
";

    #[test]
    fn tokens_and_payloads_parse_in_order() {
        let doc = parse_text(UPDATE_CAPSULE).unwrap();
        let capsule = doc.capsule("Update").unwrap();
        assert_eq!(
            capsule.token("capsule_guid"),
            Some("6DCBD5ED-E82D-4C44-BDA1-7194199AD92A")
        );
        assert_eq!(capsule.token("CAPSULE_HEADER_SIZE"), Some("0x20"));
        assert_eq!(
            capsule.token("CAPSULE_FLAGS"),
            Some("PersistAcrossReset,InitiateReset")
        );
        assert_eq!(
            capsule.payloads,
            vec![
                CapsulePayload::Fv("FVMAIN".into()),
                CapsulePayload::Fmp("FmpMain".into()),
                CapsulePayload::Append("Trailer.bin".into()),
            ]
        );
    }

    #[test]
    fn capsule_guid_is_required() {
        let err = parse_text("[Capsule.Update]\nCAPSULE_HEADER_SIZE = 0x20\n").unwrap_err();
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::MissingKeyword {
                keyword: "CAPSULE_GUID",
                ..
            })
        ));
    }
}
