//! `[FmpPayload.<name>]` sections.
//!
//! The first `FILE DATA` names the update image, the second an optional
//! vendor-code blob; a third is rejected. `CERTIFICATE_GUID` and
//! `MONOTONIC_COUNT` must be given together or not at all.

use crate::document::FmpPayload;
use crate::error::{Location, Result, SemanticError};

use super::Parser;

pub(super) fn parse_fmp_payload(
    parser: &mut Parser,
    name: &str,
    location: Location,
) -> Result<()> {
    let mut payload = FmpPayload {
        name: name.to_string(),
        header_init_version: 1,
        image_type_id: String::new(),
        image_index: 1,
        hardware_instance: 0,
        certificate_guid: None,
        monotonic_count: None,
        image_file: None,
        vendor_code_file: None,
        location: location.clone(),
    };
    let mut image_type_id = None;

    while !parser.at_section_end()? {
        if parser.reader.try_keyword("IMAGE_HEADER_INIT_VERSION") {
            parser.reader.expect("=")?;
            payload.header_init_version =
                narrow_u32(parser, "IMAGE_HEADER_INIT_VERSION")?;
            continue;
        }
        if parser.reader.try_keyword("IMAGE_TYPE_ID") {
            parser.reader.expect("=")?;
            image_type_id = Some(parser.guid_value("IMAGE_TYPE_ID")?);
            continue;
        }
        if parser.reader.try_keyword("IMAGE_INDEX") {
            parser.reader.expect("=")?;
            payload.image_index = narrow_u32(parser, "IMAGE_INDEX")?;
            continue;
        }
        if parser.reader.try_keyword("HARDWARE_INSTANCE") {
            parser.reader.expect("=")?;
            payload.hardware_instance = parser.integer_value("HARDWARE_INSTANCE")?.0;
            continue;
        }
        if parser.reader.try_keyword("CERTIFICATE_GUID") {
            parser.reader.expect("=")?;
            payload.certificate_guid = Some(parser.guid_value("CERTIFICATE_GUID")?);
            continue;
        }
        if parser.reader.try_keyword("MONOTONIC_COUNT") {
            parser.reader.expect("=")?;
            payload.monotonic_count = Some(parser.integer_value("MONOTONIC_COUNT")?.0);
            continue;
        }
        parser.reader.expect("FILE")?;
        parser.reader.expect("DATA")?;
        parser.reader.expect("=")?;
        let path = parser.value_token("a payload file path")?;
        if payload.image_file.is_none() {
            payload.image_file = Some(path.text);
        } else if payload.vendor_code_file.is_none() {
            payload.vendor_code_file = Some(path.text);
        } else {
            return Err(SemanticError::FmpVendorCodeCardinality {
                location: path.location,
                name: name.to_string(),
            }
            .into());
        }
    }

    payload.image_type_id = image_type_id.ok_or_else(|| SemanticError::MissingKeyword {
        location: location.clone(),
        keyword: "IMAGE_TYPE_ID",
        section: format!("FmpPayload.{}", name),
    })?;
    if payload.certificate_guid.is_some() != payload.monotonic_count.is_some() {
        return Err(SemanticError::FmpCertificateMismatch {
            location,
            name: name.to_string(),
        }
        .into());
    }

    parser.document.insert_fmp_payload(payload)?;
    Ok(())
}

fn narrow_u32(parser: &mut Parser, field: &'static str) -> Result<u32> {
    let (n, tok) = parser.integer_value(field)?;
    u32::try_from(n)
        .map_err(|_| {
            SemanticError::IllegalValue {
                location: tok.location,
                field,
                value: tok.text,
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use crate::error::{FdfError, SemanticError};
    use crate::session::CompileSession;
    use crate::source::SourceBuffer;

    fn parse_text(text: &str) -> crate::error::Result<crate::document::Document> {
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        super::super::parse(&buf, &mut session)
    }

    const FMP: &str = "\
[FmpPayload.FmpMain]
IMAGE_HEADER_INIT_VERSION = 0x02
IMAGE_TYPE_ID             = 50B94CE5-8B63-4849-8AF4-EA479356F0E3
IMAGE_INDEX               = 0x1
HARDWARE_INSTANCE         = 0x0
CERTIFICATE_GUID          = A7717414-C616-4977-9420-844712A735BF
MONOTONIC_COUNT           = 0x1
FILE DATA = Firmware.bin
FILE DATA = VendorCode.bin
";

    #[test]
    fn full_payload_parses() {
        let doc = parse_text(FMP).unwrap();
        let p = doc.fmp_payload("FmpMain").unwrap();
        assert_eq!(p.header_init_version, 2);
        assert_eq!(p.image_type_id, "50B94CE5-8B63-4849-8AF4-EA479356F0E3");
        assert_eq!(p.image_file.as_deref(), Some("Firmware.bin"));
        assert_eq!(p.vendor_code_file.as_deref(), Some("VendorCode.bin"));
    }

    #[test]
    fn certificate_without_count_is_rejected() {
        let err = parse_text(
            "[FmpPayload.P]\nIMAGE_TYPE_ID = 50B94CE5-8B63-4849-8AF4-EA479356F0E3\n\
             CERTIFICATE_GUID = A7717414-C616-4977-9420-844712A735BF\n\
             FILE DATA = F.bin\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::FmpCertificateMismatch { .. })
        ));
    }

    #[test]
    fn a_third_data_file_is_rejected() {
        let err = parse_text(
            "[FmpPayload.P]\nIMAGE_TYPE_ID = 50B94CE5-8B63-4849-8AF4-EA479356F0E3\n\
             FILE DATA = A.bin\nFILE DATA = B.bin\nFILE DATA = C.bin\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::FmpVendorCodeCardinality { .. })
        ));
    }
}
