//! `[OptionRom.<name>]` sections: driver INF references and pre-built
//! EFI/BIN images.

use crate::document::{OptionRom, OptionRomEntry};
use crate::error::{Location, Result, SyntaxError};

use super::{fv, Parser};

pub(super) fn parse_option_rom(
    parser: &mut Parser,
    name: &str,
    location: Location,
) -> Result<()> {
    let mut entries = Vec::new();
    while !parser.at_section_end()? {
        if parser.reader.try_keyword("INF") {
            entries.push(OptionRomEntry::Inf(fv::parse_inf(parser)?));
            continue;
        }
        parser.reader.expect("FILE")?;
        let type_tok = parser.reader.require_token("EFI or BIN")?;
        if !type_tok.is("EFI") && !type_tok.is("BIN") {
            return Err(SyntaxError::Expected {
                location: type_tok.location,
                expected: "EFI or BIN".into(),
                found: type_tok.text,
            }
            .into());
        }
        parser.reader.expect("=")?;
        let path = parser.value_token("an image file path")?;
        entries.push(OptionRomEntry::File {
            file_type: type_tok.text.to_ascii_uppercase(),
            path: path.text,
        });
    }
    parser.document.insert_option_rom(OptionRom {
        name: name.to_string(),
        entries,
        location,
    })?;
    Ok(())
}
