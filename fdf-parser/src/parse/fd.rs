//! `[FD.<name>]` sections: device keywords, block geometry, region list.

use crate::document::{BlockEntry, Fd, Region, RegionContent};
use crate::error::{Location, Result, SemanticError};

use super::Parser;

pub(super) fn parse_fd(parser: &mut Parser, name: &str, location: Location) -> Result<()> {
    let mut base_address = None;
    let mut size = None;
    let mut erase_polarity = None;
    let mut create_file = None;
    let mut blocks: Vec<BlockEntry> = Vec::new();
    let mut regions = Vec::new();

    while !parser.at_section_end()? {
        if parser.reader.try_keyword("BaseAddress") {
            parser.reader.expect("=")?;
            let (value, _) = parser.integer_value("BaseAddress")?;
            base_address = Some(value);
            // Optional `|PcdName` publishing the base address.
            if parser.reader.try_separator('|') {
                parser.value_token("a PCD name")?;
            }
            continue;
        }
        if parser.reader.try_keyword("Size") {
            parser.reader.expect("=")?;
            let (value, _) = parser.integer_value("Size")?;
            size = Some(value);
            if parser.reader.try_separator('|') {
                parser.value_token("a PCD name")?;
            }
            continue;
        }
        if parser.reader.try_keyword("ErasePolarity") {
            parser.reader.expect("=")?;
            let (value, tok) = parser.integer_value("ErasePolarity")?;
            if value > 1 {
                return Err(SemanticError::IllegalValue {
                    location: tok.location,
                    field: "ErasePolarity",
                    value: tok.text,
                }
                .into());
            }
            erase_polarity = Some(value as u8);
            continue;
        }
        if parser.reader.try_keyword("BlockSize") {
            parser.reader.expect("=")?;
            let (block_size, _) = parser.integer_value("BlockSize")?;
            let size_pcd = if parser.reader.try_separator('|') {
                Some(parser.value_token("a PCD name")?.text)
            } else {
                None
            };
            let count = if parser.reader.try_keyword("NumBlocks") {
                parser.reader.expect("=")?;
                parser.integer_value("NumBlocks")?.0
            } else {
                1
            };
            blocks.push(BlockEntry {
                size: block_size,
                count,
                size_pcd,
            });
            continue;
        }
        if parser.reader.try_keyword("CREATE_FILE") {
            parser.reader.expect("=")?;
            create_file = Some(parser.value_token("an output file path")?.text);
            continue;
        }
        regions.push(parse_region(parser)?);
    }

    let base_address =
        base_address.ok_or_else(|| missing(&location, name, "BaseAddress"))?;
    let size = size.ok_or_else(|| missing(&location, name, "Size"))?;
    let erase_polarity =
        erase_polarity.ok_or_else(|| missing(&location, name, "ErasePolarity"))?;

    let fd = Fd {
        name: name.to_string(),
        base_address,
        size,
        erase_polarity,
        create_file,
        blocks,
        regions,
        location,
    };
    if !fd.blocks.is_empty() && fd.block_total() != fd.size {
        let blocks = fd.block_total();
        return Err(SemanticError::BlockSizeMismatch {
            location: fd.location.clone(),
            fd: fd.name,
            blocks,
            declared: fd.size,
        }
        .into());
    }
    parser.document.insert_fd(fd)?;
    Ok(())
}

fn missing(location: &Location, name: &str, keyword: &'static str) -> crate::error::FdfError {
    SemanticError::MissingKeyword {
        location: location.clone(),
        keyword,
        section: format!("FD.{}", name),
    }
    .into()
}

/// `<offset>|<size>` plus an optional PCD-pair sub-line and typed content.
fn parse_region(parser: &mut Parser) -> Result<Region> {
    let (offset, offset_tok) = parser.integer_value("a region offset")?;
    parser.reader.expect("|")?;
    let (size, _) = parser.integer_value("a region size")?;

    // `PcdOffsetName|PcdSizeName` sub-line binding the pair.
    let mut pcd_pair = None;
    let mark = parser.reader.mark();
    if let Some(tok) = parser.reader.peek_token()? {
        if !tok.quoted && tok.text.contains('.') && tok.as_integer().is_none() {
            let first = parser.reader.require_token("a PCD name")?;
            if parser.reader.try_separator('|') {
                let second = parser.reader.require_token("a PCD name")?;
                pcd_pair = Some((first.text, second.text));
            } else {
                parser.reader.rewind(mark);
            }
        }
    }

    let content = parse_region_content(parser)?;
    Ok(Region {
        offset,
        size,
        pcd_pair,
        content,
        location: offset_tok.location,
    })
}

fn parse_region_content(parser: &mut Parser) -> Result<RegionContent> {
    if parser.reader.try_keyword("FV") {
        parser.reader.expect("=")?;
        let mut names = vec![parser.value_token("an FV name")?.text];
        while parser.reader.try_keyword("FV") {
            parser.reader.expect("=")?;
            names.push(parser.value_token("an FV name")?.text);
        }
        return Ok(RegionContent::Fv(names));
    }
    if parser.reader.try_keyword("CAPSULE") {
        parser.reader.expect("=")?;
        let mut names = vec![parser.value_token("a capsule name")?.text];
        while parser.reader.try_keyword("CAPSULE") {
            parser.reader.expect("=")?;
            names.push(parser.value_token("a capsule name")?.text);
        }
        return Ok(RegionContent::Capsule(names));
    }
    if parser.reader.try_keyword("FILE") {
        parser.reader.expect("=")?;
        let mut paths = vec![parser.value_token("a file path")?.text];
        while parser.reader.try_keyword("FILE") {
            parser.reader.expect("=")?;
            paths.push(parser.value_token("a file path")?.text);
        }
        return Ok(RegionContent::File(paths));
    }
    if parser.reader.try_keyword("DATA") {
        parser.reader.expect("=")?;
        return Ok(RegionContent::Data(parser.data_block()?));
    }
    if parser.reader.try_keyword("INF") {
        let mut paths = vec![parser.value_token("a module path")?.text];
        while parser.reader.try_keyword("INF") {
            paths.push(parser.value_token("a module path")?.text);
        }
        return Ok(RegionContent::Inf(paths));
    }
    Ok(RegionContent::Pad)
}
