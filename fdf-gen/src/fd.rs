//! Flash device assembly.
//!
//! The image starts as `size` pad bytes (0xFF for erase polarity 1, 0x00
//! for 0) and regions are copied in at their offsets. The walk enforces,
//! in order: ascending offsets, no overlap with the previous region, the
//! region fitting inside the device, and the content fitting inside the
//! region. Anything the content does not cover keeps the pad byte.

use log::debug;

use fdf_parser::document::{Fd, Region, RegionContent};
use fdf_parser::error::{Result, SemanticError};

use crate::GenContext;

pub fn assemble_fd(ctx: &mut GenContext, fd: &Fd) -> Result<Vec<u8>> {
    debug!("assembling FD '{}' ({:#x} bytes)", fd.name, fd.size);
    let mut image = vec![fd.pad_byte(); fd.size as usize];

    // Sentinel: a zero-size region just before offset zero.
    let mut prev_start: i128 = -1;
    let mut prev_size: i128 = 1;
    for region in &fd.regions {
        let offset = region.offset as i128;
        if offset < prev_start {
            return Err(SemanticError::RegionOrder {
                location: region.location.clone(),
                offset: region.offset,
                previous: prev_start as u64,
            }
            .into());
        }
        if offset < prev_start + prev_size {
            return Err(SemanticError::RegionOverlap {
                location: region.location.clone(),
                offset: region.offset,
                previous: prev_start as u64,
                previous_end: (prev_start + prev_size) as u64,
            }
            .into());
        }
        if region.end() > fd.size {
            return Err(SemanticError::FdTooSmall {
                location: region.location.clone(),
                fd: fd.name.clone(),
                size: fd.size,
                end: region.end(),
            }
            .into());
        }

        let content = region_content(ctx, fd, region)?;
        if content.len() as u64 > region.size {
            return Err(SemanticError::RegionOverflow {
                location: region.location.clone(),
                content: content.len() as u64,
                declared: region.size,
            }
            .into());
        }
        let start = region.offset as usize;
        image[start..start + content.len()].copy_from_slice(&content);

        prev_start = offset;
        prev_size = region.size as i128;
    }
    Ok(image)
}

fn region_content(ctx: &mut GenContext, fd: &Fd, region: &Region) -> Result<Vec<u8>> {
    let referrer = format!("FD.{}", fd.name);
    match &region.content {
        RegionContent::Fv(names) => {
            let mut out = Vec::new();
            for name in names {
                out.extend(ctx.fv_bytes(name, &referrer)?);
            }
            Ok(out)
        }
        RegionContent::Capsule(names) => {
            let mut out = Vec::new();
            for name in names {
                out.extend(ctx.capsule_bytes(name, &referrer)?);
            }
            Ok(out)
        }
        RegionContent::File(paths) => {
            let mut out = Vec::new();
            for path in paths {
                out.extend(ctx.read_input(path)?);
            }
            Ok(out)
        }
        RegionContent::Data(bytes) => Ok(bytes.clone()),
        RegionContent::Inf(paths) => {
            // Modules placed raw: their outputs concatenated in order.
            let mut out = Vec::new();
            for path in paths {
                let info = ctx.module_info(path)?;
                for output in &info.outputs {
                    out.extend_from_slice(&output.data);
                }
            }
            Ok(out)
        }
        RegionContent::Pad => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use crate::toolchain::StubToolchain;
    use crate::GenContext;
    use fdf_parser::error::{FdfError, SemanticError};
    use fdf_parser::{CompileSession, SourceBuffer};

    fn assemble(text: &str) -> Vec<u8> {
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", "out");
        let fd = document.fd("Boot").unwrap();
        super::assemble_fd(&mut ctx, fd).unwrap()
    }

    fn assemble_err(text: &str) -> FdfError {
        let buf = SourceBuffer::new("t.fdf", text);
        let mut session = CompileSession::new("t.fdf");
        let document = fdf_parser::parse(&buf, &mut session).unwrap();
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", "out");
        let fd = document.fd("Boot").unwrap();
        super::assemble_fd(&mut ctx, fd).unwrap_err()
    }

    const HEADER: &str = "[FD.Boot]\nBaseAddress = 0\nSize = 0x1000\nErasePolarity = 1\n";

    #[test]
    fn uncovered_bytes_keep_the_pad_byte() {
        let image = assemble(&format!(
            "{}0x100|0x10\nDATA = {{ 0x01, 0x02 }}\n",
            HEADER
        ));
        assert_eq!(image.len(), 0x1000);
        assert_eq!(&image[0x100..0x102], &[0x01, 0x02]);
        assert_eq!(image[0x102], 0xFF);
        assert_eq!(image[0x0FF], 0xFF);
        assert_eq!(image[0xFFF], 0xFF);
    }

    #[test]
    fn zero_polarity_pads_with_zero() {
        let image = assemble(
            "[FD.Boot]\nBaseAddress = 0\nSize = 0x100\nErasePolarity = 0\n",
        );
        assert!(image.iter().all(|&b| b == 0x00));
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let err = assemble_err(&format!(
            "{}0x000|0x100\nDATA = {{ 0x01 }}\n0x080|0x100\nDATA = {{ 0x02 }}\n",
            HEADER
        ));
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::RegionOverlap { .. })
        ));
    }

    #[test]
    fn descending_offsets_are_rejected() {
        let err = assemble_err(&format!(
            "{}0x800|0x100\nDATA = {{ 0x01 }}\n0x100|0x100\nDATA = {{ 0x02 }}\n",
            HEADER
        ));
        // a descending offset also fails the order check before overlap
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::RegionOrder { .. })
        ));
    }

    #[test]
    fn region_past_the_device_end_is_rejected() {
        let err = assemble_err(&format!("{}0xF80|0x100\n", HEADER));
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::FdTooSmall { .. })
        ));
    }

    #[test]
    fn content_larger_than_the_region_is_rejected() {
        let err = assemble_err(&format!(
            "{}0x000|0x2\nDATA = {{ 0x01, 0x02, 0x03 }}\n",
            HEADER
        ));
        assert!(matches!(
            err,
            FdfError::Semantic(SemanticError::RegionOverflow { .. })
        ));
    }
}
