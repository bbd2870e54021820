//! Registry-format GUID text to its 16-byte wire form.
//!
//! The first three fields are little-endian, the final two big-endian, per
//! the EFI_GUID memory layout.

use fdf_parser::error::{FdfError, Result};

/// Parse `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` into wire bytes.
pub fn parse(text: &str) -> Result<[u8; 16]> {
    let parts: Vec<&str> = text.split('-').collect();
    let [d1, d2, d3, d4, d5] = parts.as_slice() else {
        return Err(malformed(text));
    };
    if d1.len() != 8 || d2.len() != 4 || d3.len() != 4 || d4.len() != 4 || d5.len() != 12 {
        return Err(malformed(text));
    }
    let f1 = u32::from_str_radix(d1, 16).map_err(|_| malformed(text))?;
    let f2 = u16::from_str_radix(d2, 16).map_err(|_| malformed(text))?;
    let f3 = u16::from_str_radix(d3, 16).map_err(|_| malformed(text))?;

    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&f1.to_le_bytes());
    out[4..6].copy_from_slice(&f2.to_le_bytes());
    out[6..8].copy_from_slice(&f3.to_le_bytes());
    for (i, chunk) in d4.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).map_err(|_| malformed(text))?;
        out[8 + i] = u8::from_str_radix(s, 16).map_err(|_| malformed(text))?;
    }
    for (i, chunk) in d5.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).map_err(|_| malformed(text))?;
        out[10 + i] = u8::from_str_radix(s, 16).map_err(|_| malformed(text))?;
    }
    Ok(out)
}

fn malformed(text: &str) -> FdfError {
    FdfError::Io(format!("malformed GUID '{}'", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_mixed_endian() {
        let bytes = parse("8C8CE578-8A3D-4F1C-9935-896185C32DD3").unwrap();
        assert_eq!(
            bytes,
            [
                0x78, 0xE5, 0x8C, 0x8C, 0x3D, 0x8A, 0x1C, 0x4F, 0x99, 0x35, 0x89, 0x61, 0x85,
                0xC3, 0x2D, 0xD3
            ]
        );
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(parse("not-a-guid").is_err());
        assert!(parse("8C8CE578-8A3D-4F1C-9935").is_err());
    }
}
