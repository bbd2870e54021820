//! Update capsule composition.
//!
//! Header layout is the EFI_CAPSULE_HEADER wire form: the capsule GUID,
//! a u32 header size, u32 flags, and the u32 total image size, padded out
//! to the declared header size. Payload entries follow in declaration
//! order; `APPEND` blobs land after all other payloads.

use fdf_parser::document::{Capsule, CapsulePayload};
use fdf_parser::error::{Result, SemanticError};
use fdf_parser::expr::parse_integer;

use crate::guid;
use crate::GenContext;

const CAPSULE_HEADER_LEN: usize = 28;
const DEFAULT_HEADER_SIZE: u64 = 0x20;

/// Named CAPSULE_FLAGS bits.
const FLAG_PERSIST_ACROSS_RESET: u32 = 0x0001_0000;
const FLAG_POPULATE_SYSTEM_TABLE: u32 = 0x0002_0000;
const FLAG_INITIATE_RESET: u32 = 0x0004_0000;

pub fn build_capsule(ctx: &mut GenContext, cap: &Capsule) -> Result<Vec<u8>> {
    let referrer = format!("Capsule.{}", cap.name);

    let mut body: Vec<u8> = Vec::new();
    let mut appended: Vec<u8> = Vec::new();
    for payload in &cap.payloads {
        match payload {
            CapsulePayload::Inf(path) => {
                let info = ctx.module_info(path)?;
                for output in &info.outputs {
                    body.extend_from_slice(&output.data);
                }
            }
            CapsulePayload::Fv(name) => body.extend(ctx.fv_bytes(name, &referrer)?),
            CapsulePayload::Fd(name) => {
                let document = ctx.document();
                let fd = document
                    .fd(name)
                    .ok_or_else(|| SemanticError::UnknownReference {
                        kind: "FD",
                        name: name.clone(),
                        referrer: referrer.clone(),
                    })?;
                body.extend(crate::fd::assemble_fd(ctx, fd)?);
            }
            CapsulePayload::File(path) => body.extend(ctx.read_input(path)?),
            CapsulePayload::Append(path) => appended.extend(ctx.read_input(path)?),
            CapsulePayload::Fmp(name) => {
                body.extend(build_fmp_image(ctx, name, &referrer)?);
            }
        }
    }
    body.extend(appended);

    let guid_text = cap.token("CAPSULE_GUID").unwrap_or_default();
    let header_size = cap
        .token("CAPSULE_HEADER_SIZE")
        .and_then(parse_integer)
        .unwrap_or(DEFAULT_HEADER_SIZE)
        .max(CAPSULE_HEADER_LEN as u64) as usize;
    let flags = parse_flags(cap.token("CAPSULE_FLAGS").unwrap_or(""));

    let mut out = Vec::with_capacity(header_size + body.len());
    out.extend_from_slice(&guid::parse(guid_text)?);
    out.extend_from_slice(&(header_size as u32).to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&((header_size + body.len()) as u32).to_le_bytes());
    out.resize(header_size, 0);
    out.extend(body);
    Ok(out)
}

/// Comma-separated flag names or literal numbers, OR-ed together.
fn parse_flags(text: &str) -> u32 {
    let mut flags = 0u32;
    for part in text.split(',') {
        let part = part.trim();
        flags |= match part {
            "" => 0,
            _ if part.eq_ignore_ascii_case("PersistAcrossReset") => FLAG_PERSIST_ACROSS_RESET,
            _ if part.eq_ignore_ascii_case("PopulateSystemTable") => FLAG_POPULATE_SYSTEM_TABLE,
            _ if part.eq_ignore_ascii_case("InitiateReset") => FLAG_INITIATE_RESET,
            _ => parse_integer(part).unwrap_or(0) as u32,
        };
    }
    flags
}

/// FMP image: a fixed header, an optional authentication prefix on the
/// image when a certificate is declared, then image and vendor-code bytes.
fn build_fmp_image(ctx: &mut GenContext, name: &str, referrer: &str) -> Result<Vec<u8>> {
    let document = ctx.document();
    let payload = document
        .fmp_payload(name)
        .ok_or_else(|| SemanticError::UnknownReference {
            kind: "FMP payload",
            name: name.to_string(),
            referrer: referrer.to_string(),
        })?;

    let mut image: Vec<u8> = Vec::new();
    if let Some(path) = &payload.image_file {
        image.extend(ctx.read_input(path)?);
    }
    if let (Some(cert), Some(count)) = (&payload.certificate_guid, payload.monotonic_count) {
        let mut auth = Vec::with_capacity(24 + image.len());
        auth.extend_from_slice(&count.to_le_bytes());
        auth.extend_from_slice(&guid::parse(cert)?);
        auth.extend(image);
        image = auth;
    }
    let vendor_code = match &payload.vendor_code_file {
        Some(path) => ctx.read_input(path)?,
        None => Vec::new(),
    };

    let mut out = Vec::new();
    out.extend_from_slice(&payload.header_init_version.to_le_bytes());
    out.extend_from_slice(&guid::parse(&payload.image_type_id)?);
    out.push(payload.image_index as u8);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(image.len() as u32).to_le_bytes());
    out.extend_from_slice(&(vendor_code.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload.hardware_instance.to_le_bytes());
    out.extend(image);
    out.extend(vendor_code);
    Ok(out)
}
