// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Content-type probing and header metadata extraction

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

const SNIFF_LEN: usize = 32;

/// Leading-byte signatures, longest prefixes first where they overlap
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"<?xml", "application/xml"),
];

/// Resolve a file's content type
///
/// The stored type wins unless it is the configured default (meaning
/// unknown). Then the file name extension is tried, then the leading bytes
/// of the physical file. If nothing matches the default is returned.
pub fn probe(stored: &str, default: &str, file_name: &str, local: &Path) -> String {
    if stored != default {
        return stored.to_string();
    }
    if let Some(mime) = mime_guess::from_path(file_name).first() {
        return mime.essence_str().to_string();
    }
    match sniff(local) {
        Some(found) => found.to_string(),
        None => default.to_string(),
    }
}

fn read_head(local: &Path) -> Option<Vec<u8>> {
    let mut file = File::open(local).ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head).ok()?;
    Some(head)
}

/// Content sniffing on the physical bytes
pub fn sniff(local: &Path) -> Option<&'static str> {
    let head = read_head(local)?;
    let found = MAGIC
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime);
    debug!(path = %local.display(), ?found, "sniffed content");
    found
}

/// Pixel dimensions from PNG or GIF headers
pub fn image_dimensions(local: &Path) -> Option<(u32, u32)> {
    let head = read_head(local)?;
    if head.starts_with(b"\x89PNG\r\n\x1a\n") && head.len() >= 24 && &head[12..16] == b"IHDR" {
        let width = u32::from_be_bytes([head[16], head[17], head[18], head[19]]);
        let height = u32::from_be_bytes([head[20], head[21], head[22], head[23]]);
        return Some((width, height));
    }
    if (head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a")) && head.len() >= 10 {
        let width = u16::from_le_bytes([head[6], head[7]]) as u32;
        let height = u16::from_le_bytes([head[8], head[9]]) as u32;
        return Some((width, height));
    }
    None
}
