//! ASCII armor: a text-safe, line-wrapped base64 block between
//! `-----BEGIN SIGIL <LABEL>-----` and `-----END SIGIL <LABEL>-----`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::constants::ARMOR_LINE_WIDTH;

pub const LABEL_PUBLIC_KEY: &str = "PUBLIC KEY";
pub const LABEL_PRIVATE_KEY: &str = "PRIVATE KEY";
pub const LABEL_MESSAGE: &str = "MESSAGE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArmorError {
    #[error("Missing armor header for {0}")]
    MissingHeader(&'static str),

    #[error("Missing armor footer for {0}")]
    MissingFooter(&'static str),

    #[error("Base64 decode error")]
    Base64Decode,
}

fn header(label: &str) -> String {
    format!("-----BEGIN SIGIL {label}-----")
}

fn footer(label: &str) -> String {
    format!("-----END SIGIL {label}-----")
}

pub fn encode(label: &str, data: &[u8]) -> String {
    let body = STANDARD.encode(data);
    let mut out = String::with_capacity(body.len() + body.len() / ARMOR_LINE_WIDTH + 64);
    out.push_str(&header(label));
    out.push('\n');
    // base64 output is ASCII, so byte chunks are valid str slices
    for line in body.as_bytes().chunks(ARMOR_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&footer(label));
    out.push('\n');
    out
}

/// Exact length of `encode(label, data)` for `data_len` bytes of data.
pub fn encoded_len(label: &str, data_len: usize) -> usize {
    let body = data_len.div_ceil(3) * 4;
    let lines = body.div_ceil(ARMOR_LINE_WIDTH);
    header(label).len() + 1 + body + lines + footer(label).len() + 1
}

pub fn decode(label: &'static str, armored: &str) -> Result<Vec<u8>, ArmorError> {
    let head = header(label);
    let foot = footer(label);

    let start = armored
        .find(&head)
        .ok_or(ArmorError::MissingHeader(label))?
        + head.len();
    let end = armored[start..]
        .find(&foot)
        .ok_or(ArmorError::MissingFooter(label))?
        + start;

    let body: String = armored[start..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    STANDARD
        .decode(body.as_bytes())
        .map_err(|_| ArmorError::Base64Decode)
}
