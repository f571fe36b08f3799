//! Hex encode/decode helpers for [`crate::backup::hash::Hash`] digests.
//!
//! The teacher leans on `proxmox::tools::digest_to_hex`/`hex_to_digest` for
//! this; since that crate is out of scope here (it also pulls in the
//! HTTP/API-macro stack this crate does not need, see `DESIGN.md`), the
//! same small helpers are reimplemented directly.

use anyhow::{bail, Error};

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

pub fn digest_to_hex(digest: &[u8]) -> String {
    let mut s = String::with_capacity(digest.len() * 2);
    for &byte in digest {
        s.push(HEX_CHARS[(byte >> 4) as usize] as char);
        s.push(HEX_CHARS[(byte & 0xf) as usize] as char);
    }
    s
}

pub fn hex_to_digest(hex: &str) -> Result<Vec<u8>, Error> {
    if hex.len() % 2 != 0 {
        bail!("hex string has odd length");
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = hex_nibble(chunk[0])?;
        let lo = hex_nibble(chunk[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => bail!("invalid hex character: {}", c as char),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let digest = [0u8, 1, 255, 16, 128];
        let hex = digest_to_hex(&digest);
        assert_eq!(hex, "0001ff1080");
        assert_eq!(hex_to_digest(&hex).unwrap(), digest);
    }

    #[test]
    fn rejects_odd_length() {
        assert!(hex_to_digest("abc").is_err());
    }
}
