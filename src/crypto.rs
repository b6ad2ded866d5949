use core::fmt;

use md5::{Digest, Md5};
use rand::RngCore;
use zeroize::Zeroize;

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub(crate) fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..]);
    out
}

/// MD5 over `parts`, rendered as 32 lowercase hex digits (RFC 2617 `H()`).
pub(crate) fn md5_hex(parts: &[&[u8]]) -> String {
    to_hex(&md5(parts))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Fresh client nonce for a digest response.
pub(crate) fn cnonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_vectors() {
        assert_eq!(md5_hex(&[b""]), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            md5_hex(&[b"The quick brown fox ", b"jumps over the lazy dog"]),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn cnonce_is_hex_and_fresh() {
        let a = cnonce();
        let b = cnonce();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = SecretBytes::new(b"P@ssw0rd".to_vec());
        assert_eq!(format!("{secret:?}"), "<secret>");
        assert_eq!(secret.expose(), b"P@ssw0rd");
    }
}
