//! Bearer token primitive (C1).
//!
//! A raw token is 64 cryptographically random bytes, handed to the client
//! exactly once (on create/rotate) and never stored or logged. What the
//! store holds is the "protected token": a keyed MAC of the raw token under
//! a deployment-wide site key plus a per-deployment salt, so a leaked store
//! snapshot doesn't hand out usable credentials.

use blake2::digest::{KeyInit, Update, VariableOutput};
use blake2::Blake2bVar;
use rand::RngCore;
use subtle::ConstantTimeEq;

pub const RAW_TOKEN_LEN: usize = 64;
const PROTECTED_TOKEN_LEN: usize = 32;

/// Generate a fresh raw token. Returned to the caller once; never persisted.
pub fn generate_raw_token() -> Vec<u8> {
    let mut bytes = vec![0u8; RAW_TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Derive the protected (storable) form of a raw token.
///
/// Keyed by `site_key` (so protection is deployment-specific) with `salt`
/// folded into the input (so two deployments sharing a site key still
/// produce distinct protected tokens for the same raw token).
pub fn protect(raw_token: &[u8], site_key: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Blake2bVar::new_keyed(site_key, PROTECTED_TOKEN_LEN);
    hasher.update(salt);
    hasher.update(raw_token);
    let mut out = vec![0u8; PROTECTED_TOKEN_LEN];
    hasher
        .finalize_variable(&mut out)
        .expect("fixed output buffer matches requested length");
    out
}

/// Constant-time check that `raw_token`, once protected, matches `expected`.
pub fn verify(raw_token: &[u8], site_key: &[u8], salt: &[u8], expected: &[u8]) -> bool {
    let candidate = protect(raw_token, site_key, salt);
    candidate.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tokens_are_unique_and_right_length() {
        let a = generate_raw_token();
        let b = generate_raw_token();
        assert_eq!(a.len(), RAW_TOKEN_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn protect_is_deterministic_for_same_inputs() {
        let raw = generate_raw_token();
        let p1 = protect(&raw, b"site-key", b"salt");
        let p2 = protect(&raw, b"site-key", b"salt");
        assert_eq!(p1, p2);
    }

    #[test]
    fn different_salt_yields_different_protected_token() {
        let raw = generate_raw_token();
        let p1 = protect(&raw, b"site-key", b"salt-a");
        let p2 = protect(&raw, b"site-key", b"salt-b");
        assert_ne!(p1, p2);
    }

    #[test]
    fn verify_accepts_correct_raw_token_and_rejects_tampering() {
        let raw = generate_raw_token();
        let protected = protect(&raw, b"site-key", b"salt");
        assert!(verify(&raw, b"site-key", b"salt", &protected));

        let mut tampered = raw.clone();
        tampered[0] ^= 0xFF;
        assert!(!verify(&tampered, b"site-key", b"salt", &protected));
    }
}
