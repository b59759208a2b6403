//! RSA blind-signature primitives (Chaum blind signing).
//!
//! Deterministic math on the RSA group: blind a token, sign it without
//! seeing it, unblind the result, verify it. Every function here is pure,
//! with no I/O and no persistent state, so the issuance state machine in
//! [`crate::registry`] and the ledger in [`crate::ledger`] can both lean on
//! it without worrying about side effects.
//!
//! Hashing the token before blinding binds the signature to the token
//! itself rather than to an attacker-chosen blinded integer. This is a
//! truncated full-domain hash (SHA-256 mod n), not RSA-PSS-blind; a
//! hardened deployment would want the latter.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use num_bigint_dig::{BigInt, Sign};
use num_traits::{One, Zero};
use rand::{rngs::OsRng, RngCore};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use sha2::{Digest, Sha256};

/// Key size this system always generates and operates on.
pub const KEY_SIZE_BITS: usize = 2048;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The blinding factor has no modular inverse mod n. Astronomically
    /// unlikely for a uniformly drawn `r`, but the law must hold.
    #[error("blinding factor has no modular inverse mod n")]
    InvalidBlindingFactor,
    /// A base64/hex payload at a serialization boundary didn't decode.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}
pub type Result<T> = std::result::Result<T, Error>;

/// A voter's single-use credential: the secret token plus the issuer's
/// unblinded signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: Vec<u8>,
    pub signature: BigUint,
}

/// `m = int(SHA-256(token)) mod n`
fn hashed_message(token: &[u8], n: &BigUint) -> BigUint {
    let digest = Sha256::digest(token);
    BigUint::from_bytes_be(&digest) % n
}

/// Extended-Euclidean modular inverse of `a` mod `m`. `None` if `gcd(a,m) != 1`.
fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let mut old_r = BigInt::from_biguint(Sign::Plus, a.clone());
    let mut r = BigInt::from_biguint(Sign::Plus, m.clone());
    let mut old_s = BigInt::one();
    let mut s = BigInt::zero();

    while !r.is_zero() {
        let quotient = &old_r / &r;
        let tmp_r = &old_r - &quotient * &r;
        old_r = r;
        r = tmp_r;
        let tmp_s = &old_s - &quotient * &s;
        old_s = s;
        s = tmp_s;
    }

    if old_r != BigInt::one() {
        return None;
    }

    let modulus = BigInt::from_biguint(Sign::Plus, m.clone());
    let inverse = ((old_s % &modulus) + &modulus) % &modulus;
    inverse.to_biguint()
}

/// Blind a token under the issuer's public key.
///
/// Draws a blinding factor `r` from `[0, n)` by rejection-sampling
/// `KEY_SIZE_BITS / 8` random bytes until `r > 1`, then returns
/// `m * r^e mod n` as a minimal big-endian byte string, along with `r`
/// (which the caller must keep secret and present to [`unblind`] later).
pub fn blind(token: &[u8], pub_key: &RsaPublicKey) -> (Vec<u8>, BigUint) {
    let n = pub_key.n();
    let e = pub_key.e();
    let m = hashed_message(token, n);

    let mut rng = OsRng;
    let byte_len = KEY_SIZE_BITS / 8;
    let mut buf = vec![0u8; byte_len];
    let r = loop {
        rng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf) % n;
        if candidate > BigUint::one() {
            break candidate;
        }
    };

    let r_e = r.modpow(e, n);
    let blinded = (&m * &r_e) % n;

    (blinded.to_bytes_be(), r)
}

/// Sign a blinded value with the issuer's private key: `blinded^d mod n`.
/// The issuer never recovers the original token from this.
pub fn blind_sign(blinded_bytes: &[u8], priv_key: &RsaPrivateKey) -> BigUint {
    let n = priv_key.n();
    let d = priv_key.d();
    let blinded_int = BigUint::from_bytes_be(blinded_bytes);
    blinded_int.modpow(d, n)
}

/// Remove the blinding factor from a blind signature: `blind_sig * r^-1 mod n`.
pub fn unblind(blind_sig: &BigUint, r: &BigUint, pub_key: &RsaPublicKey) -> Result<BigUint> {
    let n = pub_key.n();
    let r_inv = mod_inverse(r, n).ok_or(Error::InvalidBlindingFactor)?;
    Ok((blind_sig * &r_inv) % n)
}

/// Verify an (unblinded) signature against the original token:
/// `sig^e mod n == hash(token)`.
pub fn verify(token: &[u8], sig: &BigUint, pub_key: &RsaPublicKey) -> bool {
    let n = pub_key.n();
    let e = pub_key.e();
    let m = hashed_message(token, n);
    sig.modpow(e, n) == m
}

/// Deterministic, one-way, public identifier for a token: lowercase hex
/// SHA-256, 64 characters. Added to the ledger's spent-set on acceptance.
pub fn nullifier(token: &[u8]) -> String {
    hex::encode(Sha256::digest(token))
}

// ---------------------------------------------------------------------
// Serialization helpers for API-transport boundaries (§6 of the design).
// Crypto stays pure; these just translate between the wire encodings
// (base64 integers, hex tokens) and the types the primitives above use.
// ---------------------------------------------------------------------

pub fn int_to_b64(value: &BigUint) -> String {
    BASE64.encode(value.to_bytes_be())
}

pub fn b64_to_int(encoded: &str) -> Result<BigUint> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::MalformedInput(e.to_string()))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

pub fn token_to_hex(token: &[u8]) -> String {
    hex::encode(token)
}

pub fn hex_to_token(encoded: &str) -> Result<Vec<u8>> {
    hex::decode(encoded).map_err(|e| Error::MalformedInput(e.to_string()))
}

/// Serialize a credential for storage or transport: `{token (hex), signature (b64)}`.
pub fn serialize_credential(credential: &Credential) -> serde_json::Value {
    json!({
        "token": token_to_hex(&credential.token),
        "signature": int_to_b64(&credential.signature),
    })
}

/// Inverse of [`serialize_credential`].
pub fn deserialize_credential(data: &serde_json::Value) -> Result<Credential> {
    let token_hex = data
        .get("token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::MalformedInput("missing \"token\" field".to_string()))?;
    let signature_b64 = data
        .get("signature")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::MalformedInput("missing \"signature\" field".to_string()))?;

    Ok(Credential {
        token: hex_to_token(token_hex)?,
        signature: b64_to_int(signature_b64)?,
    })
}
