//! Hashing and signing primitives: SHA-256 over canonical bytes, ECDSA-P256 sign/verify
//! with the raw (non-ASN.1) point and signature encodings this wire format uses.
//!
//! Signing and verification operate on an already-hashed 32-byte digest (see
//! [`crate::types::Transaction::signable_bytes`]), so the curve math runs directly on that
//! digest instead of hashing it again. `ring`'s `ECDSA_P256_SHA256_FIXED*` algorithms always
//! hash their input first, which would sign `SHA256(digest)` instead of `digest` itself;
//! `p256`'s `Prehash*` traits take the digest as-is.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::error::TransactionError;

/// Length in bytes of an uncompressed P-256 point's X or Y coordinate.
pub const COORD_LEN: usize = 32;
/// Length in bytes of the raw X‖Y public key this wire format uses (no 0x04 prefix).
pub const PUB_KEY_LEN: usize = COORD_LEN * 2;
/// Length in bytes of a raw R‖S signature.
pub const SIGNATURE_LEN: usize = COORD_LEN * 2;
/// Number of leading bytes of the address hash taken from SHA-256(pub_key).
pub const ADDRESS_LEN: usize = 20;

/// Order of the P-256 group, big-endian.
const P256_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84, 0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63,
    0x25, 0x51,
];

/// Half the group order; any signature with `s` strictly greater than this is the
/// malleable high-s twin of a valid low-s signature.
const P256_ORDER_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0x80, 0x00, 0x00, 0x00, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xde, 0x73, 0x7d, 0x56, 0xd3, 0x8b, 0xcf, 0x42, 0x79, 0xdc, 0xe5, 0x61, 0x7e, 0x31,
    0x92, 0xa8,
];

/// SHA-256 of `data`, returned as a 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 of `data`, returned as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Derives the 40-hex-char address from a raw 64-byte (X‖Y) uncompressed public key.
pub fn address_from_pub_key(pub_key: &[u8]) -> Option<String> {
    if pub_key.len() != PUB_KEY_LEN {
        return None;
    }
    let digest = sha256(pub_key);
    Some(hex::encode(&digest[..ADDRESS_LEN]))
}

/// `n - s`, big-endian, assuming `s < n`.
fn sub_from_order(s: &[u8; 32]) -> [u8; 32] {
    let mut result = [0u8; 32];
    let mut borrow: i16 = 0;
    for i in (0..32).rev() {
        let a = P256_ORDER[i] as i16;
        let b = s[i] as i16 + borrow;
        if a < b {
            result[i] = (a + 256 - b) as u8;
            borrow = 1;
        } else {
            result[i] = (a - b) as u8;
            borrow = 0;
        }
    }
    result
}

/// True if `s` is in the upper half of the group order (the malleable twin of a
/// low-s signature).
fn is_high_s(s: &[u8; 32]) -> bool {
    *s > P256_ORDER_HALF
}

/// Generates a fresh P-256 signing key. Returns `(private_key_bytes, pub_key_hex)`.
///
/// The private key is the raw 32-byte scalar, not a wallet key-file format; how a caller
/// persists it is outside this crate.
pub fn generate_keypair() -> Result<(Vec<u8>, String), String> {
    let rng = SystemRandom::new();
    let mut scalar = [0u8; COORD_LEN];
    let signing_key = loop {
        rng.fill(&mut scalar).map_err(|e| format!("rng failure: {e:?}"))?;
        if let Ok(key) = SigningKey::from_slice(&scalar) {
            break key;
        }
    };
    let verifying_key = VerifyingKey::from(&signing_key);
    let pub_key_hex = hex::encode(public_key_xy(&verifying_key));
    Ok((signing_key.to_bytes().to_vec(), pub_key_hex))
}

/// Extracts the raw X‖Y bytes from a verifying key's SEC1 uncompressed encoding.
fn public_key_xy(verifying_key: &VerifyingKey) -> Vec<u8> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    let encoded = verifying_key.to_encoded_point(false);
    // encoded is 0x04 || X || Y for an uncompressed point.
    encoded.as_bytes()[1..].to_vec()
}

/// Signs a 32-byte pre-hashed `message` with a raw P-256 scalar `private_key`, returning
/// a 64-byte raw R‖S signature canonicalized to low-s form. The digest is signed as-is;
/// it is not hashed again.
pub fn sign(private_key: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LEN], String> {
    let signing_key = SigningKey::from_slice(private_key).map_err(|e| format!("key parse failed: {e}"))?;
    let signature: Signature = signing_key
        .sign_prehash(message)
        .map_err(|e| format!("signing failed: {e}"))?;
    let raw = signature.to_bytes();
    if raw.len() != SIGNATURE_LEN {
        return Err(format!("unexpected signature length {}", raw.len()));
    }
    let mut r = [0u8; COORD_LEN];
    let mut s = [0u8; COORD_LEN];
    r.copy_from_slice(&raw[..COORD_LEN]);
    s.copy_from_slice(&raw[COORD_LEN..]);
    if is_high_s(&s) {
        s = sub_from_order(&s);
    }
    let mut out = [0u8; SIGNATURE_LEN];
    out[..COORD_LEN].copy_from_slice(&r);
    out[COORD_LEN..].copy_from_slice(&s);
    Ok(out)
}

/// Verifies a raw 64-byte R‖S `signature` over a 32-byte pre-hashed `message` under a raw
/// 64-byte X‖Y `pub_key`. Rejects high-s (malleable) signatures. The digest is verified
/// as-is; it is not hashed again.
pub fn verify(pub_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TransactionError> {
    if pub_key.len() != PUB_KEY_LEN {
        return Err(TransactionError::BadPubKey);
    }
    if signature.len() != SIGNATURE_LEN {
        return Err(TransactionError::BadSignatureFormat);
    }

    let mut s = [0u8; COORD_LEN];
    s.copy_from_slice(&signature[COORD_LEN..]);
    if is_high_s(&s) {
        return Err(TransactionError::SignatureInvalid);
    }

    let mut sec1 = Vec::with_capacity(1 + PUB_KEY_LEN);
    sec1.push(0x04);
    sec1.extend_from_slice(pub_key);

    let verifying_key =
        VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| TransactionError::BadPubKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| TransactionError::BadSignatureFormat)?;
    verifying_key
        .verify_prehash(message, &sig)
        .map_err(|_| TransactionError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (private_key, pub_key_hex) = generate_keypair().unwrap();
        let pub_key = hex::decode(&pub_key_hex).unwrap();
        let digest = sha256(b"hello pali");
        let sig = sign(&private_key, &digest).unwrap();
        assert!(verify(&pub_key, &digest, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let (private_key, pub_key_hex) = generate_keypair().unwrap();
        let pub_key = hex::decode(&pub_key_hex).unwrap();
        let sig = sign(&private_key, &sha256(b"hello pali")).unwrap();
        assert!(verify(&pub_key, &sha256(b"hello pali!"), &sig).is_err());
    }

    #[test]
    fn verify_rejects_high_s() {
        let (private_key, pub_key_hex) = generate_keypair().unwrap();
        let pub_key = hex::decode(&pub_key_hex).unwrap();
        let digest = sha256(b"hello pali");
        let mut sig = sign(&private_key, &digest).unwrap();
        let mut s = [0u8; COORD_LEN];
        s.copy_from_slice(&sig[COORD_LEN..]);
        let flipped = sub_from_order(&s);
        sig[COORD_LEN..].copy_from_slice(&flipped);
        assert!(verify(&pub_key, &digest, &sig).is_err());
    }

    #[test]
    fn address_from_pub_key_has_expected_length() {
        let (_, pub_key_hex) = generate_keypair().unwrap();
        let pub_key = hex::decode(&pub_key_hex).unwrap();
        let addr = address_from_pub_key(&pub_key).unwrap();
        assert_eq!(addr.len(), ADDRESS_LEN * 2);
    }
}
