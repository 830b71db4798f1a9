//! Key decoding, signature verification and digests.
//!
//! Verification never reports failure through `Err`: a signature that cannot
//! be checked for any reason simply does not count towards a threshold.

use std::collections::{BTreeMap, BTreeSet};

use olpc_cjson::CanonicalFormatter;
use ring::signature::{
    UnparsedPublicKey, VerificationAlgorithm, ECDSA_P256_SHA256_ASN1, ED25519,
    RSA_PSS_2048_8192_SHA256,
};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};
use thiserror::Error;
use tracing::debug;

use crate::metadata::{Key, KeyId, KeyScheme, Role, Signature};

const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const ID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Algorithm identifier a SubjectPublicKeyInfo must carry for a scheme.
#[derive(Clone, Copy)]
enum SpkiParameters {
    /// No parameters at all, as for Ed25519.
    Absent,
    /// An EC key on the named curve.
    Curve(ObjectIdentifier),
    /// Parameters are not inspected.
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyDecodeError {
    #[error("invalid hex key material")]
    Hex,
    #[error("invalid PEM encoding")]
    Pem,
    #[error("invalid SubjectPublicKeyInfo structure")]
    Spki,
    #[error("key algorithm does not match scheme {0}")]
    AlgorithmMismatch(String),
    #[error("unexpected key length {0}")]
    Length(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("role {role} has {valid} valid signatures, threshold is {threshold}")]
    InsufficientSignatures {
        role: String,
        valid: u64,
        threshold: u64,
    },
}

/// Hash algorithms supported for metadata and target digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Lowercase hex digest of `bytes`.
    pub fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    HashAlgorithm::Sha256.digest_hex(bytes)
}

/// Decodes `keyval.public` into the material ring verifies against.
pub fn decode_public_key(scheme: &KeyScheme, public: &str) -> Result<Vec<u8>, KeyDecodeError> {
    match scheme {
        KeyScheme::Ed25519 => {
            let material = if is_pem(public) {
                spki_key(public, scheme, ID_ED25519, SpkiParameters::Absent)?
            } else {
                hex::decode(public.trim()).map_err(|_| KeyDecodeError::Hex)?
            };
            if material.len() != 32 {
                return Err(KeyDecodeError::Length(material.len()));
            }
            Ok(material)
        }
        KeyScheme::EcdsaP256Sha256 => {
            let material = if is_pem(public) {
                spki_key(public, scheme, ID_EC_PUBLIC_KEY, SpkiParameters::Curve(SECP256R1))?
            } else {
                hex::decode(public.trim()).map_err(|_| KeyDecodeError::Hex)?
            };
            // Uncompressed SEC1 point.
            if material.len() != 65 || material[0] != 0x04 {
                return Err(KeyDecodeError::Length(material.len()));
            }
            Ok(material)
        }
        KeyScheme::RsaPssSha256 => spki_key(public, scheme, RSA_ENCRYPTION, SpkiParameters::Any),
        KeyScheme::Unsupported(_) => Ok(Vec::new()),
    }
}

/// Checks one signature over `payload` with `key`.
pub fn verify(payload: &[u8], signature: &Signature, key: &Key) -> bool {
    let algorithm: &'static dyn VerificationAlgorithm = match key.scheme {
        KeyScheme::Ed25519 => &ED25519,
        KeyScheme::EcdsaP256Sha256 => &ECDSA_P256_SHA256_ASN1,
        KeyScheme::RsaPssSha256 => &RSA_PSS_2048_8192_SHA256,
        KeyScheme::Unsupported(_) => return false,
    };
    UnparsedPublicKey::new(algorithm, &key.material)
        .verify(payload, &signature.sig)
        .is_ok()
}

/// Counts distinct role keys with a valid signature over `payload` and fails
/// unless the count reaches the role threshold.
///
/// Signatures from keys outside the role or missing from `keys` are ignored.
/// A key signing more than once is counted once, and so is one public key
/// listed under several key ids.
pub fn verify_threshold(
    payload: &[u8],
    signatures: &[Signature],
    role: &Role,
    keys: &BTreeMap<KeyId, Key>,
) -> Result<u64, VerifyError> {
    let mut counted: BTreeSet<&KeyId> = BTreeSet::new();
    let mut signers: BTreeSet<&[u8]> = BTreeSet::new();
    for signature in signatures {
        if counted.contains(&signature.keyid) || !role.keyids.contains(&signature.keyid) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            debug!(role = %role.name, keyid = %signature.keyid, "tuf: signing key not in key table");
            continue;
        };
        if signers.contains(key.material.as_slice()) {
            debug!(role = %role.name, keyid = %signature.keyid, "tuf: key already counted under another keyid");
            continue;
        }
        if verify(payload, signature, key) {
            counted.insert(&signature.keyid);
            signers.insert(key.material.as_slice());
        } else {
            debug!(role = %role.name, keyid = %signature.keyid, "tuf: signature failed to verify");
        }
    }

    let valid = counted.len() as u64;
    if valid >= role.threshold {
        Ok(valid)
    } else {
        Err(VerifyError::InsufficientSignatures {
            role: role.name.clone(),
            valid,
            threshold: role.threshold,
        })
    }
}

/// Key identifier of a key object as it appears in metadata: SHA-256 over
/// its canonical JSON.
pub fn key_id_of(key: &serde_json::Value) -> Result<KeyId, serde_json::Error> {
    Ok(KeyId::new(sha256_hex(&canonical_json(key)?)))
}

/// Key identifier of a key carrying only `keytype`, `scheme` and `keyval`.
pub fn key_id_for(keytype: &str, scheme: &str, public: &str) -> Result<KeyId, serde_json::Error> {
    key_id_of(&json!({
        "keytype": keytype,
        "scheme": scheme,
        "keyval": { "public": public },
    }))
}

/// Serialises a JSON value in OLPC canonical form. Fails on floating point
/// numbers, which canonical JSON cannot represent.
pub fn canonical_json(value: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, CanonicalFormatter::new());
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

fn is_pem(public: &str) -> bool {
    public.trim_start().starts_with("-----BEGIN")
}

/// Decodes a `PUBLIC KEY` PEM block and returns the subjectPublicKey bits
/// once the algorithm identifier matches `algorithm` and `parameters`.
fn spki_key(
    public: &str,
    scheme: &KeyScheme,
    algorithm: ObjectIdentifier,
    parameters: SpkiParameters,
) -> Result<Vec<u8>, KeyDecodeError> {
    let parsed = pem::parse(public).map_err(|_| KeyDecodeError::Pem)?;
    if parsed.tag() != "PUBLIC KEY" || parsed.contents().is_empty() {
        return Err(KeyDecodeError::Pem);
    }
    let spki =
        SubjectPublicKeyInfoRef::try_from(parsed.contents()).map_err(|_| KeyDecodeError::Spki)?;

    let mismatch = || KeyDecodeError::AlgorithmMismatch(scheme.as_str().to_string());
    if spki.algorithm.oid != algorithm {
        return Err(mismatch());
    }
    match parameters {
        SpkiParameters::Absent if spki.algorithm.parameters.is_some() => return Err(mismatch()),
        SpkiParameters::Curve(curve) if spki.algorithm.parameters_oid().ok() != Some(curve) => {
            return Err(mismatch())
        }
        _ => {}
    }

    match spki.subject_public_key.as_bytes() {
        Some(key) if !key.is_empty() => Ok(key.to_vec()),
        _ => Err(KeyDecodeError::Spki),
    }
}
