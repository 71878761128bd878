//! Digest and verification helpers.
//!
//! The back end never signs anything; it only hashes for fingerprints and
//! verifies proof-of-possession signatures handed in by requestors.

use bytes::Bytes;
use log::debug;
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509Req;

use crate::commons::api::cert::Name;
use crate::commons::api::cmp::ProofOfPossession;
use crate::commons::error::Error;
use crate::commons::CmpdResult;

/// SHA-1 fingerprint in lower case hex, as stored in the record columns.
pub fn sha1_hex(data: &[u8]) -> CmpdResult<String> {
    let digest = hash(MessageDigest::sha1(), data)
        .map_err(|e| Error::system(format!("digest failed: {e}")))?;
    Ok(hex::encode(digest))
}

/// SHA-256 over the encoded certificate, as compared against the
/// certificate hash in confirmation messages.
pub fn cert_hash(encoded: &[u8]) -> CmpdResult<Bytes> {
    let digest = hash(MessageDigest::sha256(), encoded)
        .map_err(|e| Error::system(format!("digest failed: {e}")))?;
    Ok(Bytes::copy_from_slice(&digest))
}

/// SHA-1 fingerprint of the canonical form of a subject name.
pub fn subject_fingerprint(subject: &Name) -> CmpdResult<String> {
    sha1_hex(subject.canonical().as_bytes())
}

/// Verifies a signature based proof-of-possession against the DER encoded
/// SubjectPublicKeyInfo claimed in the certificate template.
///
/// RA-verified POP is *not* accepted here; the responder decides whether
/// the requestor is entitled to assert it.
pub fn verify_signature_pop(spki_der: &[u8], pop: &ProofOfPossession) -> bool {
    let (input, signature) = match pop {
        ProofOfPossession::Signature { input, signature } => (input, signature),
        ProofOfPossession::RaVerified => return false,
    };

    let key = match PKey::public_key_from_der(spki_der) {
        Ok(key) => key,
        Err(e) => {
            debug!("cannot load public key for POP check: {}", e);
            return false;
        }
    };

    let digest = MessageDigest::sha256();
    let verified = Verifier::new(digest, &key)
        .and_then(|mut verifier| {
            verifier.update(input)?;
            verifier.verify(signature)
        })
        .unwrap_or(false);

    if !verified {
        debug!("signature POP did not verify");
    }
    verified
}

/// Verifies the self-signature of a PKCS#10 certification request.
pub fn verify_pkcs10(der: &[u8]) -> bool {
    let req = match X509Req::from_der(der) {
        Ok(req) => req,
        Err(e) => {
            debug!("cannot parse PKCS#10 request: {}", e);
            return false;
        }
    };

    match req.public_key() {
        Ok(key) => req.verify(&key).unwrap_or(false),
        Err(e) => {
            debug!("cannot extract PKCS#10 public key: {}", e);
            false
        }
    }
}

//============ Tests =========================================================
