//! The value types read from and written to the store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commons::api::cert::{CrlReason, Name, RevocationInfo};

//------------ Issuer --------------------------------------------------------

/// The issuing CA as the store identifies it: by its certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Issuer {
    pub subject: Name,
    /// The DER encoded CA certificate.
    pub encoded: Bytes,
}

//------------ CertRecord ----------------------------------------------------

/// One certificate row, without the raw encoding.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertRecord {
    pub id: i64,
    pub serial: u64,
    pub subject: Name,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub profile_id: i64,
    pub requestor_id: Option<i64>,
    pub user_id: Option<i64>,
    /// SHA-1 over the DER encoded SubjectPublicKeyInfo, hex.
    pub public_key_fingerprint: String,
    /// SHA-1 over the canonical subject, hex.
    pub subject_fingerprint: String,
    pub revocation: Option<RevocationInfo>,
}

impl CertRecord {
    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }
}

//------------ CertWithRevocationInfo ----------------------------------------

/// A certificate row together with its raw encoding.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertWithRevocationInfo {
    pub record: CertRecord,
    /// The DER encoded certificate.
    pub encoded: Bytes,
}

//------------ CertInfo ------------------------------------------------------

/// A certificate row with its encoding and resolved profile name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertInfo {
    pub record: CertRecord,
    pub encoded: Bytes,
    pub profile: String,
}

//------------ RevokedSerial -------------------------------------------------

/// One revoked certificate as listed for CRL generation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevokedSerial {
    pub serial: u64,
    pub reason: CrlReason,
    pub revoked_at: DateTime<Utc>,
    pub invalidity_at: Option<DateTime<Utc>>,
}

//------------ CrlInfo -------------------------------------------------------

/// One published CRL.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CrlInfo {
    /// The CRL number extension value, if the CRL carries one.
    pub number: Option<u64>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    /// The DER encoded CRL.
    pub encoded: Bytes,
}
