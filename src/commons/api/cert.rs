//! Certificate side value types.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//------------ Name ----------------------------------------------------------

/// A distinguished name in its string rendering (RFC 4514 style).
///
/// Comparison and hashing use the canonical form so that differences in
/// whitespace and case between what a client sent and what the CA stores
/// do not matter.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The canonical rendering: lower case, single-space-free RDNs.
    pub fn canonical(&self) -> String {
        self.0
            .split(',')
            .map(|rdn| rdn.trim().to_lowercase())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

//------------ CrlReason -----------------------------------------------------

/// RFC 5280 CRL entry reason codes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CrlReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl CrlReason {
    pub fn code(self) -> i32 {
        match self {
            CrlReason::Unspecified => 0,
            CrlReason::KeyCompromise => 1,
            CrlReason::CaCompromise => 2,
            CrlReason::AffiliationChanged => 3,
            CrlReason::Superseded => 4,
            CrlReason::CessationOfOperation => 5,
            CrlReason::CertificateHold => 6,
            CrlReason::RemoveFromCrl => 8,
            CrlReason::PrivilegeWithdrawn => 9,
            CrlReason::AaCompromise => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CrlReason::Unspecified),
            1 => Some(CrlReason::KeyCompromise),
            2 => Some(CrlReason::CaCompromise),
            3 => Some(CrlReason::AffiliationChanged),
            4 => Some(CrlReason::Superseded),
            5 => Some(CrlReason::CessationOfOperation),
            6 => Some(CrlReason::CertificateHold),
            8 => Some(CrlReason::RemoveFromCrl),
            9 => Some(CrlReason::PrivilegeWithdrawn),
            10 => Some(CrlReason::AaCompromise),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CrlReason::Unspecified => "unspecified",
            CrlReason::KeyCompromise => "keyCompromise",
            CrlReason::CaCompromise => "cACompromise",
            CrlReason::AffiliationChanged => "affiliationChanged",
            CrlReason::Superseded => "superseded",
            CrlReason::CessationOfOperation => "cessationOfOperation",
            CrlReason::CertificateHold => "certificateHold",
            CrlReason::RemoveFromCrl => "removeFromCRL",
            CrlReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            CrlReason::AaCompromise => "aACompromise",
        }
    }
}

impl fmt::Display for CrlReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.description().fmt(f)
    }
}

//------------ RevocationInfo ------------------------------------------------

/// Why and when a certificate was revoked.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevocationInfo {
    pub reason: CrlReason,
    pub revoked_at: DateTime<Utc>,
    pub invalidity_at: Option<DateTime<Utc>>,
}

impl RevocationInfo {
    pub fn new(
        reason: CrlReason,
        revoked_at: DateTime<Utc>,
        invalidity_at: Option<DateTime<Utc>>,
    ) -> Self {
        RevocationInfo {
            reason,
            revoked_at,
            invalidity_at,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.reason == CrlReason::CertificateHold
    }
}

//------------ CertStatus ----------------------------------------------------

/// Coarse status of a certificate for a given subject.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CertStatus {
    Good,
    Revoked,
    Unknown,
}

//------------ CertData ------------------------------------------------------

/// An issued certificate with the metadata the back end needs, plus its
/// raw encoding. Parsing the encoding again is never required here.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertData {
    subject: Name,
    serial: u64,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    /// DER encoded SubjectPublicKeyInfo.
    public_key: Bytes,
    /// The full DER encoded certificate.
    encoded: Bytes,
}

impl CertData {
    pub fn new(
        subject: Name,
        serial: u64,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        public_key: Bytes,
        encoded: Bytes,
    ) -> Self {
        CertData {
            subject,
            serial,
            not_before,
            not_after,
            public_key,
            encoded,
        }
    }

    pub fn subject(&self) -> &Name {
        &self.subject
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }
}

//------------ IssuedCert ----------------------------------------------------

/// The CA engine's answer to an issuance request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuedCert {
    cert: CertData,
    /// True if an identical certificate had been issued before and the
    /// engine returned the existing one.
    already_issued: bool,
    /// Set when the engine altered the requested template.
    warning: Option<String>,
}

impl IssuedCert {
    pub fn new(cert: CertData, already_issued: bool, warning: Option<String>) -> Self {
        IssuedCert {
            cert,
            already_issued,
            warning,
        }
    }

    pub fn cert(&self) -> &CertData {
        &self.cert
    }

    pub fn already_issued(&self) -> bool {
        self.already_issued
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }
}

//------------ ProfileEntry --------------------------------------------------

/// A certificate profile as advertised in the system info payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProfileEntry {
    pub name: String,
    pub profile_type: String,
    pub conf: Option<String>,
}

//------------ RemoveExpiredCertsInfo ----------------------------------------

/// Result of the bulk remove-expired-certificates administrative action.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemoveExpiredCertsInfo {
    pub profile: String,
    pub user_like: Option<String>,
    pub overlap_seconds: i64,
    /// Certificates that expired before this cutoff were removed.
    pub expired_at: DateTime<Utc>,
    pub num_certs: u64,
}

//============ Tests =========================================================
