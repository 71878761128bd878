//! The boundary to the actual certificate authority.
//!
//! The responder never signs certificates or CRLs itself. Everything that
//! needs the CA key, the profile system or the certificate store sits
//! behind [`CaEngine`], so the protocol logic can be driven and tested
//! against any implementation.

use std::collections::HashSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::commons::api::cert::{
    CertData, CrlReason, IssuedCert, Name, ProfileEntry, RemoveExpiredCertsInfo,
};
use crate::commons::api::cmp::{CertExtension, Validity};
use crate::commons::CmpdResult;
use crate::daemon::auth::Permission;

//------------ CaInfo --------------------------------------------------------

/// Static facts about the CA behind the engine.
#[derive(Clone, Debug)]
pub struct CaInfo {
    pub name: String,
    pub subject: Name,
    /// The DER encoded CA certificate.
    pub cert: Bytes,
    /// The actions this CA performs at all, intersected with each
    /// requestor's own grants.
    pub permissions: HashSet<Permission>,
}

//------------ IssueRequest --------------------------------------------------

/// Everything the engine needs to issue one certificate.
#[derive(Clone, Debug)]
pub struct IssueRequest {
    pub profile: String,
    pub subject: Option<Name>,
    /// DER encoded SubjectPublicKeyInfo.
    pub public_key: Option<Bytes>,
    pub validity: Option<Validity>,
    pub extensions: Vec<CertExtension>,
    pub requestor: String,
    pub ra: bool,
}

//------------ CaEngine ------------------------------------------------------

/// The CA operations the responder drives.
pub trait CaEngine: Send + Sync {
    fn ca_info(&self) -> &CaInfo;

    /// The profiles this CA offers.
    fn profiles(&self) -> Vec<ProfileEntry>;

    /// Issues a certificate for an initial enrollment or cross
    /// certification.
    fn issue(&self, request: IssueRequest) -> CmpdResult<IssuedCert>;

    /// Issues a certificate replacing an existing one (key update).
    fn regenerate(&self, request: IssueRequest) -> CmpdResult<IssuedCert>;

    /// Revokes the certificate with the given serial. The revocation time
    /// is now; `invalidity` is the claimed time of compromise.
    fn revoke(
        &self,
        serial: u64,
        reason: CrlReason,
        invalidity: Option<DateTime<Utc>>,
    ) -> CmpdResult<CertData>;

    /// Lifts a certificate hold.
    fn unrevoke(&self, serial: u64) -> CmpdResult<CertData>;

    /// Removes the certificate record entirely.
    fn remove(&self, serial: u64) -> CmpdResult<CertData>;

    /// The latest CRL, if any has been published.
    fn current_crl(&self) -> CmpdResult<Option<Bytes>>;

    /// The CRL with the given CRL number, if retained.
    fn crl_by_number(&self, number: u64) -> CmpdResult<Option<Bytes>>;

    /// Generates and publishes a fresh CRL now. `None` if CRL generation
    /// is not activated for this CA.
    fn generate_crl(&self) -> CmpdResult<Option<Bytes>>;

    /// Bulk-removes expired certificates under a profile.
    fn remove_expired_certs(
        &self,
        profile: &str,
        user_like: Option<&str>,
        overlap_seconds: Option<i64>,
    ) -> CmpdResult<RemoveExpiredCertsInfo>;
}
