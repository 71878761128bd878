//! The decoded CMP message model.
//!
//! The transport layer decodes DER into these types and encodes responses
//! back out; the responder only ever sees this representation.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commons::api::cert::{CertData, Name};

/// The key under which enrollment requests carry the certificate profile
/// name in their regInfo utf8 pairs (or, for PKCS#10, in the header's
/// general info).
pub const REG_INFO_CERT_PROFILE: &str = "cert-profile";

/// The id-it OID for the standard "current CRL" general message.
pub const OID_CURRENT_CRL: &str = "1.3.6.1.5.5.7.4.6";

/// The vendor OID for the action-code general message extension.
pub const OID_VENDOR_ACTIONS: &str = "1.3.6.1.4.1.54392.5.1";

/// Action codes carried under [`OID_VENDOR_ACTIONS`].
pub const ACTION_GEN_CRL: i32 = 1;
pub const ACTION_GET_CRL_WITH_SN: i32 = 2;
pub const ACTION_GET_SYSTEM_INFO: i32 = 3;
pub const ACTION_REMOVE_EXPIRED_CERTS: i32 = 4;

/// The vendor CRL entry reason code requesting certificate *removal*
/// rather than revocation. Outside the RFC 5280 reason code range.
pub const CRL_REASON_CODE_REMOVE: i32 = 101;

/// The standard reason code requesting unrevocation (removeFromCRL).
pub const CRL_REASON_CODE_UNREVOKE: i32 = 8;

//------------ TransactionId -------------------------------------------------

/// The correlation id shared by all messages of one protocol exchange.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct TransactionId(Bytes);

impl TransactionId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        TransactionId(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

//------------ PkiStatus -----------------------------------------------------

/// The PKIStatus values this CA produces.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
}

impl PkiStatus {
    pub fn code(self) -> i32 {
        match self {
            PkiStatus::Granted => 0,
            PkiStatus::GrantedWithMods => 1,
            PkiStatus::Rejection => 2,
        }
    }
}

//------------ FailureInfo ---------------------------------------------------

/// The PKIFailureInfo bits used in rejections (RFC 4210 section 5.2.3).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FailureInfo {
    BadRequest,
    BadCertId,
    BadPop,
    CertRevoked,
    BadCertTemplate,
    UnacceptedExtension,
    NotAuthorized,
    SystemUnavail,
    SystemFailure,
}

impl FailureInfo {
    /// The bit position in the PKIFailureInfo BIT STRING.
    pub fn bit(self) -> u32 {
        match self {
            FailureInfo::BadRequest => 2,
            FailureInfo::BadCertId => 4,
            FailureInfo::BadPop => 9,
            FailureInfo::CertRevoked => 10,
            FailureInfo::UnacceptedExtension => 16,
            FailureInfo::BadCertTemplate => 19,
            FailureInfo::NotAuthorized => 23,
            FailureInfo::SystemUnavail => 24,
            FailureInfo::SystemFailure => 25,
        }
    }
}

//------------ PkiStatusInfo -------------------------------------------------

/// Status, optional free text, and on rejection a failure bit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PkiStatusInfo {
    pub status: PkiStatus,
    pub status_text: Option<String>,
    pub failure: Option<FailureInfo>,
}

impl PkiStatusInfo {
    pub fn granted() -> Self {
        PkiStatusInfo {
            status: PkiStatus::Granted,
            status_text: None,
            failure: None,
        }
    }

    pub fn granted_with_mods(text: impl Into<String>) -> Self {
        PkiStatusInfo {
            status: PkiStatus::GrantedWithMods,
            status_text: Some(text.into()),
            failure: None,
        }
    }

    pub fn rejection(failure: FailureInfo, text: Option<String>) -> Self {
        PkiStatusInfo {
            status: PkiStatus::Rejection,
            status_text: text,
            failure: Some(failure),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self.status, PkiStatus::Granted | PkiStatus::GrantedWithMods)
    }
}

//------------ PkiHeader -----------------------------------------------------

/// The decoded PKIHeader fields the back end cares about.
///
/// `general_info` key/value pairs carry the PKCS#10 profile selection; the
/// implicit confirm request and the confirm wait hint get dedicated fields
/// because the responder acts on them.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PkiHeader {
    pub sender: Name,
    pub recipient: Name,
    pub transaction_id: TransactionId,
    pub message_time: Option<DateTime<Utc>>,
    /// Set on requests asking for implicit confirmation, and on responses
    /// granting it.
    pub implicit_confirm: bool,
    /// Set on enrollment responses: the peer must confirm before this time.
    pub confirm_wait_until: Option<DateTime<Utc>>,
    pub general_info: HashMap<String, String>,
}

impl PkiHeader {
    pub fn request(sender: Name, recipient: Name, transaction_id: TransactionId) -> Self {
        PkiHeader {
            sender,
            recipient,
            transaction_id,
            message_time: None,
            implicit_confirm: false,
            confirm_wait_until: None,
            general_info: HashMap::new(),
        }
    }

    /// The response header mirroring this request header.
    pub fn response_to(&self, sender: Name) -> Self {
        PkiHeader {
            sender,
            recipient: self.sender.clone(),
            transaction_id: self.transaction_id.clone(),
            message_time: None,
            implicit_confirm: false,
            confirm_wait_until: None,
            general_info: HashMap::new(),
        }
    }

    pub fn cert_profile(&self) -> Option<&str> {
        self.general_info.get(REG_INFO_CERT_PROFILE).map(|s| s.as_str())
    }
}

//------------ Enrollment bodies ---------------------------------------------

/// An optional validity window requested in a certificate template.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Validity {
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

/// A requested X.509 extension, passed through to the CA engine untouched.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertExtension {
    pub oid: String,
    pub critical: bool,
    pub value: Bytes,
}

/// The CRMF certificate template. Enrollment fills subject and key;
/// revocation requests must fill *only* issuer and serial.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertTemplate {
    pub subject: Option<Name>,
    /// DER encoded SubjectPublicKeyInfo.
    pub public_key: Option<Bytes>,
    pub validity: Option<Validity>,
    pub extensions: Vec<CertExtension>,
    pub issuer: Option<Name>,
    pub serial: Option<u64>,
    pub signing_alg: Option<String>,
    pub issuer_uid: Option<Bytes>,
    pub subject_uid: Option<Bytes>,
}

impl CertTemplate {
    /// True if any field other than version, issuer and serial is set.
    /// Revocation entries reject such templates.
    pub fn has_fields_beyond_cert_id(&self) -> bool {
        self.subject.is_some()
            || self.public_key.is_some()
            || self.validity.is_some()
            || !self.extensions.is_empty()
            || self.signing_alg.is_some()
            || self.issuer_uid.is_some()
            || self.subject_uid.is_some()
    }
}

/// Proof that the requestor holds the private key for the requested
/// public key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ProofOfPossession {
    /// A signature over `input` verifiable with the template's public key.
    Signature { input: Bytes, signature: Bytes },
    /// The RA vouches for the end entity. Only acceptable from an RA.
    RaVerified,
}

/// One CRMF certificate request message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertReqMsg {
    pub cert_req_id: i64,
    pub cert_template: CertTemplate,
    pub pop: Option<ProofOfPossession>,
    /// Decoded regInfo utf8 pairs.
    pub reg_info: HashMap<String, String>,
}

impl CertReqMsg {
    pub fn cert_profile(&self) -> Option<&str> {
        self.reg_info.get(REG_INFO_CERT_PROFILE).map(|s| s.as_str())
    }
}

/// A decoded PKCS#10 certification request. POP for these is the CSR's
/// own signature, verified over the original DER.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Pkcs10Request {
    /// The original DER encoded CertificationRequest.
    pub der: Bytes,
    pub subject: Name,
    /// DER encoded SubjectPublicKeyInfo.
    pub public_key: Bytes,
    pub extensions: Vec<CertExtension>,
}

//------------ Confirmation and revocation bodies ----------------------------

/// One entry of a certConf body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertConfirmStatus {
    pub cert_req_id: i64,
    /// The peer's hash over the certificate it received.
    pub cert_hash: Bytes,
    /// Absent means accepted.
    pub status: Option<PkiStatusInfo>,
}

impl CertConfirmStatus {
    pub fn accepted(&self) -> bool {
        match &self.status {
            None => true,
            Some(info) => info.is_granted(),
        }
    }
}

/// The CRL entry details of one revocation request entry.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CrlEntryDetails {
    /// Raw reason code; vendor codes select unrevoke/remove.
    pub reason_code: Option<i32>,
    pub invalidity_date: Option<DateTime<Utc>>,
}

/// One entry of a revocation request body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevDetails {
    pub cert_details: CertTemplate,
    pub crl_entry_details: CrlEntryDetails,
}

impl RevDetails {
    pub fn reason_code(&self) -> i32 {
        self.crl_entry_details
            .reason_code
            .unwrap_or(crate::commons::api::cert::CrlReason::Unspecified.code())
    }
}

//------------ General messages ----------------------------------------------

/// The value of an InfoTypeAndValue, decoded.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum GenValue {
    Integer(u64),
    IntegerSet(Vec<u32>),
    Utf8(String),
    Bytes(Bytes),
    /// The vendor action sequence: a code plus an optional argument.
    Action {
        code: i32,
        value: Option<Box<GenValue>>,
    },
}

/// One InfoTypeAndValue item, keyed by its OID.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InfoTypeAndValue {
    pub oid: String,
    pub value: Option<GenValue>,
}

//------------ Response bodies -----------------------------------------------

/// One response entry within a certificate response message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertResponse {
    pub cert_req_id: i64,
    pub status: PkiStatusInfo,
    pub certificate: Option<CertData>,
}

/// A certificate response message (cp, kup or ccp).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertRepMessage {
    /// The CA certificate, included when the CMP control says so.
    pub ca_certs: Vec<Bytes>,
    pub responses: Vec<CertResponse>,
}

/// One entry of a revocation response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevRepEntry {
    pub status: PkiStatusInfo,
    /// Issuer and serial, present on success.
    pub cert_id: Option<(Name, u64)>,
}

/// The full revocation response body.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RevRepContent {
    pub entries: Vec<RevRepEntry>,
}

/// An error body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorMsgContent {
    pub status: PkiStatusInfo,
}

//------------ PkiBody -------------------------------------------------------

/// All PKIBody choices this back end consumes or produces.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[allow(clippy::large_enum_variant)]
pub enum PkiBody {
    // Requests
    CertReq(Vec<CertReqMsg>),
    KeyUpdateReq(Vec<CertReqMsg>),
    P10CertReq(Pkcs10Request),
    CrossCertReq(Vec<CertReqMsg>),
    CertConf(Vec<CertConfirmStatus>),
    RevocationReq(Vec<RevDetails>),
    GenMsg(Vec<InfoTypeAndValue>),

    // Both directions
    Confirm,
    Error(ErrorMsgContent),

    // Responses
    CertRep(CertRepMessage),
    KeyUpdateRep(CertRepMessage),
    CrossCertRep(CertRepMessage),
    RevocationRep(RevRepContent),
    GenRep(Vec<InfoTypeAndValue>),
}

impl PkiBody {
    /// A short tag for logging and audit event types.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PkiBody::CertReq(_) => "CERT_REQ",
            PkiBody::KeyUpdateReq(_) => "KEY_UPDATE",
            PkiBody::P10CertReq(_) => "CERT_REQ",
            PkiBody::CrossCertReq(_) => "CROSS_CERT_REQ",
            PkiBody::CertConf(_) => "CERT_CONFIRM",
            PkiBody::RevocationReq(_) => "REVOCATION_REQ",
            PkiBody::GenMsg(_) => "GEN_MSG",
            PkiBody::Confirm => "CONFIRM",
            PkiBody::Error(_) => "ERROR",
            PkiBody::CertRep(_) => "CERT_REP",
            PkiBody::KeyUpdateRep(_) => "KEY_UPDATE_REP",
            PkiBody::CrossCertRep(_) => "CROSS_CERT_REP",
            PkiBody::RevocationRep(_) => "REVOCATION_REP",
            PkiBody::GenRep(_) => "GEN_REP",
        }
    }
}

//------------ PkiMessage ----------------------------------------------------

/// A full decoded protocol message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PkiMessage {
    pub header: PkiHeader,
    pub body: PkiBody,
}

impl PkiMessage {
    pub fn new(header: PkiHeader, body: PkiBody) -> Self {
        PkiMessage { header, body }
    }
}

//============ Tests =========================================================
