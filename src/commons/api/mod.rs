//! Data types shared between the protocol responder and the stores.
//!
//! The `cmp` module models the *decoded* CMP message: the transport layer
//! is responsible for DER and for authenticating the sender, and hands the
//! responder plain Rust values. The `cert` module holds the certificate
//! side value types used across the responder, the pending pool and the
//! certificate store.

pub mod cert;
pub mod cmp;

pub use self::cert::{
    CertData, CertStatus, CrlReason, IssuedCert, Name, ProfileEntry,
    RemoveExpiredCertsInfo, RevocationInfo,
};
pub use self::cmp::{
    CertConfirmStatus, CertRepMessage, CertReqMsg, CertResponse, CertTemplate,
    CrlEntryDetails, ErrorMsgContent, FailureInfo, GenValue, InfoTypeAndValue,
    Pkcs10Request, PkiBody, PkiHeader, PkiMessage, PkiStatus, PkiStatusInfo,
    ProofOfPossession, RevDetails, RevRepContent, RevRepEntry, TransactionId,
    Validity,
};
