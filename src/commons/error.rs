//! Defines all cmpd server side errors.
//!
//! Domain failures are a closed set of [`ErrorKind`]s carried by [`Error`].
//! The mapping from kind to the protocol failure bit is data on the kind
//! itself so it can be tested in isolation; the only context sensitivity
//! is `InvalidExtension`, which maps differently for revocation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::api::cmp::FailureInfo;

//------------ ErrorKind -----------------------------------------------------

/// The closed set of domain error categories.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    AlreadyIssued,
    BadCertTemplate,
    BadRequest,
    CertRevoked,
    CertUnrevoked,
    CrlFailure,
    DatabaseFailure,
    InsufficientPermission,
    InvalidExtension,
    NotPermitted,
    SystemFailure,
    SystemUnavailable,
    UnknownCert,
    UnknownCertProfile,
}

/// Whether a failure occurred during enrollment or while processing a
/// revocation request. Only `InvalidExtension` cares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureContext {
    Enrollment,
    Revocation,
}

impl ErrorKind {
    /// The protocol failure bit reported for this kind.
    pub fn failure_info(self, context: FailureContext) -> FailureInfo {
        match self {
            ErrorKind::AlreadyIssued => FailureInfo::BadRequest,
            ErrorKind::BadCertTemplate => FailureInfo::BadCertTemplate,
            ErrorKind::BadRequest => FailureInfo::BadRequest,
            ErrorKind::CertRevoked => FailureInfo::CertRevoked,
            ErrorKind::CertUnrevoked => FailureInfo::NotAuthorized,
            ErrorKind::CrlFailure => FailureInfo::SystemFailure,
            ErrorKind::DatabaseFailure => FailureInfo::SystemFailure,
            ErrorKind::InsufficientPermission => FailureInfo::NotAuthorized,
            ErrorKind::InvalidExtension => match context {
                FailureContext::Enrollment => FailureInfo::SystemFailure,
                FailureContext::Revocation => FailureInfo::UnacceptedExtension,
            },
            ErrorKind::NotPermitted => FailureInfo::NotAuthorized,
            ErrorKind::SystemFailure => FailureInfo::SystemFailure,
            ErrorKind::SystemUnavailable => FailureInfo::SystemUnavail,
            ErrorKind::UnknownCert => FailureInfo::BadCertId,
            ErrorKind::UnknownCertProfile => FailureInfo::BadCertTemplate,
        }
    }

    /// The label recorded in audit child events.
    pub fn audit_label(self) -> &'static str {
        match self {
            ErrorKind::AlreadyIssued => "ALREADY_ISSUED",
            ErrorKind::BadCertTemplate => "BAD_CERT_TEMPLATE",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::CertRevoked => "CERT_REVOKED",
            ErrorKind::CertUnrevoked => "CERT_UNREVOKED",
            ErrorKind::CrlFailure => "CRL_FAILURE",
            ErrorKind::DatabaseFailure => "DATABASE_FAILURE",
            ErrorKind::InsufficientPermission => "INSUFFICIENT_PERMISSION",
            ErrorKind::InvalidExtension => "INVALID_EXTENSION",
            ErrorKind::NotPermitted => "NOT_PERMITTED",
            ErrorKind::SystemFailure => "SYSTEM_FAILURE",
            ErrorKind::SystemUnavailable => "SYSTEM_UNAVAILABLE",
            ErrorKind::UnknownCert => "UNKNOWN_CERT",
            ErrorKind::UnknownCertProfile => "UNKNOWN_CERT_PROFILE",
        }
    }

    /// Database and system failures never leak their detail to the peer.
    pub fn exposes_detail(self) -> bool {
        !matches!(self, ErrorKind::DatabaseFailure | ErrorKind::SystemFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.audit_label().fmt(f)
    }
}

//------------ Error ---------------------------------------------------------

/// A domain error: category plus local detail.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// The status text to put in a protocol response: full detail for most
    /// kinds, category name only for the suppressed ones.
    pub fn protocol_text(&self) -> String {
        if self.kind.exposes_detail() {
            format!("{}: {}", self.kind.audit_label(), self.msg)
        } else {
            self.kind.audit_label().to_string()
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::BadRequest, msg)
    }

    pub fn unknown_cert(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnknownCert, msg)
    }

    pub fn cert_revoked(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::CertRevoked, msg)
    }

    pub fn not_permitted(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotPermitted, msg)
    }

    pub fn database(msg: impl fmt::Display) -> Self {
        Error::new(ErrorKind::DatabaseFailure, msg.to_string())
    }

    pub fn system(msg: impl fmt::Display) -> Self {
        Error::new(ErrorKind::SystemFailure, msg.to_string())
    }

    pub fn crl_failure(msg: impl fmt::Display) -> Self {
        Error::new(ErrorKind::CrlFailure, msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.msg)
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::database(e)
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        // Pool exhaustion or a dead connection: the store is unreachable,
        // not broken.
        Error::new(ErrorKind::SystemUnavailable, e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::system(e)
    }
}

//============ Tests =========================================================
