//! The certificate and CRL store.
//!
//! Everything the CA persists about issued certificates and published
//! CRLs lives here, in a relational database reached through a
//! connection pool. Numeric ids for issuers, requestors, users and
//! profiles are interned through small write-through caches.

pub mod certstore;
pub mod dialect;
pub mod nameid;
pub mod records;

pub use self::certstore::CertStore;
pub use self::dialect::Dialect;
pub use self::records::{
    CertInfo, CertRecord, CertWithRevocationInfo, CrlInfo, Issuer, RevokedSerial,
};
