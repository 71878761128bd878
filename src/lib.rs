//! The _cmpd_ library crate.
//!
//! Implements the server side of the Certificate Management Protocol (CMP)
//! request/response cycle for a Certificate Authority: message dispatch,
//! proof-of-possession checking, permission enforcement, the pending pool
//! for issued-but-unconfirmed certificates, and the persistent certificate
//! and CRL store with its revocation state machine.
//!
//! Transport, CLI surfaces and the cryptographic engine that actually signs
//! certificates are external collaborators. They reach this crate through
//! [`daemon::responder::CmpResponder::process`] and the
//! [`daemon::engine::CaEngine`] trait.

pub mod commons;
pub mod daemon;
pub mod store;
