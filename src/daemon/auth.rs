//! Requestors and what they are allowed to do.
//!
//! Requestors arrive authenticated by the transport layer. This module
//! only decides authorization: which certificate profiles a requestor may
//! use and which protocol actions it may perform. Both sides carry a
//! wildcard ("all" profiles, [`Permission::All`]) so that an admin entry
//! can be granted everything in one line.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::commons::api::cert::Name;

//------------ Permission ----------------------------------------------------

/// The protocol actions a requestor can be granted.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Permission {
    All,
    EnrollCert,
    KeyUpdate,
    CrossCertEnroll,
    RevokeCert,
    UnrevokeCert,
    RemoveCert,
    GetCrl,
    GenCrl,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Permission::All => "all",
            Permission::EnrollCert => "enroll_cert",
            Permission::KeyUpdate => "key_update",
            Permission::CrossCertEnroll => "cross_cert_enroll",
            Permission::RevokeCert => "revoke_cert",
            Permission::UnrevokeCert => "unrevoke_cert",
            Permission::RemoveCert => "remove_cert",
            Permission::GetCrl => "get_crl",
            Permission::GenCrl => "gen_crl",
        };
        s.fmt(f)
    }
}

//------------ RequestorIdentity ---------------------------------------------

/// How a requestor was authenticated.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RequestorIdentity {
    /// Authenticated by client certificate.
    Certificate { subject: Name, encoded: Bytes },
    /// Authenticated out of band under a plain name.
    Named(String),
}

//------------ Requestor -----------------------------------------------------

/// An authenticated requestor together with its grants.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Requestor {
    identity: RequestorIdentity,
    /// Profile names this requestor may enroll under; "all" grants any.
    profiles: HashSet<String>,
    permissions: HashSet<Permission>,
    /// Registration authorities may assert RA-verified POP.
    ra: bool,
}

impl Requestor {
    pub fn new(
        identity: RequestorIdentity,
        profiles: HashSet<String>,
        permissions: HashSet<Permission>,
        ra: bool,
    ) -> Self {
        Requestor {
            identity,
            profiles,
            permissions,
            ra,
        }
    }

    /// The name this requestor is recorded under.
    pub fn name(&self) -> String {
        match &self.identity {
            RequestorIdentity::Certificate { subject, .. } => subject.to_string(),
            RequestorIdentity::Named(name) => name.clone(),
        }
    }

    pub fn identity(&self) -> &RequestorIdentity {
        &self.identity
    }

    pub fn is_ra(&self) -> bool {
        self.ra
    }

    pub fn is_profile_permitted(&self, profile: &str) -> bool {
        self.profiles.contains("all") || self.profiles.contains(profile)
    }

    pub fn is_permitted(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::All)
            || self.permissions.contains(&permission)
    }
}

//------------ PermissionError -----------------------------------------------

/// An authorization failure at the whole-message level. The responder
/// turns this into a notAuthorized error body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionError(String);

impl PermissionError {
    pub fn new(msg: impl Into<String>) -> Self {
        PermissionError(msg.into())
    }
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for PermissionError {}

/// Checks that both the CA and the requestor grant `permission`.
pub fn check_permission(
    requestor: &Requestor,
    ca_permissions: &HashSet<Permission>,
    permission: Permission,
) -> Result<(), PermissionError> {
    let ca_grants = ca_permissions.contains(&Permission::All)
        || ca_permissions.contains(&permission);
    if ca_grants && requestor.is_permitted(permission) {
        Ok(())
    } else {
        Err(PermissionError::new(format!(
            "{} is not permitted {}",
            requestor.name(),
            permission
        )))
    }
}

//============ Tests =========================================================
