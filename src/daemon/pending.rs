//! Certificates issued but not yet confirmed by the requestor.
//!
//! When explicit confirmation is in effect, every issued certificate is
//! parked here keyed by transaction id and certReqId until the requestor
//! confirms, rejects, or the confirm-wait deadline passes. Whoever takes
//! an entry out becomes responsible for it; entries taken by the expiry
//! sweep or by transaction teardown get revoked by the caller.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::warn;

use crate::commons::api::cert::IssuedCert;
use crate::commons::api::cmp::TransactionId;

//------------ PendingCertificatePool ----------------------------------------

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct PoolKey {
    transaction_id: TransactionId,
    cert_req_id: i64,
}

#[derive(Clone, Debug)]
struct PendingEntry {
    cert: IssuedCert,
    /// SHA-256 over the encoded certificate, what the peer must echo.
    cert_hash: Bytes,
    expires_at: DateTime<Utc>,
}

/// The pool of unconfirmed certificates. Internally synchronized.
#[derive(Debug, Default)]
pub struct PendingCertificatePool {
    entries: Mutex<HashMap<PoolKey, PendingEntry>>,
}

impl PendingCertificatePool {
    pub fn new() -> Self {
        PendingCertificatePool::default()
    }

    /// Parks a certificate until `expires_at`. A transaction id and
    /// certReqId pair is present at most once; the responder serializes
    /// additions per transaction, so a duplicate means a protocol replay
    /// and the newer certificate wins.
    pub fn add(
        &self,
        transaction_id: TransactionId,
        cert_req_id: i64,
        cert: IssuedCert,
        cert_hash: Bytes,
        expires_at: DateTime<Utc>,
    ) {
        let key = PoolKey {
            transaction_id,
            cert_req_id,
        };
        let entry = PendingEntry {
            cert,
            cert_hash,
            expires_at,
        };
        let mut entries = self.entries.lock().unwrap();
        if entries.insert(key.clone(), entry).is_some() {
            warn!(
                "replaced pending certificate for transaction {} certReqId {}",
                key.transaction_id, key.cert_req_id
            );
        }
    }

    /// Takes out the entry matching the given certificate hash. A key hit
    /// with a hash mismatch leaves the entry in place; it will be caught
    /// by transaction teardown.
    pub fn remove_by_hash(
        &self,
        transaction_id: &TransactionId,
        cert_req_id: i64,
        cert_hash: &[u8],
    ) -> Option<IssuedCert> {
        let key = PoolKey {
            transaction_id: transaction_id.clone(),
            cert_req_id,
        };
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some(entry) if entry.cert_hash == cert_hash => {
                entries.remove(&key).map(|e| e.cert)
            }
            _ => None,
        }
    }

    /// Takes out everything still pending under a transaction.
    pub fn remove_all_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Vec<IssuedCert> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<_> = entries
            .keys()
            .filter(|key| &key.transaction_id == transaction_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key).map(|e| e.cert))
            .collect()
    }

    /// Takes out every entry whose deadline has passed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<IssuedCert> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<_> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key).map(|e| e.cert))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

//============ Tests =========================================================
