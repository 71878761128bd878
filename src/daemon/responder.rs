//! The protocol dispatcher.
//!
//! [`CmpResponder::process`] takes one decoded request message from an
//! authenticated requestor and produces the response message. All CA
//! operations go through the [`CaEngine`] the responder was built with;
//! the responder owns the pending certificate pool and the background
//! sweep that revokes certificates whose confirmation deadline passed.
//!
//! Errors never escape as `Err`: whatever goes wrong inside becomes a
//! protocol level rejection or error body in the response.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::commons::api::cert::{CrlReason, IssuedCert, Name};
use crate::commons::api::cmp::{
    CertConfirmStatus, CertRepMessage, CertReqMsg, CertResponse, ErrorMsgContent, FailureInfo,
    GenValue, InfoTypeAndValue, Pkcs10Request, PkiBody, PkiHeader, PkiMessage, PkiStatusInfo,
    ProofOfPossession, RevDetails, RevRepContent, RevRepEntry, TransactionId, ACTION_GEN_CRL,
    ACTION_GET_CRL_WITH_SN, ACTION_GET_SYSTEM_INFO, ACTION_REMOVE_EXPIRED_CERTS,
    CRL_REASON_CODE_REMOVE, CRL_REASON_CODE_UNREVOKE, OID_CURRENT_CRL, OID_VENDOR_ACTIONS,
};
use crate::commons::crypto;
use crate::commons::error::{Error, FailureContext};
use crate::commons::CmpdResult;
use crate::daemon::audit::{AuditChildEvent, AuditEvent, AuditStatus};
use crate::daemon::auth::{check_permission, Permission, PermissionError, Requestor};
use crate::daemon::config::Config;
use crate::daemon::engine::{CaEngine, IssueRequest};
use crate::daemon::pending::PendingCertificatePool;

//------------ CmpResponder --------------------------------------------------

pub struct CmpResponder {
    engine: Arc<dyn CaEngine>,
    pending: Arc<PendingCertificatePool>,
    confirm_wait: chrono::Duration,
    require_explicit_confirm: bool,
    send_ca_cert: bool,
    sweeper: Option<JoinHandle<()>>,
}

/// # Set up
impl CmpResponder {
    /// Builds the responder and starts the pending pool sweep. Call this
    /// within an async runtime; without one the sweep cannot run and
    /// unconfirmed certificates linger until a teardown message arrives.
    pub fn build(engine: Arc<dyn CaEngine>, config: &Config) -> Self {
        let pending = Arc::new(PendingCertificatePool::new());
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(Self::spawn_sweeper(
                &handle,
                engine.clone(),
                pending.clone(),
                config.pending_sweep_secs,
            )),
            Err(_) => {
                warn!("no async runtime, expired pending certificates are not swept");
                None
            }
        };
        CmpResponder {
            engine,
            pending,
            confirm_wait: config.confirm_wait(),
            require_explicit_confirm: config.require_explicit_confirm,
            send_ca_cert: config.send_ca_cert,
            sweeper,
        }
    }

    fn spawn_sweeper(
        handle: &tokio::runtime::Handle,
        engine: Arc<dyn CaEngine>,
        pending: Arc<PendingCertificatePool>,
        interval_secs: u64,
    ) -> JoinHandle<()> {
        handle.spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                let expired = pending.sweep_expired(Utc::now());
                if expired.is_empty() {
                    continue;
                }
                info!(
                    "revoking {} certificates whose confirmation deadline passed",
                    expired.len()
                );
                for cert in expired {
                    revoke_unconfirmed(engine.as_ref(), &cert);
                }
            }
        })
    }

    #[cfg(test)]
    fn pending(&self) -> &PendingCertificatePool {
        &self.pending
    }
}

impl Drop for CmpResponder {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// # Process messages
impl CmpResponder {
    /// Processes one request message and returns the response.
    pub fn process(
        &self,
        requestor: &Requestor,
        message: &PkiMessage,
        audit: &mut AuditEvent,
    ) -> PkiMessage {
        audit.add_data("requestor", requestor.name());
        let tid = &message.header.transaction_id;
        let mut resp_header = message
            .header
            .response_to(self.engine.ca_info().subject.clone());

        let result = match &message.body {
            PkiBody::CertReq(_)
            | PkiBody::KeyUpdateReq(_)
            | PkiBody::P10CertReq(_)
            | PkiBody::CrossCertReq(_) => self.process_enrollment(
                requestor,
                &message.header,
                &message.body,
                &mut resp_header,
                audit,
            ),
            PkiBody::CertConf(entries) => {
                audit.set_event_type("CERT_CONFIRM");
                Ok(self.confirm_certificates(tid, entries))
            }
            PkiBody::RevocationReq(entries) => {
                self.process_revocation(requestor, entries, audit)
            }
            PkiBody::Confirm | PkiBody::Error(_) => {
                // The peer ended the exchange; whatever is still pending
                // under this transaction was never confirmed.
                audit.set_event_type(message.body.type_tag());
                self.teardown(tid);
                Ok(PkiBody::Confirm)
            }
            PkiBody::GenMsg(items) => {
                self.process_general_message(requestor, items, audit)
            }
            other => {
                audit.set_event_type(other.type_tag());
                Ok(error_body(
                    FailureInfo::BadRequest,
                    format!("unsupported message type {}", other.type_tag()),
                ))
            }
        };

        let body = result.unwrap_or_else(|e| {
            warn!("request in transaction {} not authorized: {}", tid, e);
            error_body(FailureInfo::NotAuthorized, e.to_string())
        });

        if let PkiBody::Error(content) = &body {
            audit.set_status(AuditStatus::Failed);
            if let Some(text) = &content.status.status_text {
                audit.add_data("message", text.clone());
            }
        } else if audit.status().is_none() {
            audit.set_status(AuditStatus::Successful);
        }

        PkiMessage::new(resp_header, body)
    }
}

/// # Enrollment
impl CmpResponder {
    fn process_enrollment(
        &self,
        requestor: &Requestor,
        header: &PkiHeader,
        body: &PkiBody,
        resp_header: &mut PkiHeader,
        audit: &mut AuditEvent,
    ) -> Result<PkiBody, PermissionError> {
        let (event_type, permission, key_update) = match body {
            PkiBody::KeyUpdateReq(_) => ("KEY_UPDATE", Permission::KeyUpdate, true),
            PkiBody::CrossCertReq(_) => {
                ("CROSS_CERT_REQ", Permission::CrossCertEnroll, false)
            }
            _ => ("CERT_REQ", Permission::EnrollCert, false),
        };
        audit.set_event_type(event_type);
        check_permission(requestor, &self.engine.ca_info().permissions, permission)?;

        let tid = &header.transaction_id;
        let implicit = header.implicit_confirm && !self.require_explicit_confirm;

        let responses = match body {
            PkiBody::CertReq(msgs)
            | PkiBody::KeyUpdateReq(msgs)
            | PkiBody::CrossCertReq(msgs) => msgs
                .iter()
                .map(|msg| {
                    self.process_one_cert_request(
                        requestor, tid, msg, key_update, implicit, audit,
                    )
                })
                .collect(),
            PkiBody::P10CertReq(p10) => {
                vec![self.process_p10(requestor, header, p10, implicit, audit)]
            }
            _ => Vec::new(),
        };

        let rep = CertRepMessage {
            ca_certs: if self.send_ca_cert {
                vec![self.engine.ca_info().cert.clone()]
            } else {
                Vec::new()
            },
            responses,
        };
        let body = match body {
            PkiBody::KeyUpdateReq(_) => PkiBody::KeyUpdateRep(rep),
            PkiBody::CrossCertReq(_) => PkiBody::CrossCertRep(rep),
            _ => PkiBody::CertRep(rep),
        };

        if implicit {
            // Nothing to confirm, and stale entries parked under a
            // replayed transaction id must not linger either.
            self.pending.remove_all_for_transaction(tid);
            resp_header.implicit_confirm = true;
        } else {
            let now = Utc::now();
            resp_header.message_time = Some(now);
            resp_header.confirm_wait_until = Some(now + self.confirm_wait);
        }
        Ok(body)
    }

    fn process_one_cert_request(
        &self,
        requestor: &Requestor,
        tid: &TransactionId,
        msg: &CertReqMsg,
        key_update: bool,
        implicit: bool,
        audit: &mut AuditEvent,
    ) -> CertResponse {
        let child = audit.add_child();
        child.add_data("certReqId", msg.cert_req_id.to_string());

        let pop_ok = match &msg.pop {
            None => false,
            Some(ProofOfPossession::RaVerified) => requestor.is_ra(),
            Some(pop @ ProofOfPossession::Signature { .. }) => {
                match &msg.cert_template.public_key {
                    Some(spki) => crypto::verify_signature_pop(spki, pop),
                    None => false,
                }
            }
        };
        if !pop_ok {
            fail_child(child, "BAD_POP", "invalid proof of possession");
            return CertResponse {
                cert_req_id: msg.cert_req_id,
                status: PkiStatusInfo::rejection(
                    FailureInfo::BadPop,
                    Some("invalid proof of possession".to_string()),
                ),
                certificate: None,
            };
        }

        let profile = match msg.cert_profile() {
            Some(profile) => profile,
            None => {
                fail_child(child, "BAD_CERT_TEMPLATE", "no certificate profile");
                return CertResponse {
                    cert_req_id: msg.cert_req_id,
                    status: PkiStatusInfo::rejection(
                        FailureInfo::BadCertTemplate,
                        Some("no certificate profile is specified".to_string()),
                    ),
                    certificate: None,
                };
            }
        };
        child.add_data("certProfile", profile);

        let template = &msg.cert_template;
        let request = IssueRequest {
            profile: profile.to_string(),
            subject: template.subject.clone(),
            public_key: template.public_key.clone(),
            validity: template.validity,
            extensions: template.extensions.clone(),
            requestor: requestor.name(),
            ra: requestor.is_ra(),
        };
        self.issue_certificate(
            requestor,
            tid,
            msg.cert_req_id,
            request,
            key_update,
            implicit,
            child,
        )
    }

    /// PKCS#10 requests carry no certReqId of their own; by convention
    /// the single response entry uses -1. The profile rides in the
    /// request header's general info.
    fn process_p10(
        &self,
        requestor: &Requestor,
        header: &PkiHeader,
        p10: &Pkcs10Request,
        implicit: bool,
        audit: &mut AuditEvent,
    ) -> CertResponse {
        let cert_req_id = -1;
        let child = audit.add_child();
        child.add_data("certReqId", cert_req_id.to_string());

        if !crypto::verify_pkcs10(&p10.der) {
            fail_child(child, "BAD_POP", "invalid PKCS#10 signature");
            return CertResponse {
                cert_req_id,
                status: PkiStatusInfo::rejection(
                    FailureInfo::BadPop,
                    Some("invalid proof of possession".to_string()),
                ),
                certificate: None,
            };
        }

        let profile = match header.cert_profile() {
            Some(profile) => profile,
            None => {
                fail_child(child, "BAD_CERT_TEMPLATE", "no certificate profile");
                return CertResponse {
                    cert_req_id,
                    status: PkiStatusInfo::rejection(
                        FailureInfo::BadCertTemplate,
                        Some("no certificate profile is specified".to_string()),
                    ),
                    certificate: None,
                };
            }
        };
        child.add_data("certProfile", profile);

        let request = IssueRequest {
            profile: profile.to_string(),
            subject: Some(p10.subject.clone()),
            public_key: Some(p10.public_key.clone()),
            validity: None,
            extensions: p10.extensions.clone(),
            requestor: requestor.name(),
            ra: requestor.is_ra(),
        };
        self.issue_certificate(
            requestor, tid_of(header), cert_req_id, request, false, implicit, child,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_certificate(
        &self,
        requestor: &Requestor,
        tid: &TransactionId,
        cert_req_id: i64,
        request: IssueRequest,
        key_update: bool,
        implicit: bool,
        child: &mut AuditChildEvent,
    ) -> CertResponse {
        if !requestor.is_profile_permitted(&request.profile) {
            fail_child(
                child,
                "UNKNOWN_CERT_PROFILE",
                format!("profile {} not permitted", request.profile),
            );
            return CertResponse {
                cert_req_id,
                status: PkiStatusInfo::rejection(
                    FailureInfo::BadCertTemplate,
                    Some(format!(
                        "certificate profile {} is not permitted",
                        request.profile
                    )),
                ),
                certificate: None,
            };
        }

        let profile = request.profile.clone();
        let result = if key_update {
            self.engine.regenerate(request)
        } else {
            self.engine.issue(request)
        };

        let issued = match result {
            Ok(issued) => issued,
            Err(e) => {
                warn!("cannot issue certificate under profile {}: {}", profile, e.kind());
                debug!("issuance failure detail: {}", e);
                fail_child(child, e.kind().audit_label(), e.msg());
                return CertResponse {
                    cert_req_id,
                    status: PkiStatusInfo::rejection(
                        e.kind().failure_info(FailureContext::Enrollment),
                        Some(e.protocol_text()),
                    ),
                    certificate: None,
                };
            }
        };

        child.add_data("subject", issued.cert().subject().to_string());

        if !implicit {
            match crypto::cert_hash(issued.cert().encoded()) {
                Ok(hash) => {
                    self.pending.add(
                        tid.clone(),
                        cert_req_id,
                        issued.clone(),
                        hash,
                        Utc::now() + self.confirm_wait,
                    );
                }
                Err(e) => {
                    warn!("cannot hash issued certificate: {}", e);
                    fail_child(child, e.kind().audit_label(), e.msg());
                    return CertResponse {
                        cert_req_id,
                        status: PkiStatusInfo::rejection(
                            FailureInfo::SystemFailure,
                            Some(e.protocol_text()),
                        ),
                        certificate: None,
                    };
                }
            }
        }

        let status = if issued.already_issued() {
            PkiStatusInfo::granted_with_mods("ALREADY_ISSUED")
        } else if let Some(warning) = issued.warning() {
            PkiStatusInfo::granted_with_mods(warning)
        } else {
            PkiStatusInfo::granted()
        };
        child.set_status(AuditStatus::Successful);
        CertResponse {
            cert_req_id,
            status,
            certificate: Some(issued.cert().clone()),
        }
    }
}

/// # Confirmation and teardown
impl CmpResponder {
    fn confirm_certificates(
        &self,
        tid: &TransactionId,
        entries: &[CertConfirmStatus],
    ) -> PkiBody {
        let mut success = true;
        for entry in entries {
            match self
                .pending
                .remove_by_hash(tid, entry.cert_req_id, &entry.cert_hash)
            {
                None => {
                    warn!(
                        "no pending certificate in transaction {} under certReqId {} \
                         with the given hash",
                        tid, entry.cert_req_id
                    );
                }
                Some(cert) => {
                    if !entry.accepted() {
                        // The requestor rejected a certificate it received.
                        success = false;
                        revoke_unconfirmed(self.engine.as_ref(), &cert);
                    }
                }
            }
        }

        // Anything left was either never confirmed or confirmed with a
        // wrong hash. It must not stay valid.
        let remaining = self.pending.remove_all_for_transaction(tid);
        if !remaining.is_empty() {
            success = false;
            for cert in remaining {
                revoke_unconfirmed(self.engine.as_ref(), &cert);
            }
        }

        if success {
            PkiBody::Confirm
        } else {
            error_body(
                FailureInfo::SystemFailure,
                "could not confirm all certificates",
            )
        }
    }

    fn teardown(&self, tid: &TransactionId) {
        for cert in self.pending.remove_all_for_transaction(tid) {
            revoke_unconfirmed(self.engine.as_ref(), &cert);
        }
    }
}

/// # Revocation
impl CmpResponder {
    fn process_revocation(
        &self,
        requestor: &Requestor,
        entries: &[RevDetails],
        audit: &mut AuditEvent,
    ) -> Result<PkiBody, PermissionError> {
        if entries.is_empty() {
            audit.set_event_type("REVOCATION_REQ");
            return Ok(error_body(
                FailureInfo::BadRequest,
                "no entries in the revocation request",
            ));
        }

        // One batch performs exactly one kind of action. Mixed batches
        // are refused before any entry is touched.
        let mut action = None;
        for entry in entries {
            let this = RevAction::from_reason_code(entry.reason_code());
            match action {
                None => action = Some(this),
                Some(first) if first != this => {
                    audit.set_event_type("REVOCATION_REQ");
                    return Ok(error_body(
                        FailureInfo::BadRequest,
                        "not all entries of the request ask for the same action",
                    ));
                }
                _ => {}
            }
        }
        let action = action.unwrap_or(RevAction::Revoke);

        let (event_type, permission) = match action {
            RevAction::Revoke => ("CERT_REVOKE", Permission::RevokeCert),
            RevAction::Unrevoke => ("CERT_UNREVOKE", Permission::UnrevokeCert),
            RevAction::Remove => ("CERT_REMOVE", Permission::RemoveCert),
        };
        audit.set_event_type(event_type);
        check_permission(requestor, &self.engine.ca_info().permissions, permission)?;

        let ca_subject = self.engine.ca_info().subject.clone();
        let mut rep = RevRepContent::default();
        for entry in entries {
            let child = audit.add_child();
            rep.entries
                .push(self.process_one_revocation(&ca_subject, entry, action, child));
        }
        Ok(PkiBody::RevocationRep(rep))
    }

    fn process_one_revocation(
        &self,
        ca_subject: &Name,
        entry: &RevDetails,
        action: RevAction,
        child: &mut AuditChildEvent,
    ) -> RevRepEntry {
        match self.revocation_entry(ca_subject, entry, action, child) {
            Ok(serial) => {
                child.set_status(AuditStatus::Successful);
                RevRepEntry {
                    status: PkiStatusInfo::granted(),
                    cert_id: Some((ca_subject.clone(), serial)),
                }
            }
            Err(e) => {
                warn!(
                    "revocation request entry failed: {}",
                    e.kind()
                );
                debug!("revocation failure detail: {}", e);
                fail_child(child, e.kind().audit_label(), e.msg());
                RevRepEntry {
                    status: PkiStatusInfo::rejection(
                        e.kind().failure_info(FailureContext::Revocation),
                        Some(e.protocol_text()),
                    ),
                    cert_id: None,
                }
            }
        }
    }

    fn revocation_entry(
        &self,
        ca_subject: &Name,
        entry: &RevDetails,
        action: RevAction,
        child: &mut AuditChildEvent,
    ) -> CmpdResult<u64> {
        let details = &entry.cert_details;
        let serial = details
            .serial
            .ok_or_else(|| Error::unknown_cert("serial number is not present"))?;
        child.add_data("serialNumber", serial.to_string());

        let issuer = details
            .issuer
            .as_ref()
            .ok_or_else(|| Error::unknown_cert("issuer is not present"))?;
        if issuer != ca_subject {
            return Err(Error::unknown_cert("issuer does not target at the CA"));
        }
        if details.has_fields_beyond_cert_id() {
            return Err(Error::unknown_cert(
                "only version, issuer and serial number are allowed in the template",
            ));
        }

        match action {
            RevAction::Revoke => {
                let reason = CrlReason::from_code(entry.reason_code())
                    .unwrap_or(CrlReason::Unspecified);
                child.add_data("reason", reason.description());
                let invalidity = entry.crl_entry_details.invalidity_date;
                if let Some(invalidity) = invalidity {
                    child.add_data("invalidityDate", invalidity.to_rfc3339());
                }
                self.engine.revoke(serial, reason, invalidity)?;
            }
            RevAction::Unrevoke => {
                self.engine.unrevoke(serial)?;
            }
            RevAction::Remove => {
                self.engine.remove(serial)?;
            }
        }
        Ok(serial)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RevAction {
    Revoke,
    Unrevoke,
    Remove,
}

impl RevAction {
    fn from_reason_code(code: i32) -> Self {
        match code {
            CRL_REASON_CODE_REMOVE => RevAction::Remove,
            CRL_REASON_CODE_UNREVOKE => RevAction::Unrevoke,
            _ => RevAction::Revoke,
        }
    }
}

/// # General messages
impl CmpResponder {
    fn process_general_message(
        &self,
        requestor: &Requestor,
        items: &[InfoTypeAndValue],
        audit: &mut AuditEvent,
    ) -> Result<PkiBody, PermissionError> {
        let item = match items
            .iter()
            .find(|item| item.oid == OID_CURRENT_CRL || item.oid == OID_VENDOR_ACTIONS)
        {
            Some(item) => item,
            None => {
                audit.set_event_type("GEN_MSG");
                return Ok(error_body(
                    FailureInfo::BadRequest,
                    format!(
                        "general messages are only supported with the types {} and {}",
                        OID_CURRENT_CRL, OID_VENDOR_ACTIONS
                    ),
                ));
            }
        };

        let ca_permissions = &self.engine.ca_info().permissions;

        if item.oid == OID_CURRENT_CRL {
            audit.set_event_type("CRL_DOWNLOAD");
            check_permission(requestor, ca_permissions, Permission::GetCrl)?;
            return Ok(self.gen_reply(
                &item.oid,
                self.crl_value(item.value.as_ref()),
            ));
        }

        let (code, arg) = match &item.value {
            Some(GenValue::Action { code, value }) => (*code, value.as_deref()),
            _ => {
                audit.set_event_type("GEN_MSG");
                return Ok(error_body(
                    FailureInfo::BadRequest,
                    "invalid value for the vendor action request",
                ));
            }
        };

        let result = match code {
            ACTION_GEN_CRL => {
                audit.set_event_type("CRL_GEN_ONDEMAND");
                check_permission(requestor, ca_permissions, Permission::GenCrl)?;
                self.generated_crl_value()
            }
            ACTION_GET_CRL_WITH_SN => {
                audit.set_event_type("CRL_DOWNLOAD_WITH_SN");
                check_permission(requestor, ca_permissions, Permission::GetCrl)?;
                self.crl_value(arg)
            }
            ACTION_GET_SYSTEM_INFO => {
                audit.set_event_type("GET_SYSTEMINFO");
                self.system_info_value(requestor, arg)
            }
            ACTION_REMOVE_EXPIRED_CERTS => {
                audit.set_event_type("REMOVE_EXPIRED_CERTS");
                check_permission(requestor, ca_permissions, Permission::RemoveCert)?;
                self.remove_expired_value(requestor, arg)
            }
            _ => {
                audit.set_event_type("GEN_MSG");
                return Ok(error_body(
                    FailureInfo::BadRequest,
                    format!("unsupported action code {code}"),
                ));
            }
        };

        Ok(self.gen_reply(
            &item.oid,
            result.map(|value| GenValue::Action {
                code,
                value: Some(Box::new(value)),
            }),
        ))
    }

    fn gen_reply(&self, oid: &str, result: CmpdResult<GenValue>) -> PkiBody {
        match result {
            Ok(value) => PkiBody::GenRep(vec![InfoTypeAndValue {
                oid: oid.to_string(),
                value: Some(value),
            }]),
            Err(e) => {
                warn!("general message failed: {}", e.kind());
                debug!("general message failure detail: {}", e);
                error_body(
                    e.kind().failure_info(FailureContext::Enrollment),
                    e.protocol_text(),
                )
            }
        }
    }

    fn crl_value(&self, arg: Option<&GenValue>) -> CmpdResult<GenValue> {
        let crl = match arg {
            None => self.engine.current_crl()?,
            Some(GenValue::Integer(number)) => self.engine.crl_by_number(*number)?,
            Some(_) => {
                return Err(Error::bad_request("invalid value for the CRL request"))
            }
        };
        crl.map(GenValue::Bytes)
            .ok_or_else(|| Error::crl_failure("no CRL is available"))
    }

    fn generated_crl_value(&self) -> CmpdResult<GenValue> {
        self.engine
            .generate_crl()?
            .map(GenValue::Bytes)
            .ok_or_else(|| Error::crl_failure("CRL generation is not activated"))
    }

    fn system_info_value(
        &self,
        requestor: &Requestor,
        arg: Option<&GenValue>,
    ) -> CmpdResult<GenValue> {
        let accepted: Vec<u32> = match arg {
            None => vec![1],
            Some(GenValue::IntegerSet(versions)) => versions.clone(),
            Some(_) => {
                return Err(Error::bad_request(
                    "invalid value for the system info request",
                ))
            }
        };
        // Negotiate the highest version both sides know.
        let version = if accepted.contains(&2) {
            2
        } else if accepted.contains(&1) {
            1
        } else {
            return Err(Error::bad_request(format!(
                "none of the requested system info versions {accepted:?} is supported"
            )));
        };
        Ok(GenValue::Utf8(self.system_info_xml(requestor, version)))
    }

    fn system_info_xml(&self, requestor: &Requestor, version: u32) -> String {
        let info = self.engine.ca_info();
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str(&format!("<systemInfo version=\"{version}\">"));
        xml.push_str("<CACert>");
        xml.push_str(&BASE64.encode(&info.cert));
        xml.push_str("</CACert>");
        if version == 2 {
            xml.push_str("<certProfiles>");
            for profile in self.engine.profiles() {
                if !requestor.is_profile_permitted(&profile.name) {
                    continue;
                }
                xml.push_str("<certProfile>");
                xml.push_str(&format!("<name>{}</name>", profile.name));
                xml.push_str(&format!("<type>{}</type>", profile.profile_type));
                if let Some(conf) = &profile.conf {
                    if !conf.trim().is_empty() {
                        xml.push_str(&format!("<conf><![CDATA[{conf}]]></conf>"));
                    }
                }
                xml.push_str("</certProfile>");
            }
            xml.push_str("</certProfiles>");
        }
        xml.push_str("</systemInfo>");
        xml
    }

    fn remove_expired_value(
        &self,
        requestor: &Requestor,
        arg: Option<&GenValue>,
    ) -> CmpdResult<GenValue> {
        let xml = match arg {
            Some(GenValue::Utf8(xml)) => xml,
            _ => {
                return Err(Error::bad_request(
                    "invalid value for the remove expired certs request",
                ))
            }
        };
        let profile = xml_text_child(xml, "certProfile")
            .ok_or_else(|| Error::bad_request("certProfile is not specified"))?;
        if !requestor.is_profile_permitted(&profile) {
            return Err(Error::not_permitted(format!(
                "certificate profile {profile} is not permitted"
            )));
        }
        let user_like = xml_text_child(xml, "userLike");
        let overlap = match xml_text_child(xml, "overlap") {
            None => None,
            Some(text) => Some(text.parse::<i64>().map_err(|_| {
                Error::bad_request(format!("invalid overlap '{text}'"))
            })?),
        };

        let info =
            self.engine
                .remove_expired_certs(&profile, user_like.as_deref(), overlap)?;

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str("<removedExpiredCertsResp version=\"1\">");
        xml.push_str(&format!("<certProfile>{}</certProfile>", info.profile));
        if let Some(user_like) = &info.user_like {
            xml.push_str(&format!("<userLike>{user_like}</userLike>"));
        }
        xml.push_str(&format!("<overlap>{}</overlap>", info.overlap_seconds));
        xml.push_str(&format!("<expiredAt>{}</expiredAt>", info.expired_at.timestamp()));
        xml.push_str(&format!("<numCerts>{}</numCerts>", info.num_certs));
        xml.push_str("</removedExpiredCertsResp>");
        Ok(GenValue::Utf8(xml))
    }
}

//------------ Helpers -------------------------------------------------------

fn tid_of(header: &PkiHeader) -> &TransactionId {
    &header.transaction_id
}

fn error_body(failure: FailureInfo, text: impl Into<String>) -> PkiBody {
    PkiBody::Error(ErrorMsgContent {
        status: PkiStatusInfo::rejection(failure, Some(text.into())),
    })
}

fn fail_child(child: &mut AuditChildEvent, label: &str, msg: impl AsRef<str>) {
    child.add_data("failure", label);
    let msg = msg.as_ref();
    if !msg.is_empty() {
        child.add_data("message", msg);
    }
    child.set_status(AuditStatus::Failed);
}

fn revoke_unconfirmed(engine: &dyn CaEngine, cert: &IssuedCert) -> bool {
    let serial = cert.cert().serial();
    let now = Utc::now();
    match engine.revoke(serial, CrlReason::CessationOfOperation, Some(now)) {
        Ok(_) => true,
        Err(e) => {
            warn!(
                "cannot revoke unconfirmed certificate with serial {}: {}",
                serial, e
            );
            false
        }
    }
}

/// Extracts the trimmed text of the first `<tag>` element. Enough for
/// the flat request payloads this module consumes.
fn xml_text_child(doc: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = doc.find(&open)? + open.len();
    let end = doc[start..].find(&close)? + start;
    let text = doc[start..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;
    use chrono::{DateTime, Duration, Utc};

    use crate::commons::api::cert::{
        CertData, CrlReason, ProfileEntry, RemoveExpiredCertsInfo,
    };
    use crate::commons::api::cmp::CertTemplate;
    use crate::commons::error::ErrorKind;
    use crate::daemon::engine::CaInfo;

    //-------- Test engine ---------------------------------------------------

    struct TestEngine {
        info: CaInfo,
        next_serial: AtomicU64,
        revoked: Mutex<Vec<(u64, CrlReason)>>,
        unrevoked: Mutex<Vec<u64>>,
        removed: Mutex<Vec<u64>>,
        crl: Option<Bytes>,
        /// Issuance under this profile fails with the given kind.
        fail_profile: Option<(String, ErrorKind)>,
    }

    impl TestEngine {
        fn new() -> Self {
            let mut permissions = HashSet::new();
            permissions.insert(Permission::All);
            TestEngine {
                info: CaInfo {
                    name: "testca".to_string(),
                    subject: Name::new("CN=Test CA"),
                    cert: Bytes::from_static(b"ca-cert-der"),
                    permissions,
                },
                next_serial: AtomicU64::new(1),
                revoked: Mutex::new(Vec::new()),
                unrevoked: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
                crl: Some(Bytes::from_static(b"crl-der")),
                fail_profile: None,
            }
        }

        fn without_crl() -> Self {
            TestEngine {
                crl: None,
                ..TestEngine::new()
            }
        }

        fn dummy_cert(&self, serial: u64) -> CertData {
            let now = Utc::now();
            CertData::new(
                Name::new("CN=EE"),
                serial,
                now,
                now + Duration::days(365),
                Bytes::from_static(b"spki"),
                Bytes::from(format!("cert-{serial}")),
            )
        }
    }

    impl CaEngine for TestEngine {
        fn ca_info(&self) -> &CaInfo {
            &self.info
        }

        fn profiles(&self) -> Vec<ProfileEntry> {
            vec![
                ProfileEntry {
                    name: "web".to_string(),
                    profile_type: "xml".to_string(),
                    conf: Some("<profile/>".to_string()),
                },
                ProfileEntry {
                    name: "tls".to_string(),
                    profile_type: "xml".to_string(),
                    conf: None,
                },
            ]
        }

        fn issue(&self, request: IssueRequest) -> CmpdResult<IssuedCert> {
            if let Some((profile, kind)) = &self.fail_profile {
                if *profile == request.profile {
                    return Err(Error::new(*kind, "induced failure"));
                }
            }
            let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
            Ok(IssuedCert::new(self.dummy_cert(serial), false, None))
        }

        fn regenerate(&self, request: IssueRequest) -> CmpdResult<IssuedCert> {
            self.issue(request)
        }

        fn revoke(
            &self,
            serial: u64,
            reason: CrlReason,
            _invalidity: Option<DateTime<Utc>>,
        ) -> CmpdResult<CertData> {
            if serial == 666 {
                return Err(Error::unknown_cert("no such certificate"));
            }
            self.revoked.lock().unwrap().push((serial, reason));
            Ok(self.dummy_cert(serial))
        }

        fn unrevoke(&self, serial: u64) -> CmpdResult<CertData> {
            self.unrevoked.lock().unwrap().push(serial);
            Ok(self.dummy_cert(serial))
        }

        fn remove(&self, serial: u64) -> CmpdResult<CertData> {
            self.removed.lock().unwrap().push(serial);
            Ok(self.dummy_cert(serial))
        }

        fn current_crl(&self) -> CmpdResult<Option<Bytes>> {
            Ok(self.crl.clone())
        }

        fn crl_by_number(&self, number: u64) -> CmpdResult<Option<Bytes>> {
            if number == 5 {
                Ok(self.crl.clone())
            } else {
                Ok(None)
            }
        }

        fn generate_crl(&self) -> CmpdResult<Option<Bytes>> {
            Ok(self.crl.clone())
        }

        fn remove_expired_certs(
            &self,
            profile: &str,
            user_like: Option<&str>,
            overlap_seconds: Option<i64>,
        ) -> CmpdResult<RemoveExpiredCertsInfo> {
            Ok(RemoveExpiredCertsInfo {
                profile: profile.to_string(),
                user_like: user_like.map(|s| s.to_string()),
                overlap_seconds: overlap_seconds.unwrap_or(86400),
                expired_at: Utc::now(),
                num_certs: 3,
            })
        }
    }

    //-------- Fixtures ------------------------------------------------------

    fn responder(engine: TestEngine) -> CmpResponder {
        CmpResponder::build(Arc::new(engine), &Config::test_config())
    }

    fn ra_requestor(profiles: &[&str]) -> Requestor {
        Requestor::new(
            crate::daemon::auth::RequestorIdentity::Named("ra1".to_string()),
            profiles.iter().map(|s| s.to_string()).collect(),
            [Permission::All].into_iter().collect(),
            true,
        )
    }

    fn limited_requestor(permissions: &[Permission]) -> Requestor {
        Requestor::new(
            crate::daemon::auth::RequestorIdentity::Named("limited".to_string()),
            ["all".to_string()].into_iter().collect(),
            permissions.iter().copied().collect(),
            false,
        )
    }

    fn request(body: PkiBody) -> PkiMessage {
        request_with_tid(body, 1)
    }

    fn request_with_tid(body: PkiBody, tid: u8) -> PkiMessage {
        PkiMessage::new(
            PkiHeader::request(
                Name::new("CN=Client"),
                Name::new("CN=Test CA"),
                TransactionId::new(vec![tid; 8]),
            ),
            body,
        )
    }

    fn cert_req(cert_req_id: i64, profile: &str) -> CertReqMsg {
        CertReqMsg {
            cert_req_id,
            cert_template: CertTemplate {
                subject: Some(Name::new("CN=EE")),
                public_key: Some(Bytes::from_static(b"spki")),
                ..Default::default()
            },
            pop: Some(ProofOfPossession::RaVerified),
            reg_info: [("cert-profile".to_string(), profile.to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn rev_details(serial: Option<u64>, reason_code: i32) -> RevDetails {
        RevDetails {
            cert_details: CertTemplate {
                issuer: Some(Name::new("CN=Test CA")),
                serial,
                ..Default::default()
            },
            crl_entry_details: crate::commons::api::cmp::CrlEntryDetails {
                reason_code: Some(reason_code),
                invalidity_date: None,
            },
        }
    }

    fn responses_of(message: &PkiMessage) -> &[CertResponse] {
        match &message.body {
            PkiBody::CertRep(rep)
            | PkiBody::KeyUpdateRep(rep)
            | PkiBody::CrossCertRep(rep) => &rep.responses,
            other => panic!("not a certificate response: {other:?}"),
        }
    }

    fn error_status(message: &PkiMessage) -> &PkiStatusInfo {
        match &message.body {
            PkiBody::Error(content) => &content.status,
            other => panic!("not an error body: {other:?}"),
        }
    }

    //-------- Enrollment ----------------------------------------------------

    #[test]
    fn batch_enrollment_fails_per_entry() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["web"]);
        let mut audit = AuditEvent::new();

        let msg = request(PkiBody::CertReq(vec![
            cert_req(0, "web"),
            cert_req(1, "tls"),
        ]));
        let response = responder.process(&requestor, &msg, &mut audit);

        let responses = responses_of(&response);
        assert_eq!(responses.len(), 2);
        assert!(responses[0].status.is_granted());
        assert!(responses[0].certificate.is_some());
        assert_eq!(
            responses[1].status.failure,
            Some(FailureInfo::BadCertTemplate)
        );
        assert!(responses[1].certificate.is_none());

        assert_eq!(audit.event_type(), Some("CERT_REQ"));
        assert_eq!(audit.children().len(), 2);
        assert_eq!(audit.children()[0].status(), Some(AuditStatus::Successful));
        assert_eq!(audit.children()[1].status(), Some(AuditStatus::Failed));
    }

    #[test]
    fn missing_pop_is_rejected() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let mut msg = cert_req(0, "web");
        msg.pop = None;
        let response =
            responder.process(&requestor, &request(PkiBody::CertReq(vec![msg])), &mut audit);

        assert_eq!(
            responses_of(&response)[0].status.failure,
            Some(FailureInfo::BadPop)
        );
    }

    #[test]
    fn ra_verified_pop_needs_an_ra() {
        let responder = responder(TestEngine::new());
        let requestor = limited_requestor(&[Permission::EnrollCert]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert_eq!(
            responses_of(&response)[0].status.failure,
            Some(FailureInfo::BadPop)
        );
    }

    #[test]
    fn enrollment_without_permission_is_refused_wholesale() {
        let responder = responder(TestEngine::new());
        let requestor = limited_requestor(&[Permission::RevokeCert]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::NotAuthorized)
        );
        assert_eq!(audit.status(), Some(AuditStatus::Failed));
    }

    #[test]
    fn explicit_confirmation_parks_the_certificate() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );

        assert_eq!(responder.pending().len(), 1);
        assert!(response.header.confirm_wait_until.is_some());
        assert!(!response.header.implicit_confirm);
    }

    #[test]
    fn implicit_confirmation_skips_the_pool() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let mut msg = request(PkiBody::CertReq(vec![cert_req(0, "web")]));
        msg.header.implicit_confirm = true;
        let response = responder.process(&requestor, &msg, &mut audit);

        assert!(responder.pending().is_empty());
        assert!(response.header.implicit_confirm);
        assert!(response.header.confirm_wait_until.is_none());
    }

    #[test]
    fn implicit_confirmation_drops_stale_pending_entries() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        enroll_one(&responder, &requestor, 1);
        assert_eq!(responder.pending().len(), 1);

        // A new enrollment replays the transaction id with implicit
        // confirmation; the old entry goes, nothing gets revoked.
        let mut audit = AuditEvent::new();
        let mut msg =
            request_with_tid(PkiBody::CertReq(vec![cert_req(1, "web")]), 1);
        msg.header.implicit_confirm = true;
        responder.process(&requestor, &msg, &mut audit);

        assert!(responder.pending().is_empty());
        assert!(engine.revoked.lock().unwrap().is_empty());
    }

    #[test]
    fn key_update_uses_its_own_permission_and_body() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::KeyUpdateReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert!(matches!(response.body, PkiBody::KeyUpdateRep(_)));
        assert_eq!(audit.event_type(), Some("KEY_UPDATE"));

        let no_update = limited_requestor(&[Permission::EnrollCert]);
        let mut audit = AuditEvent::new();
        let response = responder.process(
            &no_update,
            &request(PkiBody::KeyUpdateReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::NotAuthorized)
        );
    }

    #[test]
    fn engine_failure_maps_to_the_right_bit() {
        let engine = TestEngine {
            fail_profile: Some(("web".to_string(), ErrorKind::AlreadyIssued)),
            ..TestEngine::new()
        };
        let responder = responder(engine);
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert_eq!(
            responses_of(&response)[0].status.failure,
            Some(FailureInfo::BadRequest)
        );
    }

    #[test]
    fn database_failure_detail_is_suppressed() {
        let engine = TestEngine {
            fail_profile: Some(("web".to_string(), ErrorKind::DatabaseFailure)),
            ..TestEngine::new()
        };
        let responder = responder(engine);
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        let status = &responses_of(&response)[0].status;
        assert_eq!(status.status_text.as_deref(), Some("DATABASE_FAILURE"));
    }

    //-------- Confirmation --------------------------------------------------

    /// Enrolls one certificate with explicit confirmation and returns its
    /// confirmation hash.
    fn enroll_one(responder: &CmpResponder, requestor: &Requestor, tid: u8) -> Bytes {
        let mut audit = AuditEvent::new();
        let response = responder.process(
            requestor,
            &request_with_tid(PkiBody::CertReq(vec![cert_req(0, "web")]), tid),
            &mut audit,
        );
        let cert = responses_of(&response)[0].certificate.as_ref().unwrap();
        crypto::cert_hash(cert.encoded()).unwrap()
    }

    #[test]
    fn accepted_confirmation_releases_the_certificate() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        let hash = enroll_one(&responder, &requestor, 1);

        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request_with_tid(
                PkiBody::CertConf(vec![CertConfirmStatus {
                    cert_req_id: 0,
                    cert_hash: hash,
                    status: None,
                }]),
                1,
            ),
            &mut audit,
        );

        assert!(matches!(response.body, PkiBody::Confirm));
        assert!(responder.pending().is_empty());
        assert!(engine.revoked.lock().unwrap().is_empty());
        assert_eq!(audit.status(), Some(AuditStatus::Successful));
    }

    #[test]
    fn wrong_hash_revokes_the_certificate() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        enroll_one(&responder, &requestor, 1);

        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request_with_tid(
                PkiBody::CertConf(vec![CertConfirmStatus {
                    cert_req_id: 0,
                    cert_hash: Bytes::from_static(b"wrong"),
                    status: None,
                }]),
                1,
            ),
            &mut audit,
        );

        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::SystemFailure)
        );
        assert!(responder.pending().is_empty());
        let revoked = engine.revoked.lock().unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].1, CrlReason::CessationOfOperation);
    }

    #[test]
    fn rejected_confirmation_revokes_the_certificate() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        let hash = enroll_one(&responder, &requestor, 1);

        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request_with_tid(
                PkiBody::CertConf(vec![CertConfirmStatus {
                    cert_req_id: 0,
                    cert_hash: hash,
                    status: Some(PkiStatusInfo::rejection(
                        FailureInfo::BadCertTemplate,
                        None,
                    )),
                }]),
                1,
            ),
            &mut audit,
        );

        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::SystemFailure)
        );
        assert_eq!(engine.revoked.lock().unwrap().len(), 1);
    }

    #[test]
    fn peer_error_tears_the_transaction_down() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        enroll_one(&responder, &requestor, 1);

        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request_with_tid(
                PkiBody::Error(ErrorMsgContent {
                    status: PkiStatusInfo::rejection(FailureInfo::BadRequest, None),
                }),
                1,
            ),
            &mut audit,
        );

        assert!(matches!(response.body, PkiBody::Confirm));
        assert!(responder.pending().is_empty());
        assert_eq!(engine.revoked.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_revokes_certificates_past_their_deadline() {
        let engine = Arc::new(TestEngine::new());
        // A zero confirm wait makes the entry expire the moment it is
        // parked, so the next sweep must pick it up.
        let mut config = Config::test_config();
        config.confirm_wait_secs = 0;
        let responder = CmpResponder::build(engine.clone(), &config);
        let requestor = ra_requestor(&["all"]);

        let mut audit = AuditEvent::new();
        responder.process(
            &requestor,
            &request(PkiBody::CertReq(vec![cert_req(0, "web")])),
            &mut audit,
        );
        assert_eq!(responder.pending().len(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(
            config.pending_sweep_secs + 1,
        ))
        .await;
        tokio::task::yield_now().await;

        assert!(responder.pending().is_empty());
        let revoked = engine.revoked.lock().unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].1, CrlReason::CessationOfOperation);
    }

    //-------- Revocation ----------------------------------------------------

    #[test]
    fn mixed_revocation_batch_is_refused_before_any_action() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![
                rev_details(Some(1), CrlReason::KeyCompromise.code()),
                rev_details(Some(2), CRL_REASON_CODE_REMOVE),
            ])),
            &mut audit,
        );

        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::BadRequest)
        );
        assert!(engine.revoked.lock().unwrap().is_empty());
        assert!(engine.removed.lock().unwrap().is_empty());
    }

    #[test]
    fn revocation_batch_fails_per_entry() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![
                rev_details(Some(1), CrlReason::KeyCompromise.code()),
                // Serial 666 makes the test engine fail the revocation.
                rev_details(Some(666), CrlReason::KeyCompromise.code()),
                rev_details(None, CrlReason::KeyCompromise.code()),
            ])),
            &mut audit,
        );

        let entries = match &response.body {
            PkiBody::RevocationRep(rep) => &rep.entries,
            other => panic!("not a revocation response: {other:?}"),
        };
        assert_eq!(entries.len(), 3);
        assert!(entries[0].status.is_granted());
        assert_eq!(
            entries[0].cert_id,
            Some((Name::new("CN=Test CA"), 1))
        );
        assert_eq!(entries[1].status.failure, Some(FailureInfo::BadCertId));
        assert_eq!(entries[2].status.failure, Some(FailureInfo::BadCertId));

        assert_eq!(audit.event_type(), Some("CERT_REVOKE"));
        assert_eq!(audit.children().len(), 3);
    }

    #[test]
    fn unrevoke_and_remove_select_the_right_operation() {
        let engine = Arc::new(TestEngine::new());
        let responder =
            CmpResponder::build(engine.clone(), &Config::test_config());
        let requestor = ra_requestor(&["all"]);

        let mut audit = AuditEvent::new();
        responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![rev_details(
                Some(3),
                CRL_REASON_CODE_UNREVOKE,
            )])),
            &mut audit,
        );
        assert_eq!(audit.event_type(), Some("CERT_UNREVOKE"));
        assert_eq!(*engine.unrevoked.lock().unwrap(), vec![3]);

        let mut audit = AuditEvent::new();
        responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![rev_details(
                Some(4),
                CRL_REASON_CODE_REMOVE,
            )])),
            &mut audit,
        );
        assert_eq!(audit.event_type(), Some("CERT_REMOVE"));
        assert_eq!(*engine.removed.lock().unwrap(), vec![4]);
    }

    #[test]
    fn revocation_needs_permission_once_for_the_batch() {
        let responder = responder(TestEngine::new());
        let requestor = limited_requestor(&[Permission::EnrollCert]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![rev_details(
                Some(1),
                CrlReason::KeyCompromise.code(),
            )])),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::NotAuthorized)
        );
        assert!(audit.children().is_empty());
    }

    #[test]
    fn revocation_template_must_only_name_the_certificate() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let mut details = rev_details(Some(1), CrlReason::KeyCompromise.code());
        details.cert_details.subject = Some(Name::new("CN=EE"));
        let response = responder.process(
            &requestor,
            &request(PkiBody::RevocationReq(vec![details])),
            &mut audit,
        );

        let entries = match &response.body {
            PkiBody::RevocationRep(rep) => &rep.entries,
            other => panic!("not a revocation response: {other:?}"),
        };
        assert_eq!(entries[0].status.failure, Some(FailureInfo::BadCertId));
    }

    //-------- General messages ----------------------------------------------

    fn gen_msg(oid: &str, value: Option<GenValue>) -> PkiBody {
        PkiBody::GenMsg(vec![InfoTypeAndValue {
            oid: oid.to_string(),
            value,
        }])
    }

    fn gen_rep_value(message: &PkiMessage) -> &GenValue {
        match &message.body {
            PkiBody::GenRep(items) => items[0].value.as_ref().unwrap(),
            other => panic!("not a general response: {other:?}"),
        }
    }

    #[test]
    fn current_crl_download() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(gen_msg(OID_CURRENT_CRL, None)),
            &mut audit,
        );
        assert_eq!(
            gen_rep_value(&response),
            &GenValue::Bytes(Bytes::from_static(b"crl-der"))
        );
        assert_eq!(audit.event_type(), Some("CRL_DOWNLOAD"));
    }

    #[test]
    fn missing_crl_reports_its_absence() {
        let responder = responder(TestEngine::without_crl());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(gen_msg(OID_CURRENT_CRL, None)),
            &mut audit,
        );
        let status = error_status(&response);
        assert_eq!(status.failure, Some(FailureInfo::SystemFailure));
        assert_eq!(
            status.status_text.as_deref(),
            Some("CRL_FAILURE: no CRL is available")
        );
    }

    #[test]
    fn crl_by_number_action() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);

        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_GET_CRL_WITH_SN,
                    value: Some(Box::new(GenValue::Integer(5))),
                }),
            )),
            &mut audit,
        );
        match gen_rep_value(&response) {
            GenValue::Action { code, value } => {
                assert_eq!(*code, ACTION_GET_CRL_WITH_SN);
                assert_eq!(
                    value.as_deref(),
                    Some(&GenValue::Bytes(Bytes::from_static(b"crl-der")))
                );
            }
            other => panic!("unexpected value: {other:?}"),
        }

        // A number no retained CRL carries.
        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_GET_CRL_WITH_SN,
                    value: Some(Box::new(GenValue::Integer(9))),
                }),
            )),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::SystemFailure)
        );
    }

    #[test]
    fn system_info_negotiates_the_version() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["web"]);

        // Default is version 1: CA certificate only.
        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_GET_SYSTEM_INFO,
                    value: None,
                }),
            )),
            &mut audit,
        );
        let xml = match gen_rep_value(&response) {
            GenValue::Action { value, .. } => match value.as_deref() {
                Some(GenValue::Utf8(xml)) => xml.clone(),
                other => panic!("unexpected value: {other:?}"),
            },
            other => panic!("unexpected value: {other:?}"),
        };
        assert!(xml.contains("version=\"1\""));
        assert!(xml.contains("<CACert>"));
        assert!(!xml.contains("<certProfiles>"));

        // Version 2 adds the profiles the requestor may use.
        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_GET_SYSTEM_INFO,
                    value: Some(Box::new(GenValue::IntegerSet(vec![1, 2]))),
                }),
            )),
            &mut audit,
        );
        let xml = match gen_rep_value(&response) {
            GenValue::Action { value, .. } => match value.as_deref() {
                Some(GenValue::Utf8(xml)) => xml.clone(),
                other => panic!("unexpected value: {other:?}"),
            },
            other => panic!("unexpected value: {other:?}"),
        };
        assert!(xml.contains("version=\"2\""));
        assert!(xml.contains("<name>web</name>"));
        assert!(!xml.contains("<name>tls</name>"));

        // Only unknown versions offered.
        let mut audit = AuditEvent::new();
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_GET_SYSTEM_INFO,
                    value: Some(Box::new(GenValue::IntegerSet(vec![7]))),
                }),
            )),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::BadRequest)
        );
    }

    #[test]
    fn remove_expired_certs_round_trip() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["web"]);
        let mut audit = AuditEvent::new();

        let request_xml = "<removeExpiredCertsReq version=\"1\">\
             <certProfile>web</certProfile>\
             <userLike>user%</userLike>\
             <overlap>3600</overlap>\
             </removeExpiredCertsReq>";
        let response = responder.process(
            &requestor,
            &request(gen_msg(
                OID_VENDOR_ACTIONS,
                Some(GenValue::Action {
                    code: ACTION_REMOVE_EXPIRED_CERTS,
                    value: Some(Box::new(GenValue::Utf8(request_xml.to_string()))),
                }),
            )),
            &mut audit,
        );

        let xml = match gen_rep_value(&response) {
            GenValue::Action { value, .. } => match value.as_deref() {
                Some(GenValue::Utf8(xml)) => xml.clone(),
                other => panic!("unexpected value: {other:?}"),
            },
            other => panic!("unexpected value: {other:?}"),
        };
        assert!(xml.contains("<certProfile>web</certProfile>"));
        assert!(xml.contains("<userLike>user%</userLike>"));
        assert!(xml.contains("<overlap>3600</overlap>"));
        assert!(xml.contains("<numCerts>3</numCerts>"));
        assert_eq!(audit.event_type(), Some("REMOVE_EXPIRED_CERTS"));
    }

    #[test]
    fn unknown_general_message_type_is_refused() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(gen_msg("1.2.3.4", None)),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::BadRequest)
        );
    }

    //-------- Dispatch ------------------------------------------------------

    #[test]
    fn response_bodies_are_not_requests() {
        let responder = responder(TestEngine::new());
        let requestor = ra_requestor(&["all"]);
        let mut audit = AuditEvent::new();

        let response = responder.process(
            &requestor,
            &request(PkiBody::CertRep(CertRepMessage {
                ca_certs: Vec::new(),
                responses: Vec::new(),
            })),
            &mut audit,
        );
        assert_eq!(
            error_status(&response).failure,
            Some(FailureInfo::BadRequest)
        );
        assert_eq!(audit.status(), Some(AuditStatus::Failed));
    }

    #[test]
    fn xml_text_extraction() {
        let doc = "<a><b> text </b><c></c></a>";
        assert_eq!(xml_text_child(doc, "b").as_deref(), Some("text"));
        assert_eq!(xml_text_child(doc, "c"), None);
        assert_eq!(xml_text_child(doc, "d"), None);
    }
}
