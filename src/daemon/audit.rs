//! Audit events emitted while processing a message.
//!
//! The caller owns the event and hands it in mutably; the responder fills
//! in an event type, key/value data and one child event per sub-request,
//! in the order the sub-requests appear in the message. What happens to
//! the event afterwards (syslog, database, nothing) is the caller's
//! business.

use serde::{Deserialize, Serialize};

//------------ AuditStatus ---------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AuditStatus {
    Successful,
    Failed,
}

//------------ AuditEventData ------------------------------------------------

/// One key/value pair attached to an event.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuditEventData {
    pub key: String,
    pub value: String,
}

//------------ AuditChildEvent -----------------------------------------------

/// The audit record of one sub-request within a batch.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuditChildEvent {
    status: Option<AuditStatus>,
    data: Vec<AuditEventData>,
}

impl AuditChildEvent {
    pub fn set_status(&mut self, status: AuditStatus) {
        self.status = Some(status);
    }

    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.push(AuditEventData {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn status(&self) -> Option<AuditStatus> {
        self.status
    }

    pub fn data(&self) -> &[AuditEventData] {
        &self.data
    }
}

//------------ AuditEvent ----------------------------------------------------

/// The audit record of one processed message.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuditEvent {
    event_type: Option<String>,
    status: Option<AuditStatus>,
    data: Vec<AuditEventData>,
    children: Vec<AuditChildEvent>,
}

impl AuditEvent {
    pub fn new() -> Self {
        AuditEvent::default()
    }

    pub fn set_event_type(&mut self, event_type: impl Into<String>) {
        self.event_type = Some(event_type.into());
    }

    pub fn set_status(&mut self, status: AuditStatus) {
        self.status = Some(status);
    }

    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.push(AuditEventData {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Appends a child event and returns it for filling in.
    pub fn add_child(&mut self) -> &mut AuditChildEvent {
        self.children.push(AuditChildEvent::default());
        self.children.last_mut().unwrap()
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn status(&self) -> Option<AuditStatus> {
        self.status
    }

    pub fn data(&self) -> &[AuditEventData] {
        &self.data
    }

    pub fn children(&self) -> &[AuditChildEvent] {
        &self.children
    }
}

//============ Tests =========================================================
