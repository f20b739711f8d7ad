//! Recording audit log and mailer.

use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::domain::billing::{AuditAction, AuditEntry, EmailKind, EmailNotice};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{AuditLog, BillingMailer};

#[derive(Default)]
struct Recorded {
    audit: Vec<AuditEntry>,
    emails: Vec<EmailNotice>,
    fail_audit: bool,
    fail_email: bool,
}

/// Keeps every audit entry and email it is handed.
///
/// Either channel can be switched to fail so callers can check that a broken
/// side channel does not undo a committed change.
#[derive(Default)]
pub struct RecordingNotifier {
    inner: Mutex<Recorded>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_audit(&self, fail: bool) {
        lock(&self.inner).fail_audit = fail;
    }

    pub fn fail_email(&self, fail: bool) {
        lock(&self.inner).fail_email = fail;
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        lock(&self.inner).audit.clone()
    }

    pub fn audit_actions(&self) -> Vec<AuditAction> {
        lock(&self.inner).audit.iter().map(|e| e.action).collect()
    }

    pub fn emails(&self) -> Vec<EmailNotice> {
        lock(&self.inner).emails.clone()
    }

    pub fn email_kinds(&self) -> Vec<EmailKind> {
        lock(&self.inner).emails.iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl AuditLog for RecordingNotifier {
    async fn record(&self, entry: &AuditEntry) -> Result<(), DomainError> {
        let mut inner = lock(&self.inner);
        if inner.fail_audit {
            return Err(DomainError::new(ErrorCode::InternalError, "audit sink unavailable"));
        }
        inner.audit.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl BillingMailer for RecordingNotifier {
    async fn send(&self, notice: &EmailNotice) -> Result<(), DomainError> {
        let mut inner = lock(&self.inner);
        if inner.fail_email {
            return Err(DomainError::new(
                ErrorCode::ExternalServiceError,
                "mail relay unavailable",
            ));
        }
        inner.emails.push(notice.clone());
        Ok(())
    }
}
