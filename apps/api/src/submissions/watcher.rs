use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::convert::{convert, submission_email};
use crate::contacts::ContactService;
use crate::errors::AppError;
use crate::models::contact::{Contact, ContactType};
use crate::models::submission::{Submission, SubmissionKind};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Converted {
        #[serde(rename = "contactId")]
        contact_id: Uuid,
    },
    /// A matching contact already existed; nothing was created.
    Duplicate {
        #[serde(rename = "contactId")]
        contact_id: Option<Uuid>,
    },
    AlreadyProcessed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub converted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

fn contact_type_for(kind: SubmissionKind) -> ContactType {
    match kind {
        SubmissionKind::ClientRequest => ContactType::Client,
        SubmissionKind::InterpreterApplication => ContactType::Interpreter,
    }
}

/// Turns unprocessed submissions into contacts.
///
/// Runs as one background task that reacts to the store's live feed and
/// re-sweeps on a fixed interval. `start` is a no-op while running; `stop` is
/// always safe and lets an in-flight conversion finish.
pub struct SubmissionWatcher {
    store: Arc<dyn Store>,
    contacts: ContactService,
    processor_id: String,
    rescan: Duration,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl SubmissionWatcher {
    pub fn new(
        store: Arc<dyn Store>,
        contacts: ContactService,
        processor_id: String,
        rescan: Duration,
    ) -> Self {
        Self {
            store,
            contacts,
            processor_id,
            rescan,
            shutdown: Mutex::new(None),
        }
    }

    /// Returns `false` if the watcher was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_some() {
            debug!("Submission watcher already running");
            return false;
        }
        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);
        // subscribe before spawning so nothing inserted from here on is missed
        let feed = self.store.subscribe_submissions();
        tokio::spawn(self.clone().run(feed, rx));
        info!("Submission watcher started (re-scan every {:?})", self.rescan);
        true
    }

    /// Returns whether the watcher was running.
    pub async fn stop(&self) -> bool {
        match self.shutdown.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(true);
                info!("Submission watcher stopping");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }

    async fn run(
        self: Arc<Self>,
        mut feed: tokio::sync::broadcast::Receiver<Submission>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + self.rescan, self.rescan);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = feed.recv() => match received {
                    Ok(submission) => {
                        if let Err(e) = self.process_submission(&submission).await {
                            warn!("Could not convert submission {}: {e}", submission.id);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Submission feed lagged by {skipped}, sweeping");
                        self.sweep_logged().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => self.sweep_logged().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("Submission watcher stopped");
    }

    async fn sweep_logged(&self) {
        match self.process_pending_submissions().await {
            Ok(report) if report.converted > 0 || report.failed > 0 => info!(
                "Submission sweep: {} converted, {} duplicates, {} failed",
                report.converted, report.duplicates, report.failed
            ),
            Ok(_) => {}
            Err(e) => warn!("Submission sweep failed: {e}"),
        }
    }

    /// One synchronous pass over every currently unprocessed submission.
    pub async fn process_pending_submissions(&self) -> Result<ProcessReport, AppError> {
        let mut report = ProcessReport::default();
        for kind in SubmissionKind::ALL {
            for submission in self.store.list_unprocessed(kind).await? {
                match self.process_submission(&submission).await {
                    Ok(ProcessOutcome::Converted { .. }) => report.converted += 1,
                    Ok(ProcessOutcome::Duplicate { .. }) => report.duplicates += 1,
                    Ok(ProcessOutcome::AlreadyProcessed) => {}
                    Err(e) => {
                        warn!("Could not convert submission {}: {e}", submission.id);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Converts one submission unless a contact for it already exists, then
    /// marks it processed.
    pub async fn process_submission(
        &self,
        submission: &Submission,
    ) -> Result<ProcessOutcome, AppError> {
        if submission.processed {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let outcome = match self.find_existing(submission).await? {
            Some(existing) => {
                debug!(
                    "Submission {} already has contact {}",
                    submission.id, existing.id
                );
                ProcessOutcome::Duplicate {
                    contact_id: Some(existing.id),
                }
            }
            None => {
                let new = convert(submission)?;
                let dedup_key = submission.kind.dedup_key(submission.id);
                match self.contacts.create_deduplicated(new, dedup_key).await? {
                    Some(contact) => {
                        // the create already pushed to Fish when sync is enabled
                        debug!("Contact {} handed to CRM sync", contact.id);
                        ProcessOutcome::Converted {
                            contact_id: contact.id,
                        }
                    }
                    None => ProcessOutcome::Duplicate { contact_id: None },
                }
            }
        };

        self.store
            .mark_processed(submission.id, &self.processor_id, Utc::now())
            .await?;
        if let ProcessOutcome::Converted { contact_id } = outcome {
            info!(
                "Converted {} {} into contact {contact_id}",
                submission.kind.as_str(),
                submission.id
            );
        }
        Ok(outcome)
    }

    /// Existing contact for this submission: same origin id, or same
    /// `(email, type)`.
    async fn find_existing(&self, submission: &Submission) -> Result<Option<Contact>, AppError> {
        let origin_field = submission.kind.origin_field();
        let origin_id = submission.id.to_string();
        let email = submission_email(submission);

        Ok(self
            .store
            .list_contacts_by_type(contact_type_for(submission.kind))
            .await?
            .into_iter()
            .find(|c| {
                c.custom_field_str(origin_field) == Some(origin_id.as_str())
                    || email
                        .as_deref()
                        .is_some_and(|e| c.email.eq_ignore_ascii_case(e))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contact::{ContactSource, ContactStatus, NewContact};
    use crate::state::testing::state;
    use crate::submissions::submit;
    use serde_json::json;

    fn ana_request() -> serde_json::Value {
        json!({
            "name": "Ana",
            "email": "ana@x.com",
            "serviceType": "Medical",
            "sourceLanguage": "Spanish",
            "targetLanguage": "English",
            "urgency": "high",
        })
    }

    #[tokio::test]
    async fn test_sweep_converts_client_request() {
        let (state, _crm) = state();
        let submission = submit(state.store.as_ref(), SubmissionKind::ClientRequest, ana_request())
            .await
            .unwrap();

        let report = state.watcher.process_pending_submissions().await.unwrap();
        assert_eq!(
            report,
            ProcessReport {
                converted: 1,
                duplicates: 0,
                failed: 0,
            }
        );

        let contacts = state.contacts.list().await.unwrap();
        assert_eq!(contacts.len(), 1);
        let ana = &contacts[0];
        assert_eq!(ana.contact_type, ContactType::Client);
        assert_eq!(ana.status, ContactStatus::Pending);
        assert_eq!(ana.source, ContactSource::WebsiteForm);
        assert_eq!(
            ana.custom_field_str("Original Request ID"),
            Some(submission.id.to_string().as_str())
        );
        assert!(state
            .store
            .list_unprocessed(SubmissionKind::ClientRequest)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_second_sweep_creates_nothing() {
        let (state, _crm) = state();
        submit(state.store.as_ref(), SubmissionKind::ClientRequest, ana_request())
            .await
            .unwrap();

        state.watcher.process_pending_submissions().await.unwrap();
        let report = state.watcher.process_pending_submissions().await.unwrap();

        assert_eq!(report, ProcessReport::default());
        assert_eq!(state.contacts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_email_is_a_duplicate() {
        let (state, _crm) = state();
        let existing = state
            .contacts
            .create(NewContact::new(
                ContactType::Client,
                "Ana Lopez",
                "ANA@x.com",
                ContactSource::Manual,
            ))
            .await
            .unwrap();
        let submission = submit(state.store.as_ref(), SubmissionKind::ClientRequest, ana_request())
            .await
            .unwrap();

        let outcome = state.watcher.process_submission(&submission).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Duplicate {
                contact_id: Some(existing.id)
            }
        );
        assert_eq!(state.contacts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_email_different_kind_is_converted() {
        let (state, _crm) = state();
        submit(state.store.as_ref(), SubmissionKind::ClientRequest, ana_request())
            .await
            .unwrap();
        submit(
            state.store.as_ref(),
            SubmissionKind::InterpreterApplication,
            json!({ "name": "Ana", "email": "ana@x.com", "languages": ["Spanish", "English"] }),
        )
        .await
        .unwrap();

        let report = state.watcher.process_pending_submissions().await.unwrap();

        assert_eq!(report.converted, 2);
        let interpreters = state
            .contacts
            .get_by_type(ContactType::Interpreter)
            .await
            .unwrap();
        assert_eq!(interpreters.len(), 1);
        assert_eq!(interpreters[0].languages, vec!["Spanish", "English"]);
    }

    #[tokio::test]
    async fn test_unconvertible_submission_stays_pending() {
        let (state, _crm) = state();
        let broken = Submission::new(SubmissionKind::ClientRequest, json!({ "name": "No Email" }));
        state.store.insert_submission(&broken).await.unwrap();

        let report = state.watcher.process_pending_submissions().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(
            state
                .store
                .list_unprocessed(SubmissionKind::ClientRequest)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_processed_submission_is_skipped() {
        let (state, _crm) = state();
        let mut submission = Submission::new(SubmissionKind::ClientRequest, ana_request());
        submission.processed = true;

        let outcome = state.watcher.process_submission(&submission).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);
        assert!(state.contacts.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_safe() {
        let (state, _crm) = state();

        assert!(!state.watcher.stop().await);
        assert!(state.watcher.start().await);
        assert!(!state.watcher.start().await);
        assert!(state.watcher.is_running().await);
        assert!(state.watcher.stop().await);
        assert!(!state.watcher.is_running().await);
        assert!(!state.watcher.stop().await);
    }

    #[tokio::test]
    async fn test_running_watcher_converts_live_submissions() {
        let (state, _crm) = state();
        state.watcher.start().await;

        submit(state.store.as_ref(), SubmissionKind::ClientRequest, ana_request())
            .await
            .unwrap();

        let mut converted = false;
        for _ in 0..50 {
            if !state.contacts.list().await.unwrap().is_empty() {
                converted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        state.watcher.stop().await;

        assert!(converted);
    }
}
