//! Submit coordinator
//!
//! Folds the change ledger into the canonical document and performs exactly
//! one write. Failures leave the ledger intact so the user can retry; a
//! second commit while one is in flight is rejected rather than racing two
//! writes to the same document id.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{error, info};

use qcv_common::{Error, Result};

use crate::docdb::DocumentStore;
use crate::session::ReviewSession;

/// Acknowledgement of a successful commit
#[derive(Debug, Clone)]
pub struct CommitAck {
    pub document_id: String,
    pub changes_written: usize,
    /// Always true: the in-memory copy is stale once the store has the
    /// reconstructed document
    pub reload_required: bool,
}

/// Serializes commits for one edit session
#[derive(Debug, Default)]
pub struct SubmitCoordinator {
    in_flight: AtomicBool,
}

/// Releases the in-flight flag when the commit completes, success or not
struct CommitGuard<'a>(&'a AtomicBool);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SubmitCoordinator {
    pub fn new() -> Self {
        SubmitCoordinator::default()
    }

    /// Whether a commit is currently in flight
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<CommitGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::CommitInProgress);
        }
        Ok(CommitGuard(&self.in_flight))
    }

    /// Apply the ledger, reconstruct the document, write once
    ///
    /// Read-only sessions are refused before any buffered change is
    /// applied. On failure the ledger and the in-memory document are left
    /// untouched; on success the ledger is cleared and the caller must
    /// reload the document.
    pub async fn commit(
        &self,
        session: &mut ReviewSession,
        store: &dyn DocumentStore,
    ) -> Result<CommitAck> {
        if session.read_only() {
            return Err(Error::Unauthorized);
        }
        let _guard = self.begin()?;

        let changes = session.dirty_count();
        let document_id = session.document().id.clone();

        // Apply to a working copy; the session's table is only the
        // pre-commit state until the store acknowledges the write
        let mut working = session.table().clone();
        session
            .ledger()
            .apply_to(&mut working, session.evaluator(), Utc::now());
        let quality_control = working.reconstruct(&session.document().quality_control);

        let outcome = store
            .upsert_quality_control(&document_id, &quality_control)
            .await;

        match outcome {
            Ok(response) if response.success => {
                info!("committed {} changes to {}", changes, document_id);
                session.complete_commit();
                Ok(CommitAck {
                    document_id,
                    changes_written: changes,
                    reload_required: true,
                })
            }
            Ok(response) => {
                let err = Error::Submit {
                    status: response.status,
                    message: response
                        .message
                        .unwrap_or_else(|| "store rejected the write".to_string()),
                };
                error!("commit to {} failed: {}", document_id, err);
                session.note_commit_failure(&err);
                Err(err)
            }
            Err(err) => {
                error!("commit to {} failed: {}", document_id, err);
                session.note_commit_failure(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docdb::UpsertResponse;
    use crate::media::PublicUrlStore;
    use futures::future::BoxFuture;
    use qcv_common::qc::{Document, Evaluation, Metric, Modality, QualityControl};
    use qcv_common::ReviewConfig;
    use serde_json::json;
    use std::sync::Arc;

    struct RejectingStore;

    impl DocumentStore for RejectingStore {
        fn fetch_by_id<'a>(
            &'a self,
            _id: &'a str,
        ) -> BoxFuture<'a, qcv_common::Result<Option<Document>>> {
            Box::pin(async { Ok(None) })
        }

        fn fetch_by_name<'a>(
            &'a self,
            _name: &'a str,
        ) -> BoxFuture<'a, qcv_common::Result<Option<Document>>> {
            Box::pin(async { Ok(None) })
        }

        fn upsert_quality_control<'a>(
            &'a self,
            _id: &'a str,
            _qc: &'a QualityControl,
        ) -> BoxFuture<'a, qcv_common::Result<UpsertResponse>> {
            Box::pin(async {
                Ok(UpsertResponse {
                    success: false,
                    status: Some(500),
                    message: Some("boom".to_string()),
                })
            })
        }
    }

    fn session(read_only: bool) -> ReviewSession {
        let document = Document {
            id: "doc-1".to_string(),
            name: "asset".to_string(),
            location: None,
            project_name: None,
            quality_control: QualityControl {
                evaluations: vec![Evaluation {
                    name: "eval".to_string(),
                    stage: "Raw data".to_string(),
                    modality: Modality {
                        name: "ophys".to_string(),
                        abbreviation: "ophys".to_string(),
                    },
                    tags: vec![],
                    description: None,
                    allow_failed_metrics: false,
                    notes: None,
                    metrics: vec![Metric {
                        name: "m1".to_string(),
                        description: None,
                        value: json!(false),
                        reference: None,
                        status_history: vec![],
                    }],
                }],
                notes: None,
            },
        };
        let config = ReviewConfig {
            read_only,
            ..ReviewConfig::default()
        };
        ReviewSession::from_document(document, Arc::new(PublicUrlStore), &config, "tester")
    }

    #[tokio::test]
    async fn test_read_only_session_cannot_commit() {
        let mut session = session(true);
        session.submit_change("m1", "value", json!(true)).unwrap();
        // Local edits are recorded, but never reach storage
        assert_eq!(session.dirty_count(), 1);

        let coordinator = SubmitCoordinator::new();
        let err = coordinator
            .commit(&mut session, &RejectingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        assert_eq!(session.dirty_count(), 1);
    }

    #[tokio::test]
    async fn test_second_commit_rejected_while_in_flight() {
        let mut session = session(false);
        session.submit_change("m1", "value", json!(true)).unwrap();

        let coordinator = SubmitCoordinator::new();
        let _guard = coordinator.begin().unwrap();
        assert!(coordinator.is_in_flight());

        let err = coordinator
            .commit(&mut session, &RejectingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitInProgress));
    }

    #[tokio::test]
    async fn test_guard_released_after_failed_commit() {
        let mut session = session(false);
        session.submit_change("m1", "value", json!(true)).unwrap();

        let coordinator = SubmitCoordinator::new();
        let err = coordinator
            .commit(&mut session, &RejectingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submit { status: Some(500), .. }));

        // Ledger intact, guard released, retry possible
        assert_eq!(session.dirty_count(), 1);
        assert!(!coordinator.is_in_flight());
    }
}
