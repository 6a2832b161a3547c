//! Review session
//!
//! Owns the loaded document and everything derived from it: the flattened
//! metric table, the group index and media cache, the change ledger, and
//! the event channel the view layer observes. Single-threaded,
//! event-driven: handlers run synchronously, only media resolution
//! suspends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use qcv_common::qc::Document;
use qcv_common::{Error, Result, ReviewConfig, SessionEvent};

use crate::docdb::DocumentStore;
use crate::group::{GroupIndex, GroupedView};
use crate::ledger::{ChangeLedger, Column};
use crate::matrix::{self, StatusTable};
use crate::media::{MediaCache, ObjectStore};
use crate::table::MetricTable;
use crate::value::{classify, CustomValue, MetricValue, Selection};

/// One edit session over one loaded document
///
/// The ledger is owned exclusively by the session; the document is replaced
/// wholesale on reload and mutated only through the ledger/commit path.
pub struct ReviewSession {
    document: Document,
    table: MetricTable,
    media: MediaCache,
    index: GroupIndex,
    ledger: ChangeLedger,
    evaluator: String,
    read_only: bool,
    stale: bool,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ReviewSession {
    /// Load a document by id and build the session around it
    pub async fn load(
        store: &dyn DocumentStore,
        object_store: Arc<dyn ObjectStore>,
        config: &ReviewConfig,
        id: &str,
        evaluator: &str,
    ) -> Result<Self> {
        let document = store
            .fetch_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no record with id {}", id)))?;
        Ok(Self::from_document(document, object_store, config, evaluator))
    }

    /// Build a session from an already-fetched document
    pub fn from_document(
        document: Document,
        object_store: Arc<dyn ObjectStore>,
        config: &ReviewConfig,
        evaluator: &str,
    ) -> Self {
        let table = MetricTable::flatten(&document.quality_control);
        let mut media = MediaCache::new(object_store, document.location.clone(), config.media_ttl);
        let index = GroupIndex::build(&table, &mut media);
        let (event_tx, _) = broadcast::channel(100);

        info!(
            "loaded document {} with {} metrics across {} evaluations",
            document.id,
            table.len(),
            document.quality_control.evaluations.len()
        );

        ReviewSession {
            document,
            table,
            media,
            index,
            ledger: ChangeLedger::new(),
            evaluator: evaluator.to_string(),
            read_only: config.read_only,
            stale: false,
            event_tx,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn table(&self) -> &MetricTable {
        &self.table
    }

    pub fn index(&self) -> &GroupIndex {
        &self.index
    }

    pub fn evaluator(&self) -> &str {
        &self.evaluator
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// True after a successful commit: the in-memory copy no longer matches
    /// the server-visible copy and must be reloaded
    pub fn needs_reload(&self) -> bool {
        self.stale
    }

    pub fn dirty_count(&self) -> usize {
        self.ledger.dirty_count()
    }

    pub fn submit_enabled(&self) -> bool {
        self.ledger.submit_enabled()
    }

    /// Subscribe to session events (dirty count, status invalidation,
    /// commit outcomes)
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: SessionEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Record an edit from the generic "widget changed" path
    ///
    /// Value edits to auto-managed variants (lists, tables, custom values)
    /// are rejected: those variants manage their own lifecycle and are
    /// edited through `apply_selection` instead. Events fire only after the
    /// ledger mutation has fully applied.
    pub fn submit_change(
        &mut self,
        metric_name: &str,
        column_name: &str,
        value: Value,
    ) -> Result<()> {
        if column_name == "value" {
            if let Some(row) = self.table.find(metric_name).and_then(|i| self.table.row(i)) {
                if classify(&row.value).auto_value() {
                    return Err(Error::InvalidChangeTarget(format!(
                        "value of '{}' is auto-managed",
                        metric_name
                    )));
                }
            }
        }
        self.record_change(metric_name, column_name, value)
    }

    /// Apply a user selection to a custom structured value
    ///
    /// The updated value is always pushed into the ledger; when the custom
    /// value manages its own state, the derived status is pushed as well.
    pub fn apply_selection(&mut self, metric_name: &str, selection: Selection) -> Result<()> {
        let index = self.table.find(metric_name).ok_or_else(|| {
            Error::InvalidChangeTarget(format!("metric '{}' does not exist", metric_name))
        })?;
        let row = self.table.row(index).ok_or_else(|| {
            Error::InvalidChangeTarget(format!("metric '{}' does not exist", metric_name))
        })?;

        // The pending edit, if any, is the state the user is looking at
        let current = self
            .ledger
            .records()
            .iter()
            .find(|r| r.metric_name == metric_name && r.column == Column::Value)
            .map(|r| r.value.clone())
            .unwrap_or_else(|| row.value.clone());

        let mut custom = match classify(&current) {
            MetricValue::Custom(custom) => custom,
            _ => {
                return Err(Error::Classification(format!(
                    "value of '{}' is not a custom structured value",
                    metric_name
                )))
            }
        };

        let outcome = custom.apply_selection(selection);
        self.record_change(metric_name, "value", outcome.value)?;
        if let Some(status) = outcome.status {
            self.record_change(
                metric_name,
                "status",
                serde_json::to_value(status).unwrap_or(Value::Null),
            )?;
        }
        Ok(())
    }

    /// Ledger mutation plus its observable events, in that order
    fn record_change(&mut self, metric_name: &str, column_name: &str, value: Value) -> Result<()> {
        let before = self.ledger.dirty_count();
        let column = self
            .ledger
            .submit_change(&self.table, metric_name, column_name, value)?;
        let after = self.ledger.dirty_count();

        if after != before {
            self.broadcast(SessionEvent::DirtyChanged {
                count: after,
                submit_enabled: after > 0,
                timestamp: Utc::now(),
            });
        }

        if column == Column::Status {
            if let Some(row) = self.table.find(metric_name).and_then(|i| self.table.row(i)) {
                self.broadcast(SessionEvent::StatusInvalidated {
                    metric_name: metric_name.to_string(),
                    stage: row.stage.clone(),
                    group_keys: row.group_keys(),
                    timestamp: Utc::now(),
                });
            }
        }

        debug!(
            "change recorded for {}.{}, {} pending",
            metric_name, column_name, after
        );
        Ok(())
    }

    /// Classified value for a metric row, with any pending edit applied
    pub fn resolved_value(&self, metric_name: &str) -> Option<MetricValue> {
        let index = self.table.find(metric_name)?;
        let row = self.table.row(index)?;
        let current = self
            .ledger
            .records()
            .iter()
            .find(|r| r.metric_name == metric_name && r.column == Column::Value)
            .map(|r| r.value.clone())
            .unwrap_or_else(|| row.value.clone());
        Some(classify(&current))
    }

    /// Custom-value accessor for the view layer
    pub fn custom_value(&self, metric_name: &str) -> Option<CustomValue> {
        match self.resolved_value(metric_name)? {
            MetricValue::Custom(custom) => Some(custom),
            _ => None,
        }
    }

    /// Grouped, de-duplicated view plan for the selected group keys
    pub fn project(&self, selected: &[String]) -> GroupedView {
        self.index.project(selected)
    }

    /// Candidate group keys for the grouping UI
    pub fn grouping_options(&self) -> Vec<String> {
        self.document.quality_control.grouping_options()
    }

    pub fn default_grouping(&self) -> Vec<String> {
        self.document.quality_control.default_grouping()
    }

    /// Status pivot over the document's stages and groups
    pub fn status_table(&self, as_of: DateTime<Utc>) -> StatusTable {
        matrix::compute_default(&self.document.quality_control, as_of)
    }

    /// Discard the session: pending changes are dropped (never applied) and
    /// in-flight media fetches are cancelled
    pub fn discard(&mut self) {
        let had_changes = self.ledger.submit_enabled();
        self.ledger.clear();
        self.media.abort_all();

        if had_changes {
            self.broadcast(SessionEvent::DirtyChanged {
                count: 0,
                submit_enabled: false,
                timestamp: Utc::now(),
            });
        }
        self.broadcast(SessionEvent::DocumentClosed {
            document_id: self.document.id.clone(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    /// Commit succeeded: empty the ledger and flag the in-memory copy stale
    pub(crate) fn complete_commit(&mut self) {
        self.ledger.clear();
        self.stale = true;
        self.broadcast(SessionEvent::DirtyChanged {
            count: 0,
            submit_enabled: false,
            timestamp: Utc::now(),
        });
        self.broadcast(SessionEvent::CommitSucceeded {
            document_id: self.document.id.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Commit failed: ledger and document stay exactly as they were
    pub(crate) fn note_commit_failure(&self, error: &Error) {
        self.broadcast(SessionEvent::CommitFailed {
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
