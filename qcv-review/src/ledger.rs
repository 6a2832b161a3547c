//! Change ledger
//!
//! Buffers uncommitted edits against the metric table. Edits are keyed by
//! (metric name, column): a later edit to the same cell overwrites the
//! earlier one, and an edit that restores the original stored value removes
//! the pending record instead of recording an identity change.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use qcv_common::qc::{Status, StatusRecord};
use qcv_common::{Error, Result};

use crate::table::MetricTable;

/// Editable columns of the metric table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Value,
    Status,
}

impl Column {
    /// Parse a caller-supplied column name; anything else is an invalid
    /// change target
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "value" => Ok(Column::Value),
            "status" => Ok(Column::Status),
            other => Err(Error::InvalidChangeTarget(format!(
                "column '{}' does not exist",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Value => "value",
            Column::Status => "status",
        }
    }
}

/// One pending edit
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub metric_name: String,
    pub column: Column,
    pub value: Value,
}

/// Buffer of uncommitted edits awaiting a single atomic write
///
/// Owned exclusively by the current edit session; never shared across
/// documents. Records keep submission order, but application order does not
/// matter because keys are unique.
#[derive(Debug, Default)]
pub struct ChangeLedger {
    records: Vec<ChangeRecord>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        ChangeLedger::default()
    }

    /// Number of pending change records
    pub fn dirty_count(&self) -> usize {
        self.records.len()
    }

    /// Submit is enabled exactly when at least one change is pending
    pub fn submit_enabled(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Record an edit against a metric's value or status column
    ///
    /// Fails with `InvalidChangeTarget` for an unknown metric or column —
    /// the ledger never grows the document's metric set. Submitting the
    /// original stored value removes any pending record for that cell.
    /// Returns the column the change targeted.
    pub fn submit_change(
        &mut self,
        table: &MetricTable,
        metric_name: &str,
        column_name: &str,
        value: Value,
    ) -> Result<Column> {
        let index = table.find(metric_name).ok_or_else(|| {
            Error::InvalidChangeTarget(format!("metric '{}' does not exist", metric_name))
        })?;
        let column = Column::parse(column_name)?;

        let row = table.row(index).ok_or_else(|| {
            Error::InvalidChangeTarget(format!("metric '{}' does not exist", metric_name))
        })?;

        let original = match column {
            Column::Value => row.value.clone(),
            Column::Status => {
                // Reject values that are not a valid status up front
                let _: Status = serde_json::from_value(value.clone()).map_err(|_| {
                    Error::InvalidChangeTarget(format!("'{}' is not a valid status", value))
                })?;
                serde_json::to_value(row.current_status()).unwrap_or(Value::Null)
            }
        };

        let existing = self
            .records
            .iter()
            .position(|r| r.metric_name == metric_name && r.column == column);

        if value == original {
            // Reverting to the original is a first-class no-op
            if let Some(pos) = existing {
                debug!("change to {}.{} reverted", metric_name, column.as_str());
                self.records.remove(pos);
            }
        } else {
            match existing {
                // Last write wins for the same cell
                Some(pos) => self.records[pos].value = value,
                None => self.records.push(ChangeRecord {
                    metric_name: metric_name.to_string(),
                    column,
                    value,
                }),
            }
        }

        Ok(column)
    }

    /// Replay every pending record into the table
    ///
    /// Value edits overwrite the value column; status edits append a new
    /// history record attributed to `evaluator` at `now`.
    pub fn apply_to(&self, table: &mut MetricTable, evaluator: &str, now: DateTime<Utc>) {
        for record in &self.records {
            let Some(index) = table.find(&record.metric_name) else {
                continue;
            };
            match record.column {
                Column::Value => table.set_value(index, record.value.clone()),
                Column::Status => {
                    if let Ok(status) = serde_json::from_value::<Status>(record.value.clone()) {
                        table.append_status(
                            index,
                            StatusRecord {
                                evaluator: evaluator.to_string(),
                                status,
                                timestamp: now,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Drop all pending records (after a successful commit, or when the
    /// document is discarded)
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
