//! Flattened metric table
//!
//! The loaded document's evaluation tree is flattened into one ordered table
//! of metric rows. The ledger and group index operate on this table; after
//! edits are applied the table folds back into the canonical document shape.

use serde_json::Value;

use qcv_common::qc::{Evaluation, Metric, QualityControl, Status, StatusRecord};

/// One metric row, joined with its owning evaluation's context
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub name: String,
    pub description: Option<String>,
    pub value: Value,
    pub reference: Option<String>,
    pub status_history: Vec<StatusRecord>,
    /// Index of the owning evaluation in the source document
    pub evaluation: usize,
    pub stage: String,
    pub modality: String,
    pub tags: Vec<String>,
}

impl MetricRow {
    /// Current status = last history entry, Pending when empty
    pub fn current_status(&self) -> Status {
        self.status_history
            .last()
            .map(|r| r.status)
            .unwrap_or(Status::Pending)
    }

    /// Group keys inherited from the owning evaluation
    pub fn group_keys(&self) -> Vec<String> {
        let mut keys = vec![self.modality.clone()];
        keys.extend(self.tags.iter().cloned());
        keys
    }
}

/// In-memory tabular representation of a document's metrics
///
/// Built once per loaded document and replaced wholesale on reload. Only
/// the ledger application path mutates rows, and only the value/status
/// columns.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    rows: Vec<MetricRow>,
}

impl MetricTable {
    /// Flatten a QC aggregate into ordered metric rows
    pub fn flatten(qc: &QualityControl) -> Self {
        let mut rows = Vec::new();
        for (eval_index, evaluation) in qc.evaluations.iter().enumerate() {
            for metric in &evaluation.metrics {
                rows.push(MetricRow {
                    name: metric.name.clone(),
                    description: metric.description.clone(),
                    value: metric.value.clone(),
                    reference: metric.reference.clone(),
                    status_history: metric.status_history.clone(),
                    evaluation: eval_index,
                    stage: evaluation.stage.clone(),
                    modality: evaluation.modality.abbreviation.clone(),
                    tags: evaluation.tags.clone(),
                });
            }
        }
        MetricTable { rows }
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&MetricRow> {
        self.rows.get(index)
    }

    /// Row index for a metric name (names are unique within a document)
    pub fn find(&self, metric_name: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.name == metric_name)
    }

    /// Overwrite a row's value column
    pub fn set_value(&mut self, index: usize, value: Value) {
        if let Some(row) = self.rows.get_mut(index) {
            row.value = value;
        }
    }

    /// Append to a row's status history; history is never overwritten
    pub fn append_status(&mut self, index: usize, record: StatusRecord) {
        if let Some(row) = self.rows.get_mut(index) {
            row.status_history.push(record);
        }
    }

    /// Fold the table back into the canonical document shape
    ///
    /// `base` supplies the evaluation metadata (stage, tags, notes); the
    /// metrics are rebuilt from the table rows in order. With no edits
    /// applied this is a round-trip identity.
    pub fn reconstruct(&self, base: &QualityControl) -> QualityControl {
        let mut evaluations: Vec<Evaluation> = base
            .evaluations
            .iter()
            .map(|e| Evaluation {
                metrics: Vec::new(),
                ..e.clone()
            })
            .collect();

        for row in &self.rows {
            if let Some(evaluation) = evaluations.get_mut(row.evaluation) {
                evaluation.metrics.push(Metric {
                    name: row.name.clone(),
                    description: row.description.clone(),
                    value: row.value.clone(),
                    reference: row.reference.clone(),
                    status_history: row.status_history.clone(),
                });
            }
        }

        QualityControl {
            evaluations,
            notes: base.notes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qcv_common::qc::Modality;
    use serde_json::json;

    fn sample_qc() -> QualityControl {
        QualityControl {
            evaluations: vec![
                Evaluation {
                    name: "Drift map".to_string(),
                    stage: "Processing".to_string(),
                    modality: Modality {
                        name: "Planar optical physiology".to_string(),
                        abbreviation: "ophys".to_string(),
                    },
                    tags: vec!["drift".to_string()],
                    description: None,
                    allow_failed_metrics: false,
                    notes: None,
                    metrics: vec![
                        Metric {
                            name: "m1".to_string(),
                            description: Some("first".to_string()),
                            value: json!(false),
                            reference: Some("ref-a".to_string()),
                            status_history: vec![StatusRecord {
                                evaluator: "alice".to_string(),
                                status: Status::Pending,
                                timestamp: Utc::now(),
                            }],
                        },
                        Metric {
                            name: "m2".to_string(),
                            description: None,
                            value: json!(1.5),
                            reference: None,
                            status_history: vec![],
                        },
                    ],
                },
                Evaluation {
                    name: "Raw check".to_string(),
                    stage: "Raw data".to_string(),
                    modality: Modality {
                        name: "Extracellular electrophysiology".to_string(),
                        abbreviation: "ecephys".to_string(),
                    },
                    tags: vec![],
                    description: None,
                    allow_failed_metrics: false,
                    notes: Some("notes".to_string()),
                    metrics: vec![Metric {
                        name: "m3".to_string(),
                        description: None,
                        value: json!("ok"),
                        reference: Some("ref-a".to_string()),
                        status_history: vec![],
                    }],
                },
            ],
            notes: Some("document notes".to_string()),
        }
    }

    #[test]
    fn test_flatten_preserves_order_and_context() {
        let table = MetricTable::flatten(&sample_qc());
        assert_eq!(table.len(), 3);
        assert_eq!(table.row(0).unwrap().name, "m1");
        assert_eq!(table.row(0).unwrap().stage, "Processing");
        assert_eq!(table.row(0).unwrap().group_keys(), vec!["ophys", "drift"]);
        assert_eq!(table.row(2).unwrap().evaluation, 1);
        assert_eq!(table.row(2).unwrap().modality, "ecephys");
    }

    #[test]
    fn test_find_by_name() {
        let table = MetricTable::flatten(&sample_qc());
        assert_eq!(table.find("m2"), Some(1));
        assert_eq!(table.find("missing"), None);
    }

    #[test]
    fn test_reconstruct_round_trip() {
        let qc = sample_qc();
        let table = MetricTable::flatten(&qc);
        let rebuilt = table.reconstruct(&qc);
        assert_eq!(
            serde_json::to_value(&rebuilt).unwrap(),
            serde_json::to_value(&qc).unwrap()
        );
    }

    #[test]
    fn test_mutations_survive_reconstruct() {
        let qc = sample_qc();
        let mut table = MetricTable::flatten(&qc);
        table.set_value(1, json!("5"));
        table.append_status(
            0,
            StatusRecord {
                evaluator: "bob".to_string(),
                status: Status::Pass,
                timestamp: Utc::now(),
            },
        );

        let rebuilt = table.reconstruct(&qc);
        assert_eq!(rebuilt.evaluations[0].metrics[1].value, json!("5"));
        assert_eq!(rebuilt.evaluations[0].metrics[0].status_history.len(), 2);
        assert_eq!(
            rebuilt.evaluations[0].metrics[0].current_status(),
            Status::Pass
        );
        // Untouched metric unchanged
        assert_eq!(rebuilt.evaluations[1].metrics[0].value, json!("ok"));
    }
}
