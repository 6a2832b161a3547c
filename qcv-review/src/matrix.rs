//! Status pivot table
//!
//! Dense (stage × group) pivot of aggregate statuses. Single-cell
//! aggregation is the schema collaborator's job; this module only assembles
//! the results. The table is small (stages and groups are both in the
//! tens), so invalidation recomputes the whole pivot.

use chrono::{DateTime, Utc};

use qcv_common::qc::{QualityControl, Status};

/// Dense pivot keyed by stage (rows) and group label (columns)
///
/// Cells with no matching evaluation hold `None` and render blank.
#[derive(Debug, Clone)]
pub struct StatusTable {
    stages: Vec<String>,
    columns: Vec<String>,
    cells: Vec<Vec<Option<Status>>>,
}

impl StatusTable {
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cell lookup by stage and group label
    pub fn cell(&self, stage: &str, group: &str) -> Option<Status> {
        let row = self.stages.iter().position(|s| s == stage)?;
        let col = self.columns.iter().position(|c| c == group)?;
        self.cells[row][col]
    }

    /// Row of cells for one stage, in column order
    pub fn row(&self, stage: &str) -> Option<&[Option<Status>]> {
        let row = self.stages.iter().position(|s| s == stage)?;
        Some(&self.cells[row])
    }
}

/// Compute the pivot for the given stages and groups as of a point in time
///
/// Columns are modality abbreviations followed by tags, de-duplicated in
/// the order given.
pub fn compute(
    qc: &QualityControl,
    stages: &[String],
    modalities: &[String],
    tags: &[String],
    as_of: DateTime<Utc>,
) -> StatusTable {
    let mut columns: Vec<String> = Vec::new();
    for group in modalities.iter().chain(tags.iter()) {
        if !columns.contains(group) {
            columns.push(group.clone());
        }
    }

    let cells = stages
        .iter()
        .map(|stage| {
            columns
                .iter()
                .map(|group| qc.evaluate_status(Some(stage), Some(group), as_of))
                .collect()
        })
        .collect();

    StatusTable {
        stages: stages.to_vec(),
        columns,
        cells,
    }
}

/// Compute the pivot over everything the document knows about: its stages,
/// modalities, and default grouping tags
pub fn compute_default(qc: &QualityControl, as_of: DateTime<Utc>) -> StatusTable {
    let stages = qc.stages();
    let modalities: Vec<String> = qc.modalities().into_iter().map(|m| m.abbreviation).collect();
    let tags = qc.default_grouping();
    compute(qc, &stages, &modalities, &tags, as_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcv_common::qc::{Evaluation, Metric, Modality, StatusRecord};
    use serde_json::json;

    fn metric(status: Status) -> Metric {
        Metric {
            name: format!("m-{:?}", status),
            description: None,
            value: json!(false),
            reference: None,
            status_history: vec![StatusRecord {
                evaluator: "tester".to_string(),
                status,
                timestamp: chrono::DateTime::from_timestamp(100, 0).unwrap(),
            }],
        }
    }

    fn evaluation(stage: &str, modality: &str, tags: &[&str], status: Status) -> Evaluation {
        Evaluation {
            name: format!("{} {}", stage, modality),
            stage: stage.to_string(),
            modality: Modality {
                name: modality.to_string(),
                abbreviation: modality.to_string(),
            },
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: None,
            allow_failed_metrics: false,
            notes: None,
            metrics: vec![metric(status)],
        }
    }

    #[test]
    fn test_pivot_is_dense_with_blank_cells() {
        let qc = QualityControl {
            evaluations: vec![
                evaluation("Raw data", "ophys", &["drift"], Status::Pass),
                evaluation("Processing", "ecephys", &[], Status::Fail),
            ],
            notes: None,
        };
        let table = compute_default(&qc, Utc::now());

        assert_eq!(table.stages(), &["Raw data", "Processing"]);
        assert_eq!(table.columns(), &["ophys", "ecephys", "drift"]);

        assert_eq!(table.cell("Raw data", "ophys"), Some(Status::Pass));
        assert_eq!(table.cell("Raw data", "drift"), Some(Status::Pass));
        assert_eq!(table.cell("Processing", "ecephys"), Some(Status::Fail));
        // No evaluation in this slice: blank, not an error
        assert_eq!(table.cell("Processing", "ophys"), None);
        assert_eq!(table.cell("Raw data", "ecephys"), None);
        // Unknown labels are also blank
        assert_eq!(table.cell("Nope", "ophys"), None);
    }

    #[test]
    fn test_columns_deduplicated_in_order() {
        let qc = QualityControl {
            evaluations: vec![evaluation("Raw data", "ophys", &["ophys"], Status::Pass)],
            notes: None,
        };
        let stages = qc.stages();
        let table = compute(
            &qc,
            &stages,
            &["ophys".to_string()],
            &["ophys".to_string(), "drift".to_string()],
            Utc::now(),
        );
        assert_eq!(table.columns(), &["ophys", "drift"]);
    }
}
