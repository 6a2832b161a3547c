//! Quality-control document schema
//!
//! Serde models for the QC document tree (document → evaluations → metrics)
//! plus the aggregate-status and grouping operations the review core
//! consumes. The aggregation rules here are the schema collaborator's
//! contract; the review core calls them and never reimplements them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Status of a metric, evaluation, or (stage, group) slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pass,
    Fail,
    Pending,
}

/// One entry in a metric's append-only status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Identity of the evaluator who set this status
    pub evaluator: String,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

/// Data modality attached to an evaluation (e.g. "ophys", "ecephys")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modality {
    #[serde(default)]
    pub name: String,
    pub abbreviation: String,
}

/// A single named, valued, statusable QC datum
///
/// `name` is unique within the document and is the join key used by the
/// change ledger and group index. `value` is polymorphic; classification
/// into display/edit variants happens in the review core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Identifier for shared external media; `None` means no media
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status_history: Vec<StatusRecord>,
}

impl Metric {
    /// Current status = last history entry, Pending if the history is empty
    pub fn current_status(&self) -> Status {
        self.status_history
            .last()
            .map(|r| r.status)
            .unwrap_or(Status::Pending)
    }

    /// Status as of a point in time: the last record at or before `as_of`.
    /// No record that early counts as Pending.
    pub fn status_at(&self, as_of: DateTime<Utc>) -> Status {
        self.status_history
            .iter()
            .rev()
            .find(|r| r.timestamp <= as_of)
            .map(|r| r.status)
            .unwrap_or(Status::Pending)
    }
}

/// A named group of metrics sharing a stage/modality/tag context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub name: String,
    /// Stage label (e.g. "Raw data", "Processing")
    pub stage: String,
    pub modality: Modality,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// When set, failed metrics do not fail the evaluation
    #[serde(default)]
    pub allow_failed_metrics: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl Evaluation {
    /// Group keys for display filtering: the modality abbreviation plus
    /// every free-form tag
    pub fn group_keys(&self) -> Vec<String> {
        let mut keys = vec![self.modality.abbreviation.clone()];
        keys.extend(self.tags.iter().cloned());
        keys
    }

    /// Whether this evaluation belongs to the given group key
    pub fn has_group(&self, group: &str) -> bool {
        self.modality.abbreviation == group || self.tags.iter().any(|t| t == group)
    }

    /// Evaluation status as of a point in time
    ///
    /// Fail if any metric fails (unless failed metrics are allowed),
    /// else Pending if any metric is pending, else Pass.
    pub fn status_at(&self, as_of: DateTime<Utc>) -> Status {
        if self.metrics.is_empty() {
            return Status::Pending;
        }
        let statuses: Vec<Status> = self.metrics.iter().map(|m| m.status_at(as_of)).collect();
        if !self.allow_failed_metrics && statuses.contains(&Status::Fail) {
            Status::Fail
        } else if statuses.contains(&Status::Pending) {
            Status::Pending
        } else {
            Status::Pass
        }
    }
}

/// The QC aggregate attached to a data record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityControl {
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl QualityControl {
    /// Distinct stage labels in first-seen order
    pub fn stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        for evaluation in &self.evaluations {
            if !stages.contains(&evaluation.stage) {
                stages.push(evaluation.stage.clone());
            }
        }
        stages
    }

    /// Distinct modalities in first-seen order
    pub fn modalities(&self) -> Vec<Modality> {
        let mut modalities: Vec<Modality> = Vec::new();
        for evaluation in &self.evaluations {
            if !modalities.iter().any(|m| m.abbreviation == evaluation.modality.abbreviation) {
                modalities.push(evaluation.modality.clone());
            }
        }
        modalities
    }

    /// Default grouping for the review UI: distinct tags in first-seen order
    pub fn default_grouping(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for evaluation in &self.evaluations {
            for tag in &evaluation.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        tags
    }

    /// All candidate group keys: modality abbreviations followed by tags,
    /// de-duplicated, first-seen order
    pub fn grouping_options(&self) -> Vec<String> {
        let mut options: Vec<String> = self
            .modalities()
            .into_iter()
            .map(|m| m.abbreviation)
            .collect();
        for tag in self.default_grouping() {
            if !options.contains(&tag) {
                options.push(tag);
            }
        }
        options
    }

    /// Aggregate status for a (stage, group) slice as of a point in time
    ///
    /// Both filters are optional; `None` means "any". Returns `None` when no
    /// evaluation matches the slice (rendered as a blank cell, not an error).
    /// Across matching evaluations: Fail dominates, then Pending, else Pass.
    pub fn evaluate_status(
        &self,
        stage: Option<&str>,
        group: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Option<Status> {
        let statuses: Vec<Status> = self
            .evaluations
            .iter()
            .filter(|e| stage.map_or(true, |s| e.stage == s))
            .filter(|e| group.map_or(true, |g| e.has_group(g)))
            .map(|e| e.status_at(as_of))
            .collect();

        if statuses.is_empty() {
            None
        } else if statuses.contains(&Status::Fail) {
            Some(Status::Fail)
        } else if statuses.contains(&Status::Pending) {
            Some(Status::Pending)
        } else {
            Some(Status::Pass)
        }
    }
}

/// Storage location parsed from an `s3://bucket/prefix` URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    /// Parse an `s3://bucket/prefix` string; the prefix may contain slashes
    pub fn parse(location: &str) -> Result<Self> {
        let stripped = location
            .strip_prefix("s3://")
            .ok_or_else(|| Error::Config(format!("Not an s3 location: {}", location)))?;
        let (bucket, prefix) = stripped
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("Location missing prefix: {}", location)))?;
        Ok(S3Location {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

/// A loaded data record with its QC aggregate
///
/// Owned by the session that loaded it; replaced wholesale on reload and
/// mutated only through the ledger/submit path.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub location: Option<S3Location>,
    pub project_name: Option<String>,
    pub quality_control: QualityControl,
}

impl Document {
    /// Build a Document from a raw database record
    ///
    /// Expects the projection used by the store client: `_id`, `name`,
    /// `location`, `data_description.project_name`, `quality_control`.
    /// A record without a QC aggregate is not reviewable.
    pub fn from_record(record: &serde_json::Value) -> Result<Self> {
        let id = record
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::NotFound("record has no _id".to_string()))?
            .to_string();
        let name = record
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let quality_control = record
            .get("quality_control")
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::NotFound(format!("record {} has no quality_control", id)))?;
        let quality_control: QualityControl = serde_json::from_value(quality_control.clone())
            .map_err(|e| Error::Classification(format!("quality_control failed to validate: {}", e)))?;

        let location = record
            .get("location")
            .and_then(|v| v.as_str())
            .and_then(|s| S3Location::parse(s).ok());

        let project_name = record
            .pointer("/data_description/project_name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(Document {
            id,
            name,
            location,
            project_name,
            quality_control,
        })
    }

    /// Distinct modalities across the document's evaluations
    pub fn modalities(&self) -> Vec<Modality> {
        self.quality_control.modalities()
    }
}
