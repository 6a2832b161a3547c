//! Group index
//!
//! Relates group keys (modality abbreviations and tags) to metrics, and
//! metrics to their shared reference media. Built once per loaded document
//! and immutable afterwards; regenerated wholesale on reload rather than
//! mutated incrementally.

use std::collections::HashMap;

use crate::media::{MediaCache, MediaHandle, EMPTY_REFERENCE_PREFIX};
use crate::table::MetricTable;

/// Multi-index over the flattened metric table
pub struct GroupIndex {
    /// Group keys in first-seen order
    key_order: Vec<String>,
    /// Group key → metric row indices
    tag_to_metrics: HashMap<String, Vec<usize>>,
    /// Metric row index → reference key (parallel to the table rows)
    metric_to_reference: Vec<String>,
    /// Reference key → the one shared media handle for that reference
    reference_to_media: HashMap<String, MediaHandle>,
}

/// Ordered, de-duplicated view plan for a selected set of group keys
#[derive(Debug)]
pub struct GroupedView {
    pub groups: Vec<GroupView>,
}

impl GroupedView {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One selected group key with its metrics partitioned by reference
#[derive(Debug)]
pub struct GroupView {
    pub key: String,
    pub buckets: Vec<ReferenceBucket>,
}

/// Metrics sharing one reference, with the single media handle for it
#[derive(Debug)]
pub struct ReferenceBucket {
    pub reference: String,
    pub media: MediaHandle,
    pub metrics: Vec<usize>,
}

impl GroupIndex {
    /// Build the indices from the metric table
    ///
    /// Metrics without a reference get a synthetic per-document key so they
    /// group individually. Each distinct reference key constructs exactly
    /// one media handle; the cache is the single writer.
    pub fn build(table: &MetricTable, media: &mut MediaCache) -> Self {
        let mut key_order: Vec<String> = Vec::new();
        let mut tag_to_metrics: HashMap<String, Vec<usize>> = HashMap::new();
        let mut metric_to_reference: Vec<String> = Vec::with_capacity(table.len());
        let mut reference_to_media: HashMap<String, MediaHandle> = HashMap::new();
        let mut empty_counter = 0usize;

        for (index, row) in table.rows().iter().enumerate() {
            for key in row.group_keys() {
                let entry = tag_to_metrics.entry(key.clone()).or_insert_with(|| {
                    key_order.push(key.clone());
                    Vec::new()
                });
                entry.push(index);
            }

            let reference_key = match row.reference.as_deref() {
                Some(r) if !r.is_empty() => r.to_string(),
                _ => {
                    let key = format!("{}{}", EMPTY_REFERENCE_PREFIX, empty_counter);
                    empty_counter += 1;
                    key
                }
            };

            if !reference_to_media.contains_key(&reference_key) {
                reference_to_media.insert(reference_key.clone(), media.handle_for(&reference_key));
            }
            metric_to_reference.push(reference_key);
        }

        GroupIndex {
            key_order,
            tag_to_metrics,
            metric_to_reference,
            reference_to_media,
        }
    }

    /// All group keys present in the document, first-seen order
    pub fn group_keys(&self) -> &[String] {
        &self.key_order
    }

    /// Metric row indices for one group key
    pub fn metrics_for(&self, key: &str) -> &[usize] {
        self.tag_to_metrics.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reference key for a metric row
    pub fn reference_for(&self, row: usize) -> Option<&str> {
        self.metric_to_reference.get(row).map(String::as_str)
    }

    /// The shared media handle for a reference key
    pub fn media_for(&self, reference_key: &str) -> Option<&MediaHandle> {
        self.reference_to_media.get(reference_key)
    }

    /// Number of distinct media handles (one per distinct reference key)
    pub fn media_count(&self) -> usize {
        self.reference_to_media.len()
    }

    /// Synthesize the grouped view for the selected keys
    ///
    /// Selection order is preserved; within a group, reference buckets keep
    /// first-seen order. A metric relevant to several selected groups
    /// appears once per group, but its media handle is never duplicated —
    /// every bucket clone observes the same resolution. An empty selection
    /// yields an empty view.
    pub fn project(&self, selected: &[String]) -> GroupedView {
        let mut groups = Vec::with_capacity(selected.len());

        for key in selected {
            let metrics = self.metrics_for(key);

            let mut bucket_order: Vec<&str> = Vec::new();
            let mut partitions: HashMap<&str, Vec<usize>> = HashMap::new();
            for &row in metrics {
                let Some(reference) = self.reference_for(row) else {
                    continue;
                };
                partitions
                    .entry(reference)
                    .or_insert_with(|| {
                        bucket_order.push(reference);
                        Vec::new()
                    })
                    .push(row);
            }

            let buckets = bucket_order
                .into_iter()
                .filter_map(|reference| {
                    let media = self.reference_to_media.get(reference)?.clone();
                    Some(ReferenceBucket {
                        reference: reference.to_string(),
                        media,
                        metrics: partitions.remove(reference).unwrap_or_default(),
                    })
                })
                .collect();

            groups.push(GroupView {
                key: key.clone(),
                buckets,
            });
        }

        GroupedView { groups }
    }
}
