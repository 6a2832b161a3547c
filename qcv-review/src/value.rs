//! Metric value classification
//!
//! Resolves a raw metric value into one of a closed set of display/edit
//! variants, and owns the custom structured value sub-state-machine that
//! derives a status from user selections.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use qcv_common::{Error, Result, Status};

/// Display/edit variant resolved from a raw metric value
///
/// Classification is a pure function of the value's shape; the same shape
/// always resolves to the same variant. Unrecognized shapes map to `Opaque`
/// rather than failing.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Edited via a toggle
    Bool(bool),
    /// Edited via a text input; absent/null values degrade to an empty string
    Text(String),
    /// Edited via an integer input
    Int(i64),
    /// Edited via a float input
    Float(f64),
    /// Ordered sequence rendered as a read-only one-column table
    ListDisplay(Vec<Value>),
    /// Mapping rendered as a read-only table; every column has equal length
    TableDisplay(Vec<(String, Vec<Value>)>),
    /// Structured value with its own edit/state lifecycle
    Custom(CustomValue),
    /// Anything else; edited as raw structured data with no type guarantees
    Opaque(Value),
}

impl MetricValue {
    /// True for variants that manage their own value/state lifecycle and
    /// must not be overwritten by the generic "widget changed" edit path
    pub fn auto_value(&self) -> bool {
        matches!(
            self,
            MetricValue::ListDisplay(_) | MetricValue::TableDisplay(_) | MetricValue::Custom(_)
        )
    }
}

/// Classify a raw metric value into its display/edit variant
pub fn classify(raw: &Value) -> MetricValue {
    match raw {
        Value::Bool(b) => MetricValue::Bool(*b),
        Value::Null => MetricValue::Text(String::new()),
        Value::String(s) => MetricValue::Text(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetricValue::Int(i)
            } else {
                MetricValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::Array(items) => MetricValue::ListDisplay(items.clone()),
        Value::Object(map) => {
            if CustomValue::is_custom(raw) {
                match CustomValue::parse(raw) {
                    Ok(custom) => MetricValue::Custom(custom),
                    Err(e) => {
                        // Malformed custom values stay editable as raw data
                        debug!("custom value failed to classify: {}", e);
                        MetricValue::Opaque(raw.clone())
                    }
                }
            } else if let Some(columns) = as_table_columns(map) {
                MetricValue::TableDisplay(columns)
            } else {
                MetricValue::Opaque(raw.clone())
            }
        }
    }
}

/// Coerce a mapping into table columns when every entry is a list of equal
/// length, or every entry is a scalar (widened to single-element columns)
fn as_table_columns(map: &serde_json::Map<String, Value>) -> Option<Vec<(String, Vec<Value>)>> {
    if map.is_empty() {
        return None;
    }

    if map.values().all(|v| v.is_array()) {
        let mut lengths = map.values().map(|v| v.as_array().map(|a| a.len()).unwrap_or(0));
        let first = lengths.next()?;
        if lengths.all(|len| len == first) {
            return Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_array().cloned().unwrap_or_default()))
                    .collect(),
            );
        }
        return None;
    }

    let is_scalar = |v: &Value| v.is_string() || v.is_number() || v.is_boolean();
    if map.values().all(is_scalar) {
        return Some(
            map.iter()
                .map(|(k, v)| (k.clone(), vec![v.clone()]))
                .collect(),
        );
    }

    None
}

/// Dropdown custom value: exactly one option may be selected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownValue {
    pub options: Vec<String>,
    /// Current selection; empty string means nothing selected
    #[serde(default)]
    pub value: String,
    /// Per-option status mapping; present iff the status is auto-derived
    #[serde(default)]
    pub status: Option<Vec<Status>>,
}

/// Checkbox custom value: any subset of options may be selected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckboxValue {
    pub options: Vec<String>,
    #[serde(default)]
    pub value: Vec<String>,
    #[serde(default)]
    pub status: Option<Vec<Status>>,
}

/// Rule-based custom value; displayed read-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulebasedValue {
    pub rule: String,
    #[serde(default)]
    pub value: Value,
}

/// Custom structured metric value
///
/// Discriminated by a `type` field (`dropdown` | `checkbox`) or a `rule`
/// field. Owns its own status derivation when a per-option `status` array
/// is present.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomValue {
    Dropdown(DropdownValue),
    Checkbox(CheckboxValue),
    Rulebased(RulebasedValue),
}

/// A user selection event against a custom value
#[derive(Debug, Clone)]
pub enum Selection {
    /// Dropdown choice; empty string clears the selection
    Single(String),
    /// Checkbox choice set
    Multi(Vec<String>),
}

/// Result of applying a selection
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Updated raw value to push into the metric's value field; pushed on
    /// every selection change regardless of auto-state
    pub value: Value,
    /// Derived status, present only when the value manages its own state
    pub status: Option<Status>,
}

impl CustomValue {
    /// Whether a raw value carries the custom-value discriminators
    pub fn is_custom(raw: &Value) -> bool {
        match raw.as_object() {
            Some(map) => map.contains_key("type") || map.contains_key("rule"),
            None => false,
        }
    }

    /// Validate a raw mapping into a custom value
    ///
    /// Corrupted selections get one repair pass (selection reset to empty)
    /// before the value is rejected. A `status` array that is not parallel
    /// to `options` is a classification error.
    pub fn parse(raw: &Value) -> Result<Self> {
        let map = raw
            .as_object()
            .ok_or_else(|| Error::Classification("custom value is not a mapping".to_string()))?;

        if let Some(kind) = map.get("type").and_then(|v| v.as_str()) {
            match kind {
                "dropdown" => {
                    let data: DropdownValue = serde_json::from_value(raw.clone())
                        .or_else(|_| serde_json::from_value(repair_dropdown(raw.clone())))
                        .map_err(|e| Error::Classification(format!("bad dropdown value: {}", e)))?;
                    let data = DropdownValue {
                        value: if data.options.contains(&data.value) {
                            data.value
                        } else {
                            String::new()
                        },
                        ..data
                    };
                    validate_status_len(data.status.as_deref(), data.options.len())?;
                    Ok(CustomValue::Dropdown(data))
                }
                "checkbox" => {
                    let data: CheckboxValue = serde_json::from_value(raw.clone())
                        .or_else(|_| serde_json::from_value(repair_checkbox(raw.clone())))
                        .map_err(|e| Error::Classification(format!("bad checkbox value: {}", e)))?;
                    let data = CheckboxValue {
                        value: if data.value.iter().all(|v| data.options.contains(v)) {
                            data.value
                        } else {
                            Vec::new()
                        },
                        ..data
                    };
                    validate_status_len(data.status.as_deref(), data.options.len())?;
                    Ok(CustomValue::Checkbox(data))
                }
                other => Err(Error::Classification(format!(
                    "unknown type '{}' for custom metric value",
                    other
                ))),
            }
        } else if map.contains_key("rule") {
            let data: RulebasedValue = serde_json::from_value(raw.clone())
                .map_err(|e| Error::Classification(format!("bad rule-based value: {}", e)))?;
            Ok(CustomValue::Rulebased(data))
        } else {
            Err(Error::Classification(
                "unknown custom metric value".to_string(),
            ))
        }
    }

    /// Whether the status is derived automatically from the selection
    pub fn auto_state(&self) -> bool {
        match self {
            CustomValue::Dropdown(d) => d.status.is_some(),
            CustomValue::Checkbox(c) => c.status.is_some(),
            CustomValue::Rulebased(_) => true,
        }
    }

    /// Apply a selection-change event
    ///
    /// The updated value is always produced; a status is derived only when
    /// auto-state is set. Lookup failures (selection not found in options)
    /// degrade to Pending instead of propagating.
    pub fn apply_selection(&mut self, selection: Selection) -> SelectionOutcome {
        let derived = match (&mut *self, selection) {
            (CustomValue::Dropdown(data), Selection::Single(choice)) => {
                data.value = choice;
                if data.status.is_some() {
                    Some(derive_dropdown_status(data))
                } else {
                    None
                }
            }
            (CustomValue::Checkbox(data), Selection::Multi(choices)) => {
                data.value = choices;
                if data.status.is_some() {
                    Some(derive_checkbox_status(data))
                } else {
                    None
                }
            }
            (custom, selection) => {
                warn!(
                    "selection {:?} does not match custom value shape, forcing Pending",
                    selection
                );
                if custom.auto_state() {
                    Some(Status::Pending)
                } else {
                    None
                }
            }
        };

        SelectionOutcome {
            value: self.to_raw(),
            status: derived,
        }
    }

    /// Serialize back to the raw wire shape, including the discriminator
    pub fn to_raw(&self) -> Value {
        match self {
            CustomValue::Dropdown(d) => {
                let mut map = serde_json::Map::new();
                map.insert("type".to_string(), json!("dropdown"));
                map.insert("options".to_string(), json!(d.options));
                map.insert("value".to_string(), json!(d.value));
                if let Some(status) = &d.status {
                    map.insert("status".to_string(), json!(status));
                }
                Value::Object(map)
            }
            CustomValue::Checkbox(c) => {
                let mut map = serde_json::Map::new();
                map.insert("type".to_string(), json!("checkbox"));
                map.insert("options".to_string(), json!(c.options));
                map.insert("value".to_string(), json!(c.value));
                if let Some(status) = &c.status {
                    map.insert("status".to_string(), json!(status));
                }
                Value::Object(map)
            }
            CustomValue::Rulebased(r) => {
                let mut map = serde_json::Map::new();
                map.insert("rule".to_string(), json!(r.rule));
                map.insert("value".to_string(), r.value.clone());
                Value::Object(map)
            }
        }
    }
}

fn validate_status_len(status: Option<&[Status]>, options: usize) -> Result<()> {
    match status {
        Some(s) if s.len() != options => Err(Error::Classification(format!(
            "status array has {} entries for {} options",
            s.len(),
            options
        ))),
        _ => Ok(()),
    }
}

/// Reset a corrupted dropdown selection to empty before re-validating
fn repair_dropdown(mut raw: Value) -> Value {
    if let Some(map) = raw.as_object_mut() {
        map.insert("value".to_string(), json!(""));
    }
    raw
}

/// Reset a corrupted checkbox selection to empty before re-validating
fn repair_checkbox(mut raw: Value) -> Value {
    if let Some(map) = raw.as_object_mut() {
        map.insert("value".to_string(), json!([]));
    }
    raw
}

/// Empty selection is Pending; otherwise the status parallel to the option
fn derive_dropdown_status(data: &DropdownValue) -> Status {
    if data.value.is_empty() {
        return Status::Pending;
    }
    match lookup_status(&data.options, data.status.as_deref(), &data.value) {
        Ok(status) => status,
        Err(e) => {
            warn!("dropdown status derivation failed: {}", e);
            Status::Pending
        }
    }
}

/// Empty set is Pending; otherwise Fail > Pending > Pass over the selection
fn derive_checkbox_status(data: &CheckboxValue) -> Status {
    if data.value.is_empty() {
        return Status::Pending;
    }
    let mut derived = Status::Pass;
    for choice in &data.value {
        match lookup_status(&data.options, data.status.as_deref(), choice) {
            Ok(Status::Fail) => return Status::Fail,
            Ok(Status::Pending) => derived = Status::Pending,
            Ok(Status::Pass) => {}
            Err(e) => {
                warn!("checkbox status derivation failed: {}", e);
                return Status::Pending;
            }
        }
    }
    derived
}

fn lookup_status(options: &[String], status: Option<&[Status]>, choice: &str) -> Result<Status> {
    let idx = options
        .iter()
        .position(|o| o == choice)
        .ok_or_else(|| Error::Lookup(format!("'{}' is not one of the options", choice)))?;
    status
        .and_then(|s| s.get(idx).copied())
        .ok_or_else(|| Error::Lookup(format!("no status defined for option '{}'", choice)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_scalars() {
        assert_eq!(classify(&json!(true)), MetricValue::Bool(true));
        assert_eq!(classify(&json!("hello")), MetricValue::Text("hello".to_string()));
        assert_eq!(classify(&json!(3)), MetricValue::Int(3));
        assert_eq!(classify(&json!(2.5)), MetricValue::Float(2.5));
        // Absent values degrade to an empty text input
        assert_eq!(classify(&Value::Null), MetricValue::Text(String::new()));
    }

    #[test]
    fn test_classify_is_pure() {
        let raw = json!({"type": "dropdown", "options": ["a"], "value": "a"});
        assert_eq!(classify(&raw), classify(&raw));
        let weird = json!({"nested": {"deep": [1, 2]}});
        assert_eq!(classify(&weird), classify(&weird));
    }

    #[test]
    fn test_classify_list_display() {
        let v = classify(&json!([1, 2, 3]));
        assert_eq!(v, MetricValue::ListDisplay(vec![json!(1), json!(2), json!(3)]));
        assert!(v.auto_value());
    }

    #[test]
    fn test_classify_table_equal_columns() {
        let v = classify(&json!({"a": [1, 2], "b": ["x", "y"]}));
        match &v {
            MetricValue::TableDisplay(cols) => {
                assert_eq!(cols.len(), 2);
                assert!(cols.iter().all(|(_, c)| c.len() == 2));
            }
            other => panic!("expected table, got {:?}", other),
        }
        assert!(v.auto_value());
    }

    #[test]
    fn test_classify_table_scalars_widened() {
        let v = classify(&json!({"count": 5, "label": "ok"}));
        match v {
            MetricValue::TableDisplay(cols) => {
                assert!(cols.iter().all(|(_, c)| c.len() == 1));
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_uneven_columns_is_opaque() {
        let raw = json!({"a": [1, 2], "b": [1]});
        assert_eq!(classify(&raw), MetricValue::Opaque(raw.clone()));

        let mixed = json!({"a": [1], "b": "scalar"});
        assert_eq!(classify(&mixed), MetricValue::Opaque(mixed.clone()));
    }

    #[test]
    fn test_malformed_custom_degrades_to_opaque() {
        let raw = json!({"type": "slider", "options": []});
        let v = classify(&raw);
        assert_eq!(v, MetricValue::Opaque(raw));

        // Status array not parallel to options
        let raw = json!({"type": "dropdown", "options": ["a", "b"], "status": ["Pass"]});
        assert!(matches!(classify(&raw), MetricValue::Opaque(_)));
    }

    #[test]
    fn test_custom_repair_resets_selection() {
        // Dropdown value not in options gets repaired to empty
        let raw = json!({"type": "dropdown", "options": ["a", "b"], "value": "z"});
        match classify(&raw) {
            MetricValue::Custom(CustomValue::Dropdown(d)) => assert_eq!(d.value, ""),
            other => panic!("expected dropdown, got {:?}", other),
        }

        // Checkbox value of the wrong type gets repaired to empty
        let raw = json!({"type": "checkbox", "options": ["a"], "value": "a"});
        match classify(&raw) {
            MetricValue::Custom(CustomValue::Checkbox(c)) => assert!(c.value.is_empty()),
            other => panic!("expected checkbox, got {:?}", other),
        }
    }

    #[test]
    fn test_rulebased_parses() {
        let raw = json!({"rule": "value < 0.5", "value": 0.2});
        match classify(&raw) {
            MetricValue::Custom(custom) => assert!(custom.auto_state()),
            other => panic!("expected custom, got {:?}", other),
        }
    }

    #[test]
    fn test_dropdown_auto_state_table() {
        let raw = json!({
            "type": "dropdown",
            "options": ["x", "y"],
            "value": "",
            "status": ["Pass", "Fail"]
        });
        let mut custom = CustomValue::parse(&raw).unwrap();
        assert!(custom.auto_state());

        let outcome = custom.apply_selection(Selection::Single(String::new()));
        assert_eq!(outcome.status, Some(Status::Pending));

        let outcome = custom.apply_selection(Selection::Single("y".to_string()));
        assert_eq!(outcome.status, Some(Status::Fail));
        assert_eq!(outcome.value["value"], json!("y"));
    }

    #[test]
    fn test_checkbox_auto_state_precedence() {
        let raw = json!({
            "type": "checkbox",
            "options": ["a", "b", "c"],
            "value": [],
            "status": ["Pass", "Fail", "Pending"]
        });
        let mut custom = CustomValue::parse(&raw).unwrap();

        // Pending beats Pass
        let outcome = custom.apply_selection(Selection::Multi(vec!["a".into(), "c".into()]));
        assert_eq!(outcome.status, Some(Status::Pending));

        // Fail beats Pass
        let outcome = custom.apply_selection(Selection::Multi(vec!["a".into(), "b".into()]));
        assert_eq!(outcome.status, Some(Status::Fail));

        // Empty set is Pending
        let outcome = custom.apply_selection(Selection::Multi(vec![]));
        assert_eq!(outcome.status, Some(Status::Pending));

        // All-Pass selection passes
        let outcome = custom.apply_selection(Selection::Multi(vec!["a".into()]));
        assert_eq!(outcome.status, Some(Status::Pass));
    }

    #[test]
    fn test_lookup_failure_degrades_to_pending() {
        let raw = json!({
            "type": "checkbox",
            "options": ["a"],
            "value": [],
            "status": ["Pass"]
        });
        let mut custom = CustomValue::parse(&raw).unwrap();
        let outcome = custom.apply_selection(Selection::Multi(vec!["missing".into()]));
        assert_eq!(outcome.status, Some(Status::Pending));
        // The value is still pushed even though the lookup failed
        assert_eq!(outcome.value["value"], json!(["missing"]));
    }

    #[test]
    fn test_value_pushed_without_auto_state() {
        let raw = json!({"type": "dropdown", "options": ["a", "b"], "value": "a"});
        let mut custom = CustomValue::parse(&raw).unwrap();
        assert!(!custom.auto_state());

        let outcome = custom.apply_selection(Selection::Single("b".to_string()));
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.value["value"], json!("b"));
    }

    #[test]
    fn test_to_raw_round_trip() {
        let raw = json!({
            "type": "checkbox",
            "options": ["a", "b"],
            "value": ["a"],
            "status": ["Pass", "Fail"]
        });
        let custom = CustomValue::parse(&raw).unwrap();
        let back = custom.to_raw();
        assert_eq!(back["type"], json!("checkbox"));
        assert_eq!(CustomValue::parse(&back).unwrap(), custom);
    }
}
