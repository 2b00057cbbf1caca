use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    /// Substring match on strings, membership on arrays.
    Contains,
    /// Field is present and non-null; the condition value is ignored.
    Exists,
    Gt,
    Lt,
}

/// A single payload predicate attached to a subscription.
///
/// `field` is a dotted path into the event payload
/// (e.g. `booking.status`). Type mismatches evaluate to false, never
/// to an error: a condition can only select or skip a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this condition against an event payload.
    pub fn matches(&self, payload: &Value) -> bool {
        let found = lookup(payload, &self.field);

        match self.op {
            ConditionOp::Exists => matches!(found, Some(v) if !v.is_null()),
            ConditionOp::Eq => found.map(|v| v == &self.value).unwrap_or(false),
            ConditionOp::Ne => found.map(|v| v != &self.value).unwrap_or(false),
            ConditionOp::Contains => found.map(|v| contains(v, &self.value)).unwrap_or(false),
            ConditionOp::Gt => compare(found, &self.value).map(|o| o.is_gt()).unwrap_or(false),
            ConditionOp::Lt => compare(found, &self.value).map(|o| o.is_lt()).unwrap_or(false),
        }
    }
}

/// Evaluate all conditions; an empty slice matches everything.
pub fn matches_all(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| c.matches(payload))
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn contains(found: &Value, needle: &Value) -> bool {
    match found {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| item == needle),
        _ => false,
    }
}

fn compare(found: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = found?.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}
