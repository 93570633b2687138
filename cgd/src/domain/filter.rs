//! Segment filter queries
//!
//! A `FilterQuery` is disjunctive normal form: the outer list holds groups
//! that are ORed together, and each group holds predicates that are ANDed.
//! The serialized shape matches the platform's `filters` attribute:
//!
//! ```json
//! [[{"filter_type": "contact_property", "property_name": "city", "operator": "equals", "value": "New York"}]]
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Keys a model may wrap the query in
const ENVELOPE_KEYS: [&str; 3] = ["filter_query", "filters", "query"];

/// Operators for attribute comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOp {
    Equals,
    NotEquals,
    IsBlank,
    IsNotBlank,
    Contains,
    StartsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
    AnniversaryWithinDays,
}

impl AttributeOp {
    /// Blank checks are the only operators without a value
    pub fn needs_value(&self) -> bool {
        !matches!(self, AttributeOp::IsBlank | AttributeOp::IsNotBlank)
    }

    fn label(&self) -> &'static str {
        match self {
            AttributeOp::Equals => "equals",
            AttributeOp::NotEquals => "does not equal",
            AttributeOp::IsBlank => "is blank",
            AttributeOp::IsNotBlank => "is not blank",
            AttributeOp::Contains => "contains",
            AttributeOp::StartsWith => "starts with",
            AttributeOp::GreaterThan => ">",
            AttributeOp::GreaterThanOrEqual => ">=",
            AttributeOp::LessThan => "<",
            AttributeOp::LessThanOrEqual => "<=",
            AttributeOp::In => "is one of",
            AttributeOp::NotIn => "is not one of",
            AttributeOp::AnniversaryWithinDays => "has an anniversary within (days)",
        }
    }
}

/// Compare a contact attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub property_name: String,
    pub operator: AttributeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Platform fields without a typed counterpart, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Whether an event must or must not have happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOp {
    HasInteraction,
    HasNoInteraction,
}

/// One event type or a set of alternatives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTypes {
    One(String),
    Any(Vec<String>),
}

impl EventTypes {
    pub fn names(&self) -> Vec<&str> {
        match self {
            EventTypes::One(name) => vec![name.as_str()],
            EventTypes::Any(names) => names.iter().map(String::as_str).collect(),
        }
    }

    fn is_complete(&self) -> bool {
        let names = self.names();
        !names.is_empty() && names.iter().all(|n| !n.trim().is_empty())
    }
}

/// Condition on an event's metadata, ANDed with its siblings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub operator: AttributeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Require (or forbid) a tracked interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub operator: EventOp,
    pub interaction_type: EventTypes,

    /// Event happened at least this many minutes ago
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_ago_min: Option<u64>,

    /// Event happened at most this many minutes ago
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_ago_max: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_min: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_max: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataFilter>,

    /// e.g. `communication_type`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// In or not in another segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipOp {
    InList,
    NotInList,
}

/// Membership in another named segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMembershipFilter {
    pub operator: MembershipOp,
    pub list_name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single typed predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter_type")]
pub enum Predicate {
    #[serde(rename = "contact_property")]
    Attribute(AttributeFilter),

    #[serde(rename = "interaction")]
    Event(EventFilter),

    #[serde(rename = "contact_list")]
    SegmentMembership(SegmentMembershipFilter),
}

impl Predicate {
    /// Whether every required field is filled in
    pub fn is_complete(&self) -> bool {
        match self {
            Predicate::Attribute(f) => {
                !f.property_name.trim().is_empty() && (!f.operator.needs_value() || has_value(&f.value))
            }
            Predicate::Event(f) => {
                f.interaction_type.is_complete()
                    && f
                        .metadata
                        .iter()
                        .all(|m| !m.key.trim().is_empty() && (!m.operator.needs_value() || has_value(&m.value)))
            }
            Predicate::SegmentMembership(f) => !f.list_name.trim().is_empty(),
        }
    }
}

fn has_value(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Attribute(a) => {
                write!(f, "{} {}", a.property_name, a.operator.label())?;
                if let Some(value) = &a.value {
                    write!(f, " {}", value)?;
                }
                Ok(())
            }
            Predicate::Event(e) => {
                let verb = match e.operator {
                    EventOp::HasInteraction => "has",
                    EventOp::HasNoInteraction => "has not",
                };
                write!(f, "{} {}", verb, e.interaction_type.names().join(" or "))?;
                if let Some(min) = e.minutes_ago_min {
                    write!(f, ", at least {} minutes ago", min)?;
                }
                if let Some(max) = e.minutes_ago_max {
                    write!(f, ", within the last {} minutes", max)?;
                }
                if let Some(after) = &e.occurred_after {
                    write!(f, ", after {}", after)?;
                }
                if let Some(before) = &e.occurred_before {
                    write!(f, ", before {}", before)?;
                }
                if let Some(min) = e.count_min {
                    write!(f, ", at least {} times", min)?;
                }
                if let Some(max) = e.count_max {
                    write!(f, ", at most {} times", max)?;
                }
                for m in &e.metadata {
                    write!(f, ", where {} {}", m.key, m.operator.label())?;
                    if let Some(value) = &m.value {
                        write!(f, " {}", value)?;
                    }
                }
                Ok(())
            }
            Predicate::SegmentMembership(m) => match m.operator {
                MembershipOp::InList => write!(f, "is in list \"{}\"", m.list_name),
                MembershipOp::NotInList => write!(f, "is not in list \"{}\"", m.list_name),
            },
        }
    }
}

/// Allowed attribute names and event types for one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelists {
    pub attributes: Vec<String>,
    pub event_types: Vec<String>,
}

/// Names a query uses that are missing from the whitelists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownNames {
    pub attributes: Vec<String>,
    pub event_types: Vec<String>,
}

impl UnknownNames {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.event_types.is_empty()
    }
}

impl fmt::Display for UnknownNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.attributes.is_empty() {
            parts.push(format!("unknown contact properties: {}", self.attributes.join(", ")));
        }
        if !self.event_types.is_empty() {
            parts.push(format!("unknown interaction types: {}", self.event_types.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Why a model payload could not be read as a filter query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterShapeError(pub String);

impl fmt::Display for FilterShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter query has the wrong shape: {}", self.0)
    }
}

/// Result of lenient parsing: the usable query plus what was discarded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilter {
    pub query: FilterQuery,
    pub dropped: Vec<String>,
}

/// OR of AND-groups of predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterQuery(pub Vec<Vec<Predicate>>);

impl FilterQuery {
    pub fn new(groups: Vec<Vec<Predicate>>) -> Self {
        Self(groups)
    }

    /// An empty query matches every contact
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Vec::is_empty)
    }

    pub fn groups(&self) -> &[Vec<Predicate>] {
        &self.0
    }

    /// Parse a model payload, dropping incomplete predicates and empty groups
    ///
    /// Accepts the query wrapped in an envelope object, and a flat list of
    /// predicates as a single AND-group.
    pub fn from_value_lenient(value: &Value) -> Result<ParsedFilter, FilterShapeError> {
        debug!("FilterQuery::from_value_lenient: called");
        let value = unwrap_envelope(value);
        let Value::Array(outer) = value else {
            return Err(FilterShapeError(format!("expected a list, got {}", type_name(value))));
        };

        let flat = !outer.is_empty() && outer.iter().all(Value::is_object);
        let raw_groups: Vec<&Value> = if flat {
            debug!("FilterQuery::from_value_lenient: flat predicate list, treating as one group");
            vec![value]
        } else {
            outer.iter().collect()
        };

        let mut parsed = ParsedFilter::default();
        for (idx, raw_group) in raw_groups.into_iter().enumerate() {
            let Value::Array(items) = raw_group else {
                parsed.dropped.push(format!("group {} is not a list", idx + 1));
                continue;
            };
            let mut group = Vec::new();
            for item in items {
                match serde_json::from_value::<Predicate>(item.clone()) {
                    Ok(predicate) if predicate.is_complete() => group.push(predicate),
                    Ok(predicate) => parsed.dropped.push(format!("incomplete filter: {}", predicate)),
                    Err(e) => parsed.dropped.push(format!("unreadable filter {}: {}", item, e)),
                }
            }
            if group.is_empty() {
                debug!(group = %idx, "FilterQuery::from_value_lenient: dropping empty group");
            } else {
                parsed.query.0.push(group);
            }
        }

        if !parsed.dropped.is_empty() {
            warn!(dropped = ?parsed.dropped, "FilterQuery::from_value_lenient: discarded filters");
        }
        Ok(parsed)
    }

    /// Attribute names used anywhere in the query, deduplicated
    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.predicates()
            .filter_map(|p| match p {
                Predicate::Attribute(a) => Some(a.property_name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Event types used anywhere in the query, deduplicated
    pub fn event_types(&self) -> BTreeSet<&str> {
        self.predicates()
            .filter_map(|p| match p {
                Predicate::Event(e) => Some(e.interaction_type.names()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Names not present in the whitelists
    ///
    /// An empty whitelist is treated as unknown rather than as permissive, so
    /// callers should supply the built-in fallbacks when a fetch fails.
    pub fn unknown_names(&self, whitelists: &Whitelists) -> UnknownNames {
        debug!("FilterQuery::unknown_names: called");
        UnknownNames {
            attributes: self
                .attribute_names()
                .into_iter()
                .filter(|name| !whitelists.attributes.iter().any(|w| w == name))
                .map(str::to_string)
                .collect(),
            event_types: self
                .event_types()
                .into_iter()
                .filter(|name| !whitelists.event_types.iter().any(|w| w == name))
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "[]".to_string())
    }

    /// Human-readable rendering for review messages
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "All contacts (no filters)".to_string();
        }
        self.0
            .iter()
            .enumerate()
            .map(|(idx, group)| {
                let body = group.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n   AND ");
                if idx == 0 {
                    format!(" • {}", body)
                } else {
                    format!("OR\n • {}", body)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.0.iter().flatten()
    }
}

fn unwrap_envelope(value: &Value) -> &Value {
    if let Value::Object(map) = value {
        for key in ENVELOPE_KEYS {
            if let Some(inner) = map.get(key) {
                debug!(%key, "unwrap_envelope: unwrapping");
                return unwrap_envelope(inner);
            }
        }
    }
    value
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
