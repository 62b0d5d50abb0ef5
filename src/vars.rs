//! Typed playbook variables and their environment-variable marshaling.
//!
//! Remote scripts receive parameters exclusively through shell environment
//! variables, so the value space is deliberately narrow: scalars, booleans,
//! and one level of list-of-flat-records. Booleans serialize as the literal
//! strings `true`/`false` because the remote consumer is a shell script;
//! record lists serialize to a single JSON value the script decodes with a
//! standard text tool. Anything deeper is rejected here, before any network
//! call is made.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use shell_escape::unix::escape;
use thiserror::Error;

/// Scalar value allowed inside a record field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean flag, rendered as the literal `true`/`false`.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Free-form text.
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

/// A flat record: named scalar fields, no further nesting.
pub type Record = BTreeMap<String, Scalar>;

/// Value attached to one playbook variable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptValue {
    /// Free-form text, exported verbatim (shell-escaped).
    Text(String),
    /// Integer, exported in decimal.
    Int(i64),
    /// Boolean, exported as the literal `true`/`false`.
    Bool(bool),
    /// List of flat records, exported as one JSON document.
    Records(Vec<Record>),
}

impl ScriptValue {
    /// Converts a loosely typed JSON value into a marshalable one.
    ///
    /// Accepted shapes: booleans, integers, strings, and arrays of objects
    /// whose fields are all scalars. `name` is used for error context only.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::Unrepresentable`] for floats, nulls, bare
    /// objects, nested arrays, and records containing non-scalar fields.
    pub fn try_from_json(name: &str, value: &serde_json::Value) -> Result<Self, MarshalError> {
        match value {
            serde_json::Value::Bool(flag) => Ok(Self::Bool(*flag)),
            serde_json::Value::Number(number) => {
                number
                    .as_i64()
                    .map(Self::Int)
                    .ok_or_else(|| MarshalError::Unrepresentable {
                        name: name.to_owned(),
                        detail: format!("non-integer number {number}"),
                    })
            }
            serde_json::Value::String(text) => Ok(Self::Text(text.clone())),
            serde_json::Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    records.push(record_from_json(name, index, item)?);
                }
                Ok(Self::Records(records))
            }
            serde_json::Value::Null | serde_json::Value::Object(_) => {
                Err(MarshalError::Unrepresentable {
                    name: name.to_owned(),
                    detail: String::from(
                        "only scalars, booleans, and lists of flat records are supported",
                    ),
                })
            }
        }
    }
}

fn record_from_json(
    name: &str,
    index: usize,
    value: &serde_json::Value,
) -> Result<Record, MarshalError> {
    let serde_json::Value::Object(fields) = value else {
        return Err(MarshalError::Unrepresentable {
            name: name.to_owned(),
            detail: format!("list entry {index} is not a record"),
        });
    };

    let mut record = Record::new();
    for (key, field) in fields {
        let scalar = match field {
            serde_json::Value::Bool(flag) => Scalar::Bool(*flag),
            serde_json::Value::Number(number) => {
                number
                    .as_i64()
                    .map(Scalar::Int)
                    .ok_or_else(|| MarshalError::Unrepresentable {
                        name: name.to_owned(),
                        detail: format!("non-integer number in record field {key}"),
                    })?
            }
            serde_json::Value::String(text) => Scalar::Text(text.clone()),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => {
                return Err(MarshalError::Unrepresentable {
                    name: name.to_owned(),
                    detail: format!("record field {key} nests deeper than a scalar"),
                });
            }
        };
        record.insert(key.clone(), scalar);
    }
    Ok(record)
}

/// Ordered bag of variables for one playbook invocation.
///
/// Names are normalised to upper-case environment-variable form at insert
/// time; setting a name twice replaces the earlier value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VarBag {
    entries: Vec<(String, ScriptValue)>,
}

impl VarBag {
    /// Creates an empty bag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets a variable, validating and upper-casing its name.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] when the name is empty, starts
    /// with a digit, or contains characters outside `[A-Za-z0-9_]`.
    pub fn set(&mut self, name: &str, value: ScriptValue) -> Result<(), MarshalError> {
        let env_name = env_var_name(name)?;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| *existing == env_name)
        {
            entry.1 = value;
        } else {
            self.entries.push((env_name, value));
        }
        Ok(())
    }

    /// Sets a text variable.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] for invalid names.
    pub fn set_text(&mut self, name: &str, value: impl Into<String>) -> Result<(), MarshalError> {
        self.set(name, ScriptValue::Text(value.into()))
    }

    /// Sets an integer variable.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] for invalid names.
    pub fn set_int(&mut self, name: &str, value: i64) -> Result<(), MarshalError> {
        self.set(name, ScriptValue::Int(value))
    }

    /// Sets a boolean flag.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] for invalid names.
    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<(), MarshalError> {
        self.set(name, ScriptValue::Bool(value))
    }

    /// Sets a record-list variable.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] for invalid names.
    pub fn set_records(&mut self, name: &str, records: Vec<Record>) -> Result<(), MarshalError> {
        self.set(name, ScriptValue::Records(records))
    }

    /// Sets a variable from a loosely typed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InvalidName`] for invalid names and
    /// [`MarshalError::Unrepresentable`] for unsupported value shapes.
    pub fn set_json(&mut self, name: &str, value: &serde_json::Value) -> Result<(), MarshalError> {
        let converted = ScriptValue::try_from_json(name, value)?;
        self.set(name, converted)
    }

    /// Returns `true` when the bag holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of variables in the bag.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScriptValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Looks up a variable by its normalised name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        let wanted = name.to_uppercase();
        self.entries
            .iter()
            .find(|(existing, _)| *existing == wanted)
            .map(|(_, value)| value)
    }
}

fn env_var_name(name: &str) -> Result<String, MarshalError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed.chars().next().is_some_and(|ch| ch.is_ascii_digit())
        || !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if invalid {
        return Err(MarshalError::InvalidName {
            name: name.to_owned(),
        });
    }
    Ok(trimmed.to_uppercase())
}

/// Renders the bag as shell `export` assignments, one per line.
///
/// Every value is shell-escaped; record lists are serialised to a single
/// JSON document under their variable name.
///
/// # Errors
///
/// Returns [`MarshalError::Unrepresentable`] when a record list fails to
/// serialise.
pub fn marshal(bag: &VarBag) -> Result<String, MarshalError> {
    let mut lines = Vec::with_capacity(bag.len());
    for (name, value) in bag.iter() {
        lines.push(export_line(name, value)?);
    }
    Ok(lines.join("\n"))
}

fn export_line(name: &str, value: &ScriptValue) -> Result<String, MarshalError> {
    let rendered = match value {
        ScriptValue::Text(text) => text.clone(),
        ScriptValue::Int(number) => number.to_string(),
        ScriptValue::Bool(flag) => flag.to_string(),
        ScriptValue::Records(records) => {
            serde_json::to_string(records).map_err(|err| MarshalError::Unrepresentable {
                name: name.to_owned(),
                detail: err.to_string(),
            })?
        }
    };
    let escaped = escape(rendered.into());
    Ok(format!("export {name}={escaped}"))
}

/// Errors raised while building or marshaling playbook variables.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MarshalError {
    /// Raised when a variable name is not a valid environment variable name.
    #[error("invalid variable name {name:?}: names must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName {
        /// Name as supplied by the caller.
        name: String,
    },
    /// Raised when a value falls outside the supported shapes.
    #[error("variable {name} cannot be marshaled: {detail}")]
    Unrepresentable {
        /// Variable the value was destined for.
        name: String,
        /// Human-readable description of the unsupported shape.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    /// Reverses the single-quote escaping `shell-escape` applies, mirroring
    /// what the remote shell does when it evaluates the assignment.
    fn shell_unquote(value: &str) -> String {
        if !value.starts_with('\'') {
            return value.to_owned();
        }
        let mut out = String::new();
        let mut rest = value;
        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix("'\\''") {
                out.push('\'');
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('\'') {
                rest = stripped;
            } else if let Some((ch, tail)) = rest
                .char_indices()
                .next()
                .map(|(_, ch)| (ch, rest.get(ch.len_utf8()..).unwrap_or("")))
            {
                out.push(ch);
                rest = tail;
            }
        }
        out
    }

    fn exported(bag: &VarBag) -> Vec<(String, String)> {
        let rendered = marshal(bag).unwrap_or_else(|err| panic!("marshal: {err}"));
        rendered
            .lines()
            .map(|line| {
                let assignment = line
                    .strip_prefix("export ")
                    .unwrap_or_else(|| panic!("line missing export prefix: {line}"));
                let (name, value) = assignment
                    .split_once('=')
                    .unwrap_or_else(|| panic!("line missing assignment: {line}"));
                (name.to_owned(), shell_unquote(value))
            })
            .collect()
    }

    #[test]
    fn marshal_spec_scenario_produces_expected_environment() {
        let mut bag = VarBag::new();
        bag.set_int("count", 3)
            .unwrap_or_else(|err| panic!("set count: {err}"));
        bag.set_bool("enabled", true)
            .unwrap_or_else(|err| panic!("set enabled: {err}"));
        bag.set_json(
            "jobs",
            &json!([{"script": "a.sh", "schedule": "* * * * *"}]),
        )
        .unwrap_or_else(|err| panic!("set jobs: {err}"));

        let vars = exported(&bag);
        assert_eq!(vars.len(), 3);
        assert!(vars.contains(&(String::from("COUNT"), String::from("3"))));
        assert!(vars.contains(&(String::from("ENABLED"), String::from("true"))));

        let jobs = vars
            .iter()
            .find(|(name, _)| name == "JOBS")
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| panic!("JOBS variable missing"));
        let decoded: Vec<Record> = serde_json::from_str(&jobs)
            .unwrap_or_else(|err| panic!("JOBS should decode as records: {err}"));
        assert_eq!(decoded.len(), 1);
        let job = decoded
            .first()
            .unwrap_or_else(|| panic!("expected one job record"));
        assert_eq!(job.get("script"), Some(&Scalar::Text(String::from("a.sh"))));
        assert_eq!(
            job.get("schedule"),
            Some(&Scalar::Text(String::from("* * * * *")))
        );
    }

    #[rstest]
    #[case(ScriptValue::Text(String::from("plain")), "plain")]
    #[case(ScriptValue::Text(String::from("with spaces")), "with spaces")]
    #[case(ScriptValue::Text(String::from("it's quoted")), "it's quoted")]
    #[case(ScriptValue::Int(-42), "-42")]
    #[case(ScriptValue::Bool(false), "false")]
    fn marshal_round_trips_scalars(#[case] value: ScriptValue, #[case] expected: &str) {
        let mut bag = VarBag::new();
        bag.set("value", value)
            .unwrap_or_else(|err| panic!("set: {err}"));

        let vars = exported(&bag);
        assert_eq!(vars, vec![(String::from("VALUE"), expected.to_owned())]);
    }

    #[test]
    fn marshal_round_trips_record_lists() {
        let records = vec![Record::from([
            (String::from("name"), Scalar::Text(String::from("queue"))),
            (String::from("workers"), Scalar::Int(4)),
            (String::from("enabled"), Scalar::Bool(true)),
        ])];
        let mut bag = VarBag::new();
        bag.set_records("processes", records.clone())
            .unwrap_or_else(|err| panic!("set records: {err}"));

        let vars = exported(&bag);
        let (_, encoded) = vars
            .first()
            .unwrap_or_else(|| panic!("expected one variable"));
        let decoded: Vec<Record> = serde_json::from_str(encoded)
            .unwrap_or_else(|err| panic!("records should decode: {err}"));
        assert_eq!(decoded, records);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("1count")]
    #[case("with-dash")]
    #[case("with space")]
    #[case("pa$h")]
    fn set_rejects_invalid_names(#[case] name: &str) {
        let mut bag = VarBag::new();
        let err = bag
            .set_text(name, "value")
            .expect_err("invalid name must be rejected");
        assert!(matches!(err, MarshalError::InvalidName { .. }));
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut bag = VarBag::new();
        bag.set_int("port", 80)
            .unwrap_or_else(|err| panic!("set: {err}"));
        bag.set_int("PORT", 8080)
            .unwrap_or_else(|err| panic!("set: {err}"));

        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("port"), Some(&ScriptValue::Int(8080)));
    }

    #[rstest]
    #[case(json!({"nested": "record"}))]
    #[case(json!(null))]
    #[case(json!(1.5))]
    #[case(json!([{"jobs": {"deep": true}}]))]
    #[case(json!([["not", "a", "record"]]))]
    #[case(json!([{"list": [1, 2]}]))]
    fn set_json_rejects_unrepresentable_shapes(#[case] value: serde_json::Value) {
        let mut bag = VarBag::new();
        let err = bag
            .set_json("payload", &value)
            .expect_err("unsupported shape must be rejected before any network call");
        assert!(
            matches!(err, MarshalError::Unrepresentable { ref name, .. } if name == "payload"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn marshal_escapes_shell_metacharacters() {
        let mut bag = VarBag::new();
        bag.set_text("message", "payload; rm -rf /")
            .unwrap_or_else(|err| panic!("set: {err}"));

        let rendered = marshal(&bag).unwrap_or_else(|err| panic!("marshal: {err}"));
        assert_eq!(rendered, "export MESSAGE='payload; rm -rf /'");
    }
}
