//! Parser for the structured result artifact playbooks write.
//!
//! The artifact is a deliberately small `key: value` text format: top-level
//! scalar entries, plus maps nested exactly one level deep (a bare `key:`
//! line followed by indented `key: value` lines). Scripts produce it with
//! plain `printf`, and this parser is the authoritative reader; anything it
//! rejects counts as an execution failure regardless of the exit code.

use thiserror::Error;

/// Value of one top-level result entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultValue {
    /// A scalar entry: `key: value`.
    Scalar(String),
    /// A one-level nested map: `key:` followed by indented entries.
    Map(Vec<(String, String)>),
}

impl ResultValue {
    /// Returns the scalar text, when this entry is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Map(_) => None,
        }
    }

    /// Returns the nested entries, when this entry is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(String, String)]> {
        match self {
            Self::Scalar(_) => None,
            Self::Map(entries) => Some(entries),
        }
    }
}

/// Ordered mapping decoded from a playbook's output artifact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResultDoc {
    entries: Vec<(String, ResultValue)>,
}

impl ResultDoc {
    /// Parses artifact text into an ordered document.
    ///
    /// Blank lines and `#` comments are skipped. When a key appears more
    /// than once the later occurrence wins on lookup, matching what a shell
    /// consumer re-sourcing the file would observe.
    ///
    /// # Errors
    ///
    /// Returns [`ResultParseError`] when the content is empty, a line has no
    /// `key: value` shape, an indented line has no parent map, or nesting
    /// goes deeper than one level.
    pub fn parse(input: &str) -> Result<Self, ResultParseError> {
        let mut entries: Vec<(String, ResultValue)> = Vec::new();

        for (index, raw_line) in input.lines().enumerate() {
            let line_no = index + 1;
            if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
                continue;
            }

            let indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
            let (key, value) = split_entry(raw_line, line_no)?;

            if indented {
                let Some((_, ResultValue::Map(map))) = entries.last_mut() else {
                    return Err(ResultParseError::OrphanedEntry { line: line_no });
                };
                let Some(value) = value else {
                    return Err(ResultParseError::TooDeep { line: line_no });
                };
                map.push((key, value));
            } else if let Some(value) = value {
                entries.push((key, ResultValue::Scalar(value)));
            } else {
                entries.push((key, ResultValue::Map(Vec::new())));
            }
        }

        if entries.is_empty() {
            return Err(ResultParseError::Empty);
        }

        Ok(Self { entries })
    }

    /// Looks up an entry by key; the last occurrence wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ResultValue> {
        self.entries
            .iter()
            .rev()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Looks up a scalar entry by key.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ResultValue::as_scalar)
    }

    /// Looks up a nested map entry by key.
    #[must_use]
    pub fn map(&self, key: &str) -> Option<&[(String, String)]> {
        self.get(key).and_then(ResultValue::as_map)
    }

    /// Iterates entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Returns `true` when the document has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Splits a line into key and optional value.
///
/// Returns `(key, None)` for a bare `key:` line opening a nested map.
fn split_entry(raw_line: &str, line_no: usize) -> Result<(String, Option<String>), ResultParseError> {
    let trimmed = raw_line.trim();
    let Some((key, rest)) = trimmed.split_once(':') else {
        return Err(ResultParseError::Malformed { line: line_no });
    };

    let key = key.trim();
    if key.is_empty() {
        return Err(ResultParseError::Malformed { line: line_no });
    }

    let value = rest.trim();
    if value.is_empty() {
        Ok((key.to_owned(), None))
    } else {
        Ok((key.to_owned(), Some(value.to_owned())))
    }
}

/// Errors raised while parsing a result artifact.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResultParseError {
    /// The artifact exists but contains no entries.
    #[error("result artifact is empty")]
    Empty,
    /// A line does not have the `key: value` shape.
    #[error("malformed entry on line {line}")]
    Malformed {
        /// One-based line number of the offending entry.
        line: usize,
    },
    /// An indented entry appeared without a preceding `key:` map opener.
    #[error("indented entry on line {line} has no parent map")]
    OrphanedEntry {
        /// One-based line number of the offending entry.
        line: usize,
    },
    /// Nesting exceeded the one permitted level.
    #[error("entry on line {line} nests deeper than one level")]
    TooDeep {
        /// One-based line number of the offending entry.
        line: usize,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parse_reads_scalars_and_one_level_maps() {
        let doc = ResultDoc::parse(concat!(
            "status: success\n",
            "distro: ubuntu\n",
            "# probed services follow\n",
            "services:\n",
            "  nginx: enabled\n",
            "  mysql: enabled\n",
            "\n",
            "count: 2\n",
        ))
        .unwrap_or_else(|err| panic!("parse: {err}"));

        assert_eq!(doc.len(), 4);
        assert_eq!(doc.scalar("status"), Some("success"));
        assert_eq!(doc.scalar("distro"), Some("ubuntu"));
        assert_eq!(doc.scalar("count"), Some("2"));
        let services = doc
            .map("services")
            .unwrap_or_else(|| panic!("services should be a map"));
        assert_eq!(
            services,
            [
                (String::from("nginx"), String::from("enabled")),
                (String::from("mysql"), String::from("enabled")),
            ]
        );
    }

    #[test]
    fn parse_keeps_colons_inside_values() {
        let doc = ResultDoc::parse("url: https://example.com:8443/path\n")
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(doc.scalar("url"), Some("https://example.com:8443/path"));
    }

    #[test]
    fn parse_allows_empty_maps() {
        let doc = ResultDoc::parse("status: success\nsites:\n")
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(doc.map("sites"), Some(&[][..]));
    }

    #[test]
    fn later_duplicate_wins_on_lookup() {
        let doc = ResultDoc::parse("status: error\nstatus: success\n")
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(doc.scalar("status"), Some("success"));
    }

    #[rstest]
    #[case("", ResultParseError::Empty)]
    #[case("\n\n# only comments\n", ResultParseError::Empty)]
    #[case("not an entry\n", ResultParseError::Malformed { line: 1 })]
    #[case(": missing key\n", ResultParseError::Malformed { line: 1 })]
    #[case("  orphan: value\n", ResultParseError::OrphanedEntry { line: 1 })]
    #[case("status: success\n  orphan: value\n", ResultParseError::OrphanedEntry { line: 2 })]
    #[case("sites:\n  nested:\n", ResultParseError::TooDeep { line: 2 })]
    fn parse_rejects_malformed_documents(#[case] input: &str, #[case] expected: ResultParseError) {
        let err = ResultDoc::parse(input).expect_err("document must be rejected");
        assert_eq!(err, expected);
    }

    #[test]
    fn iteration_preserves_document_order() {
        let doc = ResultDoc::parse("b: 2\na: 1\n").unwrap_or_else(|err| panic!("parse: {err}"));
        let keys: Vec<&str> = doc.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
