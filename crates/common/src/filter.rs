//! Recording filters
//!
//! Callers select recordings either with a closure or with a small
//! declarative expression:
//!
//! ```text
//! status=onDisk && metadata.test.result!=passed && runtime="chromium"
//! ```
//!
//! Clauses are `field=value` or `field!=value` joined by `&&`. Fields are
//! `id`, `status`, `runtime`, `buildId`, `server`, `remoteId`, `path` and
//! dotted `metadata.` paths. A field that is absent never equals anything.
//! Values are bare words or double-quoted strings; inside quotes `&&`, `=`
//! and `!=` are literal and `\"` escapes a quote.

use crate::types::Recording;
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Field a clause compares against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Id,
    Status,
    Runtime,
    BuildId,
    Server,
    RemoteId,
    Path,
    Metadata(Vec<String>),
}

impl Field {
    fn parse(name: &str) -> Result<Self> {
        let field = match name {
            "id" => Field::Id,
            "status" => Field::Status,
            "runtime" => Field::Runtime,
            "buildId" => Field::BuildId,
            "server" => Field::Server,
            "remoteId" => Field::RemoteId,
            "path" => Field::Path,
            _ => {
                let path = name
                    .strip_prefix("metadata.")
                    .ok_or_else(|| Error::InvalidFilter(format!("unknown field '{}'", name)))?;
                let keys: Vec<String> = path.split('.').map(str::to_string).collect();
                if keys.iter().any(String::is_empty) {
                    return Err(Error::InvalidFilter(format!("bad metadata path '{}'", name)));
                }
                Field::Metadata(keys)
            }
        };
        Ok(field)
    }

    fn resolve(&self, recording: &Recording) -> Option<String> {
        match self {
            Field::Id => Some(recording.id.clone()),
            Field::Status => Some(recording.status.to_string()),
            Field::Runtime => Some(recording.runtime.clone()),
            Field::BuildId => Some(recording.build_id.clone()),
            Field::Server => recording.server.clone(),
            Field::RemoteId => recording.remote_id.clone(),
            Field::Path => recording.path.as_ref().map(|p| p.display().to_string()),
            Field::Metadata(keys) => {
                let (first, rest) = keys.split_first()?;
                let mut value = recording.metadata.get(first)?;
                for key in rest {
                    value = value.get(key)?;
                }
                match value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                }
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Id => write!(f, "id"),
            Field::Status => write!(f, "status"),
            Field::Runtime => write!(f, "runtime"),
            Field::BuildId => write!(f, "buildId"),
            Field::Server => write!(f, "server"),
            Field::RemoteId => write!(f, "remoteId"),
            Field::Path => write!(f, "path"),
            Field::Metadata(keys) => write!(f, "metadata.{}", keys.join(".")),
        }
    }
}

/// One `field op value` comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub field: Field,
    pub negated: bool,
    pub value: String,
}

impl Clause {
    pub fn matches(&self, recording: &Recording) -> bool {
        let equal = self
            .field
            .resolve(recording)
            .map_or(false, |actual| actual == self.value);
        equal != self.negated
    }
}

/// Conjunction of clauses. The empty expression matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
    pub clauses: Vec<Clause>,
}

impl FilterExpr {
    pub fn matches(&self, recording: &Recording) -> bool {
        self.clauses.iter().all(|clause| clause.matches(recording))
    }
}

impl FromStr for FilterExpr {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let clauses = split_unquoted(input, "&&")?
            .into_iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }
}

/// Split on `separator`, ignoring occurrences inside double-quoted strings.
fn split_unquoted<'a>(input: &'a str, separator: &str) -> Result<Vec<&'a str>> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_quotes {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_quotes = false;
            }
        } else if b == b'"' {
            in_quotes = true;
        } else if bytes[i..].starts_with(separator.as_bytes()) {
            parts.push(&input[start..i]);
            i += separator.len();
            start = i;
            continue;
        }
        i += 1;
    }

    if in_quotes {
        return Err(Error::InvalidFilter(format!("unterminated string in '{}'", input.trim())));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn parse_clause(text: &str) -> Result<Clause> {
    let text = text.trim();

    // field names never contain quotes, so the operator is the first '='
    // ahead of any quoted value
    let (name, raw_value) = match text.find(['=', '"']) {
        Some(i) if text.as_bytes()[i] == b'=' => (&text[..i], &text[i + 1..]),
        _ => return Err(Error::InvalidFilter(format!("expected '=' or '!=' in '{}'", text))),
    };
    let (name, negated) = match name.strip_suffix('!') {
        Some(name) => (name, true),
        None => (name, false),
    };

    let field = Field::parse(name.trim())?;
    let value = parse_value(raw_value.trim())?;
    Ok(Clause { field, negated, value })
}

fn parse_value(raw: &str) -> Result<String> {
    if let Some(quoted) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(next) => value.push(next),
                    None => break,
                },
                '"' => {
                    let rest = chars.as_str();
                    if !rest.trim().is_empty() {
                        return Err(Error::InvalidFilter(format!(
                            "unexpected '{}' after quoted value",
                            rest.trim()
                        )));
                    }
                    return Ok(value);
                }
                other => value.push(other),
            }
        }
        return Err(Error::InvalidFilter(format!("unterminated string {}", raw)));
    }
    if raw.is_empty() || raw.contains(char::is_whitespace) || raw.contains(['"', '=']) {
        return Err(Error::InvalidFilter(format!(
            "value '{}' must be a single word or a quoted string",
            raw
        )));
    }
    Ok(raw.to_string())
}

/// Selection criterion for registry listings
pub enum RecordingPredicate {
    All,
    Expr(FilterExpr),
    Func(Box<dyn Fn(&Recording) -> bool + Send + Sync>),
}

impl RecordingPredicate {
    pub fn func(f: impl Fn(&Recording) -> bool + Send + Sync + 'static) -> Self {
        RecordingPredicate::Func(Box::new(f))
    }

    /// Parse an optional filter string; `None` selects everything.
    pub fn parse(filter: Option<&str>) -> Result<Self> {
        match filter {
            Some(text) => Ok(RecordingPredicate::Expr(text.parse()?)),
            None => Ok(RecordingPredicate::All),
        }
    }

    pub fn matches(&self, recording: &Recording) -> bool {
        match self {
            RecordingPredicate::All => true,
            RecordingPredicate::Expr(expr) => expr.matches(recording),
            RecordingPredicate::Func(f) => f(recording),
        }
    }
}

impl Default for RecordingPredicate {
    fn default() -> Self {
        RecordingPredicate::All
    }
}

impl fmt::Debug for RecordingPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingPredicate::All => write!(f, "All"),
            RecordingPredicate::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            RecordingPredicate::Func(_) => write!(f, "Func(..)"),
        }
    }
}
