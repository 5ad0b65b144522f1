//! Parsing of per-subscription options.
//!
//! Options arrive as an untyped map because they come straight out of the
//! configuration file. Booleans may be given as `true` or as the string
//! `"true"` in any case.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::DispatchError;

pub type Options = Map<String, Value>;

/// Reads a boolean option, `false` when absent.
pub fn bool_option(options: &Options, namespace: &str, key: &str) -> Result<bool, DispatchError> {
    match options.get(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => Ok(s.eq_ignore_ascii_case("true")),
        Some(_) => Err(invalid(namespace, key, "boolean or string")),
    }
}

/// Compiles a regex option. Absent and empty patterns mean "match all".
pub fn regex_option(
    options: &Options,
    namespace: &str,
    key: &str,
) -> Result<Option<Regex>, DispatchError> {
    let pattern = match options.get(key) {
        None => return Ok(None),
        Some(Value::String(s)) => s,
        Some(_) => return Err(invalid(namespace, key, "string")),
    };
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| DispatchError::InvalidFilter {
            option: key.to_string(),
            pattern: pattern.clone(),
            source,
        })
}

/// Reads a list-of-strings option. A bare string is a list of one.
pub fn string_list_option(
    options: &Options,
    namespace: &str,
    key: &str,
) -> Result<Option<Vec<String>>, DispatchError> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                _ => Err(invalid(namespace, key, "string list")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(namespace, key, "string list")),
    }
}

/// Reads a duration option such as `"5m"`, `"1h30m"` or `"250ms"`. A bare
/// number is taken as seconds. Zero is rejected.
pub fn duration_option(
    options: &Options,
    namespace: &str,
    key: &str,
) -> Result<Option<Duration>, DispatchError> {
    let parsed = match options.get(key) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Duration::from_secs),
        Some(Value::String(s)) => parse_duration(s),
        Some(_) => None,
    };
    match parsed {
        Some(d) if !d.is_zero() => Ok(Some(d)),
        _ => Err(invalid(namespace, key, "a positive duration such as 30s or 5m")),
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3_600)?),
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(part)?;
    }
    Some(total)
}

/// Reads the `include` option against the legal values for `namespace`.
///
/// Returns `None` when no filtering should happen: either the option is
/// absent or it names every legal value. An empty list or an unknown value
/// is a configuration error.
pub fn include_filter(
    options: &Options,
    namespace: &str,
    legal: &[&str],
) -> Result<Option<HashSet<String>>, DispatchError> {
    let Some(values) = string_list_option(options, namespace, "include")? else {
        return Ok(None);
    };
    if values.is_empty() {
        return Err(DispatchError::EmptyInclude {
            namespace: namespace.to_string(),
        });
    }

    let include: HashSet<String> = values.into_iter().collect();
    if let Some(unknown) = include.iter().find(|v| !legal.contains(&v.as_str())) {
        return Err(DispatchError::InvalidInclude {
            namespace: namespace.to_string(),
            value: unknown.clone(),
            valid: legal.join(", "),
        });
    }

    if legal.iter().all(|v| include.contains(*v)) {
        return Ok(None);
    }
    Ok(Some(include))
}

fn invalid(namespace: &str, key: &str, expected: &'static str) -> DispatchError {
    DispatchError::InvalidOption {
        namespace: namespace.to_string(),
        option: key.to_string(),
        expected,
    }
}
