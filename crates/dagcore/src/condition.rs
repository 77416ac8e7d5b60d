//! Minimal edge condition language.
//!
//! Supported forms, tried in this order, first match wins:
//!
//! * `key == literal`
//! * `key != literal`
//! * `key > number`
//! * `key < number`
//!
//! Equality compares the stringified context value (a missing key or JSON
//! `null` stringifies to `null`) against the literal with quotes removed, so
//! `key == null` and `key != null` fall out of the first two forms. Numeric
//! comparisons require a numeric context value and a literal that parses as
//! `f64`. Anything else evaluates to `false`.

use crate::ContextMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { key: String, literal: String },
    NotEquals { key: String, literal: String },
    GreaterThan { key: String, threshold: f64 },
    LessThan { key: String, threshold: f64 },
}

impl Condition {
    /// Parses an expression, `None` if it matches no supported form.
    pub fn parse(expression: &str) -> Option<Self> {
        if expression.contains("==") {
            let (key, literal) = split(expression, "==")?;
            Some(Condition::Equals {
                key,
                literal: unquote(&literal),
            })
        } else if expression.contains("!=") {
            let (key, literal) = split(expression, "!=")?;
            Some(Condition::NotEquals {
                key,
                literal: unquote(&literal),
            })
        } else if expression.contains('>') {
            let (key, literal) = split(expression, ">")?;
            Some(Condition::GreaterThan {
                key,
                threshold: literal.parse().ok()?,
            })
        } else if expression.contains('<') {
            let (key, literal) = split(expression, "<")?;
            Some(Condition::LessThan {
                key,
                threshold: literal.parse().ok()?,
            })
        } else {
            None
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Condition::Equals { key, .. }
            | Condition::NotEquals { key, .. }
            | Condition::GreaterThan { key, .. }
            | Condition::LessThan { key, .. } => key,
        }
    }

    pub fn evaluate(&self, context: &ContextMap) -> bool {
        let actual = context.get(self.key());
        match self {
            Condition::Equals { literal, .. } => stringify(actual) == *literal,
            Condition::NotEquals { literal, .. } => stringify(actual) != *literal,
            Condition::GreaterThan { threshold, .. } => {
                numeric(actual).is_some_and(|value| value > *threshold)
            }
            Condition::LessThan { threshold, .. } => {
                numeric(actual).is_some_and(|value| value < *threshold)
            }
        }
    }
}

/// Evaluates `expression` against `context`. Blank expressions hold.
pub fn evaluate(expression: &str, context: &ContextMap) -> bool {
    if expression.trim().is_empty() {
        return true;
    }
    Condition::parse(expression).is_some_and(|condition| condition.evaluate(context))
}

fn split(expression: &str, operator: &str) -> Option<(String, String)> {
    let (key, literal) = expression.split_once(operator)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), literal.trim().to_string()))
}

fn unquote(literal: &str) -> String {
    literal.replace(['\'', '"'], "")
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}
