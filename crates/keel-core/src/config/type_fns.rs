//! Type-coercion functions applied to raw matched values.
//!
//! A [`TypeFn`] is registered per key on the store and applied on every read
//! of that key, whichever tier the raw value came from.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::AppError;
use crate::result::AppResult;

/// Coerces a raw value into its typed form.
pub type TypeFn = Arc<dyn Fn(&Value) -> AppResult<Value> + Send + Sync>;

/// Wraps a closure as a [`TypeFn`].
pub fn from_fn<F>(f: F) -> TypeFn
where
    F: Fn(&Value) -> AppResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Extended boolean parsing.
///
/// Booleans pass through. Null, empty strings, zero and empty collections are
/// false. Anything else is true when its lower-cased text contains `1`, `t`
/// or `y`, so `on` reads as false.
pub fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) if s.is_empty() => false,
        Value::Array(a) if a.is_empty() => false,
        Value::Object(o) if o.is_empty() => false,
        other => {
            let text = text_of(other).to_lowercase();
            text.contains('1') || text.contains('t') || text.contains('y')
        }
    }
}

/// Extended comma-separated-values parsing.
///
/// Arrays are accepted as already split; empty parts are dropped.
pub fn parse_csv(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|part| !part.is_empty())
            .map(|part| part.trim().to_string())
            .collect(),
        other => text_of(other)
            .split(',')
            .filter(|part| !part.is_empty())
            .map(|part| part.trim().to_string())
            .collect(),
    }
}

/// Like [`parse_csv`] but de-duplicated.
pub fn parse_csv_set(value: &Value) -> BTreeSet<String> {
    parse_csv(value).into_iter().collect()
}

/// Boolean coercion.
pub fn boolean() -> TypeFn {
    from_fn(|v| Ok(Value::Bool(parse_bool(v))))
}

/// CSV list coercion.
pub fn csv() -> TypeFn {
    from_fn(|v| Ok(Value::from(parse_csv(v))))
}

/// CSV set coercion (sorted, unique).
pub fn csv_set() -> TypeFn {
    from_fn(|v| Ok(Value::from(parse_csv_set(v).into_iter().collect::<Vec<_>>())))
}

/// Integer coercion.
pub fn integer() -> TypeFn {
    from_fn(|v| match v {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(v.clone()),
        other => text_of(other)
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| AppError::validation(format!("invalid integer {other}: {e}"))),
    })
}

/// Floating point coercion.
pub fn float() -> TypeFn {
    from_fn(|v| match v {
        Value::Number(n) => n
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| AppError::validation(format!("invalid float {v}"))),
        other => text_of(other)
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|e| AppError::validation(format!("invalid float {other}: {e}"))),
    })
}

/// String coercion.
pub fn string() -> TypeFn {
    from_fn(|v| Ok(Value::String(text_of(v))))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
