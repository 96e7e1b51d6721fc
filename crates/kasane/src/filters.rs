//! The built-in filter set.
//!
//! Filters are a closed enum validated at parse time, so applying one can
//! only fail on a value of the wrong type.

use crate::html_escape;
use crate::value::Value;
use kasane_ast::{Filter, FilterCall};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub(crate) enum FilterError {
    #[error("filter '{filter}' cannot be applied to {found}")]
    Unsupported {
        filter: &'static str,
        found: &'static str,
    },

    #[error("filter '{filter}' cannot render {found} items")]
    UnrenderableItem {
        filter: &'static str,
        found: &'static str,
    },
}

/// A value moving through a filter chain.
#[derive(Debug, Clone)]
pub(crate) struct Evaluated<'a> {
    pub value: Cow<'a, Value>,
    /// Set by `safe` and `escape`: the output is not escaped again.
    pub safe: bool,
}

impl<'a> Evaluated<'a> {
    pub fn new(value: Cow<'a, Value>) -> Self {
        Self { value, safe: false }
    }

    fn owned(value: Value, safe: bool) -> Self {
        Self {
            value: Cow::Owned(value),
            safe,
        }
    }
}

/// Apply one filter call.
pub(crate) fn apply<'a>(
    call: &FilterCall,
    input: Evaluated<'a>,
) -> Result<Evaluated<'a>, FilterError> {
    let filter = call.filter;
    let safe = input.safe;
    let unsupported = |value: &Value| FilterError::Unsupported {
        filter: filter.name(),
        found: value.type_name(),
    };

    match filter {
        Filter::Safe => Ok(Evaluated {
            value: input.value,
            safe: true,
        }),
        Filter::Escape => {
            if safe {
                return Ok(input);
            }
            let text = input
                .value
                .stringify()
                .ok_or_else(|| unsupported(&input.value))?;
            let escaped = html_escape::escape(&text).into_owned();
            Ok(Evaluated::owned(Value::String(escaped), true))
        }
        Filter::Upper => map_text(input, unsupported, |s| s.to_uppercase()),
        Filter::Lower => map_text(input, unsupported, |s| s.to_lowercase()),
        Filter::Capitalize => map_text(input, unsupported, capitalize),
        Filter::Trim => map_text(input, unsupported, |s| s.trim().to_string()),
        Filter::Length => {
            let length = match input.value.as_ref() {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(unsupported(other)),
            };
            Ok(Evaluated::owned(Value::Integer(length as i64), safe))
        }
        Filter::First | Filter::Last => {
            let first = filter == Filter::First;
            let picked = match input.value.as_ref() {
                Value::Array(items) => {
                    let item = if first { items.first() } else { items.last() };
                    item.cloned().unwrap_or(Value::Null)
                }
                Value::String(s) => {
                    let c = if first { s.chars().next() } else { s.chars().next_back() };
                    c.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)
                }
                Value::Null => Value::Null,
                other => return Err(unsupported(other)),
            };
            Ok(Evaluated::owned(picked, safe))
        }
        Filter::Reverse => {
            let reversed = match input.value.into_owned() {
                Value::Array(mut items) => {
                    items.reverse();
                    Value::Array(items)
                }
                Value::String(s) => Value::String(s.chars().rev().collect()),
                Value::Null => Value::Null,
                other => return Err(unsupported(&other)),
            };
            Ok(Evaluated::owned(reversed, safe))
        }
        Filter::Default => {
            if input.value.is_null() {
                let fallback = call.arg.clone().unwrap_or_default();
                Ok(Evaluated::owned(Value::String(fallback), safe))
            } else {
                Ok(input)
            }
        }
        Filter::Join => {
            let separator = call.arg.as_deref().unwrap_or_default();
            let joined = match input.value.as_ref() {
                Value::Array(items) => {
                    let mut parts = Vec::with_capacity(items.len());
                    for item in items {
                        let text = item.stringify().ok_or(FilterError::UnrenderableItem {
                            filter: filter.name(),
                            found: item.type_name(),
                        })?;
                        parts.push(text);
                    }
                    parts.join(separator)
                }
                Value::Null => String::new(),
                other => return Err(unsupported(other)),
            };
            Ok(Evaluated::owned(Value::String(joined), safe))
        }
    }
}

/// Apply a string transformation to a scalar; null passes through.
fn map_text<'a>(
    input: Evaluated<'a>,
    unsupported: impl Fn(&Value) -> FilterError,
    f: impl Fn(&str) -> String,
) -> Result<Evaluated<'a>, FilterError> {
    if input.value.is_null() {
        return Ok(input);
    }
    let text = input
        .value
        .stringify()
        .ok_or_else(|| unsupported(&input.value))?;
    let mapped = f(&text);
    Ok(Evaluated::owned(Value::String(mapped), input.safe))
}

/// Uppercase the first character, lowercase the rest.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasane_ast::Location;
    use serde_json::json;

    fn call(filter: Filter, arg: Option<&str>) -> FilterCall {
        FilterCall {
            filter,
            arg: arg.map(str::to_string),
            location: Location::new(1, 1, 0),
        }
    }

    fn run(filter: Filter, arg: Option<&str>, value: serde_json::Value) -> Result<Value, FilterError> {
        let input = Evaluated::new(Cow::Owned(Value::from_json(value)));
        apply(&call(filter, arg), input).map(|out| out.value.into_owned())
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(run(Filter::Upper, None, json!("abc")).unwrap(), Value::from("ABC"));
        assert_eq!(run(Filter::Lower, None, json!("ÀBC")).unwrap(), Value::from("àbc"));
        assert_eq!(
            run(Filter::Capitalize, None, json!("hELLO world")).unwrap(),
            Value::from("Hello world")
        );
        assert_eq!(run(Filter::Trim, None, json!("  x \n")).unwrap(), Value::from("x"));
        assert_eq!(run(Filter::Upper, None, json!(7)).unwrap(), Value::from("7"));
        assert_eq!(run(Filter::Upper, None, json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn test_string_filter_rejects_collections() {
        assert_eq!(
            run(Filter::Upper, None, json!([1])),
            Err(FilterError::Unsupported {
                filter: "upper",
                found: "array"
            })
        );
    }

    #[test]
    fn test_length() {
        assert_eq!(run(Filter::Length, None, json!("héllo")).unwrap(), Value::Integer(5));
        assert_eq!(run(Filter::Length, None, json!([1, 2])).unwrap(), Value::Integer(2));
        assert_eq!(run(Filter::Length, None, json!({"a": 1})).unwrap(), Value::Integer(1));
        assert_eq!(run(Filter::Length, None, json!(null)).unwrap(), Value::Integer(0));
        assert!(run(Filter::Length, None, json!(true)).is_err());
    }

    #[test]
    fn test_first_last_reverse() {
        assert_eq!(run(Filter::First, None, json!([1, 2, 3])).unwrap(), Value::Integer(1));
        assert_eq!(run(Filter::Last, None, json!([1, 2, 3])).unwrap(), Value::Integer(3));
        assert_eq!(run(Filter::First, None, json!([])).unwrap(), Value::Null);
        assert_eq!(run(Filter::Last, None, json!("abc")).unwrap(), Value::from("c"));
        assert_eq!(
            run(Filter::Reverse, None, json!([1, 2])).unwrap(),
            Value::from_json(json!([2, 1]))
        );
        assert_eq!(run(Filter::Reverse, None, json!("abc")).unwrap(), Value::from("cba"));
    }

    #[test]
    fn test_default_only_replaces_null() {
        assert_eq!(
            run(Filter::Default, Some("none"), json!(null)).unwrap(),
            Value::from("none")
        );
        assert_eq!(run(Filter::Default, Some("none"), json!("")).unwrap(), Value::from(""));
        assert_eq!(run(Filter::Default, Some("none"), json!(0)).unwrap(), Value::Integer(0));
    }

    #[test]
    fn test_join() {
        assert_eq!(
            run(Filter::Join, Some(", "), json!(["a", 1, true])).unwrap(),
            Value::from("a, 1, true")
        );
        assert_eq!(
            run(Filter::Join, Some(","), json!([[1]])),
            Err(FilterError::UnrenderableItem {
                filter: "join",
                found: "array"
            })
        );
    }

    #[test]
    fn test_safe_and_escape_flags() {
        let input = Evaluated::new(Cow::Owned(Value::from("<b>")));
        let out = apply(&call(Filter::Escape, None), input).unwrap();
        assert!(out.safe);
        assert_eq!(out.value.as_ref(), &Value::from("&lt;b&gt;"));

        // Escaping a value already marked safe leaves it alone
        let input = Evaluated::new(Cow::Owned(Value::from("<b>")));
        let safe = apply(&call(Filter::Safe, None), input).unwrap();
        let out = apply(&call(Filter::Escape, None), safe).unwrap();
        assert_eq!(out.value.as_ref(), &Value::from("<b>"));
    }
}
