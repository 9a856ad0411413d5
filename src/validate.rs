//! Validation of metric names and values before they are formatted into
//! wire commands.
//!
//! Validation failures are recovered locally by the [`Agent`](crate::Agent):
//! the caller gets `None` back and a substitute metric is recorded in place
//! of the original, so a bad call site shows up on the collector as
//! `agent.invalid_metric` or `agent.invalid_value` rather than vanishing.

/// Marker for a metric name that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidName;

/// Marker for a metric value that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidValue;

/// Validates a metric name, returning it unchanged when acceptable.
///
/// A name is valid when it is non-empty ASCII, starts with a letter, and
/// continues with letters, digits, underscores, or dots. Case-sensitive.
pub(crate) fn metric_name(name: &str) -> Result<&str, InvalidName> {
    let mut chars = name.bytes();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(InvalidName),
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == b'_' || c == b'.') {
            return Err(InvalidName);
        }
    }
    Ok(name)
}

/// Validates a metric value, returning it unchanged when acceptable.
///
/// Only finite values are valid: NaN and the infinities are rejected.
pub(crate) fn metric_value(value: f64) -> Result<f64, InvalidValue> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{metric_name, metric_value, InvalidName, InvalidValue};

    #[test]
    fn accepts_reasonable_names() {
        let names = [
            "a",
            "a.b",
            "hello.world",
            "ThisIsATest.Of.The.Emergency.Broadcast.System.12345",
            "with_underscores.and.dots",
            "Z9",
        ];
        for name in names {
            assert_eq!(metric_name(name), Ok(name));
        }
    }

    #[test]
    fn rejects_malformed_names() {
        let names = [
            "",
            " %% .!#@$%^&*",
            "9starts.with.digit",
            "_leading_underscore",
            ".leading.dot",
            "has space",
            "has-dash",
            "unicode.héllo",
            "trailing.newline\n",
        ];
        for name in names {
            assert_eq!(metric_name(name), Err(InvalidName), "accepted {name:?}");
        }
    }

    #[test]
    fn accepts_reasonable_values() {
        for value in [-333.333, -2.2, -1.0, 0.0, 1.0, 2.2, 333.333, f64::EPSILON] {
            assert_eq!(metric_value(value), Ok(value));
        }
    }

    #[test]
    fn rejects_non_finite_values() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(metric_value(value), Err(InvalidValue));
        }
    }

    proptest! {
        #[test]
        fn valid_shape_always_accepted(name in "[A-Za-z][A-Za-z0-9_.]{0,40}") {
            prop_assert_eq!(metric_name(&name), Ok(name.as_str()));
        }

        #[test]
        fn finite_values_always_accepted(value in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            prop_assert_eq!(metric_value(value), Ok(value));
        }
    }
}
