//! Range and presence checks applied to caller-supplied arguments.

use crate::{Error, Result};

/// Ensures `value` lies within `min..=max`.
///
/// # Errors
///
/// Returns [`Error::OutOfRange`] naming `field` when the value is outside the
/// inclusive bounds. Values are never clamped.
pub fn ensure_in_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<T>
where
    T: Into<i128> + PartialOrd + Copy,
{
    if value < min || value > max {
        return Err(Error::OutOfRange {
            field,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        });
    }
    Ok(value)
}

/// Ensures a string argument is not empty.
///
/// # Errors
///
/// Returns [`Error::Invalid`] when `value` is empty. Whitespace is
/// significant: identifiers are opaque and `" "` is accepted.
pub fn ensure_not_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(Error::invalid(field, "must not be empty"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds_inclusive() {
        assert_eq!(ensure_in_range("ttlSeconds", 1_u64, 1, 86_400).unwrap(), 1);
        assert_eq!(
            ensure_in_range("ttlSeconds", 86_400_u64, 1, 86_400).unwrap(),
            86_400
        );
    }

    #[test]
    fn rejects_out_of_range_without_clamping() {
        let err = ensure_in_range("concurrency", 21_u32, 1, 20).unwrap_err();
        assert_eq!(
            err,
            Error::OutOfRange {
                field: "concurrency",
                value: 21,
                min: 1,
                max: 20,
            }
        );
    }

    #[test]
    fn rejects_only_empty_strings() {
        assert!(ensure_not_empty("key", "").is_err());
        assert_eq!(ensure_not_empty("key", "  ").unwrap(), "  ");
        assert_eq!(ensure_not_empty("key", "user:1").unwrap(), "user:1");
    }
}
