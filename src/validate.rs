//! Field checks shared by the book and reader operations.
//!
//! Violations are collected in input order so a caller gets every problem
//! with a submission in one response instead of fixing them one at a time.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use crate::error::OpError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Violations {
    messages: Vec<String>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Required text: must be present and at most `max` characters.
    pub fn required(&mut self, field: &str, value: Option<&str>, max: usize) {
        match value {
            Some(v) if char_len(v) <= max => {}
            _ => self.push(format!("{field} must not be empty or longer than {max} characters")),
        }
    }

    /// Optional text: only checked when present.
    pub fn optional(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(v) = value {
            if char_len(v) > max {
                self.push(format!("{field} must not be longer than {max} characters"));
            }
        }
    }

    pub fn date(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !is_valid_date(v) {
                self.push(format!("{field} must be a calendar date formatted YYYY-MM-DD"));
            }
        }
    }

    /// Positive count that must be supplied. Returns the parsed value when valid.
    pub fn required_positive(&mut self, field: &str, value: Option<&str>) -> Option<i64> {
        match value {
            None => {
                self.push(format!("{field} must not be empty"));
                None
            }
            Some(v) => self.optional_positive(field, Some(v)),
        }
    }

    pub fn optional_positive(&mut self, field: &str, value: Option<&str>) -> Option<i64> {
        let v = value?;
        let parsed = parse_positive(v);
        if parsed.is_none() {
            self.push(format!("{field} must be a positive integer"));
        }
        parsed
    }

    pub fn into_result<R>(self) -> Result<(), OpError<R>> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(OpError::Invalid(self))
        }
    }
}

impl std::fmt::Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.messages.join("; "))
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Accepts `YYYY-MM-DD` only when it names a real calendar day: the parsed
/// date has to format back to exactly the input.
pub fn is_valid_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    if !bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
    {
        return false;
    }

    let (Ok(year), Ok(month), Ok(day)) = (
        s[0..4].parse::<i32>(),
        s[5..7].parse::<u32>(),
        s[8..10].parse::<u32>(),
    ) else {
        return false;
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .is_some_and(|date| date.format("%Y-%m-%d").to_string() == s)
}

/// Base-10 integer strictly greater than zero; the whole string must parse.
pub fn parse_positive(s: &str) -> Option<i64> {
    match s.parse::<i64>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Form values arrive as `Some("")` for blank inputs; those count as absent.
/// Use with `#[serde(default, deserialize_with = "non_empty")]`.
pub fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dates() {
        assert!(is_valid_date("2024-02-29"));
        assert!(is_valid_date("1999-12-31"));
        assert!(is_valid_date("2023-01-01"));
    }

    #[test]
    fn test_invalid_dates() {
        assert!(!is_valid_date("2024-02-30"));
        assert!(!is_valid_date("2023-02-29"));
        assert!(!is_valid_date("2023-13-01"));
        assert!(!is_valid_date("2023-00-10"));
        assert!(!is_valid_date("2023-1-01"));
        assert!(!is_valid_date("2023/01/01"));
        assert!(!is_valid_date("+023-01-01"));
        assert!(!is_valid_date(""));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("12"), Some(12));
        assert_eq!(parse_positive("0"), None);
        assert_eq!(parse_positive("-3"), None);
        assert_eq!(parse_positive("12abc"), None);
        assert_eq!(parse_positive("1.5"), None);
    }

    #[test]
    fn test_violations_keep_order() {
        let mut v = Violations::new();
        v.required("bID", None, 30);
        v.optional("bPub", Some(&"x".repeat(31)), 30);
        v.date("bDate", Some("2024-02-30"));
        v.required_positive("bCnt", Some("0"));

        let msgs = v.messages();
        assert_eq!(msgs.len(), 4);
        assert!(msgs[0].starts_with("bID"));
        assert!(msgs[1].starts_with("bPub"));
        assert!(msgs[2].starts_with("bDate"));
        assert!(msgs[3].starts_with("bCnt"));
    }

    #[test]
    fn test_length_counts_characters() {
        let mut v = Violations::new();
        v.required("rName", Some("张三李四王五赵六钱七"), 10);
        assert!(v.is_empty());
        v.required("rName", Some("张三李四王五赵六钱七孙"), 10);
        assert_eq!(v.messages().len(), 1);
    }
}
