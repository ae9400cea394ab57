//! Field tag parsing.
//!
//! A tag is a comma-separated annotation attached to one record field:
//! the first token is the column name (empty or `-` skips the field) and the
//! remaining tokens come from `primary_key`, `auto_increment`, `not_null`
//! and `skip`. A field without any tag derives its column name from the
//! field name in snake_case.

use regex::Regex;
use std::sync::OnceLock;

/// Column-level markers parsed from a tag string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnTag {
    /// Column name
    pub column: String,
    /// `primary_key` marker
    pub primary_key: bool,
    /// `auto_increment` marker
    pub auto_increment: bool,
    /// `not_null` marker
    pub not_null: bool,
}

/// Outcome of classifying one field's tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDirective {
    /// The field maps to a column
    Include(ColumnTag),
    /// The field is not persisted
    Skip,
    /// The tag is malformed
    Error(String),
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier pattern"))
}

/// Checks whether `name` is usable as an unquoted table or column name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Parses the tag for `field_name`.
///
/// # Example
/// ```rust
/// use tablewright_core::tag::{parse_tag, TagDirective};
///
/// let TagDirective::Include(tag) = parse_tag("Id", Some("id,primary_key,auto_increment")) else {
///     panic!("expected column");
/// };
/// assert_eq!(tag.column, "id");
/// assert!(tag.primary_key && tag.auto_increment);
/// assert_eq!(parse_tag("secret", Some("-")), TagDirective::Skip);
/// ```
pub fn parse_tag(field_name: &str, tag: Option<&str>) -> TagDirective {
    let Some(tag) = tag else {
        let column = to_snake_case(field_name);
        if column.is_empty() {
            return TagDirective::Skip;
        }
        if !is_valid_identifier(&column) {
            return TagDirective::Error(format!(
                "field '{field_name}' derives invalid column name '{column}'"
            ));
        }
        return TagDirective::Include(ColumnTag {
            column,
            ..ColumnTag::default()
        });
    };

    let mut tokens = tag.split(',').map(str::trim);
    let column = tokens.next().unwrap_or_default();
    if column.is_empty() || column == "-" {
        return TagDirective::Skip;
    }
    if !is_valid_identifier(column) {
        return TagDirective::Error(format!(
            "field '{field_name}' declares invalid column name '{column}'"
        ));
    }

    let mut parsed = ColumnTag {
        column: column.to_string(),
        ..ColumnTag::default()
    };
    for token in tokens.filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "primary_key" => parsed.primary_key = true,
            "auto_increment" => parsed.auto_increment = true,
            "not_null" => parsed.not_null = true,
            "skip" => return TagDirective::Skip,
            other => {
                return TagDirective::Error(format!(
                    "field '{field_name}' has unknown tag option '{other}'"
                ));
            }
        }
    }
    TagDirective::Include(parsed)
}

/// Converts a field or type name to snake_case.
///
/// Acronym runs stay together: `UserID` becomes `user_id` and
/// `HTTPServer` becomes `http_server`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn include(field: &str, tag: Option<&str>) -> ColumnTag {
        match parse_tag(field, tag) {
            TagDirective::Include(tag) => tag,
            other => panic!("expected Include, got {other:?}"),
        }
    }

    #[test]
    fn test_untagged_field_derives_column() {
        assert_eq!(include("CreatedAt", None).column, "created_at");
        assert_eq!(include("user_name", None).column, "user_name");
        assert_eq!(parse_tag("", None), TagDirective::Skip);
    }

    #[test]
    fn test_markers() {
        let tag = include("Id", Some("id, primary_key, auto_increment"));
        assert_eq!(tag.column, "id");
        assert!(tag.primary_key);
        assert!(tag.auto_increment);
        assert!(!tag.not_null);

        let tag = include("Email", Some("email,NOT_NULL"));
        assert!(tag.not_null);
        assert!(!tag.primary_key);
    }

    #[test]
    fn test_skip_forms() {
        assert_eq!(parse_tag("Secret", Some("-")), TagDirective::Skip);
        assert_eq!(parse_tag("Secret", Some("")), TagDirective::Skip);
        assert_eq!(parse_tag("Secret", Some(",not_null")), TagDirective::Skip);
        assert_eq!(parse_tag("Secret", Some("secret,skip")), TagDirective::Skip);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_tag("Name", Some("name,indexed_by_magic")),
            TagDirective::Error(msg) if msg.contains("indexed_by_magic")
        ));
        assert!(matches!(
            parse_tag("Name", Some("na me")),
            TagDirective::Error(msg) if msg.contains("invalid column name")
        ));
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("ID"), "id");
        assert_eq!(to_snake_case("UserID"), "user_id");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("Order2Item"), "order2_item");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_tmp1"));
        assert!(!is_valid_identifier("1users"));
        assert!(!is_valid_identifier("drop table"));
        assert!(!is_valid_identifier(""));
    }
}
