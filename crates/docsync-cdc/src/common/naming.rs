//! Field name case conversion for sink column names.

use serde::{Deserialize, Serialize};

/// Case conversion applied to source field names to derive sink column names.
///
/// Dotted paths (`address.city`) never survive into a column name: the dots
/// act as word delimiters, so `address.city` becomes `address_city` (or
/// `addressCity` in camel case).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCase {
    /// Preserve original case (default)
    #[default]
    None,
    /// Convert to lowercase: `firstName` → `firstname`
    Lower,
    /// Convert to UPPERCASE: `firstName` → `FIRSTNAME`
    Upper,
    /// Convert to snake_case: `firstName` → `first_name`
    #[serde(alias = "snake")]
    SnakeCase,
    /// Convert to camelCase: `first_name` → `firstName`
    #[serde(alias = "camel")]
    CamelCase,
}

impl FieldCase {
    /// Apply case conversion to a field name.
    pub fn apply(&self, s: &str) -> String {
        match self {
            Self::None => s.replace('.', "_"),
            Self::Lower => s.replace('.', "_").to_lowercase(),
            Self::Upper => s.replace('.', "_").to_uppercase(),
            Self::SnakeCase => Self::to_snake_case(s),
            Self::CamelCase => Self::to_camel_case(s),
        }
    }

    fn is_delimiter(c: char) -> bool {
        matches!(c, '-' | '_' | ' ' | '.')
    }

    /// Convert string to snake_case.
    ///
    /// Handles PascalCase, camelCase, and existing delimiters. Runs of
    /// capitals (`userID`) stay together as one word.
    fn to_snake_case(s: &str) -> String {
        let mut result = String::with_capacity(s.len() + 8);
        let mut prev_was_upper = false;
        let mut prev_was_delimiter = true;

        for c in s.chars() {
            if Self::is_delimiter(c) {
                if !result.is_empty() && !result.ends_with('_') {
                    result.push('_');
                }
                prev_was_delimiter = true;
                prev_was_upper = false;
            } else if c.is_uppercase() {
                if !result.is_empty() && !prev_was_delimiter && !prev_was_upper {
                    result.push('_');
                }
                result.extend(c.to_lowercase());
                prev_was_upper = true;
                prev_was_delimiter = false;
            } else {
                result.push(c);
                prev_was_upper = false;
                prev_was_delimiter = false;
            }
        }

        // `_id` keeps its leading underscore
        if s.starts_with('_') {
            result.insert(0, '_');
        }

        result
    }

    /// Convert string to camelCase.
    fn to_camel_case(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut upper_next = false;

        for c in s.chars() {
            if Self::is_delimiter(c) {
                upper_next = !result.is_empty();
            } else if upper_next {
                result.extend(c.to_uppercase());
                upper_next = false;
            } else if result.is_empty() {
                result.extend(c.to_lowercase());
            } else {
                result.push(c);
            }
        }

        if s.starts_with('_') {
            result.insert(0, '_');
        }

        result
    }
}
