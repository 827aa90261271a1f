//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;

/// Normalize a country name into its identity key
///
/// Names are compared case-insensitively and ignoring surrounding
/// whitespace, so "Arcadia", " ARCADIA " and "arcadia" share one key.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trim an optional string, mapping blank values to `None`
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(v)
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Format a number with two decimals and thousands separators
pub fn format_amount(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_key() {
        assert_eq!(name_key("Arcadia"), "arcadia");
        assert_eq!(name_key("  ARCADIA "), "arcadia");
        assert_eq!(name_key("Åland Islands"), "åland islands");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" Oslo ".to_string())), Some("Oslo".to_string()));
        assert_eq!(non_blank(Some("Oslo".to_string())), Some("Oslo".to_string()));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(999.5), "999.50");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
        assert_eq!(format_amount(-1000.0), "-1,000.00");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("very long text here", 10), "very lo...");
    }
}
