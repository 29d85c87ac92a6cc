//! Language codes: validation, the fallback language and target-set normalization.

use regex::Regex;
use std::sync::OnceLock;

/// The fallback language. Every target set contains it, so a message always has at
/// least one readable rendition.
pub const FALLBACK_LANGUAGE: &str = "en";

/// Source-language sentinel asking the provider to detect the language.
pub const AUTO_DETECT: &str = "auto";

static CODE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn code_pattern() -> &'static Regex {
    CODE_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2,3}(-[a-z0-9]{2,8})*$").expect("language code pattern is valid")
    })
}

/// Lowercase and trim a language code. Underscores become hyphens (`pt_BR` -> `pt-br`).
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase().replace('_', "-")
}

/// Check a normalized code against the BCP-47-ish pattern.
pub fn is_valid_code(code: &str) -> bool {
    code_pattern().is_match(code)
}

/// Normalize a source language. Empty input means auto-detection.
pub fn normalize_source(code: &str) -> Result<String, String> {
    let code = normalize_code(code);
    if code.is_empty() || code == AUTO_DETECT {
        return Ok(AUTO_DETECT.to_string());
    }
    if !is_valid_code(&code) {
        return Err(format!("invalid source language code '{}'", code));
    }
    Ok(code)
}

/// Normalize a target list: lowercase, validate, drop duplicates keeping first
/// occurrence order, and append the fallback language when it is missing.
pub fn normalize_targets<S: AsRef<str>>(targets: &[S]) -> Result<Vec<String>, String> {
    let mut normalized: Vec<String> = Vec::with_capacity(targets.len() + 1);

    for raw in targets {
        let code = normalize_code(raw.as_ref());
        if code == AUTO_DETECT {
            return Err("'auto' is not a valid target language".to_string());
        }
        if !is_valid_code(&code) {
            return Err(format!("invalid target language code '{}'", code));
        }
        if !normalized.contains(&code) {
            normalized.push(code);
        }
    }

    if !normalized.iter().any(|c| c == FALLBACK_LANGUAGE) {
        normalized.push(FALLBACK_LANGUAGE.to_string());
    }

    Ok(normalized)
}

/// Check the provider's precondition without modifying the list.
pub fn validate_targets<S: AsRef<str>>(targets: &[S]) -> Result<(), String> {
    if targets.is_empty() {
        return Err("target language list is empty".to_string());
    }
    if !targets.iter().any(|t| t.as_ref() == FALLBACK_LANGUAGE) {
        return Err(format!(
            "target language list must include the fallback language '{}'",
            FALLBACK_LANGUAGE
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" PL "), "pl");
        assert_eq!(normalize_code("pt_BR"), "pt-br");
        assert_eq!(normalize_code("zh-Hant"), "zh-hant");
    }

    #[test]
    fn test_is_valid_code() {
        assert!(is_valid_code("en"));
        assert!(is_valid_code("fil"));
        assert!(is_valid_code("pt-br"));
        assert!(is_valid_code("zh-hant"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("e"));
        assert!(!is_valid_code("english"));
        assert!(!is_valid_code("en-"));
        assert!(!is_valid_code("en us"));
    }

    #[test]
    fn test_normalize_source_defaults_to_auto() {
        assert_eq!(normalize_source("").unwrap(), "auto");
        assert_eq!(normalize_source("AUTO").unwrap(), "auto");
        assert_eq!(normalize_source("De").unwrap(), "de");
        assert!(normalize_source("not a language").is_err());
    }

    #[test]
    fn test_normalize_targets_appends_fallback() {
        let targets = normalize_targets(&["pl", "de"]).unwrap();
        assert_eq!(targets, vec!["pl", "de", "en"]);
    }

    #[test]
    fn test_normalize_targets_keeps_existing_fallback_position() {
        let targets = normalize_targets(&["pl", "EN", "de"]).unwrap();
        assert_eq!(targets, vec!["pl", "en", "de"]);
    }

    #[test]
    fn test_normalize_targets_deduplicates() {
        let targets = normalize_targets(&["pl", "PL", "en", "pl "]).unwrap();
        assert_eq!(targets, vec!["pl", "en"]);
    }

    #[test]
    fn test_normalize_targets_empty_becomes_fallback_only() {
        let targets = normalize_targets::<&str>(&[]).unwrap();
        assert_eq!(targets, vec!["en"]);
    }

    #[test]
    fn test_normalize_targets_rejects_auto_and_garbage() {
        assert!(normalize_targets(&["auto"]).is_err());
        assert!(normalize_targets(&["pl", "??"]).is_err());
    }

    #[test]
    fn test_validate_targets() {
        assert!(validate_targets(&["en", "pl"]).is_ok());
        assert!(validate_targets::<&str>(&[]).is_err());
        assert!(validate_targets(&["pl", "de"]).is_err());
    }
}
