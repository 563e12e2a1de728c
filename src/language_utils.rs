use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for prompt construction and config validation.
///
/// Accepts ISO 639-1 codes (`ja`), ISO 639-2/T and 639-2/B codes (`jpn`, `fre`)
/// and English language names (`Japanese`), and resolves them to an
/// `isolang::Language`.
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Resolve a language code or English name
pub fn resolve_language(input: &str) -> Result<Language> {
    let trimmed = input.trim();
    let code = trimmed.to_lowercase();

    let resolved = match code.len() {
        2 => Language::from_639_1(&code),
        3 => {
            let part2t = BIBLIOGRAPHIC_CODES
                .iter()
                .find(|(b, _)| *b == code)
                .map(|(_, t)| *t)
                .unwrap_or(code.as_str());
            Language::from_639_3(part2t)
        }
        _ => None,
    };

    resolved
        .or_else(|| Language::from_name(trimmed))
        .or_else(|| Language::from_name(&capitalize(trimmed)))
        .ok_or_else(|| anyhow!("Invalid language: {}", input))
}

/// Validate a language code or name
pub fn validate_language_code(input: &str) -> Result<()> {
    resolve_language(input).map(|_| ())
}

/// English display name of a language, e.g. `ja` -> `Japanese`
pub fn get_language_name(input: &str) -> Result<String> {
    Ok(resolve_language(input)?.to_name().to_string())
}

/// Display name for prompts; falls back to the raw input if unresolvable
pub fn display_language(input: &str) -> String {
    get_language_name(input).unwrap_or_else(|_| input.trim().to_string())
}

/// Check if two inputs name the same language
pub fn language_codes_match(a: &str, b: &str) -> bool {
    match (resolve_language(a), resolve_language(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolveLanguage_withPart1Code_shouldResolve() {
        assert_eq!(resolve_language("ja").unwrap(), Language::Jpn);
        assert_eq!(resolve_language(" EN ").unwrap(), Language::Eng);
    }

    #[test]
    fn test_resolveLanguage_withBibliographicCode_shouldMapToTerminologic() {
        assert_eq!(resolve_language("fre").unwrap(), Language::Fra);
        assert_eq!(resolve_language("chi").unwrap(), Language::Zho);
    }

    #[test]
    fn test_resolveLanguage_withEnglishName_shouldResolve() {
        assert_eq!(resolve_language("Japanese").unwrap(), Language::Jpn);
        assert_eq!(resolve_language("english").unwrap(), Language::Eng);
    }

    #[test]
    fn test_validateLanguageCode_withGarbage_shouldFail() {
        assert!(validate_language_code("xx").is_err());
        assert!(validate_language_code("").is_err());
        assert!(validate_language_code("Klingonese").is_err());
    }

    #[test]
    fn test_displayLanguage_shouldFallBackToInput() {
        assert_eq!(display_language("ja"), "Japanese");
        assert_eq!(display_language("elvish"), "elvish");
    }

    #[test]
    fn test_languageCodesMatch_acrossCodeForms_shouldMatch() {
        assert!(language_codes_match("fr", "fre"));
        assert!(language_codes_match("de", "deu"));
        assert!(!language_codes_match("fr", "de"));
        assert!(!language_codes_match("fr", "zz"));
    }
}
