//! Challenge detection module.
//!
//! Pattern-based identification of bot-challenge pages served in place of a
//! JSON payload.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::external_deps::captcha::ChallengeKind;

/// Match produced by [`ChallengeDetector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeDetection {
    pub pattern_id: &'static str,
    pub kind: ChallengeKind,
}

/// Known challenge signature.
#[derive(Debug)]
struct ChallengePattern {
    id: &'static str,
    kind: ChallengeKind,
    patterns: Vec<Regex>,
}

impl ChallengePattern {
    fn new(id: &'static str, kind: ChallengeKind, raw_patterns: &[&str]) -> Self {
        Self {
            id,
            kind,
            patterns: raw_patterns.iter().map(|pattern| build_regex(pattern)).collect(),
        }
    }

    fn matches(&self, body: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(body))
    }
}

/// Checked in order; the first match wins.
static KNOWN_PATTERNS: Lazy<Vec<ChallengePattern>> = Lazy::new(|| {
    vec![
        ChallengePattern::new(
            "hcaptcha",
            ChallengeKind::HCaptcha,
            &[r#"class=["']h-captcha["']"#, r"hcaptcha\.com/1/api\.js"],
        ),
        ChallengePattern::new(
            "funcaptcha",
            ChallengeKind::FunCaptcha,
            &[r"funcaptcha", r"arkoselabs\.com"],
        ),
        ChallengePattern::new(
            "recaptcha",
            ChallengeKind::RecaptchaV2,
            &[r"recaptcha"],
        ),
    ]
});

fn build_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge pattern {pattern}: {err}"))
}

/// Stateless matcher over response bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChallengeDetector;

impl ChallengeDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, body: &str) -> Option<ChallengeDetection> {
        KNOWN_PATTERNS
            .iter()
            .find(|pattern| pattern.matches(body))
            .map(|pattern| ChallengeDetection {
                pattern_id: pattern.id,
                kind: pattern.kind.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_recaptcha_markers_case_insensitively() {
        let body = r#"<html><div class="g-reCAPTCHA" data-sitekey="abc"></div></html>"#;
        let detection = ChallengeDetector::new().detect(body).unwrap();
        assert_eq!(detection.kind, ChallengeKind::RecaptchaV2);
        assert_eq!(detection.pattern_id, "recaptcha");
    }

    #[test]
    fn prefers_hcaptcha_signature() {
        let body = r#"<script src="https://hcaptcha.com/1/api.js"></script><div class="h-captcha"></div>"#;
        assert_eq!(
            ChallengeDetector::new().detect(body).unwrap().kind,
            ChallengeKind::HCaptcha
        );
    }

    #[test]
    fn ignores_plain_error_pages() {
        assert!(ChallengeDetector::new().detect("<html>Too Many Requests</html>").is_none());
    }
}
