//! Language-switch detector.
//!
//! A stateless scorer over the latest customer utterance. Explicit switch
//! requests ("do you speak english", "fala português") match the pattern
//! tables and score high; everything else falls back to weak vocabulary
//! hints that are deliberately capped *below* the default threshold, so a
//! stray foreign word never flips the call's language back and forth.

use regex::Regex;

use voxrelay_types::config::LanguageConfig;
use voxrelay_types::lang::{LanguageDetection, LanguageTag};

use std::sync::LazyLock;

/// Confidence assigned to an explicit switch request.
const SWITCH_CONFIDENCE: f32 = 0.92;

/// Ceiling for vocabulary-hint scores; kept below the switch threshold.
const HINT_CEILING: f32 = 0.6;

struct SwitchPattern {
    language: LanguageTag,
    regex: Regex,
}

static SWITCH_PATTERNS: LazyLock<Vec<SwitchPattern>> = LazyLock::new(|| {
    let table: &[(LanguageTag, &[&str])] = &[
        (
            LanguageTag::PtBr,
            &[
                r"(speak|talk|switch|change).*(portuguese|português)",
                r"(falar|fala).*(português|portuguese)",
            ],
        ),
        (
            LanguageTag::EnUs,
            &[
                r"(speak|talk|switch|change).*(english|inglês)",
                r"(falar|fala).*(inglês|english)",
            ],
        ),
        (
            LanguageTag::EsUs,
            &[
                r"(speak|talk|switch|change).*(spanish|espanhol|español)",
                r"(hablar|habla|falar|fala|cambiar).*(espanhol|español|spanish)",
            ],
        ),
    ];
    table
        .iter()
        .flat_map(|(language, patterns)| {
            patterns.iter().map(|p| SwitchPattern {
                language: *language,
                regex: Regex::new(p).expect("language switch pattern"),
            })
        })
        .collect()
});

/// Common words used as weak language hints.
static HINT_WORDS: &[(LanguageTag, &[&str])] = &[
    (
        LanguageTag::PtBr,
        &["você", "obrigado", "obrigada", "olá", "não", "quero", "saldo", "bom"],
    ),
    (
        LanguageTag::EnUs,
        &["the", "please", "hello", "thanks", "what", "how", "my", "balance"],
    ),
    (
        LanguageTag::EsUs,
        &["usted", "gracias", "hola", "quiero", "cuánto", "señor", "dinero"],
    ),
];

/// Threshold-gated language detector.
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    threshold: f32,
}

impl LanguageDetector {
    pub fn new(config: &LanguageConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
        }
    }

    /// Score the text and return the best candidate language, if any signal
    /// was found at all.
    pub fn detect(&self, text: &str) -> Option<LanguageDetection> {
        let lower = text.to_lowercase();

        for pattern in SWITCH_PATTERNS.iter() {
            if pattern.regex.is_match(&lower) {
                return Some(LanguageDetection {
                    language: pattern.language,
                    confidence: SWITCH_CONFIDENCE,
                });
            }
        }

        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return None;
        }

        let mut best: Option<LanguageDetection> = None;
        for (language, hints) in HINT_WORDS {
            let hits = words.iter().filter(|w| hints.contains(w)).count();
            if hits == 0 {
                continue;
            }
            let confidence = (hits as f32 / words.len() as f32).min(1.0) * HINT_CEILING;
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(LanguageDetection {
                    language: *language,
                    confidence,
                });
            }
        }
        best
    }

    /// The language to switch to, or `None` when the detection is below the
    /// threshold or matches the current language.
    pub fn should_switch(&self, current: LanguageTag, text: &str) -> Option<LanguageTag> {
        self.detect(text)
            .filter(|d| d.confidence >= self.threshold && d.language != current)
            .map(|d| d.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LanguageDetector {
        LanguageDetector::new(&LanguageConfig::default())
    }

    #[test]
    fn explicit_english_request_scores_high() {
        let d = detector();
        let detection = d.detect("do you speak english").unwrap();
        assert_eq!(detection.language, LanguageTag::EnUs);
        assert!(detection.confidence >= 0.9);
        assert_eq!(
            d.should_switch(LanguageTag::PtBr, "do you speak english"),
            Some(LanguageTag::EnUs)
        );
    }

    #[test]
    fn explicit_portuguese_request_detected() {
        let d = detector();
        assert_eq!(
            d.should_switch(LanguageTag::EnUs, "pode falar português comigo?"),
            Some(LanguageTag::PtBr)
        );
    }

    #[test]
    fn explicit_spanish_request_detected() {
        let d = detector();
        assert_eq!(
            d.should_switch(LanguageTag::PtBr, "puedes hablar español por favor"),
            Some(LanguageTag::EsUs)
        );
    }

    #[test]
    fn same_language_is_not_a_switch() {
        let d = detector();
        assert_eq!(d.should_switch(LanguageTag::EnUs, "please speak english"), None);
    }

    #[test]
    fn vocabulary_hints_stay_below_threshold() {
        let d = detector();
        // Hint-only text scores, but never past the switch gate.
        let detection = d.detect("please what is the balance").unwrap();
        assert!(detection.confidence < 0.8);
        assert_eq!(d.should_switch(LanguageTag::PtBr, "please what is the balance"), None);
    }

    #[test]
    fn no_signal_yields_none() {
        let d = detector();
        assert!(d.detect("xyzzy 12345").is_none());
        assert!(d.detect("").is_none());
    }
}
