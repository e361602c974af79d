//! Spoken-language tags for the voice relay.
//!
//! The relay supports the three languages the Owl Bank line is offered in.
//! Tags use the BCP 47 shapes the transport expects on the wire
//! (`ttsLanguage` / `transcriptionLanguage`).

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// A spoken language supported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageTag {
    /// Brazilian Portuguese (the line's default).
    #[serde(rename = "pt-BR")]
    PtBr,
    /// US English.
    #[serde(rename = "en-US")]
    EnUs,
    /// US / Latin American Spanish.
    #[serde(rename = "es-US")]
    EsUs,
}

impl LanguageTag {
    /// All supported languages, in preference order.
    pub const ALL: [LanguageTag; 3] = [LanguageTag::PtBr, LanguageTag::EnUs, LanguageTag::EsUs];

    /// The wire tag for this language (e.g. `"pt-BR"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageTag::PtBr => "pt-BR",
            LanguageTag::EnUs => "en-US",
            LanguageTag::EsUs => "es-US",
        }
    }
}

impl Default for LanguageTag {
    fn default() -> Self {
        LanguageTag::PtBr
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LanguageTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pt-br" | "pt" => Ok(LanguageTag::PtBr),
            "en-us" | "en" => Ok(LanguageTag::EnUs),
            "es-us" | "es" => Ok(LanguageTag::EsUs),
            other => Err(format!("unsupported language tag: '{other}'")),
        }
    }
}

/// The outcome of scoring a piece of text for its spoken language.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub language: LanguageTag,
    /// Confidence in `[0.0, 1.0]`; gated against a threshold before a
    /// language switch is honored.
    pub confidence: f32,
}
