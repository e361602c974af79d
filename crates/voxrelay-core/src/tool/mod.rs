//! Tool-intent detection and the tool backend seam.
//!
//! When a customer turn matches a recognized banking intent, the session
//! machine calls the tool backend *before* the model, and injects the
//! backend's natural-language answer as a system turn so the model speaks
//! with real account data. Backend failures degrade to a localized
//! "temporarily unavailable" line; the conversation continues.

use regex::Regex;

use voxrelay_types::error::ToolError;
use voxrelay_types::lang::LanguageTag;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::LazyLock;

/// A recognized tool intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolIntent {
    CheckBalance,
    TransferFunds,
}

impl fmt::Display for ToolIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolIntent::CheckBalance => write!(f, "check_balance"),
            ToolIntent::TransferFunds => write!(f, "transfer_funds"),
        }
    }
}

impl FromStr for ToolIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check_balance" => Ok(ToolIntent::CheckBalance),
            "transfer_funds" => Ok(ToolIntent::TransferFunds),
            other => Err(format!("invalid tool intent: '{other}'")),
        }
    }
}

static BALANCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(saldo|balance|conta|account)",
        r"(quanto|how much|cuanto).*(tenho|have|dinheiro|money)",
        r"(consulta|check|ver).*(conta|account|saldo|balance)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("balance intent pattern"))
    .collect()
});

static TRANSFER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(transfer|transferir|enviar|send).*(dinheiro|money|reais)",
        r"(pix)",
        r"(mandar|enviar).*(para|to|pra)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("transfer intent pattern"))
    .collect()
});

/// Detect whether the customer is asking for banking information.
///
/// Balance patterns are checked before transfer patterns, matching the
/// behavior customers were tuned against.
pub fn detect_intent(text: &str) -> Option<ToolIntent> {
    let lower = text.to_lowercase();
    if BALANCE_PATTERNS.iter().any(|p| p.is_match(&lower)) {
        return Some(ToolIntent::CheckBalance);
    }
    if TRANSFER_PATTERNS.iter().any(|p| p.is_match(&lower)) {
        return Some(ToolIntent::TransferFunds);
    }
    None
}

/// Spoken line used when the tool backend fails or times out.
pub fn unavailable_message(language: LanguageTag) -> &'static str {
    match language {
        LanguageTag::PtBr => "Desculpe, o sistema bancário está temporariamente indisponível.",
        LanguageTag::EnUs => "Sorry, our banking system is temporarily unavailable.",
        LanguageTag::EsUs => "Lo sentimos, el sistema bancario no está disponible en este momento.",
    }
}

/// Boxed future so the backend stays object-safe behind `Arc<dyn ToolBackend>`.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'static>>;

/// A side-call backend answering recognized intents with short
/// natural-language text.
///
/// Implementations live in voxrelay-infra. The future must be `'static`;
/// implementations clone what they need before returning it.
pub trait ToolBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Answer an intent for the given caller in the given language.
    fn invoke(
        &self,
        intent: ToolIntent,
        caller: Option<String>,
        language: LanguageTag,
    ) -> ToolFuture;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_intent_detected_across_languages() {
        assert_eq!(detect_intent("what is my balance"), Some(ToolIntent::CheckBalance));
        assert_eq!(detect_intent("qual é o meu saldo?"), Some(ToolIntent::CheckBalance));
        assert_eq!(
            detect_intent("quiero ver mi account"),
            Some(ToolIntent::CheckBalance)
        );
    }

    #[test]
    fn transfer_intent_detected() {
        assert_eq!(
            detect_intent("quero transferir dinheiro"),
            Some(ToolIntent::TransferFunds)
        );
        assert_eq!(detect_intent("posso fazer um PIX?"), Some(ToolIntent::TransferFunds));
    }

    #[test]
    fn no_intent_on_small_talk() {
        assert_eq!(detect_intent("tell me about investments"), None);
        assert_eq!(detect_intent("hello there"), None);
    }

    #[test]
    fn intent_roundtrip() {
        for intent in [ToolIntent::CheckBalance, ToolIntent::TransferFunds] {
            let parsed: ToolIntent = intent.to_string().parse().unwrap();
            assert_eq!(intent, parsed);
        }
    }

    #[test]
    fn unavailable_message_is_localized() {
        assert!(unavailable_message(LanguageTag::PtBr).starts_with("Desculpe"));
        assert!(unavailable_message(LanguageTag::EnUs).starts_with("Sorry"));
        assert!(unavailable_message(LanguageTag::EsUs).starts_with("Lo sentimos"));
    }
}
