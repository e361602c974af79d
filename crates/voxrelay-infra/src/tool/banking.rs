//! HTTP tool backend against the Owl Bank demo API.
//!
//! Answers `check_balance` by POSTing to `/get-banking-data` and formatting
//! the account figures into a short spoken sentence in the caller's
//! language. `transfer_funds` answers with a canned security line --
//! transfers are completed in the app, never over the voice line.

use serde::Deserialize;
use tracing::{debug, warn};

use voxrelay_core::tool::{ToolBackend, ToolFuture, ToolIntent};
use voxrelay_types::config::ToolConfig;
use voxrelay_types::error::ToolError;
use voxrelay_types::lang::LanguageTag;

use std::time::Duration;

/// Demo user answered when the caller identity cannot be mapped to an
/// account.
const FALLBACK_USER_ID: &str = "owl.anunes@gmail.com";

/// Account figures returned by the banking API.
#[derive(Debug, Deserialize)]
struct BankingData {
    #[serde(default)]
    balance: f64,
    #[serde(default, rename = "creditDebt")]
    credit_debt: f64,
    #[serde(default, rename = "loyaltyPoints")]
    loyalty_points: i64,
}

/// Reqwest-backed [`ToolBackend`] for the Owl Bank demo API.
#[derive(Debug, Clone)]
pub struct HttpToolBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolBackend {
    pub fn new(config: &ToolConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("failed to create reqwest client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Derive the user id the banking API expects from the caller identifier.
///
/// Conversation relays send identifiers like `client:email@example.com`;
/// plain emails pass through; anything else maps to the demo account.
fn normalize_user_id(caller: Option<&str>) -> String {
    if let Some(caller) = caller {
        if let Some(rest) = caller.strip_prefix("client:") {
            if rest.contains('@') {
                return rest.to_string();
            }
        }
        if caller.contains('@') {
            return caller.to_string();
        }
    }
    FALLBACK_USER_ID.to_string()
}

/// Render the account figures as one spoken sentence group.
fn format_balance(data: &BankingData, language: LanguageTag) -> String {
    let mut response = match language {
        LanguageTag::PtBr => format!("Seu saldo atual é R$ {:.2}.", data.balance),
        LanguageTag::EnUs => format!("Your current balance is R$ {:.2}.", data.balance),
        LanguageTag::EsUs => format!("Su saldo actual es R$ {:.2}.", data.balance),
    };
    if data.credit_debt > 0.0 {
        response.push_str(&match language {
            LanguageTag::PtBr => format!(
                " Você tem uma dívida no cartão de crédito de R$ {:.2}.",
                data.credit_debt
            ),
            LanguageTag::EnUs => format!(
                " You have a credit card debt of R$ {:.2}.",
                data.credit_debt
            ),
            LanguageTag::EsUs => format!(
                " Tiene una deuda en la tarjeta de crédito de R$ {:.2}.",
                data.credit_debt
            ),
        });
    }
    if data.loyalty_points > 0 {
        response.push_str(&match language {
            LanguageTag::PtBr => {
                format!(" Seus pontos de fidelidade são {} pontos.", data.loyalty_points)
            }
            LanguageTag::EnUs => format!(" You have {} loyalty points.", data.loyalty_points),
            LanguageTag::EsUs => {
                format!(" Tiene {} puntos de fidelidad.", data.loyalty_points)
            }
        });
    }
    response
}

/// Transfers are never completed over the voice line.
fn transfer_response(language: LanguageTag) -> String {
    match language {
        LanguageTag::PtBr => {
            "Para sua segurança, transferências e PIX são concluídos no aplicativo Owl Bank. \
             Abri uma notificação para você continuar por lá."
        }
        LanguageTag::EnUs => {
            "For your security, transfers are completed in the Owl Bank app. \
             I've sent a notification so you can continue there."
        }
        LanguageTag::EsUs => {
            "Por su seguridad, las transferencias se completan en la aplicación de Owl Bank. \
             Le envié una notificación para continuar allí."
        }
    }
    .to_string()
}

impl ToolBackend for HttpToolBackend {
    fn name(&self) -> &str {
        "owl-bank"
    }

    fn invoke(
        &self,
        intent: ToolIntent,
        caller: Option<String>,
        language: LanguageTag,
    ) -> ToolFuture {
        let client = self.client.clone();
        let url = format!("{}/get-banking-data", self.base_url);
        Box::pin(async move {
            match intent {
                ToolIntent::TransferFunds => Ok(transfer_response(language)),
                ToolIntent::CheckBalance => {
                    let user_id = normalize_user_id(caller.as_deref());
                    debug!(%user_id, "fetching banking data");
                    let response = client
                        .post(&url)
                        .json(&serde_json::json!({ "userId": user_id }))
                        .send()
                        .await
                        .map_err(|e| {
                            if e.is_timeout() {
                                ToolError::Timeout
                            } else {
                                ToolError::Backend(e.to_string())
                            }
                        })?;

                    let status = response.status();
                    if !status.is_success() {
                        warn!(%status, "banking API error");
                        return Err(ToolError::Backend(format!("API error {status}")));
                    }

                    let data: BankingData = response
                        .json()
                        .await
                        .map_err(|e| ToolError::Backend(format!("invalid response: {e}")))?;
                    Ok(format_balance(&data, language))
                }
            }
        })
    }
}
