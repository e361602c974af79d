//! HTTP conversation-log sink.
//!
//! Mirrors each call into an external conversations manager: one
//! conversation resource per session (`voice_<session-id>`), one message per
//! turn. Strictly fire-and-forget -- every failure is a warn-level log line
//! and nothing more.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use voxrelay_core::transcript::{SinkFuture, TranscriptSink};
use voxrelay_types::config::TranscriptConfig;
use voxrelay_types::session::{SessionId, SetupInfo};
use voxrelay_types::turn::{ConversationTurn, SpeakerRole};

use std::time::Duration;

/// Reqwest-backed [`TranscriptSink`] for a conversations-manager API.
#[derive(Debug, Clone)]
pub struct HttpTranscriptSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriptSink {
    pub fn new(config: &TranscriptConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to create reqwest client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn conversation_body(session: &SessionId, setup: &SetupInfo) -> Value {
    let caller = setup.from.clone().unwrap_or_else(|| "unknown".to_string());
    json!({
        "friendlyName": format!("Voice Call - {caller}"),
        "uniqueName": format!("voice_{session}"),
        "attributes": {
            "channel": "voice",
            "customer_phone": caller,
            "call_sid": setup.call_sid,
            "created_at": Utc::now().to_rfc3339(),
            "status": "active",
        },
    })
}

fn message_body(turn: &ConversationTurn) -> Value {
    let author = match turn.role {
        SpeakerRole::Customer => "customer".to_string(),
        SpeakerRole::Agent | SpeakerRole::System => turn
            .agent_id
            .clone()
            .unwrap_or_else(|| turn.role.to_string()),
    };
    json!({
        "author": author,
        "body": turn.text,
        "attributes": {
            "seq": turn.seq,
            "role": turn.role,
            "kind": turn.kind,
            "language": turn.language,
        },
    })
}

impl TranscriptSink for HttpTranscriptSink {
    fn session_started(&self, session: &SessionId, setup: &SetupInfo) -> SinkFuture {
        let client = self.client.clone();
        let url = format!("{}/conversations", self.base_url);
        let body = conversation_body(session, setup);
        let session = session.clone();
        Box::pin(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(session_id = %session, "conversation created");
                }
                Ok(response) => {
                    warn!(session_id = %session, status = %response.status(), "conversation create rejected");
                }
                Err(error) => {
                    warn!(session_id = %session, %error, "conversation create failed");
                }
            }
        })
    }

    fn record_turn(&self, session: &SessionId, turn: &ConversationTurn) -> SinkFuture {
        let client = self.client.clone();
        let url = format!("{}/conversations/voice_{}/messages", self.base_url, session);
        let body = message_body(turn);
        let session = session.clone();
        let seq = turn.seq;
        Box::pin(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(session_id = %session, seq, status = %response.status(), "turn log rejected");
                }
                Err(error) => {
                    warn!(session_id = %session, seq, %error, "turn log failed");
                }
            }
        })
    }
}
