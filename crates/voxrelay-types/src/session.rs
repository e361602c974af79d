//! Session identity, lifecycle state, and setup metadata.
//!
//! A `Session` is one call's end-to-end conversational state, created on the
//! transport's `setup` event and destroyed on `end` or idle timeout. The
//! identifier is opaque and transport-assigned (a call SID in practice).

use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Opaque, transport-assigned identifier for one call session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a session.
///
/// `AwaitingSetup -> Active -> (Suspended <-> Active) -> Closed`.
/// `Suspended` means the transport link dropped but the session is retained
/// for a bounded grace period; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingSetup,
    Active,
    Suspended,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitingSetup => write!(f, "awaiting_setup"),
            SessionState::Active => write!(f, "active"),
            SessionState::Suspended => write!(f, "suspended"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "awaiting_setup" => Ok(SessionState::AwaitingSetup),
            "active" => Ok(SessionState::Active),
            "suspended" => Ok(SessionState::Suspended),
            "closed" => Ok(SessionState::Closed),
            other => Err(format!("invalid session state: '{other}'")),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::AwaitingSetup
    }
}

/// Metadata carried by the transport's `setup` event.
///
/// Field names follow the Conversation Relay wire shape. `session_id` is the
/// relay's own identifier; older transports only send `call_sid`, so
/// [`SetupInfo::session_key`] accepts either.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupInfo {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Caller identity (E.164 number or a `client:` identifier).
    #[serde(default)]
    pub from: Option<String>,
    /// The number/address that was called.
    #[serde(default)]
    pub to: Option<String>,
    /// Free-form key/value pairs configured on the transport side
    /// (inbound channel, persona override, customer traits).
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl SetupInfo {
    /// The identifier this session should be keyed by, if the transport
    /// provided one.
    pub fn session_key(&self) -> Option<SessionId> {
        self.session_id
            .as_deref()
            .or(self.call_sid.as_deref())
            .map(SessionId::from)
    }

    /// A "Customer info" block for the persona prompt, built from the
    /// recognized personalization parameters. Returns `None` when nothing
    /// usable was supplied.
    pub fn personalization_block(&self) -> Option<String> {
        let labels = [
            ("firstName", "Name"),
            ("company", "Company"),
            ("email", "Email"),
            ("stage", "Stage"),
            ("event", "Context"),
            ("lastOutcome", "Last Outcome"),
        ];
        let items: Vec<String> = labels
            .iter()
            .filter_map(|(key, label)| {
                self.custom_parameters
                    .get(*key)
                    .map(|v| format!("- {label}: {v}"))
            })
            .collect();
        if items.is_empty() {
            None
        } else {
            Some(format!("Customer info:\n{}", items.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_roundtrip() {
        for state in [
            SessionState::AwaitingSetup,
            SessionState::Active,
            SessionState::Suspended,
            SessionState::Closed,
        ] {
            let s = state.to_string();
            let parsed: SessionState = s.parse().unwrap();
            assert_eq!(state, parsed);
        }
    }

    #[test]
    fn test_session_state_serde() {
        let json = serde_json::to_string(&SessionState::AwaitingSetup).unwrap();
        assert_eq!(json, "\"awaiting_setup\"");
    }

    #[test]
    fn test_session_key_prefers_session_id() {
        let info = SetupInfo {
            session_id: Some("VX123".to_string()),
            call_sid: Some("CA456".to_string()),
            ..Default::default()
        };
        assert_eq!(info.session_key().unwrap().as_str(), "VX123");
    }

    #[test]
    fn test_session_key_falls_back_to_call_sid() {
        let info = SetupInfo {
            call_sid: Some("CA456".to_string()),
            ..Default::default()
        };
        assert_eq!(info.session_key().unwrap().as_str(), "CA456");

        let empty = SetupInfo::default();
        assert!(empty.session_key().is_none());
    }

    #[test]
    fn test_setup_info_wire_shape() {
        let json = r#"{
            "sessionId": "VX1",
            "callSid": "CA1",
            "from": "+5511999990000",
            "to": "+5511888880000",
            "customParameters": {"firstName": "Ana", "company": "Owl Corp"}
        }"#;
        let info: SetupInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.from.as_deref(), Some("+5511999990000"));
        let block = info.personalization_block().unwrap();
        assert!(block.contains("- Name: Ana"));
        assert!(block.contains("- Company: Owl Corp"));
    }

    #[test]
    fn test_personalization_block_empty() {
        assert!(SetupInfo::default().personalization_block().is_none());
    }
}
