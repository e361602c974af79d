//! Application state wiring all collaborators together.
//!
//! `AppState` pins the core engine's trait seams to the concrete infra
//! implementations: the OpenAI-compatible provider, the Owl Bank tool
//! backend, and the HTTP (or no-op) transcript sink.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use voxrelay_core::hub::BroadcastHub;
use voxrelay_core::persona::AgentDirectory;
use voxrelay_core::session::{SessionDeps, SessionRegistry};
use voxrelay_core::transcript::{NoopTranscriptSink, TranscriptSink};
use voxrelay_infra::llm::OpenAiCompatibleProvider;
use voxrelay_infra::tool::HttpToolBackend;
use voxrelay_infra::transcript::HttpTranscriptSink;
use voxrelay_types::config::RelayConfig;

/// Shared application state used by the WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub hub: BroadcastHub,
    pub config: Arc<RelayConfig>,
}

/// Load the relay configuration from an explicit path, `./voxrelay.toml`,
/// or defaults, in that order.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            let default = Path::new("voxrelay.toml");
            if !default.exists() {
                return Ok(RelayConfig::default());
            }
            default
        }
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

impl AppState {
    /// Wire the engine: directory, provider, tool backend, transcript sink,
    /// broadcast hub, and the session registry composing them.
    pub fn init(config: RelayConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let directory = Arc::new(AgentDirectory::new(config.personas.clone())?);

        let api_key = std::env::var(&config.model.api_key_env)
            .map(SecretString::from)
            .with_context(|| {
                format!(
                    "environment variable {} must hold the model API key",
                    config.model.api_key_env
                )
            })?;
        let provider = Arc::new(OpenAiCompatibleProvider::from_config(&config.model, api_key));

        let tool = Arc::new(HttpToolBackend::new(&config.tool));

        let transcript: Arc<dyn TranscriptSink> = if config.transcript.enabled {
            Arc::new(HttpTranscriptSink::new(&config.transcript))
        } else {
            Arc::new(NoopTranscriptSink)
        };

        let hub = BroadcastHub::new(1024);

        let deps = SessionDeps {
            provider,
            directory,
            tool,
            transcript,
            hub: hub.clone(),
            config: config.clone(),
        };
        let registry = Arc::new(SessionRegistry::new(deps));

        Ok(Self {
            registry,
            hub,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_missing_default_yields_defaults() {
        // Run from a scratch directory with no voxrelay.toml.
        let config = load_config(None).unwrap();
        assert_eq!(config.model.model, "gpt-4o-2024-11-20");
    }

    #[test]
    fn load_config_reads_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nmodel = \"gpt-4o-mini\"").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.model.model, "gpt-4o-mini");
    }

    #[test]
    fn load_config_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not toml at all [[[").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
