//! Agent persona directory.
//!
//! A read-only registry of personas, loaded once from configuration (or the
//! built-in Owl Bank set) and shared across all sessions without locking.
//! The directory also assembles each persona's system prompt, including the
//! routing rules that teach the model when to hand a call off.

use voxrelay_types::lang::LanguageTag;
use voxrelay_types::persona::AgentPersona;
use voxrelay_types::session::SetupInfo;

use std::collections::HashMap;

use super::routing::ROUTE_DIRECTIVE;

/// Errors while building the directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("duplicate persona id: '{0}'")]
    DuplicateId(String),

    #[error("persona id must not be empty")]
    EmptyId,
}

/// Immutable persona registry.
///
/// The first persona is the default one, selected for sessions whose setup
/// metadata does not name another.
#[derive(Debug)]
pub struct AgentDirectory {
    personas: Vec<AgentPersona>,
}

impl AgentDirectory {
    /// Build a directory from configured personas; an empty list falls back
    /// to [`AgentDirectory::owl_bank_defaults`].
    pub fn new(personas: Vec<AgentPersona>) -> Result<Self, DirectoryError> {
        let personas = if personas.is_empty() {
            Self::owl_bank_defaults()
        } else {
            personas
        };
        let mut seen = HashMap::new();
        for persona in &personas {
            if persona.id.is_empty() {
                return Err(DirectoryError::EmptyId);
            }
            if seen.insert(persona.id.clone(), ()).is_some() {
                return Err(DirectoryError::DuplicateId(persona.id.clone()));
            }
        }
        Ok(Self { personas })
    }

    /// The built-in Owl Bank persona set.
    pub fn owl_bank_defaults() -> Vec<AgentPersona> {
        let greetings = |pt: &str, en: &str, es: &str| {
            HashMap::from([
                ("pt-BR".to_string(), pt.to_string()),
                ("en-US".to_string(), en.to_string()),
                ("es-US".to_string(), es.to_string()),
            ])
        };
        vec![
            AgentPersona {
                id: "olli".to_string(),
                name: "Olli".to_string(),
                role: "generalist".to_string(),
                prompt: "You answer general Owl Bank questions: accounts, cards, branch \
                         services, and frequently asked questions. Keep answers short and \
                         friendly."
                    .to_string(),
                greetings: greetings(
                    "Olá! Eu sou Olli, do Owl Bank. Como posso ajudar?",
                    "Hi! I'm Olli from Owl Bank. How can I help you today?",
                    "¡Hola! Soy Olli, de Owl Bank. ¿En qué puedo ayudarle?",
                ),
                triggers: vec![],
            },
            AgentPersona {
                id: "sunny".to_string(),
                name: "Sunny".to_string(),
                role: "onboarding".to_string(),
                prompt: "You guide new customers through opening an Owl Bank account and \
                         activating their first card."
                    .to_string(),
                greetings: greetings(
                    "Oi, aqui é a Sunny. Vou te ajudar com a abertura da sua conta.",
                    "Hi, this is Sunny. I'll help you get your account set up.",
                    "Hola, soy Sunny. Le ayudo a abrir su cuenta.",
                ),
                triggers: vec![
                    "open an account".to_string(),
                    "abrir uma conta".to_string(),
                    "new account".to_string(),
                    "onboarding".to_string(),
                ],
            },
            AgentPersona {
                id: "max".to_string(),
                name: "Max".to_string(),
                role: "wealth".to_string(),
                prompt: "You advise high-value Owl Bank customers on wealth management and \
                         private banking services."
                    .to_string(),
                greetings: greetings(
                    "Olá, aqui é o Max, do atendimento private do Owl Bank.",
                    "Hello, this is Max from Owl Bank private banking.",
                    "Hola, soy Max, de la banca privada de Owl Bank.",
                ),
                triggers: vec![
                    "wealth".to_string(),
                    "private banking".to_string(),
                    "patrimônio".to_string(),
                    "gerente de contas".to_string(),
                ],
            },
            AgentPersona {
                id: "io".to_string(),
                name: "Io".to_string(),
                role: "investments".to_string(),
                prompt: "You explain Owl Bank investment products: funds, fixed income, and \
                         how to start investing. Never give personalized financial advice."
                    .to_string(),
                greetings: greetings(
                    "Olá, aqui é Io, especialista em investimentos do Owl Bank.",
                    "Hi, this is Io, Owl Bank's investments specialist.",
                    "Hola, soy Io, especialista en inversiones de Owl Bank.",
                ),
                triggers: vec![
                    "investment".to_string(),
                    "investments".to_string(),
                    "investir".to_string(),
                    "investimento".to_string(),
                    "fundos".to_string(),
                ],
            },
        ]
    }

    pub fn get(&self, id: &str) -> Option<&AgentPersona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The default persona (first in the directory).
    pub fn default_persona(&self) -> &AgentPersona {
        &self.personas[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentPersona> {
        self.personas.iter()
    }

    /// Select the initial persona for a session from its setup metadata.
    ///
    /// A `persona` custom parameter naming a known persona wins; anything
    /// else gets the default.
    pub fn resolve_initial(&self, setup: &SetupInfo) -> &AgentPersona {
        setup
            .custom_parameters
            .get("persona")
            .and_then(|id| self.get(id))
            .unwrap_or_else(|| self.default_persona())
    }

    /// Find a persona whose trigger phrase occurs in the text, excluding the
    /// currently active one. Returns the persona and the phrase that matched.
    pub fn find_route(&self, text: &str, current: &str) -> Option<(&AgentPersona, String)> {
        let lower = text.to_lowercase();
        for persona in &self.personas {
            if persona.id == current {
                continue;
            }
            for trigger in &persona.triggers {
                if lower.contains(&trigger.to_lowercase()) {
                    return Some((persona, trigger.clone()));
                }
            }
        }
        None
    }

    /// Assemble the system prompt for a persona, language, and optional
    /// customer personalization block.
    pub fn system_prompt(
        &self,
        persona: &AgentPersona,
        language: LanguageTag,
        personalization: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "You are {}, a {} support agent at Owl Bank.\n{}",
            persona.name, persona.role, persona.prompt
        );

        if let Some(block) = personalization {
            prompt.push_str("\n\n");
            prompt.push_str(block);
        }

        prompt.push_str(&format!(
            "\n\nYou are talking to a customer through a phone call. Speak in {language}, \
             but respect the customer's request if they ask to switch language. Respond \
             conversationally. Avoid special characters or emojis. Optimize responses for \
             text to speech."
        ));

        let rules: Vec<String> = self
            .personas
            .iter()
            .filter(|p| p.id != persona.id && !p.triggers.is_empty())
            .map(|p| {
                format!(
                    "- If the customer mentions: {}, route to {} (role: {})",
                    p.triggers.join(", "),
                    p.id,
                    p.role
                )
            })
            .collect();

        if !rules.is_empty() {
            prompt.push_str(&format!(
                "\n\nIf any of the following topics arise, provide a helpful response first, \
                 then end your message with {ROUTE_DIRECTIVE}<agent-id>:\n{}\n\
                 The routing command {ROUTE_DIRECTIVE}<agent-id> will never be spoken to the \
                 customer.",
                rules.join("\n")
            ));
        }

        prompt
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new(Vec::new()).expect("built-in personas are valid")
    }
}
