//! Speakable output chunks.
//!
//! A chunk is a unit of text ready for the transport's TTS, aligned to
//! sentence boundaries by the utterance chunker. Concatenating all chunks of
//! one model turn, in emission order, reproduces the turn's spoken text
//! exactly.

use serde::{Deserialize, Serialize};

use crate::lang::LanguageTag;

/// A unit of output ready to speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEvent {
    pub text: String,
    pub language: LanguageTag,
    /// True for the last chunk of a turn.
    pub last: bool,
}

impl ChunkEvent {
    pub fn partial(text: impl Into<String>, language: LanguageTag) -> Self {
        Self {
            text: text.into(),
            language,
            last: false,
        }
    }

    pub fn last(text: impl Into<String>, language: LanguageTag) -> Self {
        Self {
            text: text.into(),
            language,
            last: true,
        }
    }
}
