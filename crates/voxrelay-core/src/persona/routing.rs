//! Streaming extraction of routing directives from model output.
//!
//! The model signals a handoff by embedding `#route_to:<agent-id>` in its
//! reply. The directive is a control signal, never speech: this filter sits
//! between the model stream and the utterance chunker and removes the marker
//! before any text can be chunked, even when the marker arrives split across
//! several tokens. Text that merely *looks* like the start of a marker is
//! withheld until it is proven one way or the other, then released.

/// The routing marker prefix, as the model is instructed to emit it.
pub const ROUTE_DIRECTIVE: &str = "#route_to:";

fn is_target_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Incremental filter separating speakable text from routing directives.
#[derive(Debug, Default)]
pub struct DirectiveFilter {
    /// Withheld text: a possible marker prefix, or nothing.
    pending: String,
    /// Target id being accumulated after a complete marker prefix.
    capturing: Option<String>,
    /// First completed directive target; later markers are stripped but
    /// their targets ignored.
    directive: Option<String>,
}

impl DirectiveFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns the speakable text this token released.
    pub fn push(&mut self, token: &str) -> String {
        self.pending.push_str(token);
        self.release()
    }

    /// End of stream. Returns any remaining speakable text (a marker prefix
    /// that never completed is speech after all) and the captured directive.
    pub fn finish(mut self) -> (String, Option<String>) {
        if let Some(target) = self.capturing.take() {
            self.complete_target(target);
        }
        (std::mem::take(&mut self.pending), self.directive.take())
    }

    /// The directive seen so far, if one has completed.
    pub fn directive(&self) -> Option<&str> {
        self.directive.as_deref()
    }

    fn complete_target(&mut self, target: String) {
        if !target.is_empty() && self.directive.is_none() {
            self.directive = Some(target);
        }
    }

    fn release(&mut self) -> String {
        let mut out = String::new();
        loop {
            if let Some(mut target) = self.capturing.take() {
                let end = self
                    .pending
                    .find(|c: char| !is_target_char(c))
                    .unwrap_or(self.pending.len());
                target.push_str(&self.pending[..end]);
                self.pending.drain(..end);
                if self.pending.is_empty() {
                    // The id may continue in the next token.
                    self.capturing = Some(target);
                    return out;
                }
                self.complete_target(target);
            }

            match self.pending.find('#') {
                None => {
                    out.push_str(&self.pending);
                    self.pending.clear();
                    return out;
                }
                Some(idx) => {
                    out.push_str(&self.pending[..idx]);
                    self.pending.drain(..idx);

                    if self.pending.len() >= ROUTE_DIRECTIVE.len() {
                        if self.pending.starts_with(ROUTE_DIRECTIVE) {
                            self.pending.drain(..ROUTE_DIRECTIVE.len());
                            self.capturing = Some(String::new());
                        } else {
                            // Just a '#' in speech; release it and rescan.
                            out.push('#');
                            self.pending.drain(..1);
                        }
                    } else if ROUTE_DIRECTIVE.starts_with(self.pending.as_str()) {
                        // Could still become the marker; withhold.
                        return out;
                    } else {
                        out.push('#');
                        self.pending.drain(..1);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tokens: &[&str]) -> (String, Option<String>) {
        let mut filter = DirectiveFilter::new();
        let mut speech = String::new();
        for token in tokens {
            speech.push_str(&filter.push(token));
        }
        let (tail, directive) = filter.finish();
        speech.push_str(&tail);
        (speech, directive)
    }

    #[test]
    fn plain_text_passes_through() {
        let (speech, directive) = run(&["Olá, ", "como posso ajudar?"]);
        assert_eq!(speech, "Olá, como posso ajudar?");
        assert_eq!(directive, None);
    }

    #[test]
    fn directive_at_end_is_stripped() {
        let (speech, directive) = run(&["Vou te transferir. ", "#route_to:sunny"]);
        assert_eq!(speech, "Vou te transferir. ");
        assert_eq!(directive.as_deref(), Some("sunny"));
    }

    #[test]
    fn directive_split_across_tokens() {
        let (speech, directive) = run(&["One moment. #rou", "te_", "to:m", "ax"]);
        assert_eq!(speech, "One moment. ");
        assert_eq!(directive.as_deref(), Some("max"));
    }

    #[test]
    fn directive_mid_text_keeps_surrounding_speech() {
        let (speech, directive) = run(&["Before #route_to:io after."]);
        assert_eq!(speech, "Before  after.");
        assert_eq!(directive.as_deref(), Some("io"));
    }

    #[test]
    fn hash_that_is_not_a_marker_is_spoken() {
        let (speech, directive) = run(&["Your ticket is #12", "34."]);
        assert_eq!(speech, "Your ticket is #1234.");
        assert_eq!(directive, None);
    }

    #[test]
    fn incomplete_marker_prefix_is_released_at_end() {
        let (speech, directive) = run(&["Weird trailing #route_t"]);
        assert_eq!(speech, "Weird trailing #route_t");
        assert_eq!(directive, None);
    }

    #[test]
    fn first_directive_wins() {
        let (speech, directive) = run(&["#route_to:sunny and #route_to:max done"]);
        assert_eq!(speech, " and  done");
        assert_eq!(directive.as_deref(), Some("sunny"));
    }

    #[test]
    fn empty_target_yields_no_directive() {
        let (speech, directive) = run(&["#route_to: nobody"]);
        assert_eq!(speech, " nobody");
        assert_eq!(directive, None);
    }

    #[test]
    fn directive_getter_reports_completion_mid_stream() {
        let mut filter = DirectiveFilter::new();
        filter.push("#route_to:io");
        // Still capturing: the id could continue.
        assert_eq!(filter.directive(), None);
        filter.push(" ");
        assert_eq!(filter.directive(), Some("io"));
    }
}
