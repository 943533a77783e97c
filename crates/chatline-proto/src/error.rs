//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding protocol lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line is not valid UTF-8
    #[error("garbled line: not valid UTF-8")]
    Garbled,

    /// A command was sent without a required argument
    #[error("missing argument for `{command}`")]
    MissingArgument {
        /// Command word that was incomplete
        command: &'static str,
    },

    /// `chat` line without an opening and closing quote
    #[error("chat message is not enclosed in quotes")]
    UnquotedMessage,

    /// Server line that does not match the expected event format
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl ProtocolError {
    /// Returns true if the error means the byte stream itself is unusable.
    ///
    /// Framing errors end the connection in every state. Other errors are
    /// judged by the caller in the context of the command that raised them.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Garbled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_garbled_lines_are_framing_errors() {
        assert!(ProtocolError::Garbled.is_framing());
        assert!(!ProtocolError::UnquotedMessage.is_framing());
        assert!(!ProtocolError::MissingArgument { command: "user" }.is_framing());
        assert!(!ProtocolError::MalformedEvent("x".into()).is_framing());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::MissingArgument { command: "user" }.to_string(),
            "missing argument for `user`"
        );
        assert_eq!(
            ProtocolError::UnquotedMessage.to_string(),
            "chat message is not enclosed in quotes"
        );
    }
}
