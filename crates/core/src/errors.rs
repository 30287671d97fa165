use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown value `{value}` for {field}")]
    UnknownVariant { field: &'static str, value: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("no active conversation for phone {0}")]
    NoActiveConversation(String),
}

impl ApplicationError {
    /// Message safe to surface to the customer. Internal detail stays in
    /// the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Domain(_) => "Não consegui processar sua mensagem. Pode tentar de novo?",
            Self::Persistence(_) | Self::Integration(_) => {
                "Estamos com uma instabilidade no momento. Tente novamente em instantes."
            }
            Self::NoActiveConversation(_) => "Não encontrei uma conversa ativa para esse número.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationError, DomainError};

    #[test]
    fn domain_error_wraps_into_application_error() {
        let error = ApplicationError::from(DomainError::InvariantViolation(
            "missing customer name".to_string(),
        ));
        assert!(matches!(error, ApplicationError::Domain(_)));
    }

    #[test]
    fn persistence_error_has_user_safe_message() {
        let error = ApplicationError::Persistence("database lock timeout".to_string());
        assert!(!error.user_message().contains("database"));
    }
}
