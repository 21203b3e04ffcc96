//! # Flow Error Types Module
//!
//! This module defines the error taxonomy shared by every conversation flow.
//! User-visible messages state the failure category only and never leak
//! internal identifiers or cross-tenant existence information.

/// Failure categories for conversation flows
#[derive(Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Caller is unknown or its role is not permitted
    Unauthorized,
    /// Invitation token is absent or expired (indistinguishable on purpose)
    TokenInvalid,
    /// Caller already has a user record
    AlreadyRegistered,
    /// Entity missing or owned by another restaurant (reported identically)
    NotFound,
    /// Store or transport unavailable
    Infra(String),
    /// Malformed input; the flow re-prompts in the same state
    Validation(String),
}

impl FlowError {
    /// Message shown to the caller for this failure
    pub fn user_message(&self) -> String {
        match self {
            FlowError::Unauthorized => {
                "You are not authorized for this action. Contact your administrator.".to_string()
            }
            FlowError::TokenInvalid => "This invitation link is invalid or has expired.".to_string(),
            FlowError::AlreadyRegistered => "You are already registered.".to_string(),
            FlowError::NotFound => "Not found or no access.".to_string(),
            FlowError::Infra(_) => "Something went wrong. Please try again later.".to_string(),
            FlowError::Validation(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::Unauthorized => write!(f, "Authorization error"),
            FlowError::TokenInvalid => write!(f, "Token invalid or expired"),
            FlowError::AlreadyRegistered => write!(f, "Duplicate registration"),
            FlowError::NotFound => write!(f, "Entity not found"),
            FlowError::Infra(msg) => write!(f, "Infrastructure error: {msg}"),
            FlowError::Validation(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Infra(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_state_category_only() {
        // Cross-tenant access and a genuinely missing row must read the same
        let missing = FlowError::NotFound.user_message();
        assert!(!missing.contains("restaurant"));
        assert!(!missing.contains("id"));

        // Infra details stay out of the user-visible text
        let infra = FlowError::Infra("connection refused to 10.0.0.5".to_string());
        assert!(!infra.user_message().contains("10.0.0.5"));
    }

    #[test]
    fn test_display_includes_category() {
        assert_eq!(FlowError::TokenInvalid.to_string(), "Token invalid or expired");
        assert!(FlowError::Validation("bad id".to_string())
            .to_string()
            .starts_with("Validation error"));
    }
}
