use mcp_types::error_codes;
use mcp_types::JSONRPCErrorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Sub-codes for [`ProxyError::Persona`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaErrorCode {
    PersonaNotFound,
    ActivationFailed,
    ToolsetNotFound,
    ValidationFailed,
    McpConfigConflict,
}

impl std::fmt::Display for PersonaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PersonaErrorCode::PersonaNotFound => "PERSONA_NOT_FOUND",
            PersonaErrorCode::ActivationFailed => "ACTIVATION_FAILED",
            PersonaErrorCode::ToolsetNotFound => "TOOLSET_NOT_FOUND",
            PersonaErrorCode::ValidationFailed => "VALIDATION_FAILED",
            PersonaErrorCode::McpConfigConflict => "MCP_CONFIG_CONFLICT",
        };
        write!(f, "{s}")
    }
}

/// The proxy's error taxonomy. Every variant knows whether it is
/// retryable so the retry/circuit-breaker/fallback chain in this crate can
/// treat `ProxyError` uniformly without the caller re-deriving retryability
/// from the variant shape.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection error: {message}")]
    Connection { message: String, retryable: bool },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("server '{server}' unavailable: {reason}")]
    ServerUnavailable { server: String, reason: String },

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("persona error [{code}]: {message}")]
    Persona {
        code: PersonaErrorCode,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn connection(message: impl Into<String>) -> Self {
        ProxyError::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn connection_fatal(message: impl Into<String>) -> Self {
        ProxyError::Connection {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn persona(code: PersonaErrorCode, message: impl Into<String>) -> Self {
        ProxyError::Persona {
            code,
            message: message.into(),
        }
    }

    /// Whether the retry policy should attempt this operation again.
    pub fn retryable(&self) -> bool {
        match self {
            ProxyError::Connection { retryable, .. } => *retryable,
            ProxyError::Timeout(_) => true,
            ProxyError::ServerUnavailable { .. } => true,
            ProxyError::Configuration(_)
            | ProxyError::Validation(_)
            | ProxyError::ToolNotFound(_)
            | ProxyError::Persona { .. }
            | ProxyError::Internal(_) => false,
        }
    }

    /// Maps this error to a JSON-RPC error object for protocol-level
    /// failures (as opposed to in-band `isError` tool results, which the
    /// router/fallback chain construct separately).
    pub fn to_jsonrpc_error(&self) -> JSONRPCErrorError {
        let code = match self {
            ProxyError::ToolNotFound(_) => error_codes::METHOD_NOT_FOUND,
            ProxyError::Validation(_) => error_codes::INVALID_PARAMS,
            ProxyError::Internal(_) => error_codes::INTERNAL_ERROR,
            _ => error_codes::SERVER_ERROR_START,
        };
        JSONRPCErrorError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_defaults_retryable() {
        let err = ProxyError::connection("boom");
        assert!(err.retryable());
    }

    #[test]
    fn configuration_error_never_retryable() {
        let err = ProxyError::Configuration("bad toml".into());
        assert!(!err.retryable());
    }

    #[test]
    fn tool_not_found_maps_to_method_not_found() {
        let err = ProxyError::ToolNotFound("git.status".into());
        assert_eq!(err.to_jsonrpc_error().code, error_codes::METHOD_NOT_FOUND);
    }
}
