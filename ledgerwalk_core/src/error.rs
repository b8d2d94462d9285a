use std::error::Error as StdError;
use std::fmt;

/// Common error type for `ledgerwalk_core`.
///
/// Storage backends map their native constraint failures onto `Conflict`
/// (uniqueness) and `ReferentialIntegrity` (foreign keys) so the reconcilers
/// can treat them as per-record conditions rather than run failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "ledgerwalk.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_referential_integrity(&self) -> bool {
        matches!(self, Error::ReferentialIntegrity(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the remote API gateway.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The credential was rejected. Forwarded to the invalidation handler.
    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),

    /// Network or service fault; the next sweep retries naturally.
    #[error("transient gateway failure: {0}")]
    Transient(String),
}

impl GatewayError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn auth_failure(&self) -> Option<&AuthFailure> {
        match self {
            GatewayError::Authentication(f) => Some(f),
            GatewayError::Transient(_) => None,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Why the remote service rejected a credential.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AuthFailureKind {
    /// Key id / verification code pair is unknown.
    InvalidKey,
    /// Key existed but is no longer valid.
    Expired,
    /// Key is valid but lacks access to the requested sheet.
    AccessDenied,
    /// Rejected for a reason that may clear on its own (e.g. temporarily banned).
    Temporary,
}

impl AuthFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailureKind::InvalidKey => "invalid_key",
            AuthFailureKind::Expired => "expired",
            AuthFailureKind::AccessDenied => "access_denied",
            AuthFailureKind::Temporary => "temporary",
        }
    }

    /// Whether the credential should stop being used until fixed externally.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, AuthFailureKind::Temporary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub kind: AuthFailureKind,
    /// Remote error code, when the service supplied one.
    pub code: Option<i64>,
    pub message: String,
}

impl AuthFailure {
    pub fn new(kind: AuthFailureKind, code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code}): {}", self.kind.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_auth_failures_are_not_permanent() {
        assert!(!AuthFailureKind::Temporary.is_permanent());
        assert!(AuthFailureKind::Expired.is_permanent());
        assert!(AuthFailureKind::InvalidKey.is_permanent());
    }

    #[test]
    fn gateway_errors_convert_into_core_errors() {
        let err: Error = GatewayError::transient("connection reset").into();
        assert!(matches!(err, Error::Gateway(GatewayError::Transient(_))));
        assert_eq!(
            err.to_string(),
            "transient gateway failure: connection reset"
        );
    }

    #[test]
    fn auth_failure_display_includes_code() {
        let f = AuthFailure::new(AuthFailureKind::Expired, Some(222), "key has expired");
        assert_eq!(f.to_string(), "expired (code 222): key has expired");
    }
}
