//! Mapping of remote error codes onto gateway failures.
//!
//! 1xx codes are request problems (bad cursor, data already served) and 5xx/9xx
//! are service-side; both are retried by the next sweep. 2xx codes concern the
//! key itself.

use ledgerwalk_core::error::{AuthFailure, AuthFailureKind, GatewayError};

/// Classify an error element returned in a response body.
pub fn classify(code: i64, message: &str) -> GatewayError {
    let kind = match code {
        106 | 202 | 203 | 204 | 205 | 210 | 211 | 212 | 223 => Some(AuthFailureKind::InvalidKey),
        222 => Some(AuthFailureKind::Expired),
        200 | 206 | 207 | 208 | 209 | 220 | 221 | 224 => Some(AuthFailureKind::AccessDenied),
        // Temporarily banned for too many errors: the key is fine, we are not.
        904 => Some(AuthFailureKind::Temporary),
        _ => None,
    };
    match kind {
        Some(kind) => GatewayError::Authentication(AuthFailure::new(kind, Some(code), message)),
        None => GatewayError::transient(format!("remote error {code}: {message}")),
    }
}

/// Classify an HTTP response that did not carry a parseable error element.
pub fn classify_status(status: reqwest::StatusCode) -> GatewayError {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return GatewayError::Authentication(AuthFailure::new(
            AuthFailureKind::InvalidKey,
            None,
            "credential rejected",
        ));
    }
    if status == reqwest::StatusCode::FORBIDDEN {
        return GatewayError::Authentication(AuthFailure::new(
            AuthFailureKind::AccessDenied,
            None,
            "access denied",
        ));
    }
    GatewayError::transient(format!("unexpected http status {status}"))
}

pub fn transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::transient(format!("request timed out: {e}"))
    } else {
        GatewayError::transient(format!("request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(err: &GatewayError) -> Option<AuthFailureKind> {
        err.auth_failure().map(|f| f.kind)
    }

    #[test]
    fn key_codes_are_authentication_failures() {
        let cases = [
            (203, AuthFailureKind::InvalidKey),
            (223, AuthFailureKind::InvalidKey),
            (222, AuthFailureKind::Expired),
            (221, AuthFailureKind::AccessDenied),
            (904, AuthFailureKind::Temporary),
        ];
        for (code, expected) in cases {
            assert_eq!(kind_of(&classify(code, "rejected")), Some(expected), "code {code}");
        }
    }

    #[test]
    fn service_codes_are_transient() {
        for code in [101, 520, 901, 902] {
            assert!(
                matches!(classify(code, "try later"), GatewayError::Transient(_)),
                "code {code}"
            );
        }
    }

    #[test]
    fn auth_failure_keeps_remote_code() {
        let err = classify(222, "Key has expired.");
        let failure = err.auth_failure().unwrap();
        assert_eq!(failure.code, Some(222));
        assert_eq!(failure.message, "Key has expired.");
    }

    #[test]
    fn http_status_fallback() {
        assert_eq!(
            kind_of(&classify_status(reqwest::StatusCode::FORBIDDEN)),
            Some(AuthFailureKind::AccessDenied)
        );
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            GatewayError::Transient(_)
        ));
    }
}
