use anyhow::{Context, Result};
use jwt_simple::prelude::*;
use std::sync::Arc;

/// Issues and verifies the HS256 session tokens the dashboard carries in its
/// session cookie. Cheap to clone (Arc inside) and shared across workers as
/// application data.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    key: HS256Key,
    subject: String,
    validity: Duration,
    time_tolerance: Duration,
}

impl TokenManager {
    /// Session tokens expire after two hours; clock skew between the service
    /// and the browser is tolerated up to fifteen minutes.
    pub fn new(secret: &str) -> Self {
        Self::with_validity(secret, Duration::from_hours(2))
    }

    pub fn with_validity(secret: &str, validity: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: HS256Key::from_bytes(secret.as_bytes()),
                subject: env!("CARGO_PKG_NAME").to_string(),
                validity,
                time_tolerance: Duration::from_mins(15),
            }),
        }
    }

    pub fn create_token(&self) -> Result<String> {
        let claims = Claims::create(self.inner.validity).with_subject(&self.inner.subject);

        self.inner
            .key
            .authenticate(claims)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to sign session token")
    }

    /// Checks signature, expiry, maximum age and the subject claim.
    pub fn verify_token(&self, token: &str) -> bool {
        let options = VerificationOptions {
            accept_future: true,
            time_tolerance: Some(self.inner.time_tolerance),
            max_validity: Some(self.inner.validity),
            required_subject: Some(self.inner.subject.clone()),
            ..Default::default()
        };

        self.inner
            .key
            .verify_token::<NoCustomClaims>(token, Some(options))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // jwt-simple refuses HS256 keys below 96 bits, so test secrets must be
    // at least 12 bytes
    const TEST_SECRET: &str = "unit-test-session-secret";

    #[test]
    fn issued_token_verifies() {
        let manager = TokenManager::new(TEST_SECRET);
        let token = manager.create_token().unwrap();

        assert!(manager.verify_token(&token));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let manager = TokenManager::new(TEST_SECRET);

        assert!(!manager.verify_token(""));
        assert!(!manager.verify_token("invalid.token.here"));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = TokenManager::new("first-session-secret")
            .create_token()
            .unwrap();

        assert!(!TokenManager::new("second-session-secret").verify_token(&token));
    }

    #[test]
    fn subject_is_required() {
        // A token signed with the right key but no subject claim must fail
        let manager = TokenManager::new(TEST_SECRET);
        let key = HS256Key::from_bytes(TEST_SECRET.as_bytes());
        let bare = key
            .authenticate(Claims::create(Duration::from_hours(2)))
            .unwrap();

        assert!(!manager.verify_token(&bare));
    }

    #[test]
    fn weak_secret_cannot_sign() {
        let manager = TokenManager::new("short");

        assert!(manager.create_token().is_err());
    }
}
