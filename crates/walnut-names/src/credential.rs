// Holder credentials and their stored digests.
//
// Raw PINs, holder identities and recovery answers never reach storage; only
// salted, domain-separated SHA-256 digests do.

use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};

use crate::errors::ValidationError;
use crate::policy::Pin;

/// Characters of user-agent kept in a client holder identity
const USER_AGENT_PREFIX_LEN: usize = 20;

const PIN_DOMAIN: &str = "pin";
const CLIENT_DOMAIN: &str = "client";
const ANSWER_DOMAIN: &str = "answer";

/// What a holder presents to place or confirm a hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Pin(Pin),
    /// `"{ip}:{user-agent prefix}"` derived from transport metadata
    Client(String),
}

impl Credential {
    pub fn pin(raw: &str) -> Result<Self, ValidationError> {
        Ok(Credential::Pin(Pin::parse(raw)?))
    }

    pub fn client(ip: &str, user_agent: &str) -> Self {
        let ua: String = user_agent.chars().take(USER_AGENT_PREFIX_LEN).collect();
        Credential::Client(format!("{}:{}", ip, ua))
    }

    pub fn is_pin(&self) -> bool {
        matches!(self, Credential::Pin(_))
    }
}

/// Fixed-width hex digest of a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHash(String);

impl CredentialHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a stored digest
    pub fn matches(&self, stored: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), stored.as_bytes())
    }
}

#[derive(Debug, Clone)]
pub struct CredentialHasher {
    salt: String,
}

impl CredentialHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        CredentialHasher { salt: salt.into() }
    }

    fn digest(&self, domain: &str, value: &str) -> CredentialHash {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update([0x1fu8]);
        hasher.update(domain.as_bytes());
        hasher.update([0x1fu8]);
        hasher.update(value.as_bytes());
        CredentialHash(hex::encode(hasher.finalize()))
    }

    pub fn hash_pin(&self, pin: &Pin) -> CredentialHash {
        self.digest(PIN_DOMAIN, pin.digits())
    }

    pub fn hash_credential(&self, credential: &Credential) -> CredentialHash {
        match credential {
            Credential::Pin(pin) => self.hash_pin(pin),
            Credential::Client(identity) => self.digest(CLIENT_DOMAIN, identity),
        }
    }

    /// Answers compare case- and whitespace-insensitively
    pub fn hash_answer(&self, answer: &str) -> CredentialHash {
        self.digest(ANSWER_DOMAIN, &answer.trim().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests_are_fixed_width_and_hide_input() {
        let hasher = CredentialHasher::new("salt");
        let hash = hasher.hash_credential(&Credential::pin("1234").unwrap());
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().bytes().all(|b| b.is_ascii_hexdigit()));

        let client = Credential::client("10.0.0.1", "Mozilla/5.0 (X11; Linux x86_64)");
        assert_eq!(client, Credential::Client("10.0.0.1:Mozilla/5.0 (X11; Li".into()));
        let hash = hasher.hash_credential(&client);
        assert_eq!(hash.as_str().len(), 64);
        assert!(!hash.as_str().contains("10.0.0.1"));
    }

    #[test]
    fn test_digests_are_deterministic_and_domain_separated() {
        let hasher = CredentialHasher::new("salt");
        let pin = Credential::pin("1234").unwrap();
        assert_eq!(hasher.hash_credential(&pin), hasher.hash_credential(&pin));
        assert_ne!(
            hasher.hash_credential(&pin),
            hasher.hash_credential(&Credential::Client("1234".into()))
        );
        assert_ne!(
            hasher.hash_credential(&pin),
            CredentialHasher::new("pepper").hash_credential(&pin)
        );
    }

    #[test]
    fn test_answers_ignore_case_and_padding() {
        let hasher = CredentialHasher::new("salt");
        let stored = hasher.hash_answer("Rex");
        assert!(hasher.hash_answer("  rex ").matches(stored.as_str()));
        assert!(!hasher.hash_answer("max").matches(stored.as_str()));
    }
}
