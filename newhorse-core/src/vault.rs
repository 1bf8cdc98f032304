// ABOUTME: Credential vault - Fernet encryption, decryption, and masking of API keys.
// ABOUTME: Without a valid key it runs in pass-through mode; decrypt never fails.

use fernet::Fernet;
use std::sync::Arc;

const MASK_VISIBLE_CHARS: usize = 12;

/// Encrypts provider credentials at rest.
///
/// Tokens are standard Fernet (AES-128-CBC + HMAC-SHA256), so rows written by
/// any other Fernet implementation with the same key decrypt here too.
#[derive(Clone)]
pub struct Vault {
    fernet: Option<Arc<Fernet>>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Vault {
    /// Build a vault from the configured key.
    ///
    /// `None` or an unparseable key yields a pass-through vault (the latter
    /// with a warning).
    pub fn new(key: Option<&str>) -> Self {
        let fernet = match key.map(str::trim).filter(|k| !k.is_empty()) {
            None => {
                tracing::warn!("No encryption key configured, credentials are stored in plain text");
                None
            }
            Some(key) => {
                let fernet = Fernet::new(key);
                if fernet.is_none() {
                    tracing::warn!(
                        "Invalid encryption key (expected 32 url-safe base64 bytes), credentials are stored in plain text"
                    );
                }
                fernet
            }
        };
        Self {
            fernet: fernet.map(Arc::new),
        }
    }

    /// A vault that never encrypts
    pub fn passthrough() -> Self {
        Self { fernet: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.fernet.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        match self.fernet {
            Some(ref fernet) => fernet.encrypt(plaintext.as_bytes()),
            None => plaintext.to_string(),
        }
    }

    /// Decrypt a stored value. Anything that is not a valid token for this
    /// key (legacy plain text, another key's token) comes back unchanged.
    pub fn decrypt(&self, ciphertext: &str) -> String {
        if ciphertext.is_empty() {
            return String::new();
        }
        let Some(ref fernet) = self.fernet else {
            return ciphertext.to_string();
        };
        match fernet.decrypt(ciphertext) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(plain) => plain,
                Err(_) => {
                    tracing::debug!("Decrypted credential is not UTF-8, passing stored value through");
                    ciphertext.to_string()
                }
            },
            Err(_) => ciphertext.to_string(),
        }
    }
}

/// Display form of a credential: first 12 characters then `***`.
/// Keys of 12 characters or fewer become exactly `***`.
pub fn mask(plaintext: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }
    if plaintext.chars().count() <= MASK_VISIBLE_CHARS {
        return "***".to_string();
    }
    let head: String = plaintext.chars().take(MASK_VISIBLE_CHARS).collect();
    format!("{}***", head)
}

/// Generate a fresh key suitable for `ENCRYPTION_KEY`
pub fn generate_key() -> String {
    Fernet::generate_key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_key() {
        let vault = Vault::new(Some(&generate_key()));
        assert!(vault.is_enabled());

        let token = vault.encrypt("sk-live-abcdef123456");
        assert_ne!(token, "sk-live-abcdef123456");
        assert_eq!(vault.decrypt(&token), "sk-live-abcdef123456");
    }

    #[test]
    fn test_legacy_plaintext_passes_through() {
        let vault = Vault::new(Some(&generate_key()));
        assert_eq!(vault.decrypt("sk-plain-legacy"), "sk-plain-legacy");
    }

    #[test]
    fn test_other_keys_token_passes_through() {
        let a = Vault::new(Some(&generate_key()));
        let b = Vault::new(Some(&generate_key()));
        let token = a.encrypt("secret");
        assert_eq!(b.decrypt(&token), token);
    }

    #[test]
    fn test_passthrough_without_key() {
        for vault in [Vault::new(None), Vault::new(Some("not-a-fernet-key"))] {
            assert!(!vault.is_enabled());
            assert_eq!(vault.encrypt("sk-abc"), "sk-abc");
            assert_eq!(vault.decrypt("sk-abc"), "sk-abc");
        }
    }

    #[test]
    fn test_empty_input() {
        let vault = Vault::new(Some(&generate_key()));
        assert_eq!(vault.encrypt(""), "");
        assert_eq!(vault.decrypt(""), "");
        assert_eq!(mask(""), "");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("sk-ant-api03-abcdefghijkl"), "sk-ant-api03***");
        assert_eq!(mask("123456789012"), "***");
        assert_eq!(mask("short"), "***");
    }

    #[test]
    fn test_debug_hides_key() {
        let key = generate_key();
        let vault = Vault::new(Some(&key));
        assert!(!format!("{:?}", vault).contains(&key));
    }
}
