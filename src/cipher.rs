//! Encryption capability for stored credentials.
//!
//! The engine never owns key material. A `Cipher` is constructed once at
//! process start and passed by reference to whatever needs it.

use crate::error::{Error, Result};

/// Symmetric encryption of stored passwords.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plain_text: &str) -> Result<String>;

    fn decrypt(&self, cipher_text: &str) -> Result<String>;

    /// Whether `cipher_text` is in a format this cipher understands.
    ///
    /// Lets callers tell legacy from current formats without an error.
    fn can_decrypt(&self, cipher_text: &str) -> bool;
}

/// A cipher for deployments that configure no key: every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCipher;

impl Cipher for DisabledCipher {
    fn encrypt(&self, _plain_text: &str) -> Result<String> {
        Err(Error::Crypto {
            message: "no cipher key configured".to_string(),
        })
    }

    fn decrypt(&self, _cipher_text: &str) -> Result<String> {
        Err(Error::Crypto {
            message: "no cipher key configured".to_string(),
        })
    }

    fn can_decrypt(&self, _cipher_text: &str) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reversible stand-in used by unit tests: `enc:` + reversed text.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ReversingCipher;

    impl Cipher for ReversingCipher {
        fn encrypt(&self, plain_text: &str) -> Result<String> {
            Ok(format!("enc:{}", plain_text.chars().rev().collect::<String>()))
        }

        fn decrypt(&self, cipher_text: &str) -> Result<String> {
            cipher_text
                .strip_prefix("enc:")
                .map(|s| s.chars().rev().collect())
                .ok_or_else(|| Error::Crypto {
                    message: "unrecognised cipher text".to_string(),
                })
        }

        fn can_decrypt(&self, cipher_text: &str) -> bool {
            cipher_text.starts_with("enc:")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ReversingCipher;
    use super::*;

    #[test]
    fn test_disabled_cipher_fails() {
        assert!(matches!(
            DisabledCipher.decrypt("abc"),
            Err(Error::Crypto { .. })
        ));
        assert!(!DisabledCipher.can_decrypt("abc"));
    }

    #[test]
    fn test_reversing_cipher_round_trip() {
        let encrypted = ReversingCipher.encrypt("secret").unwrap();
        assert!(ReversingCipher.can_decrypt(&encrypted));
        assert_eq!(ReversingCipher.decrypt(&encrypted).unwrap(), "secret");
        assert!(!ReversingCipher.can_decrypt("legacy-format"));
    }
}
