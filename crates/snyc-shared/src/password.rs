//! Password hashing with bcrypt.
//!
//! Both calls are CPU bound by design of the algorithm; async callers
//! should run them on a blocking thread.

use crate::constants::MIN_PASSWORD_COST;
use crate::error::PasswordError;

/// Hash a password with a fresh salt at the given work factor.
///
/// Output is the standard modular-crypt string (`$2b$<cost>$...`), so the
/// cost travels with the hash and verification needs no configuration.
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost.max(MIN_PASSWORD_COST))
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    bcrypt::verify(password, stored).map_err(|_| PasswordError::MalformedHash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_correct_password() {
        let stored = hash_password("correct horse", MIN_PASSWORD_COST).unwrap();
        assert!(verify_password("correct horse", &stored).unwrap());
        assert!(!verify_password("wrong horse", &stored).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(
            hash_password("same", MIN_PASSWORD_COST).unwrap(),
            hash_password("same", MIN_PASSWORD_COST).unwrap()
        );
    }

    #[test]
    fn test_cost_is_recorded_in_hash() {
        let stored = hash_password("pw", 5).unwrap();
        assert!(stored.starts_with("$2b$05$"));

        // Below bcrypt's floor is raised rather than rejected.
        let floored = hash_password("pw", 1).unwrap();
        assert!(floored.starts_with("$2b$04$"));
    }

    #[test]
    fn test_malformed_hash() {
        assert_eq!(
            verify_password("x", "no-separator"),
            Err(PasswordError::MalformedHash)
        );
        assert_eq!(
            verify_password("x", "zz$zz"),
            Err(PasswordError::MalformedHash)
        );
    }
}
