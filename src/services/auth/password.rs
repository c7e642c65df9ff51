//! Dashboard password service
//!
//! The single operator password is kept as an argon2 hash in a file under the
//! data directory. Writes go through a temp file and rename, and the stored
//! hash is verified by validating the plaintext against it before the write
//! counts as done.

use crate::config::AppConfig;
use anyhow::{Context, Result, anyhow, ensure};
use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use log::{debug, warn};
use std::path::Path;

#[cfg(any(test, feature = "mock"))]
use std::sync::{LazyLock, Mutex, MutexGuard};

#[cfg(any(test, feature = "mock"))]
#[allow(dead_code)]
static PASSWORD_FILE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

const STORE_RETRIES: u32 = 3;

pub struct PasswordService;

impl PasswordService {
    /// Tests that touch the password file must serialize through this lock.
    #[cfg(any(test, feature = "mock"))]
    #[allow(dead_code)]
    pub fn lock_for_test() -> MutexGuard<'static, ()> {
        PASSWORD_FILE_LOCK.lock().unwrap()
    }

    /// Validate a password against the stored hash
    pub fn validate_password(password: &str) -> Result<()> {
        debug!("validate_password() called");
        ensure!(!password.is_empty(), "failed to validate password: empty");

        let password_file = &AppConfig::get().paths.password_file;
        let stored =
            std::fs::read_to_string(password_file).context("failed to read password file")?;

        ensure!(
            !stored.is_empty(),
            "failed to validate password: hash is empty"
        );

        let parsed = PasswordHash::new(&stored)
            .map_err(|e| anyhow!(e))
            .context("failed to parse password hash")?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|e| anyhow!(e))
            .context("failed to verify password")
    }

    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!(e))
            .context("failed to hash password")
    }

    fn write_hash_atomically(password_file: &Path, hash: &str) -> Result<()> {
        use std::io::Write;

        let temp_path = password_file.with_extension("tmp");
        let mut file =
            std::fs::File::create(&temp_path).context("failed to create temp password file")?;

        file.write_all(hash.as_bytes())
            .context("failed to write password file")?;
        file.sync_all().context("failed to sync password file")?;

        std::fs::rename(&temp_path, password_file).context("failed to replace password file")
    }

    /// Store or update the operator password
    ///
    /// Retries a few times to ride out transient filesystem errors; each
    /// attempt is only accepted once the plaintext validates against the
    /// freshly stored hash.
    pub fn store_or_update_password(password: &str) -> Result<()> {
        debug!("store_or_update_password() called");

        let password_file = &AppConfig::get().paths.password_file;
        let hash = Self::hash_password(password)?;

        let mut last_error = anyhow!("unknown error");

        for attempt in 1..=STORE_RETRIES {
            let result = Self::write_hash_atomically(password_file, &hash)
                .and_then(|()| {
                    Self::validate_password(password).context("failed to verify stored password")
                });

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("store_or_update_password attempt {attempt} failed: {e:#}");
                    last_error = e;
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
            }
        }

        Err(last_error).context("store_or_update_password failed after retries")
    }

    /// Check if a password has been set
    pub fn password_exists() -> bool {
        AppConfig::get()
            .paths
            .password_file
            .try_exists()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_argon2_strings() {
        let hash = PasswordService::hash_password("testpassword").unwrap();
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn hashing_salts_per_call() {
        let first = PasswordService::hash_password("testpassword").unwrap();
        let second = PasswordService::hash_password("testpassword").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn stored_password_validates_and_wrong_one_does_not() {
        let _lock = PasswordService::lock_for_test();

        let password_file = &AppConfig::get().paths.password_file;
        let _ = std::fs::remove_file(password_file);
        assert!(!PasswordService::password_exists());

        PasswordService::store_or_update_password("testpass").unwrap();

        assert!(PasswordService::password_exists());
        PasswordService::validate_password("testpass").unwrap();
        assert!(PasswordService::validate_password("wrongpass").is_err());
        assert!(PasswordService::validate_password("").is_err());

        let _ = std::fs::remove_file(password_file);
    }
}
