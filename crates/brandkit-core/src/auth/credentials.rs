//! Remembered sign-in passwords for `brandkit login --remember`.
//!
//! One keychain entry per account under the `brandkit` service, keyed by
//! the sign-in email. Emails are trimmed and lowercased first, so
//! `Editor@Example.com` and `editor@example.com` share an entry.

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "brandkit";

/// Sign-in passwords kept in the OS keychain, one per email.
///
/// Only the password is stored; tokens live in the session file.
pub struct PasswordVault;

impl PasswordVault {
    /// Remember `password` for `email`, replacing any earlier one
    pub fn store(email: &str, password: &str) -> Result<()> {
        Self::entry(email)?
            .set_password(password)
            .with_context(|| format!("Failed to remember password for {}", account_for(email)))
    }

    /// The password remembered for `email`
    pub fn get_password(email: &str) -> Result<String> {
        Self::entry(email)?
            .get_password()
            .with_context(|| format!("No usable password remembered for {}", account_for(email)))
    }

    /// Forget the password remembered for `email`
    pub fn delete(email: &str) -> Result<()> {
        Self::entry(email)?
            .delete_credential()
            .with_context(|| format!("Failed to forget password for {}", account_for(email)))
    }

    /// Whether a password is remembered for `email`; used to offer it at
    /// the login prompt
    pub fn has_credentials(email: &str) -> bool {
        Self::entry(email)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }

    fn entry(email: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &account_for(email)).context("Failed to open keychain entry")
    }
}

/// Keychain account name for a sign-in email
fn account_for(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_ignores_case_and_whitespace() {
        assert_eq!(account_for(" Editor@Example.com "), "editor@example.com");
        assert_eq!(account_for("editor@example.com"), "editor@example.com");
    }
}
