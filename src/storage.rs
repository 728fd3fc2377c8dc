//! Secret storage for PMS credentials using the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS Keychain, and on Linux the kernel keyring. Keys are namespaced per
//! hotel, e.g. `pms_api_key.h1`.

use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "minibar-sync";

pub const KEY_PMS_API_KEY: &str = "pms_api_key";
pub const KEY_PMS_BASE_URL: &str = "pms_base_url";

/// Credential key for a given hotel.
pub fn hotel_key(base: &str, hotel_id: &str) -> String {
    format!("{base}.{}", hotel_id.trim())
}

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_hotel_key_is_namespaced() {
        assert_eq!(hotel_key(KEY_PMS_API_KEY, " h1 "), "pms_api_key.h1");
    }

    #[test]
    #[serial]
    fn test_missing_credential_reads_as_none() {
        let key = hotel_key(KEY_PMS_API_KEY, "hotel-that-does-not-exist");
        let _ = delete_credential(&key);
        assert!(get_credential(&key).is_none());
    }
}
