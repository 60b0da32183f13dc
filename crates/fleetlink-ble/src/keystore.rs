//! Role-based ECDSA key storage
//!
//! The vehicle authorises a connection by the key it was enrolled with, and
//! different roles (owner, charging manager) carry different authorisation
//! envelopes on the vehicle side. The keystore keeps one P-256 key pair per
//! role under `key/<role>/` and an `active_key.json` pointer naming the role
//! the orchestrator currently uses.
//!
//! Layout:
//!
//! ```text
//! key/
//!   active_key.json          {"role":"owner"}
//!   owner/
//!     private.pem            0600, SEC1 "EC PRIVATE KEY"
//!     public.pem             0644, PKCS#8 "PUBLIC KEY"
//!   charging_manager/
//!     ...
//! ```
//!
//! Older deployments kept a single pair directly at `key/private.pem` /
//! `key/public.pem`; [`KeyStore::migrate_legacy`] moves those into the owner
//! role once, idempotently.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleetlink_core::error::{BridgeError, Result};
use fleetlink_core::vehicle::PrivateKeyPem;

/// Private key file name inside a role directory
const PRIVATE_KEY_FILE: &str = "private.pem";
/// Public key file name inside a role directory
const PUBLIC_KEY_FILE: &str = "public.pem";
/// Active-role pointer file name
const ACTIVE_KEY_FILE: &str = "active_key.json";

/// The closed set of key roles the vehicle understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Full-authorisation owner key
    Owner,
    /// Charging-only key
    ChargingManager,
}

/// All valid roles, in display order
pub const ALL_ROLES: &[KeyRole] = &[KeyRole::Owner, KeyRole::ChargingManager];

impl KeyRole {
    /// Directory / wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Owner => "owner",
            KeyRole::ChargingManager => "charging_manager",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            KeyRole::Owner => "Owner",
            KeyRole::ChargingManager => "Charging Manager",
        }
    }

    /// Validate a role string.
    ///
    /// Rejects anything that is not exactly one of the closed set, and
    /// rejects path-traversal characters before the name ever reaches a
    /// filesystem operation.
    pub fn parse(role: &str) -> Result<Self> {
        if role.is_empty() {
            return Err(BridgeError::InvalidRole("empty role is not valid".to_string()));
        }
        if role.contains("..") || role.contains('/') || role.contains('\\') {
            return Err(BridgeError::InvalidRole(
                "contains path traversal characters".to_string(),
            ));
        }
        if !role
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(BridgeError::InvalidRole(
                "contains unsafe characters".to_string(),
            ));
        }
        match role {
            "owner" => Ok(KeyRole::Owner),
            "charging_manager" => Ok(KeyRole::ChargingManager),
            other => Err(BridgeError::InvalidRole(format!(
                "{other}. Valid roles are: owner, charging_manager"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ActiveKeyConfig {
    role: String,
}

/// Role-based key storage rooted at one directory
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    /// Open a keystore rooted at `root` (usually `key/`). The directory is
    /// created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The keystore root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key file paths for a role string.
    ///
    /// Invalid roles (unknown names, traversal attempts) fall back to the
    /// owner directory with a logged warning, so a hostile role string can
    /// never address a file outside the keystore.
    pub fn key_files(&self, role: &str) -> (PathBuf, PathBuf) {
        let role = match KeyRole::parse(role) {
            Ok(role) => role,
            Err(err) => {
                warn!(%role, %err, "invalid role, defaulting to owner");
                KeyRole::Owner
            }
        };
        self.key_files_for(role)
    }

    fn key_files_for(&self, role: KeyRole) -> (PathBuf, PathBuf) {
        let dir = self.root.join(role.as_str());
        (dir.join(PRIVATE_KEY_FILE), dir.join(PUBLIC_KEY_FILE))
    }

    fn legacy_files(&self) -> (PathBuf, PathBuf) {
        (
            self.root.join(PRIVATE_KEY_FILE),
            self.root.join(PUBLIC_KEY_FILE),
        )
    }

    fn active_key_path(&self) -> PathBuf {
        self.root.join(ACTIVE_KEY_FILE)
    }

    /// The currently active role.
    ///
    /// Resolution order: the `active_key.json` pointer when present and
    /// valid, then owner when any owner key exists, then owner as default.
    pub fn active_role(&self) -> KeyRole {
        if let Ok(data) = fs::read(self.active_key_path()) {
            if let Ok(config) = serde_json::from_slice::<ActiveKeyConfig>(&data) {
                if let Ok(role) = KeyRole::parse(&config.role) {
                    return role;
                }
            }
        }

        let (legacy_private, _) = self.legacy_files();
        if legacy_private.exists() {
            let (owner_private, _) = self.key_files_for(KeyRole::Owner);
            if !owner_private.exists() {
                warn!("legacy keys present but owner keys missing; migration may have failed");
            }
        }
        KeyRole::Owner
    }

    /// Point the orchestrator at a different role's key.
    ///
    /// The role must validate and its key material must exist. Callers must
    /// tear down and re-set-up the orchestrator afterwards to rebind the
    /// session with the new key.
    pub fn set_active_role(&self, role: &str) -> Result<()> {
        let role = KeyRole::parse(role)?;
        let (private, _) = self.key_files_for(role);
        if !private.exists() {
            return Err(BridgeError::KeyNotFound(role.as_str().to_string()));
        }

        fs::create_dir_all(&self.root)?;
        let config = ActiveKeyConfig {
            role: role.as_str().to_string(),
        };
        fs::write(self.active_key_path(), serde_json::to_vec(&config)?)?;
        info!(role = role.as_str(), "active key role set");
        Ok(())
    }

    /// Roles with key material on disk
    pub fn list_roles(&self) -> Vec<KeyRole> {
        ALL_ROLES
            .iter()
            .copied()
            .filter(|role| self.key_files_for(*role).0.exists())
            .collect()
    }

    /// Whether key material exists for a role
    pub fn exists(&self, role: &str) -> bool {
        match KeyRole::parse(role) {
            Ok(role) => self.key_files_for(role).0.exists(),
            Err(_) => false,
        }
    }

    /// Generate a fresh P-256 key pair for a role.
    ///
    /// The private key is written SEC1-PEM with 0600 permissions, the public
    /// key PKCS#8-PEM. Refuses to overwrite existing material.
    pub fn create(&self, role: &str) -> Result<()> {
        let role = KeyRole::parse(role)?;
        let (private_path, public_path) = self.key_files_for(role);

        if private_path.exists() {
            return Err(BridgeError::KeyAlreadyExists(role.as_str().to_string()));
        }
        if let Some(dir) = private_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let secret = SecretKey::random(&mut OsRng);
        let private_pem = secret
            .to_sec1_pem(LineEnding::LF)
            .map_err(|err| BridgeError::InvalidKey(err.to_string()))?;
        let public_pem = secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| BridgeError::InvalidKey(err.to_string()))?;

        write_private(&private_path, private_pem.as_bytes())?;
        fs::write(&public_path, public_pem.as_bytes())?;

        info!(
            role = role.display_name(),
            file = %private_path.display(),
            "ECDSA key pair generated and saved"
        );
        Ok(())
    }

    /// Remove a role's key material, and its directory when empty
    pub fn remove(&self, role: &str) -> Result<()> {
        let role = KeyRole::parse(role)?;
        let (private_path, public_path) = self.key_files_for(role);

        if private_path.exists() {
            fs::remove_file(&private_path)?;
        }
        if public_path.exists() {
            fs::remove_file(&public_path)?;
        }
        if let Some(dir) = private_path.parent() {
            if dir.read_dir().map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(dir);
            }
        }
        Ok(())
    }

    /// Move a pre-role key pair into the owner role.
    ///
    /// Idempotent: a second run is a no-op, and existing owner keys are
    /// never overwritten. Intended to run once at startup; failures should
    /// be logged by the caller, not treated as fatal.
    pub fn migrate_legacy(&self) -> Result<()> {
        let (legacy_private, legacy_public) = self.legacy_files();
        if !legacy_private.exists() {
            return Ok(());
        }

        let (owner_private, owner_public) = self.key_files_for(KeyRole::Owner);
        if owner_private.exists() {
            info!("legacy keys detected but owner keys already exist, skipping migration");
            return Ok(());
        }

        info!("migrating legacy keys to the owner role");
        if let Some(dir) = owner_private.parent() {
            fs::create_dir_all(dir)?;
        }

        let private_data = fs::read(&legacy_private)?;
        let public_data = fs::read(&legacy_public)?;
        write_private(&owner_private, &private_data)?;
        fs::write(&owner_public, &public_data)?;

        self.set_active_role(KeyRole::Owner.as_str())?;

        if let Err(err) = fs::remove_file(&legacy_private) {
            warn!(%err, "failed to remove legacy private key after migration");
        }
        if let Err(err) = fs::remove_file(&legacy_public) {
            warn!(%err, "failed to remove legacy public key after migration");
        }

        info!("legacy keys migrated to the owner role");
        Ok(())
    }

    /// Load and parse-validate the active role's private key
    pub fn load_private_key(&self) -> Result<PrivateKeyPem> {
        let role = self.active_role();
        let (private_path, _) = self.key_files_for(role);
        let pem = fs::read_to_string(&private_path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                BridgeError::KeyNotFound(role.as_str().to_string())
            } else {
                BridgeError::Io(err)
            }
        })?;
        parse_private_pem(&pem)?;
        Ok(PrivateKeyPem::new(pem))
    }

    /// Load and parse-validate the active role's public key PEM bytes
    pub fn load_public_key_pem(&self) -> Result<Vec<u8>> {
        let role = self.active_role();
        let (_, public_path) = self.key_files_for(role);
        let pem = fs::read_to_string(&public_path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                BridgeError::KeyNotFound(role.as_str().to_string())
            } else {
                BridgeError::Io(err)
            }
        })?;
        PublicKey::from_public_key_pem(&pem)
            .map_err(|err| BridgeError::InvalidKey(err.to_string()))?;
        Ok(pem.into_bytes())
    }
}

/// Accept both SEC1 ("EC PRIVATE KEY") and PKCS#8 ("PRIVATE KEY") encodings
fn parse_private_pem(pem: &str) -> Result<SecretKey> {
    SecretKey::from_sec1_pem(pem)
        .or_else(|_| SecretKey::from_pkcs8_pem(pem))
        .map_err(|err| BridgeError::InvalidKey(err.to_string()))
}

/// Create a private key file with 0600 permissions, refusing overwrite
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn store() -> (TempDir, KeyStore) {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("key"));
        (dir, store)
    }

    #[test]
    fn test_role_parse_accepts_closed_set() {
        assert_eq!(KeyRole::parse("owner").unwrap(), KeyRole::Owner);
        assert_eq!(
            KeyRole::parse("charging_manager").unwrap(),
            KeyRole::ChargingManager
        );
    }

    #[test]
    fn test_role_parse_rejects_bad_input() {
        for role in [
            "",
            "Owner",
            "OWNER",
            "root",
            "../owner",
            "owner/..",
            "a/b",
            "a\\b",
            "owner ",
            "own$er",
        ] {
            assert!(KeyRole::parse(role).is_err(), "accepted {role:?}");
        }
    }

    #[test]
    fn test_key_files_fall_back_to_owner() {
        let (_dir, store) = store();
        let (owner_private, _) = store.key_files("owner");
        for role in ["../../etc", "no_such_role", "OWNER", ""] {
            let (private, public) = store.key_files(role);
            assert_eq!(private, owner_private, "role {role:?}");
            assert!(private.starts_with(store.root()));
            assert!(public.starts_with(store.root()));
        }
    }

    #[test]
    fn test_create_and_load_round_trip() {
        let (_dir, store) = store();
        store.create("owner").unwrap();

        let (private_path, public_path) = store.key_files("owner");
        assert!(private_path.exists());
        assert!(public_path.exists());

        let key = store.load_private_key().unwrap();
        assert!(key.pem().contains("EC PRIVATE KEY"));
        let public = store.load_public_key_pem().unwrap();
        assert!(String::from_utf8(public).unwrap().contains("PUBLIC KEY"));
    }

    #[test]
    fn test_create_refuses_overwrite() {
        let (_dir, store) = store();
        store.create("owner").unwrap();
        let err = store.create("owner").unwrap_err();
        assert!(matches!(err, BridgeError::KeyAlreadyExists(_)));
    }

    #[test]
    fn test_private_key_permissions() {
        let (_dir, store) = store();
        store.create("owner").unwrap();
        let (private_path, _) = store.key_files("owner");
        let mode = fs::metadata(private_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_active_role_resolution() {
        let (_dir, store) = store();
        // Nothing on disk: defaults to owner.
        assert_eq!(store.active_role(), KeyRole::Owner);

        store.create("charging_manager").unwrap();
        store.set_active_role("charging_manager").unwrap();
        assert_eq!(store.active_role(), KeyRole::ChargingManager);
    }

    #[test]
    fn test_set_active_requires_existing_keys() {
        let (_dir, store) = store();
        let err = store.set_active_role("charging_manager").unwrap_err();
        assert!(matches!(err, BridgeError::KeyNotFound(_)));
        assert!(store.set_active_role("../../evil").is_err());
    }

    #[test]
    fn test_list_roles_and_exists() {
        let (_dir, store) = store();
        assert!(store.list_roles().is_empty());
        assert!(!store.exists("owner"));
        assert!(!store.exists("../../etc/passwd"));

        store.create("owner").unwrap();
        assert_eq!(store.list_roles(), vec![KeyRole::Owner]);
        assert!(store.exists("owner"));
    }

    #[test]
    fn test_remove_deletes_material_and_empty_dir() {
        let (_dir, store) = store();
        store.create("owner").unwrap();
        store.remove("owner").unwrap();
        let (private_path, _) = store.key_files("owner");
        assert!(!private_path.exists());
        assert!(!private_path.parent().unwrap().exists());
        // Removing again is fine.
        store.remove("owner").unwrap();
    }

    /// Build a legacy layout by generating a pair and moving it to the root
    fn plant_legacy_keys(store: &KeyStore) -> (String, String) {
        store.create("owner").unwrap();
        let (owner_private, owner_public) = store.key_files("owner");
        let private = fs::read_to_string(&owner_private).unwrap();
        let public = fs::read_to_string(&owner_public).unwrap();
        store.remove("owner").unwrap();

        let (legacy_private, legacy_public) = (
            store.root().join("private.pem"),
            store.root().join("public.pem"),
        );
        fs::create_dir_all(store.root()).unwrap();
        fs::write(&legacy_private, &private).unwrap();
        fs::write(&legacy_public, &public).unwrap();
        (private, public)
    }

    #[test]
    fn test_legacy_migration() {
        let (_dir, store) = store();
        let (private, _) = plant_legacy_keys(&store);

        store.migrate_legacy().unwrap();

        let (owner_private, owner_public) = store.key_files("owner");
        assert!(owner_private.exists());
        assert!(owner_public.exists());
        assert_eq!(fs::read_to_string(&owner_private).unwrap(), private);
        assert!(!store.root().join("private.pem").exists());
        assert!(!store.root().join("public.pem").exists());
        assert_eq!(store.active_role(), KeyRole::Owner);

        let mode = fs::metadata(&owner_private).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.load_private_key().unwrap();
    }

    #[test]
    fn test_legacy_migration_is_idempotent() {
        let (_dir, store) = store();
        plant_legacy_keys(&store);

        store.migrate_legacy().unwrap();
        store.migrate_legacy().unwrap();

        assert!(store.key_files("owner").0.exists());
        assert_eq!(store.active_role(), KeyRole::Owner);
    }

    #[test]
    fn test_legacy_migration_never_overwrites_owner() {
        let (_dir, store) = store();

        // Existing owner keys, plus a stray legacy pair.
        store.create("owner").unwrap();
        let (owner_private, _) = store.key_files("owner");
        let owner_material = fs::read_to_string(&owner_private).unwrap();

        fs::write(store.root().join("private.pem"), "legacy-private").unwrap();
        fs::write(store.root().join("public.pem"), "legacy-public").unwrap();

        store.migrate_legacy().unwrap();

        assert_eq!(fs::read_to_string(&owner_private).unwrap(), owner_material);
        // The legacy pair is left alone when migration is skipped.
        assert!(store.root().join("private.pem").exists());
    }

    #[test]
    fn test_load_private_key_missing() {
        let (_dir, store) = store();
        let err = store.load_private_key().unwrap_err();
        assert!(matches!(err, BridgeError::KeyNotFound(_)));
    }

    #[test]
    fn test_load_private_key_rejects_garbage() {
        let (_dir, store) = store();
        let (private_path, _) = store.key_files("owner");
        fs::create_dir_all(private_path.parent().unwrap()).unwrap();
        fs::write(&private_path, "not a key").unwrap();
        let err = store.load_private_key().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidKey(_)));
    }
}
