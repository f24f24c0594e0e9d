//! Per-owner vendor API keys.
//!
//! Keys are stored encrypted under a master key and decrypted only right
//! before a batch run. The decrypted form, [`ProviderCredential`], zeroes its
//! buffer on drop and refuses to print itself.
//!
//! Stored form of a secret: base64 of `[12-byte nonce][ciphertext + 16-byte tag]`
//! (AES-256-GCM).

use crate::error::PetitionError;
use crate::output::write_atomic;
use crate::provider::ProviderKind;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

// ── ProviderCredential ───────────────────────────────────────────────────────

/// A decrypted vendor API key.
///
/// Lives for one batch run. Not `Clone`, not `Serialize`, and `Debug` prints
/// `<redacted>`.
pub struct ProviderCredential {
    secret: Zeroizing<String>,
}

impl ProviderCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// The raw key, for placing on the wire.
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderCredential(<redacted>)")
    }
}

// ── EncryptedSecret ──────────────────────────────────────────────────────────

/// An encrypted key as stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn from_stored(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedSecret({} chars)", self.0.len())
    }
}

// ── CredentialCipher ─────────────────────────────────────────────────────────

/// AES-256-GCM under a 32-byte master key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CredentialCipher {
    key: [u8; KEY_LENGTH],
}

impl CredentialCipher {
    pub fn from_key_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Parse a base64-encoded 32-byte master key.
    pub fn from_base64(encoded: &str) -> Result<Self, PetitionError> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            PetitionError::InvalidConfig(format!("master key is not valid base64: {e}"))
        })?);
        if bytes.len() != KEY_LENGTH {
            return Err(PetitionError::InvalidConfig(format!(
                "master key must be {KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// A fresh random master key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// The master key as base64, for handing to an operator once.
    pub fn key_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, PetitionError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PetitionError::Internal("credential encryption failed".into()))?;

        let mut bytes = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        bytes.extend_from_slice(&nonce_bytes);
        bytes.extend_from_slice(&ciphertext);
        Ok(EncryptedSecret(STANDARD.encode(bytes)))
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<ProviderCredential, PetitionError> {
        let bytes = STANDARD
            .decode(secret.as_str())
            .map_err(|e| PetitionError::CredentialDecryptFailed(format!("not base64: {e}")))?;
        if bytes.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(PetitionError::CredentialDecryptFailed(
                "ciphertext too short".into(),
            ));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let (nonce, ciphertext) = bytes.split_at(NONCE_LENGTH);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    PetitionError::CredentialDecryptFailed(
                        "authentication failed (wrong master key or tampered data)".into(),
                    )
                })?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| PetitionError::CredentialDecryptFailed("key is not UTF-8".into()))?;
        Ok(ProviderCredential::new(text))
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialCipher(<redacted>)")
    }
}

// ── CredentialStore ──────────────────────────────────────────────────────────

/// One stored key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub owner_id: String,
    pub provider: ProviderKind,
    pub secret: EncryptedSecret,
    pub is_active: bool,
}

/// Keys indexed by `(owner, provider)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The active secret for the pair, or `CredentialNotFound` / `CredentialInactive`.
    async fn lookup(
        &self,
        owner_id: &str,
        provider: ProviderKind,
    ) -> Result<EncryptedSecret, PetitionError>;

    /// Replace any existing secret for the pair and mark it active.
    async fn upsert(
        &self,
        owner_id: &str,
        provider: ProviderKind,
        secret: EncryptedSecret,
    ) -> Result<(), PetitionError>;

    /// Keep the secret but stop serving it from `lookup`.
    async fn deactivate(&self, owner_id: &str, provider: ProviderKind) -> Result<(), PetitionError>;
}

type CredentialMap = BTreeMap<(String, ProviderKind), StoredCredential>;

fn active_secret(
    entries: &CredentialMap,
    owner_id: &str,
    provider: ProviderKind,
) -> Result<EncryptedSecret, PetitionError> {
    match entries.get(&(owner_id.to_string(), provider)) {
        None => Err(PetitionError::CredentialNotFound {
            owner: owner_id.to_string(),
            provider,
        }),
        Some(c) if !c.is_active => Err(PetitionError::CredentialInactive {
            owner: owner_id.to_string(),
            provider,
        }),
        Some(c) => Ok(c.secret.clone()),
    }
}

fn upsert_entry(entries: &mut CredentialMap, owner_id: &str, provider: ProviderKind, secret: EncryptedSecret) {
    entries.insert(
        (owner_id.to_string(), provider),
        StoredCredential {
            owner_id: owner_id.to_string(),
            provider,
            secret,
            is_active: true,
        },
    );
}

fn deactivate_entry(
    entries: &mut CredentialMap,
    owner_id: &str,
    provider: ProviderKind,
) -> Result<(), PetitionError> {
    let entry = entries
        .get_mut(&(owner_id.to_string(), provider))
        .ok_or_else(|| PetitionError::CredentialNotFound {
            owner: owner_id.to_string(),
            provider,
        })?;
    entry.is_active = false;
    Ok(())
}

/// In-process store, for tests and single-run tools.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<CredentialMap>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn lookup(
        &self,
        owner_id: &str,
        provider: ProviderKind,
    ) -> Result<EncryptedSecret, PetitionError> {
        active_secret(&*self.entries.read().await, owner_id, provider)
    }

    async fn upsert(
        &self,
        owner_id: &str,
        provider: ProviderKind,
        secret: EncryptedSecret,
    ) -> Result<(), PetitionError> {
        upsert_entry(&mut *self.entries.write().await, owner_id, provider, secret);
        Ok(())
    }

    async fn deactivate(&self, owner_id: &str, provider: ProviderKind) -> Result<(), PetitionError> {
        deactivate_entry(&mut *self.entries.write().await, owner_id, provider)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialDocument {
    credentials: Vec<StoredCredential>,
}

/// JSON document on disk, rewritten atomically on every change.
///
/// A missing file is an empty store.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CredentialMap, PetitionError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CredentialMap::new()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(PetitionError::PermissionDenied {
                    path: self.path.clone(),
                })
            }
            Err(e) => {
                return Err(PetitionError::Internal(format!(
                    "reading credential store {}: {e}",
                    self.path.display()
                )))
            }
        };
        let doc: CredentialDocument = serde_json::from_str(&text).map_err(|e| {
            PetitionError::InvalidConfig(format!(
                "credential store {} is malformed: {e}",
                self.path.display()
            ))
        })?;
        Ok(doc
            .credentials
            .into_iter()
            .map(|c| ((c.owner_id.clone(), c.provider), c))
            .collect())
    }

    async fn save(&self, entries: CredentialMap) -> Result<(), PetitionError> {
        let doc = CredentialDocument {
            credentials: entries.into_values().collect(),
        };
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| PetitionError::Internal(format!("serialising credentials: {e}")))?;
        write_atomic(&self.path, json).await.map_err(|e| {
            PetitionError::Internal(format!(
                "writing credential store {}: {e}",
                self.path.display()
            ))
        })?;
        debug!("Credential store saved: {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn lookup(
        &self,
        owner_id: &str,
        provider: ProviderKind,
    ) -> Result<EncryptedSecret, PetitionError> {
        let _guard = self.lock.lock().await;
        active_secret(&self.load().await?, owner_id, provider)
    }

    async fn upsert(
        &self,
        owner_id: &str,
        provider: ProviderKind,
        secret: EncryptedSecret,
    ) -> Result<(), PetitionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        upsert_entry(&mut entries, owner_id, provider, secret);
        self.save(entries).await?;
        info!("Stored {} key for owner '{}'", provider, owner_id);
        Ok(())
    }

    async fn deactivate(&self, owner_id: &str, provider: ProviderKind) -> Result<(), PetitionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        deactivate_entry(&mut entries, owner_id, provider)?;
        self.save(entries).await
    }
}
