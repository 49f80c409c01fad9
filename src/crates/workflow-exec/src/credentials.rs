//! Credential resolution (C3): turns a step's `credential_bindings` into
//! decrypted secret material, scoped to the lifetime of a single `StepRun`.
//!
//! The engine never holds a master key — decryption is delegated to an
//! external envelope-crypto collaborator, the same separation drawn
//! between `langgraph-core` (owns no credentials) and its
//! `orchestrator::security` boundary for anything secret-shaped.

use std::collections::HashMap;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use workflow_core::error::{EngineError, ErrorKind, Result};

/// Decrypted secret material for a single credential binding. Zeroised when
/// it goes out of scope so a resolved value never outlives the `StepRun`
/// that requested it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Lifecycle state of a stored credential, checked before decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    Expired,
    Revoked,
}

/// The envelope payload a credential is stored as.
#[derive(Debug, Clone)]
pub struct EnvelopeCiphertext {
    pub encrypted_data: Vec<u8>,
    pub encrypted_dek: Vec<u8>,
    pub data_nonce: Vec<u8>,
    pub dek_nonce: Vec<u8>,
}

/// A stored, still-encrypted credential record, owned by a tenant.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: CredentialStatus,
    pub ciphertext: EnvelopeCiphertext,
    /// Tenants this credential is explicitly shared with, beyond its owner.
    pub shared_with_tenant_ids: Vec<Uuid>,
}

/// The external envelope-crypto collaborator. The core only
/// ever calls `decrypt`; it never holds or derives the master key.
pub trait CryptoCollaborator: Send + Sync {
    fn decrypt(&self, ciphertext: &EnvelopeCiphertext) -> Result<Vec<u8>>;
}

/// Where credential records are looked up from — an external collaborator
/// the engine treats as read-only (tenant/user/credential CRUD is out of
/// scope per ).
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, credential_id: Uuid) -> Option<CredentialRecord>;
}

/// Resolves a step's `credential_bindings` into decrypted [`Secret`]s
/// . Holds no state across steps: a fresh resolution per
/// `StepRun` is the only way to guarantee the zeroise-on-drop discipline.
pub struct CredentialResolver<'a> {
    source: &'a dyn CredentialSource,
    crypto: &'a dyn CryptoCollaborator,
}

impl<'a> CredentialResolver<'a> {
    #[must_use]
    pub fn new(source: &'a dyn CredentialSource, crypto: &'a dyn CryptoCollaborator) -> Self {
        Self { source, crypto }
    }

    /// Resolve every binding for a step, tenant-scoped.
    ///
    /// # Errors
    ///
    /// `ErrorKind::CredentialUnavailable` if a binding does not resolve to
    /// an active credential; `ErrorKind::Forbidden` if it resolves to a
    /// credential owned by, or shared with, a different tenant.
    pub fn resolve(
        &self,
        tenant_id: Uuid,
        bindings: &HashMap<String, Uuid>,
    ) -> Result<HashMap<String, Secret>> {
        let mut resolved = HashMap::with_capacity(bindings.len());
        for (logical_name, credential_id) in bindings {
            let record = self.source.lookup(*credential_id).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::CredentialUnavailable,
                    format!("credential {credential_id} not found"),
                )
            })?;

            let owned = record.tenant_id == tenant_id;
            let shared = record.shared_with_tenant_ids.contains(&tenant_id);
            if !owned && !shared {
                return Err(EngineError::forbidden(format!(
                    "credential {credential_id} is not owned by or shared with tenant {tenant_id}"
                )));
            }

            if record.status != CredentialStatus::Active {
                return Err(EngineError::new(
                    ErrorKind::CredentialUnavailable,
                    format!("credential {credential_id} is {:?}", record.status),
                ));
            }

            let plaintext = self.crypto.decrypt(&record.ciphertext)?;
            let text = String::from_utf8(plaintext).map_err(|e| {
                EngineError::new(
                    ErrorKind::CredentialUnavailable,
                    format!("credential {credential_id} did not decrypt to valid UTF-8: {e}"),
                )
            })?;
            resolved.insert(logical_name.clone(), Secret(text));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    struct FakeSource(Map<Uuid, CredentialRecord>);
    impl CredentialSource for FakeSource {
        fn lookup(&self, credential_id: Uuid) -> Option<CredentialRecord> {
            self.0.get(&credential_id).cloned()
        }
    }

    struct FakeCrypto(Mutex<Vec<u8>>);
    impl CryptoCollaborator for FakeCrypto {
        fn decrypt(&self, _ciphertext: &EnvelopeCiphertext) -> Result<Vec<u8>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn envelope() -> EnvelopeCiphertext {
        EnvelopeCiphertext {
            encrypted_data: vec![1, 2, 3],
            encrypted_dek: vec![4, 5, 6],
            data_nonce: vec![7],
            dek_nonce: vec![8],
        }
    }

    #[test]
    fn resolves_an_active_owned_credential() {
        let tenant = Uuid::new_v4();
        let cred_id = Uuid::new_v4();
        let mut records = Map::new();
        records.insert(
            cred_id,
            CredentialRecord {
                id: cred_id,
                tenant_id: tenant,
                status: CredentialStatus::Active,
                ciphertext: envelope(),
                shared_with_tenant_ids: vec![],
            },
        );
        let source = FakeSource(records);
        let crypto = FakeCrypto(Mutex::new(b"sk-secret".to_vec()));
        let resolver = CredentialResolver::new(&source, &crypto);

        let mut bindings = Map::new();
        bindings.insert("api_key".to_string(), cred_id);
        let resolved = resolver.resolve(tenant, &bindings).unwrap();
        assert_eq!(resolved["api_key"].expose(), "sk-secret");
    }

    #[test]
    fn rejects_cross_tenant_binding() {
        let owner = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();
        let cred_id = Uuid::new_v4();
        let mut records = Map::new();
        records.insert(
            cred_id,
            CredentialRecord {
                id: cred_id,
                tenant_id: owner,
                status: CredentialStatus::Active,
                ciphertext: envelope(),
                shared_with_tenant_ids: vec![],
            },
        );
        let source = FakeSource(records);
        let crypto = FakeCrypto(Mutex::new(b"sk-secret".to_vec()));
        let resolver = CredentialResolver::new(&source, &crypto);

        let mut bindings = Map::new();
        bindings.insert("api_key".to_string(), cred_id);
        let err = resolver.resolve(other_tenant, &bindings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn rejects_revoked_credential() {
        let tenant = Uuid::new_v4();
        let cred_id = Uuid::new_v4();
        let mut records = Map::new();
        records.insert(
            cred_id,
            CredentialRecord {
                id: cred_id,
                tenant_id: tenant,
                status: CredentialStatus::Revoked,
                ciphertext: envelope(),
                shared_with_tenant_ids: vec![],
            },
        );
        let source = FakeSource(records);
        let crypto = FakeCrypto(Mutex::new(b"sk-secret".to_vec()));
        let resolver = CredentialResolver::new(&source, &crypto);

        let mut bindings = Map::new();
        bindings.insert("api_key".to_string(), cred_id);
        let err = resolver.resolve(tenant, &bindings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CredentialUnavailable);
    }
}
