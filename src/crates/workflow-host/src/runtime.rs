//! Local, single-process stand-ins for the collaborators a production host
//! plugs in over the network.
//! Every type here is a deliberately minimal default a real deployment
//! swaps out; none of it pretends to be production crypto or a real
//! language runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use workflow_core::error::Result;
use workflow_core::expr::{EvalContext, render_template};
use workflow_exec::credentials::{CredentialRecord, CredentialSource, CryptoCollaborator, EnvelopeCiphertext};
use workflow_exec::llm::{LlmCompletion, LlmProvider, LlmRequest, LlmUsage};
use workflow_exec::sandbox::{Sandbox, SandboxCapabilities, SandboxOutput};

/// Decrypts nothing: treats the envelope's `encrypted_data` as plaintext.
/// Stands in for an external crypto collaborator in a local
/// dev/single-process deployment where no KMS is configured.
pub struct PassthroughCrypto;

impl CryptoCollaborator for PassthroughCrypto {
    fn decrypt(&self, ciphertext: &EnvelopeCiphertext) -> Result<Vec<u8>> {
        Ok(ciphertext.encrypted_data.clone())
    }
}

/// An in-process credential store, keyed by credential id. Reference
/// implementation for local/dev hosts and integration tests; a production
/// deployment backs [`CredentialSource`] with the tenant's actual secret
/// store.
#[derive(Default)]
pub struct LocalCredentialSource {
    records: RwLock<HashMap<Uuid, CredentialRecord>>,
}

impl LocalCredentialSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CredentialRecord) {
        self.records.write().unwrap().insert(record.id, record);
    }
}

impl CredentialSource for LocalCredentialSource {
    fn lookup(&self, credential_id: Uuid) -> Option<CredentialRecord> {
        self.records.read().unwrap().get(&credential_id).cloned()
    }
}

/// Treats `code` as a template string rendered against `input`, rather than
/// executing a real scripting language — the engine never embeds one. A
/// deployment that needs real `code`/`function` steps swaps this for an
/// isolate- or container-backed [`Sandbox`].
pub struct TemplateSandbox;

#[async_trait]
impl Sandbox for TemplateSandbox {
    async fn execute(
        &self,
        code: &str,
        input: Value,
        capabilities: &SandboxCapabilities,
        _timeout_ms: u64,
    ) -> Result<SandboxOutput> {
        let mut ctx = EvalContext::new(input);
        for (k, v) in &capabilities.secrets {
            ctx.secrets.insert(k.clone(), Value::String(v.clone()));
        }
        ctx.capabilities = workflow_core::expr::EvalCapabilities { allow_secrets: true };
        let rendered = render_template(code, &ctx)
            .map_err(|e| workflow_core::error::EngineError::permanent(format!("template render failed: {e}")))?;
        let output = serde_json::from_str(&rendered).unwrap_or(Value::String(rendered));
        Ok(SandboxOutput { output, logs: Vec::new() })
    }
}

/// A deterministic [`LlmProvider`] that echoes the rendered prompt as its
/// completion with zero usage. Real provider clients are out of scope;
/// this is what lets `llm`/`agent`/`router` steps dispatch end-to-end in
/// a local host without a network call.
pub struct EchoLlmProvider;

#[async_trait]
impl LlmProvider for EchoLlmProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmCompletion> {
        Ok(LlmCompletion {
            content: Value::String(request.prompt),
            tool_calls: Vec::new(),
            usage: LlmUsage::default(),
        })
    }
}
