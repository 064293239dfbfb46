//! Compile Pipeline - Single Entry Point
//!
//! CRITICAL: `compile` MUST validate the document first. Error-level issues
//! block compilation unless the request explicitly allows them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::firmware::Firmware;
use crate::hashing::hook_digest;
use crate::hooks::HookMap;
use crate::mapper::render_hooks_with_firmware;
use crate::pdl::Pdl;
use crate::pdl_rules::PdlValidator;
use crate::placeholders::render_hooks;
use crate::policies::PolicyOverrides;
use crate::validation::{summarize, Issue, IssueLevel, Summary};
use crate::value::Value;
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid variable context: {0}")]
    InvalidContext(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileRequest {
    pub pdl: Pdl,
    /// Placeholder context; must be a JSON object when present.
    #[serde(default)]
    pub vars: Option<serde_json::Value>,
    /// Overrides the document's firmware.
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub policy_overrides: Option<PolicyOverrides>,
    #[serde(default)]
    pub allow_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledHooks {
    pub firmware: String,
    pub engine_version: String,
    /// Mapped hooks before placeholder rendering.
    pub hooks: HookMap,
    pub rendered: HookMap,
    pub missing: BTreeSet<String>,
    pub digest: String,
    pub summary: Summary,
    pub issues: Vec<Issue>,
}

pub struct Pipeline {
    validator: PdlValidator,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { validator: PdlValidator::new() }
    }

    pub fn parse_document(text: &str) -> Result<Pdl, PipelineError> {
        Pdl::from_json(text).map_err(|e| PipelineError::InvalidDocument(e.to_string()))
    }

    pub fn parse_document_file(path: &Path) -> Result<Pdl, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidDocument(format!("{}: {}", path.display(), e)))?;
        Self::parse_document(&text)
    }

    /// Parse a placeholder context. Anything but a JSON object is rejected.
    pub fn parse_context(text: &str) -> Result<Value, PipelineError> {
        let raw: serde_json::Value =
            serde_json::from_str(text).map_err(|e| PipelineError::InvalidContext(e.to_string()))?;
        context_from_json(raw)
    }

    /// This is the ONLY validation entry point.
    pub fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let issues = self.validator.validate(doc);
        debug!(issues = issues.len(), "document validated");
        issues
    }

    /// Validate, synthesize, map and render.
    ///
    /// CRITICAL: This ALWAYS calls `validate` first. No bypass possible.
    pub fn compile(&self, request: &CompileRequest) -> Result<CompiledHooks, PipelineError> {
        let mut doc = request.pdl.clone();
        if let Some(overrides) = &request.policy_overrides {
            doc.policies.apply_overrides(overrides);
        }
        if let Some(fw) = &request.firmware {
            doc.firmware = Firmware::parse(fw);
        }

        let ctx = match &request.vars {
            Some(raw) => context_from_json(raw.clone())?,
            None => Value::Mapping(Default::default()),
        };

        // MANDATORY: validation runs before anything is generated.
        let issues = self.validate(&doc);
        let summary = summarize(&[issues.as_slice()]);
        if summary.has_errors() {
            if !request.allow_errors {
                let messages: Vec<_> = issues
                    .iter()
                    .filter(|i| i.level == IssueLevel::Error)
                    .map(|i| format!("{}: {}", i.path, i.message))
                    .collect();
                return Err(PipelineError::ValidationFailed(messages.join("; ")));
            }
            warn!(errors = summary.error, "compiling despite validation errors");
        }

        let hooks = render_hooks_with_firmware(&doc);
        let (rendered, missing) = render_hooks(&hooks, &ctx);
        let digest = hook_digest(doc.firmware.as_str(), &rendered, ENGINE_VERSION)?;

        info!(
            firmware = %doc.firmware,
            hooks = rendered.len(),
            missing = missing.len(),
            "hooks compiled"
        );

        Ok(CompiledHooks {
            firmware: doc.firmware.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            hooks,
            rendered,
            missing,
            digest,
            summary,
            issues,
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn context_from_json(raw: serde_json::Value) -> Result<Value, PipelineError> {
    if !raw.is_object() {
        return Err(PipelineError::InvalidContext("variables must be a JSON object".into()));
    }
    Ok(Value::from(raw))
}
