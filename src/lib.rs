//! OpenPrint Core - Printer Hook Compiler
//!
//! Compiles a firmware-agnostic printer description (PDL) into G-code hook
//! sequences for a concrete firmware, and checks it for printability issues.
//!
//! # Guarantees
//! 1. Rendering Is Total (unresolved placeholders are reported, never raised)
//! 2. Synthesis Is Idempotent
//! 3. Mapping Is 1:1 (line count and order survive firmware rewrites)
//! 4. Unknown Firmware Passes Through
//! 5. Compilation Always Validates First

pub mod value;
pub mod placeholders;
pub mod hooks;
pub mod policies;
pub mod firmware;
pub mod pdl;
pub mod synthesis;
pub mod mapper;
pub mod validation;
pub mod pdl_rules;
pub mod hashing;
pub mod pipeline;

pub use value::Value;
pub use placeholders::{find_placeholders, render, render_hooks};
pub use hooks::{list_hooks, HookCategory, HookMap, KnownHook};
pub use policies::{CoolantMode, Policies, PolicyOverrides, SlicerTarget};
pub use firmware::Firmware;
pub use pdl::{GcodeSection, MachineControl, Pdl};
pub use synthesis::{percent_to_pwm, synthesize};
pub use mapper::{apply_firmware_policy, generate_snippets, inject_open_print_tag, render_hooks_with_firmware};
pub use validation::{
    summarize, validate_filament, validate_printer, validate_process, FilamentProfile, Issue, IssueLevel,
    PrinterProfile, ProcessProfile, Summary,
};
pub use pdl_rules::{validate_pdl, PdlValidator, ValidationRule};
pub use hashing::{canonical_json, hook_digest};
pub use pipeline::{CompileRequest, CompiledHooks, Pipeline, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Highest PDL major version this engine understands.
pub const SUPPORTED_PDL_MAJOR: u64 = 1;
