//! Firmware Policy Mapper
//!
//! Rewrites synthesized lines into the target firmware's dialect using the
//! firmware's policy table. Rewrites are strictly 1:1, so line count and
//! order survive mapping.

use tracing::{debug, trace};

use crate::firmware::Firmware;
use crate::hashing::spaced_json;
use crate::hooks::{HookMap, KnownHook};
use crate::pdl::Pdl;
use crate::policies::Policies;
use crate::synthesis::synthesize;
use crate::value::Value;

pub const TAG_BEGIN: &str = ";BEGIN:OPENPRINTTAG";
pub const TAG_END: &str = ";END:OPENPRINTTAG";

/// Apply `firmware`'s rewrite table. Unrecognized firmware is passthrough.
pub fn apply_firmware_policy(hooks: &HookMap, firmware: &Firmware, policies: &Policies) -> HookMap {
    let Some(policy) = firmware.policy() else {
        debug!(firmware = %firmware, "unrecognized firmware; hooks passed through");
        return hooks.clone();
    };

    let mut rewritten = 0usize;
    let mapped = hooks
        .iter()
        .map(|(hook, seq)| {
            let rules: Vec<_> = policy.rewrites.iter().filter(|r| r.applies_to(hook)).collect();
            let seq = seq
                .iter()
                .map(|line| {
                    let replacement = rules
                        .iter()
                        .find(|r| r.matches(line))
                        .and_then(|r| (r.replace)(line, policies));
                    match replacement {
                        Some(new) => {
                            trace!(hook = %hook, from = %line, to = %new, "rewrite");
                            rewritten += 1;
                            new
                        }
                        None => line.clone(),
                    }
                })
                .collect();
            (hook.clone(), seq)
        })
        .collect();

    debug!(firmware = policy.label, rewritten, "firmware policy applied");
    mapped
}

/// Prepend the OpenPrintTag block to `start`.
pub fn inject_open_print_tag(hooks: &HookMap, payload: &Value) -> HookMap {
    let body = spaced_json(payload).unwrap_or_else(|_| payload.to_string());
    let mut out = hooks.clone();
    let start = out.entry(KnownHook::Start.as_str().to_string()).or_default();
    let mut block = vec![TAG_BEGIN.to_string(), format!(";{}", body), TAG_END.to_string()];
    block.append(start);
    *start = block;
    out
}

/// Baseline, synthesize, map for the document's firmware, then tag.
pub fn render_hooks_with_firmware(doc: &Pdl) -> HookMap {
    map_for(doc, &doc.firmware)
}

fn map_for(doc: &Pdl, firmware: &Firmware) -> HookMap {
    let baseline = doc.gcode.baseline();
    let synthesized = synthesize(&doc.machine_control, &baseline);
    let mapped = apply_firmware_policy(&synthesized, firmware, &doc.policies);
    match &doc.open_print_tag {
        Some(payload) if !payload.is_null() => inject_open_print_tag(&mapped, payload),
        _ => mapped,
    }
}

/// `(start, end)` of the fully mapped hook map.
pub fn generate_snippets(doc: &Pdl, firmware_override: Option<&Firmware>) -> (Vec<String>, Vec<String>) {
    let mut hooks = map_for(doc, firmware_override.unwrap_or(&doc.firmware));
    let start = hooks.remove(KnownHook::Start.as_str()).unwrap_or_default();
    let end = hooks.remove(KnownHook::End.as_str()).unwrap_or_default();
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::CoolantMode;
    use serde_json::json;

    fn hooks(entries: &[(&str, &[&str])]) -> HookMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_unrecognized_firmware_passthrough() {
        let h = hooks(&[("start", &["M928 log.gcode", "M10"]), ("before_snapshot", &["M240"])]);
        assert_eq!(apply_firmware_policy(&h, &Firmware::parse("prusa-fw"), &Policies::default()), h);
        assert_eq!(apply_firmware_policy(&h, &Firmware::Unspecified, &Policies::default()), h);
    }

    #[test]
    fn test_klipper_camera_only_in_snapshot_hooks() {
        let h = hooks(&[
            ("before_snapshot", &["G1 X0", "M240", "G4 P100"]),
            ("after_snapshot", &["m240 ; cam"]),
            ("layer_change", &["M240"]),
        ]);
        let out = apply_firmware_policy(&h, &Firmware::Klipper, &Policies::default());
        assert_eq!(out["before_snapshot"], vec!["G1 X0", "M118 TIMELAPSE_TAKE_FRAME", "G4 P100"]);
        assert_eq!(out["after_snapshot"], vec!["M118 TIMELAPSE_TAKE_FRAME"]);
        assert_eq!(out["layer_change"], vec!["M240"]);

        let mut p = Policies::default();
        p.klipper.camera_map = false;
        assert_eq!(apply_firmware_policy(&h, &Firmware::Klipper, &p), h);
    }

    #[test]
    fn test_rrf_logging() {
        let h = hooks(&[("start", &["M928 run.gcode"]), ("end", &["M290 Z0", "M29"])]);
        let out = apply_firmware_policy(&h, &Firmware::RepRap, &Policies::default());
        assert_eq!(out["start"], vec!["M929 P\"run.gcode\" S1"]);
        assert_eq!(out["end"], vec!["M290 Z0", "M929 S0"]);
    }

    #[test]
    fn test_grbl_coolant_modes() {
        let h = hooks(&[("start", &["M10", "M106 S255"]), ("end", &["M11", "M107"])]);
        let out = apply_firmware_policy(&h, &Firmware::Grbl, &Policies::default());
        assert_eq!(out["start"], vec!["M8", "M106 S255"]);
        assert_eq!(out["end"], vec!["M9", "M107"]);

        let mut p = Policies::default();
        p.grbl.exhaust_mode = CoolantMode::M7;
        let out = apply_firmware_policy(&h, &Firmware::LinuxCnc, &p);
        assert_eq!(out["start"][0], "M7");
    }

    #[test]
    fn test_marlin_has_no_rewrites() {
        let h = hooks(&[("start", &["M928 x", "M10"]), ("end", &["M29", "M11"])]);
        assert_eq!(apply_firmware_policy(&h, &Firmware::Marlin, &Policies::default()), h);
    }

    #[test]
    fn test_tag_injected_first() {
        let h = hooks(&[("start", &["G28"])]);
        let payload = Value::from(json!({"z": 1, "a": "PLA"}));
        let out = inject_open_print_tag(&h, &payload);
        assert_eq!(
            out["start"],
            vec![TAG_BEGIN, r#";{"a": "PLA", "z": 1}"#, TAG_END, "G28"]
        );
    }

    #[test]
    fn test_tag_line_uses_spaced_separators() {
        let payload = Value::from(json!({"id": "abc123", "url": "https://example.com/printer"}));
        let out = inject_open_print_tag(&HookMap::new(), &payload);
        assert_eq!(out["start"].len(), 3);
        assert!(out["start"][1].contains(r#""id": "abc123""#));
        assert_eq!(out["start"][1], r#";{"id": "abc123", "url": "https://example.com/printer"}"#);
    }

    #[test]
    fn test_render_and_snippets() {
        let doc = Pdl::from_value(json!({
            "firmware": "rrf",
            "gcode": {"start": ["G28"], "end": ["M84"]},
            "machine_control": {
                "sd_logging": {"enable_start": true, "filename": "job.log", "stop_at_end": true},
                "exhaust": {"enable_start": true, "off_at_end": true}
            },
            "open_print_tag": {"material": "PETG"}
        }))
        .unwrap();

        let hooks = render_hooks_with_firmware(&doc);
        assert_eq!(hooks["start"][0], TAG_BEGIN);
        assert!(hooks["start"].contains(&"M929 P\"job.log\" S1".to_string()));

        let (start, end) = generate_snippets(&doc, Some(&Firmware::Grbl));
        assert!(start.contains(&"M8".to_string()));
        assert!(start.contains(&"M928 job.log".to_string()));
        assert_eq!(end, vec!["M84", "M9", "M29"]);
    }
}
