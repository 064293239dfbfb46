//! Machine-Control Synthesizer
//!
//! Turns the declarative `machine_control` block into concrete G-code lines
//! and merges them into the baseline hook map. Lines are only ever appended
//! when absent, so re-running synthesis is a no-op.

use tracing::{debug, trace};

use crate::hooks::{add_if_absent, HookMap, KnownHook};
use crate::pdl::{AuxOutput, Exhaust, MachineControl, PinRef};

/// Log file used when SD logging is enabled without a filename.
pub const DEFAULT_LOG_FILE: &str = "opk_log.gcode";

/// Percent (0-100) to 8-bit PWM duty, clamped.
pub fn percent_to_pwm(percent: f64) -> u8 {
    let pct = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
    (pct * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8
}

/// Integers without a decimal point, everything else in shortest form.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x > 0.0)
}

fn exhaust_pwm(exhaust: &Exhaust) -> u8 {
    percent_to_pwm(positive(exhaust.speed_percent).unwrap_or(100.0))
}

/// Structured `start` lines, in emission order.
pub fn start_lines(mc: &MachineControl) -> Vec<String> {
    let mut lines = vec![];
    if mc.psu_on_start {
        lines.push("M80".to_string());
    }
    if mc.light_on_start {
        lines.push("M355 S1".to_string());
    }
    if let Some(rgb) = &mc.rgb_start {
        let channel = |c: Option<f64>| c.unwrap_or(0.0).clamp(0.0, 255.0).round() as u8;
        let (r, g, b) = (channel(rgb.r), channel(rgb.g), channel(rgb.b));
        if r > 0 || g > 0 || b > 0 {
            lines.push(format!("M150 R{} U{} B{}", r, g, b));
        }
    }
    if let Some(chamber) = &mc.chamber {
        if let Some(t) = positive(chamber.temp) {
            lines.push(format!("M141 S{}", fmt_num(t)));
            if chamber.wait {
                lines.push(format!("M191 S{}", fmt_num(t)));
            }
        }
    }
    if let Some(z) = mc.z_offset.filter(|z| *z != 0.0) {
        lines.push(format!("M851 Z{}", fmt_num(z)));
    }
    if mc.enable_mesh_start {
        lines.push("M420 S1".to_string());
    }
    if let Some(p) = positive(mc.fans.part_start_percent) {
        lines.push(format!("M106 S{}", percent_to_pwm(p)));
    }
    if let (Some(p), Some(idx)) = (positive(mc.fans.aux_start_percent), mc.fans.aux_index) {
        lines.push(format!("M106 P{} S{}", idx, percent_to_pwm(p)));
    }
    if mc.sd_logging.enable_start {
        let file = mc.sd_logging.filename().unwrap_or(DEFAULT_LOG_FILE);
        lines.push(format!("M928 {}", file));
    }
    if mc.exhaust.enable_start {
        let pwm = exhaust_pwm(&mc.exhaust);
        lines.push(match (exhaust_pin(&mc.exhaust), mc.exhaust.fan_index) {
            (Some(pin), _) => format!("M42 P{} S{}", pin, pwm),
            (None, Some(fan)) => format!("M106 P{} S{}", fan, pwm),
            (None, None) => "M10".to_string(),
        });
    }
    // A zero value leaves the output at its idle state.
    for ao in &mc.aux_outputs {
        if let (Some(pin), Some(v)) = (aux_pin(ao), ao.start_value.filter(|v| *v != 0.0)) {
            lines.push(format!("M42 P{} S{}", pin, fmt_num(v)));
        }
    }
    lines
}

/// Structured `end` lines, in emission order. `M81` is always last.
pub fn end_lines(mc: &MachineControl) -> Vec<String> {
    let mut lines = vec![];
    if mc.fans.off_at_end {
        lines.push("M107".to_string());
    }
    if mc.exhaust.off_at_end {
        lines.push(match (exhaust_pin(&mc.exhaust), mc.exhaust.fan_index) {
            (Some(pin), _) => format!("M42 P{} S0", pin),
            (None, Some(fan)) => format!("M107 P{}", fan),
            (None, None) => "M11".to_string(),
        });
    }
    if mc.sd_logging.stop_at_end {
        lines.push("M29".to_string());
    }
    if mc.light_off_end {
        lines.push("M355 S0".to_string());
    }
    for ao in &mc.aux_outputs {
        if let (Some(pin), Some(v)) = (aux_pin(ao), ao.end_value.filter(|v| *v != 0.0)) {
            lines.push(format!("M42 P{} S{}", pin, fmt_num(v)));
        }
    }
    if mc.psu_off_end {
        lines.push("M81".to_string());
    }
    lines
}

fn exhaust_pin(exhaust: &Exhaust) -> Option<&PinRef> {
    exhaust.pin.as_ref().filter(|p| p.is_valid())
}

fn aux_pin(ao: &AuxOutput) -> Option<&PinRef> {
    ao.pin.as_ref().filter(|p| p.is_valid())
}

struct Merger {
    hooks: HookMap,
    appended: usize,
}

impl Merger {
    fn extend<I, S>(&mut self, hook: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            // Only materialize a hook once there is something to put in it.
            let seq = self.hooks.entry(hook.to_string()).or_default();
            if add_if_absent(seq, line) {
                trace!(hook, line, "appended");
                self.appended += 1;
            }
        }
    }
}

/// Merge synthesized machine-control lines into `baseline`.
pub fn synthesize(mc: &MachineControl, baseline: &HookMap) -> HookMap {
    let mut merger = Merger { hooks: baseline.clone(), appended: 0 };

    merger.extend(KnownHook::Start.as_str(), start_lines(mc));
    merger.extend(KnownHook::End.as_str(), end_lines(mc));

    if let Some(cmd) = mc.camera.command() {
        if mc.camera.use_before_snapshot {
            merger.extend(KnownHook::BeforeSnapshot.as_str(), [cmd]);
        }
        if mc.camera.use_after_snapshot {
            merger.extend(KnownHook::AfterSnapshot.as_str(), [cmd]);
        }
    }

    for peripheral in &mc.custom_peripherals {
        if let Some(hook) = peripheral.hook() {
            merger.extend(hook, &peripheral.sequence);
        }
    }

    merger.extend(KnownHook::Start.as_str(), &mc.start_custom);
    merger.extend(KnownHook::End.as_str(), &mc.end_custom);

    debug!(appended = merger.appended, hooks = merger.hooks.len(), "machine control synthesized");
    merger.hooks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mc(value: serde_json::Value) -> MachineControl {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_percent_to_pwm() {
        assert_eq!(percent_to_pwm(0.0), 0);
        assert_eq!(percent_to_pwm(50.0), 128);
        assert_eq!(percent_to_pwm(100.0), 255);
        assert_eq!(percent_to_pwm(150.0), 255);
        assert_eq!(percent_to_pwm(-5.0), 0);
        assert_eq!(percent_to_pwm(f64::NAN), 0);
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(45.0), "45");
        assert_eq!(fmt_num(-0.15), "-0.15");
    }

    #[test]
    fn test_start_order() {
        let opts = mc(json!({
            "psu_on_start": true,
            "light_on_start": true,
            "rgb_start": {"r": 300, "g": 0, "b": 10},
            "chamber": {"temp": 45, "wait": true},
            "z_offset": -0.15,
            "enable_mesh_start": true,
            "fans": {"part_start_percent": 50, "aux_index": 2, "aux_start_percent": 100},
            "sd_logging": {"enable_start": true},
            "exhaust": {"enable_start": true, "fan_index": 3, "speed_percent": 50},
            "aux_outputs": [{"pin": 7, "start_value": 1}, {"pin": 8}]
        }));
        assert_eq!(
            start_lines(&opts),
            vec![
                "M80",
                "M355 S1",
                "M150 R255 U0 B10",
                "M141 S45",
                "M191 S45",
                "M851 Z-0.15",
                "M420 S1",
                "M106 S128",
                "M106 P2 S255",
                "M928 opk_log.gcode",
                "M106 P3 S128",
                "M42 P7 S1",
            ]
        );
    }

    #[test]
    fn test_end_order_psu_last() {
        let opts = mc(json!({
            "psu_off_end": true,
            "light_off_end": true,
            "fans": {"off_at_end": true},
            "sd_logging": {"stop_at_end": true},
            "exhaust": {"off_at_end": true, "pin": "out3"},
            "aux_outputs": [{"pin": 9, "end_value": 128}]
        }));
        assert_eq!(end_lines(&opts), vec!["M107", "M42 Pout3 S0", "M29", "M355 S0", "M42 P9 S128", "M81"]);
    }

    #[test]
    fn test_exhaust_generic_toggle() {
        let opts = mc(json!({"exhaust": {"enable_start": true, "off_at_end": true}}));
        assert_eq!(start_lines(&opts), vec!["M10"]);
        assert_eq!(end_lines(&opts), vec!["M11"]);
        let opts = mc(json!({"exhaust": {"enable_start": true, "pin": 4}}));
        assert_eq!(start_lines(&opts), vec!["M42 P4 S255"]);
    }

    #[test]
    fn test_zero_aux_values_emit_nothing() {
        let opts = mc(json!({"aux_outputs": [{"pin": 7, "start_value": 0, "end_value": 0}, {"pin": 8, "end_value": "0"}]}));
        assert!(start_lines(&opts).is_empty());
        assert!(end_lines(&opts).is_empty());
        assert!(synthesize(&opts, &HookMap::new()).is_empty());
    }

    #[test]
    fn test_non_integer_pins_are_skipped() {
        let opts = mc(json!({
            "exhaust": {"enable_start": true, "pin": 2.5},
            "aux_outputs": [{"pin": 10.5, "start_value": 1}, {"pin": true, "end_value": 1}]
        }));
        assert_eq!(start_lines(&opts), vec!["M10"]);
        assert!(end_lines(&opts).is_empty());
    }

    #[test]
    fn test_aux_fan_needs_index() {
        let opts = mc(json!({"fans": {"aux_start_percent": 40}}));
        assert!(start_lines(&opts).is_empty());
    }

    #[test]
    fn test_synthesize_merges_without_duplicates() {
        let mut base = HookMap::new();
        base.insert("start".into(), vec!["G28".into(), "M80".into()]);
        base.insert("layer_change".into(), vec![";LAYER".into()]);
        let opts = mc(json!({
            "psu_on_start": true,
            "psu_off_end": true,
            "camera": {"use_before_snapshot": true, "command": " M240 "},
            "custom_peripherals": [
                {"hook": "on_progress_percent", "sequence": ["M117 {progress}%", " "]},
                {"hook": "", "sequence": ["M117 lost"]}
            ],
            "start_custom": ["M117 Hello"],
            "end_custom": "M117 Bye\n"
        }));
        let out = synthesize(&opts, &base);
        assert_eq!(out["start"], vec!["G28", "M80", "M117 Hello"]);
        assert_eq!(out["end"], vec!["M81", "M117 Bye"]);
        assert_eq!(out["before_snapshot"], vec!["M240"]);
        assert_eq!(out["on_progress_percent"], vec!["M117 {progress}%"]);
        assert_eq!(out["layer_change"], vec![";LAYER"]);
        assert!(!out.contains_key("after_snapshot"));
        assert!(!out.values().any(|seq| seq.iter().any(|l| l == "M117 lost")));
    }

    #[test]
    fn test_synthesize_idempotent() {
        let opts = mc(json!({
            "psu_on_start": true,
            "fans": {"part_start_percent": 100, "off_at_end": true},
            "exhaust": {"enable_start": true, "off_at_end": true},
            "start_custom": ["M117 Hi"]
        }));
        let once = synthesize(&opts, &HookMap::new());
        assert_eq!(synthesize(&opts, &once), once);
    }

    #[test]
    fn test_blank_camera_command_emits_nothing() {
        let opts = mc(json!({"camera": {"use_after_snapshot": true, "command": "  "}}));
        assert!(synthesize(&opts, &HookMap::new()).is_empty());
    }
}
