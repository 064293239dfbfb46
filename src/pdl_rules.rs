//! PDL Rule Engine - Section-Ordered Rules
//!
//! Each section of the document is checked by one rule. The validator runs
//! them in a fixed order so issue lists are stable across runs.

use std::collections::BTreeSet;

use crate::pdl::Pdl;
use crate::policies::SlicerTarget;
use crate::synthesis::DEFAULT_LOG_FILE;
use crate::validation::{
    check_material_temps, outside, Issue, FILAMENT_DIAMETER_RANGE, KNOWN_ADHESION, LAYER_TO_NOZZLE_MAX, PRINT_SPEED_MAX,
    TRAVEL_SPEED_MAX,
};
use crate::SUPPORTED_PDL_MAJOR;

pub const EXTRUSION_MULTIPLIER_RANGE: (f64, f64) = (0.8, 1.2);
pub const PERCENT_RANGE: (f64, f64) = (0.0, 100.0);
/// Retraction boundary between bowden and direct drive setups, in mm.
pub const RETRACT_DRIVE_SPLIT_MM: f64 = 2.0;

/// One section's checks.
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, doc: &Pdl) -> Vec<Issue>;
}

/// `pdl_version` compatibility.
pub struct DocumentRule;

/// Per-option sanity of `machine_control`.
pub struct MachineControlRule;

/// Firmware-specific advisories from the firmware's policy table.
pub struct FirmwareAdvisoryRule;

pub struct ProcessDefaultsRule;

pub struct MaterialsRule;

/// Retraction length against extruder drive type.
pub struct DriveRetractionRule;

/// Hints for the slicer named by `policies.target_slicer`.
pub struct SlicerHintsRule;

/// Accept `1`, `1.0` and full semver.
fn parse_version(raw: &str) -> Option<semver::Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(v) = semver::Version::parse(raw) {
        return Some(v);
    }
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let mut padded = parts.clone();
    padded.resize(3, "0");
    semver::Version::parse(&padded.join(".")).ok()
}

impl ValidationRule for DocumentRule {
    fn name(&self) -> &'static str {
        "document"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let Some(raw) = doc.pdl_version.as_deref() else {
            return vec![];
        };
        match parse_version(raw) {
            Some(v) if v.major > SUPPORTED_PDL_MAJOR => vec![Issue::warn(
                "pdl_version",
                format!("pdl_version {} is newer than supported major {}", raw, SUPPORTED_PDL_MAJOR),
            )],
            Some(_) => vec![],
            None => vec![Issue::info("pdl_version", format!("pdl_version '{}' is not a version number", raw))],
        }
    }
}

impl ValidationRule for MachineControlRule {
    fn name(&self) -> &'static str {
        "machine_control"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mut issues = vec![];

        if mc.exhaust.pin.is_some() && mc.exhaust.fan_index.is_some() {
            issues.push(Issue::warn(
                "machine_control.exhaust",
                "exhaust has both pin and fan_index; pin takes precedence",
            ));
        }
        if mc.camera.is_triggered() && mc.camera.command().is_none() {
            issues.push(Issue::warn(
                "machine_control.camera.command",
                "camera snapshot enabled but command is empty",
            ));
        }

        let mut seen = BTreeSet::new();
        for (idx, ao) in mc.aux_outputs.iter().enumerate() {
            let path = format!("machine_control.aux_outputs[{}].pin", idx);
            match ao.pin.as_ref().map(|pin| (pin, pin.as_number())) {
                None => issues.push(Issue::warn(path, "aux output has no pin")),
                Some((_, Some(n))) => {
                    if !seen.insert(n) {
                        issues.push(Issue::warn(path, format!("duplicate aux pin P{}", n)));
                    }
                }
                Some((pin, None)) => {
                    issues.push(Issue::warn(path, format!("aux pin '{}' is not an integer", pin)));
                }
            }
        }

        for (idx, cp) in mc.custom_peripherals.iter().enumerate() {
            let path = format!("machine_control.custom_peripherals[{}]", idx);
            if cp.hook().is_none() {
                issues.push(Issue::warn(format!("{}.hook", path), "custom peripheral has no hook"));
            }
            if cp.sequence.iter().all(|line| line.trim().is_empty()) {
                issues.push(Issue::warn(format!("{}.sequence", path), "custom peripheral has an empty sequence"));
            }
        }

        if mc.exhaust.enable_start && !mc.exhaust.off_at_end {
            issues.push(Issue::warn(
                "machine_control.exhaust.off_at_end",
                "exhaust enabled at start but never turned off",
            ));
        }
        if mc.fans.part_start_percent.is_some_and(|p| p > 0.0) && !mc.fans.off_at_end {
            issues.push(Issue::info(
                "machine_control.fans.off_at_end",
                "part fan started but not turned off at end",
            ));
        }
        if mc.sd_logging.enable_start && mc.sd_logging.filename().is_none() {
            issues.push(Issue::info(
                "machine_control.sd_logging.filename",
                format!("SD logging enabled without filename; {} is used", DEFAULT_LOG_FILE),
            ));
        }

        issues
    }
}

impl ValidationRule for FirmwareAdvisoryRule {
    fn name(&self) -> &'static str {
        "firmware"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        doc.firmware.policy().map(|policy| policy.advise(doc)).unwrap_or_default()
    }
}

impl ValidationRule for ProcessDefaultsRule {
    fn name(&self) -> &'static str {
        "process_defaults"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let pd = &doc.process_defaults;
        let mut issues = vec![];

        if let Some(nozzle) = doc.nozzle_diameter().filter(|n| *n > 0.0) {
            let heights = [("layer_height_mm", pd.layer_height_mm), ("first_layer_mm", pd.first_layer_mm)];
            for (field, value) in heights {
                if let Some(h) = value.filter(|h| *h > LAYER_TO_NOZZLE_MAX * nozzle) {
                    issues.push(Issue::warn(
                        format!("process_defaults.{}", field),
                        format!("{} {} > 80% of nozzle {}", field, h, nozzle),
                    ));
                }
            }
        }

        for (feature, speed) in pd.speeds_mms.entries() {
            let max = if feature == "travel" { TRAVEL_SPEED_MAX } else { PRINT_SPEED_MAX };
            if speed.is_some_and(|s| s > max) {
                issues.push(Issue::warn(
                    format!("process_defaults.speeds_mms.{}", feature),
                    format!("{} speed unusually high (>{} mm/s)", feature, max),
                ));
            }
        }

        let cooling = &pd.cooling;
        for (field, value) in [("fan_min_percent", cooling.fan_min_percent), ("fan_max_percent", cooling.fan_max_percent)] {
            if value.is_some_and(|v| outside(v, PERCENT_RANGE)) {
                issues.push(Issue::warn(
                    format!("process_defaults.cooling.{}", field),
                    format!("{} must be within 0–100", field),
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (cooling.fan_min_percent, cooling.fan_max_percent) {
            if lo > hi {
                issues.push(Issue::warn(
                    "process_defaults.cooling",
                    format!("fan_min_percent {} exceeds fan_max_percent {}", lo, hi),
                ));
            }
        }

        for (feature, accel) in pd.accelerations_mms2.entries() {
            if accel.is_some_and(|a| a < 0.0) {
                issues.push(Issue::error(
                    format!("process_defaults.accelerations_mms2.{}", feature),
                    format!("{} acceleration must not be negative", feature),
                ));
            }
        }

        if pd.infill_percent.is_some_and(|v| outside(v, PERCENT_RANGE)) {
            issues.push(Issue::warn("process_defaults.infill_percent", "infill_percent must be within 0–100"));
        }

        let adhesion = pd.adhesion.as_deref().unwrap_or("").trim().to_ascii_lowercase();
        if !KNOWN_ADHESION.contains(&adhesion.as_str()) {
            issues.push(Issue::warn("process_defaults.adhesion", format!("Unknown adhesion '{}'", adhesion)));
        }

        issues
    }
}

impl ValidationRule for MaterialsRule {
    fn name(&self) -> &'static str {
        "materials"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let max_nozzle = doc.primary_extruder().and_then(|e| e.max_nozzle_temperature);
        let mut issues = vec![];

        for (idx, m) in doc.materials.iter().enumerate() {
            let prefix = format!("materials[{}].", idx);
            if let Some(fd) = m.filament_diameter.filter(|fd| outside(*fd, FILAMENT_DIAMETER_RANGE)) {
                issues.push(Issue::warn(
                    format!("{}filament_diameter", prefix),
                    format!("Unusual material filament_diameter {} (1.75 or 2.85 typical)", fd),
                ));
            }
            issues.extend(check_material_temps(
                m.filament_type.as_deref(),
                m.nozzle_temperature,
                m.bed_temperature,
                &prefix,
            ));
            if let Some(em) = m.extrusion_multiplier.filter(|em| outside(*em, EXTRUSION_MULTIPLIER_RANGE)) {
                issues.push(Issue::warn(
                    format!("{}extrusion_multiplier", prefix),
                    format!("extrusion_multiplier {} outside 0.8–1.2", em),
                ));
            }
            if let (Some(nt), Some(max)) = (m.nozzle_temperature, max_nozzle) {
                if nt > max {
                    issues.push(Issue::warn(
                        format!("{}nozzle_temperature", prefix),
                        format!("nozzle_temperature {} exceeds extruder max {}", nt, max),
                    ));
                }
            }
        }

        issues
    }
}

impl ValidationRule for DriveRetractionRule {
    fn name(&self) -> &'static str {
        "drive"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let drive = doc.primary_extruder().and_then(|e| e.drive.as_deref()).map(str::to_ascii_lowercase);
        let (Some(drive), Some(retract)) = (drive, doc.process_defaults.retract_mm) else {
            return vec![];
        };
        match drive.as_str() {
            "bowden" if retract < RETRACT_DRIVE_SPLIT_MM => vec![Issue::warn(
                "process_defaults.retract_mm",
                format!("Bowden drive typically needs higher retract_mm (got {}, expected ≥2)", retract),
            )],
            "direct" if retract > RETRACT_DRIVE_SPLIT_MM => vec![Issue::warn(
                "process_defaults.retract_mm",
                format!("Direct drive typically needs lower retract_mm (got {}, expected ≤2)", retract),
            )],
            _ => vec![],
        }
    }
}

impl ValidationRule for SlicerHintsRule {
    fn name(&self) -> &'static str {
        "slicer"
    }

    fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        let Some(slicer) = doc.policies.slicer() else {
            return vec![];
        };
        let mut issues = vec![];
        match slicer {
            SlicerTarget::Cura => {
                let bed = &doc.geometry;
                if !bed.bed_shape.is_empty() && !bed.is_rectangular() {
                    issues.push(Issue::info(
                        "geometry.bed_shape",
                        "Cura generator uses rectangular bed dimensions; custom bed shapes are approximated",
                    ));
                }
            }
            SlicerTarget::Prusa | SlicerTarget::SuperSlicer => {
                if !doc.process_defaults.accelerations_mms2.is_empty() && doc.limits.acceleration_max.is_none() {
                    issues.push(Issue::info(
                        "limits.acceleration_max",
                        "Consider setting limits.acceleration_max so machine limits match feature accelerations",
                    ));
                }
            }
            SlicerTarget::Orca | SlicerTarget::Bambu => {
                if doc.materials.is_empty() {
                    issues.push(Issue::info("materials", "Orca generator expects at least one material"));
                }
            }
            SlicerTarget::IdeaMaker => {
                if doc.process_defaults.speeds_mms.is_empty() {
                    issues.push(Issue::info(
                        "process_defaults.speeds_mms",
                        "Add speeds_mms (perimeter/infill/travel) for ideaMaker profiles",
                    ));
                }
            }
        }
        issues
    }
}

/// Rules in execution order.
pub struct PdlValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl PdlValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(DocumentRule),
                Box::new(MachineControlRule),
                Box::new(FirmwareAdvisoryRule),
                Box::new(ProcessDefaultsRule),
                Box::new(MaterialsRule),
                Box::new(DriveRetractionRule),
                Box::new(SlicerHintsRule),
            ],
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate(&self, doc: &Pdl) -> Vec<Issue> {
        self.rules.iter().flat_map(|rule| rule.validate(doc)).collect()
    }
}

impl Default for PdlValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every section rule over `doc`.
pub fn validate_pdl(doc: &Pdl) -> Vec<Issue> {
    PdlValidator::new().validate(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::IssueLevel;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Pdl {
        Pdl::from_value(v).unwrap()
    }

    fn has(issues: &[Issue], level: IssueLevel, needle: &str) -> bool {
        issues.iter().any(|i| i.level == level && i.message.contains(needle))
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            PdlValidator::new().rule_names(),
            vec!["document", "machine_control", "firmware", "process_defaults", "materials", "drive", "slicer"]
        );
    }

    #[test]
    fn test_empty_document_is_clean() {
        assert!(validate_pdl(&Pdl::default()).is_empty());
    }

    #[test]
    fn test_pdl_version() {
        assert!(validate_pdl(&doc(json!({"pdl_version": "1.0"}))).is_empty());
        assert!(validate_pdl(&doc(json!({"pdl_version": 1}))).is_empty());
        let issues = validate_pdl(&doc(json!({"pdl_version": "2.1"})));
        assert!(has(&issues, IssueLevel::Warn, "newer than supported"));
        let issues = validate_pdl(&doc(json!({"pdl_version": "latest"})));
        assert!(has(&issues, IssueLevel::Info, "not a version"));
    }

    #[test]
    fn test_grbl_exhaust_advisories() {
        let issues = validate_pdl(&doc(json!({
            "firmware": "grbl",
            "machine_control": {"exhaust": {"enable_start": true, "off_at_end": true, "pin": 10}}
        })));
        assert!(has(&issues, IssueLevel::Info, "GRBL/LinuxCNC exhaust maps to coolant"));
        assert!(has(&issues, IssueLevel::Warn, "ignores raw pin control"));
    }

    #[test]
    fn test_klipper_camera_mapped() {
        let issues = validate_pdl(&doc(json!({
            "firmware": "klipper",
            "machine_control": {"camera": {"use_before_snapshot": true, "command": "M240"}}
        })));
        assert!(issues.iter().any(|i| i.level == IssueLevel::Info && i.message.contains("mapped to")));
    }

    #[test]
    fn test_rrf_advisories() {
        let issues = validate_pdl(&doc(json!({
            "firmware": "RRF",
            "machine_control": {
                "fans": {"aux_start_percent": 50},
                "exhaust": {"enable_start": true, "off_at_end": true, "pin": 5},
                "aux_outputs": [{"pin": 3, "start_value": 1}]
            }
        })));
        assert!(has(&issues, IssueLevel::Warn, "aux_start_percent set without aux_index"));
        let named: Vec<_> = issues.iter().filter(|i| i.message.contains("prefer named pins")).collect();
        assert!(named.iter().any(|i| i.path.contains("aux_outputs")));
        assert!(named.iter().any(|i| i.path.contains("exhaust.pin")));
    }

    #[test]
    fn test_marlin_mesh_without_offset() {
        let issues = validate_pdl(&doc(json!({"firmware": "marlin", "machine_control": {"enable_mesh_start": true}})));
        assert!(has(&issues, IssueLevel::Info, "mesh enabled; consider setting probe Z offset"));
    }

    #[test]
    fn test_machine_control_sanity() {
        let issues = validate_pdl(&doc(json!({
            "machine_control": {
                "exhaust": {"enable_start": true, "pin": 4, "fan_index": 1},
                "camera": {"use_after_snapshot": true},
                "aux_outputs": [{"pin": 7}, {"pin": 7}, {"pin": "out2"}],
                "custom_peripherals": [{"hook": " ", "sequence": []}],
                "fans": {"part_start_percent": 100},
                "sd_logging": {"enable_start": true}
            }
        })));
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "machine_control.exhaust",
                "machine_control.camera.command",
                "machine_control.aux_outputs[1].pin",
                "machine_control.aux_outputs[2].pin",
                "machine_control.custom_peripherals[0].hook",
                "machine_control.custom_peripherals[0].sequence",
                "machine_control.exhaust.off_at_end",
                "machine_control.fans.off_at_end",
                "machine_control.sd_logging.filename",
            ]
        );
    }

    #[test]
    fn test_aux_pin_shapes() {
        let issues = validate_pdl(&doc(json!({
            "machine_control": {
                "aux_outputs": [{"pin": "12"}, {"pin": 12}, {"pin": 10.5}, {"label": "fan relay"}, {"pin": true}]
            }
        })));
        let aux: Vec<_> = issues
            .iter()
            .filter(|i| i.path.starts_with("machine_control.aux_outputs"))
            .map(|i| (i.path.as_str(), i.message.as_str()))
            .collect();
        assert_eq!(
            aux,
            vec![
                ("machine_control.aux_outputs[1].pin", "duplicate aux pin P12"),
                ("machine_control.aux_outputs[2].pin", "aux pin '10.5' is not an integer"),
                ("machine_control.aux_outputs[3].pin", "aux output has no pin"),
                ("machine_control.aux_outputs[4].pin", "aux pin 'true' is not an integer"),
            ]
        );
    }

    #[test]
    fn test_null_firmware_validates() {
        let issues = validate_pdl(&doc(json!({"firmware": null})));
        assert!(issues.iter().all(|i| i.level != IssueLevel::Error));
    }

    #[test]
    fn test_process_defaults() {
        let issues = validate_pdl(&doc(json!({
            "extruders": [{"nozzle_diameter": 0.4}],
            "process_defaults": {
                "layer_height_mm": 0.36,
                "speeds_mms": {"perimeter": 200, "infill": 151, "travel": 301, "top": 150},
                "cooling": {"fan_min_percent": 80, "fan_max_percent": 60},
                "accelerations_mms2": {"perimeter": -1},
                "infill_percent": 120,
                "adhesion": "Brim"
            }
        })));
        assert!(has(&issues, IssueLevel::Warn, "layer_height_mm 0.36 > 80% of nozzle"));
        assert!(has(&issues, IssueLevel::Warn, "perimeter speed unusually high"));
        assert!(has(&issues, IssueLevel::Warn, "infill speed unusually high"));
        assert!(has(&issues, IssueLevel::Warn, "travel speed unusually high"));
        assert!(!has(&issues, IssueLevel::Warn, "top speed"));
        assert!(has(&issues, IssueLevel::Warn, "fan_min_percent 80 exceeds"));
        assert!(has(&issues, IssueLevel::Error, "perimeter acceleration must not be negative"));
        assert!(has(&issues, IssueLevel::Warn, "infill_percent"));
        assert!(!has(&issues, IssueLevel::Warn, "Unknown adhesion"));
    }

    #[test]
    fn test_materials() {
        let issues = validate_pdl(&doc(json!({
            "extruders": [{"max_nozzle_temperature": 220}],
            "materials": [{"filament_type": "PLA", "filament_diameter": 1.0, "nozzle_temperature": 240,
                           "bed_temperature": 90, "extrusion_multiplier": 1.5}]
        })));
        assert!(has(&issues, IssueLevel::Warn, "Unusual material filament_diameter"));
        assert!(has(&issues, IssueLevel::Warn, "PLA nozzle temp usually"));
        assert!(has(&issues, IssueLevel::Warn, "PLA bed temp usually"));
        assert!(has(&issues, IssueLevel::Warn, "extrusion_multiplier 1.5"));
        assert!(has(&issues, IssueLevel::Warn, "exceeds extruder max 220"));
        assert!(issues.iter().all(|i| i.path.starts_with("materials[0].")));
    }

    #[test]
    fn test_drive_retraction() {
        let issues = validate_pdl(&doc(json!({
            "extruders": [{"drive": "Bowden"}],
            "process_defaults": {"retract_mm": 0.8}
        })));
        assert!(has(&issues, IssueLevel::Warn, "Bowden drive typically needs higher retract_mm"));
        let issues = validate_pdl(&doc(json!({
            "extruders": [{"drive": "direct"}],
            "process_defaults": {"retract_mm": 0.8}
        })));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_slicer_hints() {
        let cura = doc(json!({
            "policies": {"target_slicer": "cura"},
            "geometry": {"bed_shape": [[0, 0], [200, 0], [100, 180]]}
        }));
        assert!(has(&validate_pdl(&cura), IssueLevel::Info, "Cura generator uses rectangular bed dimensions"));

        let prusa = doc(json!({
            "policies": {"target_slicer": "prusa"},
            "process_defaults": {"accelerations_mms2": {"perimeter": 1000}}
        }));
        assert!(has(&validate_pdl(&prusa), IssueLevel::Info, "Consider setting limits.acceleration_max"));

        let orca = doc(json!({"policies": {"target_slicer": "orca"}}));
        assert!(has(&validate_pdl(&orca), IssueLevel::Info, "Orca generator expects at least one material"));

        let idea = doc(json!({"policies": {"target_slicer": "ideamaker"}}));
        assert!(has(&validate_pdl(&idea), IssueLevel::Info, "Add speeds_mms (perimeter/infill/travel)"));
    }
}
