//! Firmware Dialects and Policy Tables
//!
//! Each recognized firmware owns a [`FirmwarePolicy`]: the 1:1 line rewrites
//! the mapper applies, and the advisory rules the validator runs. Adding a
//! firmware target means adding a table, not editing the mapper or the
//! validator.

use serde::{Deserialize, Deserializer, Serialize};

use crate::pdl::{Pdl, PinRef};
use crate::policies::Policies;
use crate::synthesis::DEFAULT_LOG_FILE;
use crate::validation::Issue;
use crate::value::lenient;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Firmware {
    Marlin,
    RepRap,
    Klipper,
    Grbl,
    LinuxCnc,
    Smoothie,
    Repetier,
    Bambu,
    /// Anything else. Kept verbatim; no rewriting or advisories apply.
    Other(String),
    #[default]
    Unspecified,
}

impl Firmware {
    /// Case-insensitive parse; never fails.
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "marlin" => Firmware::Marlin,
            "rrf" | "reprap" | "reprapfirmware" | "duet" => Firmware::RepRap,
            "klipper" => Firmware::Klipper,
            "grbl" => Firmware::Grbl,
            "linuxcnc" => Firmware::LinuxCnc,
            "smoothie" | "smoothieware" => Firmware::Smoothie,
            "repetier" => Firmware::Repetier,
            "bambu" => Firmware::Bambu,
            "" => Firmware::Unspecified,
            _ => Firmware::Other(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Firmware::Marlin => "marlin",
            Firmware::RepRap => "rrf",
            Firmware::Klipper => "klipper",
            Firmware::Grbl => "grbl",
            Firmware::LinuxCnc => "linuxcnc",
            Firmware::Smoothie => "smoothie",
            Firmware::Repetier => "repetier",
            Firmware::Bambu => "bambu",
            Firmware::Other(id) => id,
            Firmware::Unspecified => "",
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.policy().is_some()
    }

    pub fn policy(&self) -> Option<&'static FirmwarePolicy> {
        match self {
            Firmware::Marlin => Some(&MARLIN),
            Firmware::RepRap => Some(&RRF),
            Firmware::Klipper => Some(&KLIPPER),
            Firmware::Grbl | Firmware::LinuxCnc => Some(&GRBL),
            Firmware::Smoothie => Some(&SMOOTHIE),
            Firmware::Repetier => Some(&REPETIER),
            Firmware::Bambu => Some(&BAMBU),
            Firmware::Other(_) | Firmware::Unspecified => None,
        }
    }
}

impl From<String> for Firmware {
    fn from(id: String) -> Self {
        Firmware::parse(&id)
    }
}

/// `null` and non-scalar ids read as unspecified.
impl<'de> Deserialize<'de> for Firmware {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(lenient::opt_string(deserializer)?.map_or(Firmware::Unspecified, |id| Firmware::parse(&id)))
    }
}

impl From<&str> for Firmware {
    fn from(id: &str) -> Self {
        Firmware::parse(id)
    }
}

impl From<Firmware> for String {
    fn from(fw: Firmware) -> Self {
        fw.as_str().to_string()
    }
}

impl std::fmt::Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 1:1 line substitution scoped to specific hooks.
pub struct Rewrite {
    pub hooks: &'static [&'static str],
    /// Upper-case command word, e.g. `M240`.
    pub prefix: &'static str,
    /// Replacement for a matched line; `None` keeps the line.
    pub replace: fn(&str, &Policies) -> Option<String>,
}

impl Rewrite {
    /// Whether the trimmed, upper-cased line starts with this command word.
    /// `M29` matches `M29` and `M29 ; stop` but not `M290`.
    pub fn matches(&self, line: &str) -> bool {
        let upper = line.trim().to_ascii_uppercase();
        upper.starts_with(self.prefix)
            && !upper[self.prefix.len()..].starts_with(|c: char| c.is_ascii_digit())
    }

    pub fn applies_to(&self, hook: &str) -> bool {
        self.hooks.contains(&hook)
    }
}

pub type Advisory = fn(&Pdl) -> Vec<Issue>;

pub struct FirmwarePolicy {
    pub label: &'static str,
    pub rewrites: &'static [Rewrite],
    pub advisories: &'static [Advisory],
}

impl FirmwarePolicy {
    pub fn advise(&self, doc: &Pdl) -> Vec<Issue> {
        self.advisories.iter().flat_map(|rule| rule(doc)).collect()
    }
}

const SNAPSHOT_HOOKS: &[&str] = &["before_snapshot", "after_snapshot"];

static MARLIN: FirmwarePolicy = FirmwarePolicy {
    label: "Marlin",
    rewrites: &[],
    advisories: &[advisories::marlin],
};

static RRF: FirmwarePolicy = FirmwarePolicy {
    label: "RRF",
    rewrites: &[
        Rewrite { hooks: &["start"], prefix: "M928", replace: rewrites::rrf_log_start },
        Rewrite { hooks: &["end"], prefix: "M29", replace: rewrites::rrf_log_stop },
    ],
    advisories: &[advisories::rrf],
};

static KLIPPER: FirmwarePolicy = FirmwarePolicy {
    label: "Klipper",
    rewrites: &[Rewrite { hooks: SNAPSHOT_HOOKS, prefix: "M240", replace: rewrites::klipper_camera }],
    advisories: &[advisories::klipper],
};

static GRBL: FirmwarePolicy = FirmwarePolicy {
    label: "GRBL/LinuxCNC",
    rewrites: &[
        Rewrite { hooks: &["start"], prefix: "M10", replace: rewrites::coolant_on },
        Rewrite { hooks: &["end"], prefix: "M11", replace: rewrites::coolant_off },
    ],
    advisories: &[advisories::grbl],
};

static SMOOTHIE: FirmwarePolicy = FirmwarePolicy {
    label: "Smoothieware",
    rewrites: &[],
    advisories: &[advisories::smoothie],
};

static REPETIER: FirmwarePolicy = FirmwarePolicy {
    label: "Repetier",
    rewrites: &[],
    advisories: &[advisories::repetier],
};

static BAMBU: FirmwarePolicy = FirmwarePolicy {
    label: "Bambu",
    rewrites: &[],
    advisories: &[advisories::bambu],
};

pub const KLIPPER_CAMERA_COMMAND: &str = "M118 TIMELAPSE_TAKE_FRAME";

mod rewrites {
    use super::*;

    pub fn klipper_camera(_line: &str, policies: &Policies) -> Option<String> {
        policies.klipper.camera_map.then(|| KLIPPER_CAMERA_COMMAND.to_string())
    }

    /// `M928 file.gcode` → `M929 P"file.gcode" S1`
    pub fn rrf_log_start(line: &str, _policies: &Policies) -> Option<String> {
        let command = line.split(';').next().unwrap_or("").trim();
        let file = command.get(4..).unwrap_or("").trim().trim_matches('"');
        let file = if file.is_empty() { DEFAULT_LOG_FILE } else { file };
        Some(format!("M929 P\"{}\" S1", file))
    }

    pub fn rrf_log_stop(_line: &str, _policies: &Policies) -> Option<String> {
        Some("M929 S0".to_string())
    }

    pub fn coolant_on(_line: &str, policies: &Policies) -> Option<String> {
        Some(policies.grbl.exhaust_mode.as_str().to_string())
    }

    pub fn coolant_off(_line: &str, _policies: &Policies) -> Option<String> {
        Some("M9".to_string())
    }
}

mod advisories {
    use super::*;

    const MC: &str = "machine_control";

    fn rgb_set(doc: &Pdl) -> bool {
        doc.machine_control
            .rgb_start
            .as_ref()
            .is_some_and(|rgb| [rgb.r, rgb.g, rgb.b].iter().any(|c| c.unwrap_or(0.0) > 0.0))
    }

    fn fans_used(doc: &Pdl) -> bool {
        let fans = &doc.machine_control.fans;
        fans.part_start_percent.unwrap_or(0.0) > 0.0 || fans.aux_start_percent.unwrap_or(0.0) > 0.0
    }

    fn is_named(pin: &PinRef) -> bool {
        pin.as_number().is_none()
    }

    pub fn marlin(doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mut issues = vec![];
        if mc.enable_mesh_start && mc.z_offset.unwrap_or(0.0) == 0.0 {
            issues.push(Issue::info(
                format!("{MC}.z_offset"),
                "Marlin: mesh enabled; consider setting probe Z offset (M851)",
            ));
        }
        if rgb_set(doc) {
            issues.push(Issue::info(format!("{MC}.rgb_start"), "Marlin: M150 requires LED/NeoPixel support"));
        }
        for (idx, ao) in mc.aux_outputs.iter().enumerate() {
            if ao.pin.as_ref().is_some_and(is_named) {
                issues.push(Issue::warn(
                    format!("{MC}.aux_outputs[{idx}].pin"),
                    "Marlin: M42 expects numeric pins",
                ));
            }
        }
        if mc.exhaust.pin.as_ref().is_some_and(is_named) {
            issues.push(Issue::warn(format!("{MC}.exhaust.pin"), "Marlin: M42 expects numeric pins"));
        }
        issues
    }

    pub fn rrf(doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mut issues = vec![];
        if mc.fans.aux_start_percent.unwrap_or(0.0) > 0.0 && mc.fans.aux_index.is_none() {
            issues.push(Issue::warn(
                format!("{MC}.fans.aux_index"),
                "RRF: aux_start_percent set without aux_index; no aux fan command is emitted",
            ));
        }
        if doc.policies.rrf.prefer_named_pins {
            for (idx, ao) in mc.aux_outputs.iter().enumerate() {
                if let Some(n) = ao.pin.as_ref().and_then(PinRef::as_number) {
                    issues.push(Issue::info(
                        format!("{MC}.aux_outputs[{idx}].pin"),
                        format!("RRF: prefer named pins (e.g. out1) over numeric pin {n}"),
                    ));
                }
            }
            if let Some(n) = mc.exhaust.pin.as_ref().and_then(PinRef::as_number) {
                issues.push(Issue::info(
                    format!("{MC}.exhaust.pin"),
                    format!("RRF: prefer named pins (e.g. out1) over numeric pin {n}"),
                ));
            }
        }
        if mc.sd_logging.enable_start {
            issues.push(Issue::info(
                format!("{MC}.sd_logging"),
                "RRF: SD logging is emitted as M929 P\"file\" S1 / M929 S0",
            ));
        }
        issues
    }

    pub fn klipper(doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mut issues = vec![];
        let m240 = mc.camera.command().is_some_and(|c| c.to_ascii_uppercase().starts_with("M240"));
        if mc.camera.is_triggered() && m240 {
            if doc.policies.klipper.camera_map {
                issues.push(Issue::info(
                    format!("{MC}.camera.command"),
                    format!("Klipper: M240 camera trigger mapped to {KLIPPER_CAMERA_COMMAND}"),
                ));
            } else {
                issues.push(Issue::warn(
                    format!("{MC}.camera.command"),
                    "Klipper has no native M240; enable camera mapping or call a timelapse macro",
                ));
            }
        }
        if fans_used(doc) || mc.fans.off_at_end {
            issues.push(Issue::info(
                format!("{MC}.fans"),
                "Klipper: M106/M107 need a [fan] section in printer.cfg; consider SET_FAN_SPEED",
            ));
        }
        if mc.sd_logging.enable_start {
            issues.push(Issue::warn(format!("{MC}.sd_logging"), "Klipper does not support M928 SD logging"));
        }
        issues
    }

    pub fn grbl(doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mode = doc.policies.grbl.exhaust_mode.as_str();
        let mut issues = vec![];
        if mc.exhaust.enable_start || mc.exhaust.off_at_end {
            issues.push(Issue::info(
                format!("{MC}.exhaust"),
                format!("GRBL/LinuxCNC exhaust maps to coolant ({mode} on / M9 off)"),
            ));
        }
        if mc.exhaust.pin.is_some() {
            issues.push(Issue::warn(
                format!("{MC}.exhaust.pin"),
                "GRBL/LinuxCNC ignores raw pin control; clear exhaust.pin to use the coolant mapping",
            ));
        }
        if fans_used(doc) {
            issues.push(Issue::warn(
                format!("{MC}.fans"),
                "GRBL/LinuxCNC has no standard fan commands; use coolant or custom peripherals",
            ));
        }
        if !mc.aux_outputs.is_empty() {
            issues.push(Issue::warn(
                format!("{MC}.aux_outputs"),
                "GRBL/LinuxCNC has no M42 pin control; use custom peripherals",
            ));
        }
        issues
    }

    pub fn smoothie(doc: &Pdl) -> Vec<Issue> {
        let mut issues = vec![];
        if rgb_set(doc) {
            issues.push(Issue::info(format!("{MC}.rgb_start"), "Smoothieware: M150 requires LED module support"));
        }
        if fans_used(doc) {
            issues.push(Issue::info(
                format!("{MC}.fans"),
                "Smoothieware: M106/M107 need the fan modules enabled in config.txt",
            ));
        }
        issues
    }

    pub fn repetier(doc: &Pdl) -> Vec<Issue> {
        let mut issues = vec![];
        if rgb_set(doc) {
            issues.push(Issue::info(
                format!("{MC}.rgb_start"),
                "Repetier: M150 support depends on the build; use a macro if unavailable",
            ));
        }
        if doc.machine_control.fans.aux_index.is_some() {
            issues.push(Issue::info(format!("{MC}.fans.aux_index"), "Repetier: verify the fan P index"));
        }
        issues
    }

    pub fn bambu(doc: &Pdl) -> Vec<Issue> {
        let mc = &doc.machine_control;
        let mut issues = vec![];
        if !mc.start_custom.is_empty() || !mc.end_custom.is_empty() || !mc.custom_peripherals.is_empty() {
            issues.push(Issue::info(
                MC,
                "Bambu: G-code support is limited; keep start/end minimal and prefer built-in macros",
            ));
        }
        if mc.sd_logging.enable_start {
            issues.push(Issue::warn(format!("{MC}.sd_logging"), "Bambu firmware does not support M928 SD logging"));
        }
        issues
    }
}
