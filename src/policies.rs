//! Caller-supplied policies.
//!
//! Preferences that a host application would keep in a settings store are
//! passed in explicitly, either embedded in the document (`policies`) or
//! layered on top with [`PolicyOverrides`].

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_slicer: Option<String>,
    #[serde(default)]
    pub klipper: KlipperPolicy,
    #[serde(default)]
    pub rrf: RrfPolicy,
    #[serde(default)]
    pub grbl: GrblPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlipperPolicy {
    /// Map the M240 camera trigger to the timelapse macro.
    #[serde(default = "default_true")]
    pub camera_map: bool,
}

impl Default for KlipperPolicy {
    fn default() -> Self {
        Self { camera_map: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrfPolicy {
    /// Advise named pins (`out1`) over numeric ones.
    #[serde(default = "default_true")]
    pub prefer_named_pins: bool,
}

impl Default for RrfPolicy {
    fn default() -> Self {
        Self { prefer_named_pins: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrblPolicy {
    #[serde(default)]
    pub exhaust_mode: CoolantMode,
}

/// Coolant output used for the exhaust on GRBL/LinuxCNC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolantMode {
    /// Flood coolant.
    #[default]
    #[serde(rename = "M8", alias = "m8")]
    M8,
    /// Mist coolant.
    #[serde(rename = "M7", alias = "m7")]
    M7,
}

impl CoolantMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CoolantMode::M8 => "M8",
            CoolantMode::M7 => "M7",
        }
    }
}

/// Slicer the generated profiles are destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicerTarget {
    Cura,
    Prusa,
    SuperSlicer,
    Orca,
    Bambu,
    IdeaMaker,
}

impl SlicerTarget {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cura" => Some(SlicerTarget::Cura),
            "prusa" | "prusaslicer" => Some(SlicerTarget::Prusa),
            "superslicer" => Some(SlicerTarget::SuperSlicer),
            "orca" | "orcaslicer" => Some(SlicerTarget::Orca),
            "bambu" | "bambustudio" => Some(SlicerTarget::Bambu),
            "ideamaker" => Some(SlicerTarget::IdeaMaker),
            _ => None,
        }
    }
}

impl Policies {
    pub fn slicer(&self) -> Option<SlicerTarget> {
        self.target_slicer.as_deref().and_then(SlicerTarget::parse)
    }

    /// Shallow overlay: every field set in `overrides` wins.
    pub fn apply_overrides(&mut self, overrides: &PolicyOverrides) {
        if let Some(slicer) = &overrides.target_slicer {
            self.target_slicer = Some(slicer.clone());
        }
        if let Some(klipper) = &overrides.klipper {
            if let Some(v) = klipper.camera_map {
                self.klipper.camera_map = v;
            }
        }
        if let Some(rrf) = &overrides.rrf {
            if let Some(v) = rrf.prefer_named_pins {
                self.rrf.prefer_named_pins = v;
            }
        }
        if let Some(grbl) = &overrides.grbl {
            if let Some(v) = grbl.exhaust_mode {
                self.grbl.exhaust_mode = v;
            }
        }
    }
}

/// Project-level policy overrides; absent fields leave the document's
/// policies untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub target_slicer: Option<String>,
    #[serde(default)]
    pub klipper: Option<KlipperOverrides>,
    #[serde(default)]
    pub rrf: Option<RrfOverrides>,
    #[serde(default)]
    pub grbl: Option<GrblOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KlipperOverrides {
    #[serde(default)]
    pub camera_map: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RrfOverrides {
    #[serde(default)]
    pub prefer_named_pins: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrblOverrides {
    #[serde(default)]
    pub exhaust_mode: Option<CoolantMode>,
}
