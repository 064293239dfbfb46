//! PDL Document Model
//!
//! Firmware-agnostic printer description. Every section defaults so that
//! partially populated documents load; numeric fields accept numbers or
//! numeric strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::firmware::Firmware;
use crate::hooks::{add_if_absent, HookMap};
use crate::policies::Policies;
use crate::value::{lenient, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pdl {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub pdl_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub firmware: Firmware,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub kinematics: Option<String>,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub extruders: Vec<Extruder>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub machine_control: MachineControl,
    #[serde(default)]
    pub gcode: GcodeSection,
    #[serde(default)]
    pub process_defaults: ProcessDefaults,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_print_tag: Option<Value>,
    #[serde(default)]
    pub policies: Policies,
}

impl Pdl {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// First extruder, which generators and rules treat as primary.
    pub fn primary_extruder(&self) -> Option<&Extruder> {
        self.extruders.first()
    }

    pub fn nozzle_diameter(&self) -> Option<f64> {
        self.primary_extruder().and_then(|e| e.nozzle_diameter)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub bed_shape: Vec<[f64; 2]>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub z_height: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub origin: Option<String>,
}

impl Geometry {
    /// True when the bed polygon is exactly its axis-aligned bounding box.
    pub fn is_rectangular(&self) -> bool {
        if self.bed_shape.len() != 4 {
            return false;
        }
        let xs = self.bed_shape.iter().map(|p| p[0]);
        let ys = self.bed_shape.iter().map(|p| p[1]);
        let (min_x, max_x) = xs.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let (min_y, max_y) = ys.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let corners = [[min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y]];
        corners.iter().all(|c| self.bed_shape.contains(c))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extruder {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub nozzle_diameter: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub nozzle_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub drive: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub max_nozzle_temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub mixing_channels: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Material {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub filament_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub filament_diameter: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub nozzle_temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub bed_temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub retraction_length: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub retraction_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub fan_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub extrusion_multiplier: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub color_hex: Option<String>,
}

/// Explicit named hooks, free-form hooks and macros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcodeSection {
    #[serde(flatten)]
    pub named: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub macros: BTreeMap<String, Vec<String>>,
}

impl GcodeSection {
    /// Baseline hook map: named hooks, then free-form hooks merged
    /// add-if-absent under the same name.
    pub fn baseline(&self) -> HookMap {
        let mut out = self.named.clone();
        for (name, seq) in &self.hooks {
            let target = out.entry(name.clone()).or_default();
            for line in seq {
                add_if_absent(target, line);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessDefaults {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub layer_height_mm: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub first_layer_mm: Option<f64>,
    #[serde(default)]
    pub speeds_mms: Speeds,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub retract_mm: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub retract_speed_mms: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub adhesion: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub extrusion_multiplier: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub infill_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub infill_pattern: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub walls: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub support: Option<String>,
    #[serde(default)]
    pub cooling: Cooling,
    #[serde(default)]
    pub accelerations_mms2: Accelerations,
}

macro_rules! per_feature {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(default, deserialize_with = "lenient::opt_f64")]
                pub $field: Option<f64>,
            )+
        }

        impl $name {
            /// `(feature, value)` pairs in declaration order.
            pub fn entries(&self) -> Vec<(&'static str, Option<f64>)> {
                vec![$((stringify!($field), self.$field),)+]
            }

            pub fn is_empty(&self) -> bool {
                self.entries().iter().all(|(_, v)| v.is_none())
            }
        }
    };
}

per_feature! {
    /// Feature speeds in mm/s.
    Speeds { perimeter, infill, travel, external_perimeter, top, bottom }
}

per_feature! {
    /// Feature accelerations in mm/s².
    Accelerations { perimeter, infill, external_perimeter, top, bottom, travel }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cooling {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub min_layer_time_s: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub fan_min_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub fan_max_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub fan_always_on: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub print_speed_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub travel_speed_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub acceleration_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub jerk_max: Option<f64>,
}

// --- Machine control ---

/// Output pin: controller pin number or a firmware pin name (`out1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PinRef {
    Number(i64),
    Name(String),
    /// Neither an integer nor a string (`10.5`, `true`), as written.
    Invalid(String),
}

impl PinRef {
    /// Numeric pin, including names that are just digits.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            PinRef::Number(n) => Some(*n),
            PinRef::Name(s) => s.trim().parse().ok(),
            PinRef::Invalid(_) => None,
        }
    }

    /// False for values no firmware can address.
    pub fn is_valid(&self) -> bool {
        !matches!(self, PinRef::Invalid(_))
    }
}

impl std::fmt::Display for PinRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinRef::Number(n) => write!(f, "{}", n),
            PinRef::Name(s) | PinRef::Invalid(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineControl {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub psu_on_start: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub psu_off_end: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub light_on_start: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub light_off_end: bool,
    #[serde(default)]
    pub rgb_start: Option<Rgb>,
    #[serde(default)]
    pub chamber: Option<Chamber>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub enable_mesh_start: bool,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub z_offset: Option<f64>,
    #[serde(default)]
    pub camera: Camera,
    #[serde(default)]
    pub fans: Fans,
    #[serde(default)]
    pub sd_logging: SdLogging,
    #[serde(default)]
    pub exhaust: Exhaust,
    #[serde(default)]
    pub aux_outputs: Vec<AuxOutput>,
    #[serde(default)]
    pub custom_peripherals: Vec<CustomPeripheral>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub start_custom: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub end_custom: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rgb {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub r: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub g: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub b: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chamber {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub wait: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Camera {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub use_before_snapshot: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub use_after_snapshot: bool,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub command: Option<String>,
}

impl Camera {
    pub fn is_triggered(&self) -> bool {
        self.use_before_snapshot || self.use_after_snapshot
    }

    /// Trimmed command, `None` when absent or blank.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fans {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub part_start_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub aux_index: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub aux_start_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub off_at_end: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdLogging {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub enable_start: bool,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub stop_at_end: bool,
}

impl SdLogging {
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exhaust {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub enable_start: bool,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub speed_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub off_at_end: bool,
    #[serde(default, deserialize_with = "lenient::opt_pin")]
    pub pin: Option<PinRef>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub fan_index: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuxOutput {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_pin")]
    pub pin: Option<PinRef>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub start_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub end_value: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomPeripheral {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub hook: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub sequence: Vec<String>,
}

impl CustomPeripheral {
    /// Trimmed hook name, `None` when absent or blank.
    pub fn hook(&self) -> Option<&str> {
        self.hook.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }
}
