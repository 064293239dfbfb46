//! Validation System - Severity-Tagged Issues
//!
//! Rules produce issues; callers decide what an issue means for them
//! (exit codes, blocking compilation, inline hints).
//!
//! Every rule is a pure function. A check whose operands are missing is
//! skipped, never reported.

use serde::{Deserialize, Serialize};

use crate::value::lenient;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warn,
    Info,
}

impl std::fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IssueLevel::Error => "error",
            IssueLevel::Warn => "warn",
            IssueLevel::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(level: IssueLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { level, path: path.into(), message: message.into() }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Error, path, message)
    }

    pub fn warn(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Warn, path, message)
    }

    pub fn info(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Info, path, message)
    }
}

/// Issue counts per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub error: usize,
    pub warn: usize,
    pub info: usize,
    pub total: usize,
}

impl Summary {
    pub fn has_errors(&self) -> bool {
        self.error > 0
    }
}

/// Flatten any number of issue lists and count them.
pub fn summarize(issue_lists: &[&[Issue]]) -> Summary {
    issue_lists
        .iter()
        .flat_map(|list| list.iter())
        .fold(Summary::default(), |mut s, issue| {
            match issue.level {
                IssueLevel::Error => s.error += 1,
                IssueLevel::Warn => s.warn += 1,
                IssueLevel::Info => s.info += 1,
            }
            s.total += 1;
            s
        })
}

// --- Profile inputs ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrinterProfile {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub nozzle_diameter: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub filament_diameter: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_vec_f64")]
    pub build_volume: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilamentProfile {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub filament_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub nozzle_temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub bed_temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessProfile {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub layer_height: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub first_layer_height: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub print_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub travel_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub adhesion_type: Option<String>,
}

// --- Thresholds ---

pub const NOZZLE_DIAMETER_RANGE: (f64, f64) = (0.1, 1.2);
pub const FILAMENT_DIAMETER_RANGE: (f64, f64) = (1.6, 3.1);
pub const LAYER_TO_NOZZLE_MAX: f64 = 0.8;
pub const PRINT_SPEED_MAX: f64 = 150.0;
pub const TRAVEL_SPEED_MAX: f64 = 300.0;
pub const KNOWN_ADHESION: &[&str] = &["skirt", "brim", "raft", "none", ""];

pub(crate) fn outside(v: f64, (lo, hi): (f64, f64)) -> bool {
    v < lo || v > hi
}

/// Typical temperature windows for a material family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaterialRange {
    pub label: &'static str,
    pub nozzle: (f64, f64),
    pub bed: (f64, f64),
}

pub(crate) fn material_range(filament_type: &str) -> Option<MaterialRange> {
    let range = |label: &'static str, nozzle: (f64, f64), bed: (f64, f64)| {
        Some(MaterialRange { label, nozzle, bed })
    };
    match filament_type.trim().to_ascii_uppercase().as_str() {
        "PLA" => range("PLA", (180.0, 230.0), (0.0, 70.0)),
        "PETG" => range("PETG", (220.0, 260.0), (60.0, 90.0)),
        "ABS" => range("ABS", (230.0, 270.0), (80.0, 110.0)),
        "ASA" => range("ASA", (230.0, 270.0), (80.0, 110.0)),
        "TPU" => range("TPU", (200.0, 240.0), (0.0, 60.0)),
        _ => None,
    }
}

/// Temperature checks shared by filament profiles and PDL materials.
pub(crate) fn check_material_temps(
    filament_type: Option<&str>,
    nozzle_temperature: Option<f64>,
    bed_temperature: Option<f64>,
    path_prefix: &str,
) -> Vec<Issue> {
    let Some(range) = filament_type.and_then(material_range) else {
        return vec![];
    };
    let mut issues = vec![];
    if let Some(nt) = nozzle_temperature.filter(|t| outside(*t, range.nozzle)) {
        issues.push(Issue::warn(
            format!("{}nozzle_temperature", path_prefix),
            format!(
                "{} nozzle temp usually {}–{} °C (got {})",
                range.label, range.nozzle.0, range.nozzle.1, nt
            ),
        ));
    }
    if let Some(bt) = bed_temperature.filter(|t| outside(*t, range.bed)) {
        issues.push(Issue::warn(
            format!("{}bed_temperature", path_prefix),
            format!(
                "{} bed temp usually {}–{} °C (got {})",
                range.label, range.bed.0, range.bed.1, bt
            ),
        ));
    }
    issues
}

pub fn validate_printer(printer: &PrinterProfile) -> Vec<Issue> {
    let mut issues = vec![];

    if let Some(nd) = printer.nozzle_diameter {
        if outside(nd, NOZZLE_DIAMETER_RANGE) {
            issues.push(Issue::warn("nozzle_diameter", "Unusual nozzle_diameter (0.1–1.2 mm typical)"));
        }
    }
    if let Some(fd) = printer.filament_diameter {
        if outside(fd, FILAMENT_DIAMETER_RANGE) {
            issues.push(Issue::warn("filament_diameter", "Unusual filament_diameter (1.75 or 2.85 typical)"));
        }
    }
    if let Some(bv) = printer.build_volume.as_deref().filter(|bv| bv.len() == 3) {
        if bv.iter().any(|v| *v <= 0.0) {
            issues.push(Issue::error("build_volume", "build_volume must be positive [X,Y,Z]"));
        }
    }

    issues
}

pub fn validate_filament(filament: &FilamentProfile) -> Vec<Issue> {
    check_material_temps(
        filament.filament_type.as_deref(),
        filament.nozzle_temperature,
        filament.bed_temperature,
        "",
    )
}

pub fn validate_process(process: &ProcessProfile, printer: Option<&PrinterProfile>) -> Vec<Issue> {
    let mut issues = vec![];
    let nozzle = printer.and_then(|p| p.nozzle_diameter).filter(|n| *n != 0.0);

    if let Some(nozzle) = nozzle {
        if let Some(lh) = process.layer_height.filter(|lh| *lh > LAYER_TO_NOZZLE_MAX * nozzle) {
            issues.push(Issue::warn("layer_height", format!("layer_height {} > 80% of nozzle {}", lh, nozzle)));
        }
        if let Some(flh) = process.first_layer_height.filter(|h| *h > LAYER_TO_NOZZLE_MAX * nozzle) {
            issues.push(Issue::warn(
                "first_layer_height",
                format!("first_layer_height {} > 80% of nozzle {}", flh, nozzle),
            ));
        }
    }
    if process.print_speed.is_some_and(|s| s > PRINT_SPEED_MAX) {
        issues.push(Issue::warn("print_speed", "print_speed unusually high (>150 mm/s)"));
    }
    if process.travel_speed.is_some_and(|s| s > TRAVEL_SPEED_MAX) {
        issues.push(Issue::warn("travel_speed", "travel_speed unusually high (>300 mm/s)"));
    }
    let adhesion = process.adhesion_type.as_deref().unwrap_or("").to_ascii_lowercase();
    if !KNOWN_ADHESION.contains(&adhesion.as_str()) {
        issues.push(Issue::warn("adhesion_type", format!("Unknown adhesion_type '{}'", adhesion)));
    }

    issues
}
