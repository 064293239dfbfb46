//! Hook Registry
//!
//! Well-known lifecycle hook names, grouped by category, plus the helpers
//! that keep hook sequences free of duplicate synthesized lines.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::pdl::GcodeSection;

/// Hook name → ordered command lines. Keys are sorted, sequences are not.
pub type HookMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCategory {
    Lifecycle,
    Layer,
    ToolFilament,
    ObjectRegion,
    Motion,
    Temperature,
    Monitoring,
}

macro_rules! known_hooks {
    ($($variant:ident => $name:literal, $category:ident;)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum KnownHook {
            $($variant,)+
        }

        impl KnownHook {
            pub const ALL: &'static [KnownHook] = &[$(KnownHook::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(KnownHook::$variant => $name,)+
                }
            }

            pub fn category(self) -> HookCategory {
                match self {
                    $(KnownHook::$variant => HookCategory::$category,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(KnownHook::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

known_hooks! {
    Start => "start", Lifecycle;
    End => "end", Lifecycle;
    OnAbort => "on_abort", Lifecycle;
    Pause => "pause", Lifecycle;
    Resume => "resume", Lifecycle;
    PowerLossResume => "power_loss_resume", Lifecycle;
    AutoShutdown => "auto_shutdown", Lifecycle;
    ToolChange => "tool_change", ToolFilament;
    BeforeToolChange => "before_tool_change", ToolFilament;
    AfterToolChange => "after_tool_change", ToolFilament;
    FilamentChange => "filament_change", ToolFilament;
    LayerChange => "layer_change", Layer;
    BeforeLayerChange => "before_layer_change", Layer;
    AfterLayerChange => "after_layer_change", Layer;
    TopLayerStart => "top_layer_start", Layer;
    BottomLayerStart => "bottom_layer_start", Layer;
    BeforeObject => "before_object", ObjectRegion;
    AfterObject => "after_object", ObjectRegion;
    BeforeRegion => "before_region", ObjectRegion;
    AfterRegion => "after_region", ObjectRegion;
    Retraction => "retraction", Motion;
    Unretraction => "unretraction", Motion;
    TravelStart => "travel_start", Motion;
    TravelEnd => "travel_end", Motion;
    BridgeStart => "bridge_start", Motion;
    BridgeEnd => "bridge_end", Motion;
    SupportInterfaceStart => "support_interface_start", Motion;
    SupportInterfaceEnd => "support_interface_end", Motion;
    BeforeHeating => "before_heating", Temperature;
    AfterHeating => "after_heating", Temperature;
    BeforeCooling => "before_cooling", Temperature;
    OnProgressPercent => "on_progress_percent", Monitoring;
    OnLayerInterval => "on_layer_interval", Monitoring;
    OnTimeInterval => "on_time_interval", Monitoring;
    BeforeSnapshot => "before_snapshot", Monitoring;
    AfterSnapshot => "after_snapshot", Monitoring;
}

impl std::fmt::Display for KnownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known hooks present with content, plus every free-form hook key. Sorted.
pub fn list_hooks(gcode: &GcodeSection) -> Vec<String> {
    let mut names: BTreeSet<String> = KnownHook::ALL
        .iter()
        .map(|hook| hook.as_str())
        .filter(|name| gcode.named.get(*name).is_some_and(|seq| !seq.is_empty()))
        .map(str::to_string)
        .collect();
    names.extend(gcode.hooks.keys().cloned());
    names.into_iter().collect()
}

/// Append `line` unless that exact string is already in `seq`.
pub fn add_if_absent(seq: &mut Vec<String>, line: &str) -> bool {
    if seq.iter().any(|existing| existing == line) {
        return false;
    }
    seq.push(line.to_string());
    true
}
