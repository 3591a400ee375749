//! Product families for game controllers.
//!
//! Premium pads sell for two to three times their standard siblings, so a
//! DualSense Edge listing is poor evidence for a plain DualSense and vice
//! versa. Classification is data-driven: ordered pattern rules pick a family,
//! and a static table says which families may stand in for which.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerFamily {
    /// "controller" with nothing more specific.
    Generic,
    DualSense,
    DualSenseEdge,
    DualShock4,
    XboxWireless,
    XboxElite,
    SwitchPro,
    JoyCon,
}

struct FamilyRule {
    family: ControllerFamily,
    /// Every phrase in one inner slice must appear; any inner slice may match.
    patterns: &'static [&'static [&'static str]],
}

// Most specific first.
const FAMILY_RULES: &[FamilyRule] = &[
    FamilyRule {
        family: ControllerFamily::DualSenseEdge,
        patterns: &[&["dualsense", "edge"], &["ps5", "edge", "controller"]],
    },
    FamilyRule {
        family: ControllerFamily::XboxElite,
        patterns: &[&["xbox", "elite"], &["elite", "series 2"]],
    },
    FamilyRule {
        family: ControllerFamily::DualSense,
        patterns: &[&["dualsense"], &["ps5", "controller"], &["playstation 5", "controller"]],
    },
    FamilyRule {
        family: ControllerFamily::DualShock4,
        patterns: &[
            &["dualshock 4"],
            &["dualshock4"],
            &["ps4", "controller"],
            &["playstation 4", "controller"],
        ],
    },
    FamilyRule {
        family: ControllerFamily::XboxWireless,
        patterns: &[&["xbox", "controller"], &["xbox", "wireless", "gamepad"]],
    },
    FamilyRule {
        family: ControllerFamily::SwitchPro,
        patterns: &[&["switch", "pro controller"], &["nintendo", "pro controller"]],
    },
    FamilyRule {
        family: ControllerFamily::JoyCon,
        patterns: &[&["joy con"], &["joycon"]],
    },
    FamilyRule {
        family: ControllerFamily::Generic,
        patterns: &[&["controller"], &["gamepad"]],
    },
];

const ALL_FAMILIES: &[ControllerFamily] = &[
    ControllerFamily::Generic,
    ControllerFamily::DualSense,
    ControllerFamily::DualSenseEdge,
    ControllerFamily::DualShock4,
    ControllerFamily::XboxWireless,
    ControllerFamily::XboxElite,
    ControllerFamily::SwitchPro,
    ControllerFamily::JoyCon,
];

const COMPATIBILITY: &[(ControllerFamily, &[ControllerFamily])] = &[
    (ControllerFamily::Generic, ALL_FAMILIES),
    (
        ControllerFamily::DualSense,
        &[ControllerFamily::DualSense, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::DualSenseEdge,
        &[ControllerFamily::DualSenseEdge, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::DualShock4,
        &[ControllerFamily::DualShock4, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::XboxWireless,
        &[ControllerFamily::XboxWireless, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::XboxElite,
        &[ControllerFamily::XboxElite, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::SwitchPro,
        &[ControllerFamily::SwitchPro, ControllerFamily::Generic],
    ),
    (
        ControllerFamily::JoyCon,
        &[ControllerFamily::JoyCon, ControllerFamily::Generic],
    ),
];

impl ControllerFamily {
    /// Classifies an already-normalized title. `None` means the title is not
    /// about a controller at all.
    pub fn classify(normalized: &str) -> Option<Self> {
        let padded = format!(" {normalized} ");
        FAMILY_RULES
            .iter()
            .find(|rule| {
                rule.patterns
                    .iter()
                    .any(|all| all.iter().all(|phrase| has_phrase(&padded, phrase)))
            })
            .map(|rule| rule.family)
    }

    pub fn compatible_with(&self, other: ControllerFamily) -> bool {
        COMPATIBILITY
            .iter()
            .find(|(family, _)| family == self)
            .is_some_and(|(_, allowed)| allowed.contains(&other))
    }
}

/// Whole-word match against space-padded text; a trailing plural `s` is allowed.
fn has_phrase(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {phrase} ")) || padded.contains(&format!(" {phrase}s "))
}
