//! Status text normalization and display classification.
//!
//! Devices report free-form status text; dashboards need a fixed palette
//! and a small set of scheduling categories. [`normalize`] collapses the
//! raw text into canonical labels and [`classify`] maps every label onto a
//! [`StatusClass`]. Unknown labels fall through to the offline class, so
//! the mapping is total.

use serde::Serialize;

/// Display severity, matching the dashboard's colour roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Neutral,
    Warning,
    Danger,
    Success,
}

/// Coarse scheduling category a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Idle,
    Active,
    Offline,
    Disconnected,
    Complete,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Active => "Active",
            Self::Offline => "Offline",
            Self::Disconnected => "Disconnected",
            Self::Complete => "Complete",
        }
    }
}

/// Severity, colour, and category for one status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusClass {
    pub severity: Severity,
    pub hex: &'static str,
    pub category: Category,
}

const fn class(severity: Severity, hex: &'static str, category: Category) -> StatusClass {
    StatusClass {
        severity,
        hex,
        category,
    }
}

/// Collapse raw device status text into a canonical label.
///
/// `Offline` and `Closed` both mean the serial link is down, and error
/// reports arrive with arbitrary detail after `Error:`.
pub fn normalize(raw: &str) -> &str {
    if raw == "Offline" || raw == "Closed" {
        "Disconnected"
    } else if raw.contains("Error:") {
        "Error!"
    } else {
        raw
    }
}

/// Map a status label onto its display class. Total: anything not in the
/// table is treated as an offline danger state.
pub fn classify(label: &str) -> StatusClass {
    match label {
        "Operational" => class(Severity::Neutral, "#262626", Category::Idle),
        "Paused" => class(Severity::Warning, "#583c0e", Category::Idle),
        "Printing" | "Pausing" | "Cancelling" => {
            class(Severity::Warning, "#583c0e", Category::Active)
        }
        "Error" => class(Severity::Danger, "#2e0905", Category::Idle),
        "Offline" | "Searching..." => class(Severity::Danger, "#2e0905", Category::Offline),
        "Disconnected" => class(Severity::Danger, "#2e0905", Category::Disconnected),
        "Complete" => class(Severity::Success, "#00330e", Category::Complete),
        "Shutdown" => class(Severity::Danger, "#00330e", Category::Offline),
        "Online" => class(Severity::Success, "#00330e", Category::Idle),
        _ => class(Severity::Danger, "#00330e", Category::Offline),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn normalization_collapses_link_down_states() {
        assert_eq!(normalize("Offline"), "Disconnected");
        assert_eq!(normalize("Closed"), "Disconnected");
        assert_eq!(normalize("Printing"), "Printing");
    }

    #[test]
    fn normalization_collapses_error_detail() {
        assert_eq!(normalize("Error: thermal runaway on T0"), "Error!");
        assert_eq!(normalize("Error"), "Error");
    }

    #[test]
    fn known_labels_classify_per_table() {
        assert_eq!(
            classify("Operational"),
            class(Severity::Neutral, "#262626", Category::Idle)
        );
        assert_eq!(classify("Paused").category, Category::Idle);
        assert_eq!(classify("Printing").category, Category::Active);
        assert_eq!(classify("Pausing"), classify("Cancelling"));
        assert_eq!(classify("Error").category, Category::Idle);
        assert_eq!(classify("Disconnected").category, Category::Disconnected);
        assert_eq!(classify("Complete").severity, Severity::Success);
        assert_eq!(classify("Online").severity, Severity::Success);
    }

    #[test]
    fn unknown_labels_are_offline_danger() {
        for label in ["", "No-API", "Error!", "SdReady", "какой-то статус"] {
            let got = classify(label);
            assert_eq!(got.severity, Severity::Danger, "label {label:?}");
            assert_eq!(got.category, Category::Offline, "label {label:?}");
        }
    }

    #[test]
    fn offline_class_is_a_fixed_point() {
        // Feeding a classification's own category label back in never
        // escapes the offline class.
        let offline = classify("definitely unknown");
        assert_eq!(classify(offline.category.label()), classify("Offline"));
    }
}
