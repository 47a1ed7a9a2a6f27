//! Generic interaction probes run between the before and after screenshots
//!
//! Generated apps have unknown layouts, so the probes target generic
//! affordances (inputs, sliders, dropdowns, buttons, toggles) instead of
//! per-app selectors. Each step is independent: a step that finds nothing or
//! fails is reported and the sequence carries on.

use serde::{Deserialize, Serialize};

/// Canonical scenario the fill values come from: a tip calculator with
/// bill $85.50, 20% tip, split between 3 people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipScenario {
    pub bill_cents: u64,
    pub tip_percent: u64,
    pub people: u64,
}

/// Amounts a correct app shows for a [`TipScenario`], in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipBreakdown {
    pub tip_cents: u64,
    pub total_cents: u64,
    pub per_person_cents: u64,
}

impl Default for TipScenario {
    fn default() -> Self {
        Self {
            bill_cents: 8550,
            tip_percent: 20,
            people: 3,
        }
    }
}

impl TipScenario {
    /// `total = bill + bill * pct / 100`, `per_person = total / people`,
    /// each rounded half-up to the cent
    pub fn breakdown(&self) -> TipBreakdown {
        let tip_cents = (self.bill_cents * self.tip_percent + 50) / 100;
        let total_cents = self.bill_cents + tip_cents;
        let people = self.people.max(1);
        let per_person_cents = (total_cents + people / 2) / people;
        TipBreakdown {
            tip_cents,
            total_cents,
            per_person_cents,
        }
    }

    /// Values typed into text/number inputs, in field order
    pub fn fill_values(&self) -> Vec<String> {
        vec![
            format_cents(self.bill_cents),
            self.tip_percent.to_string(),
            self.people.to_string(),
        ]
    }

    /// Human-readable description for graders
    pub fn describe(&self) -> String {
        let b = self.breakdown();
        format!(
            "inputs filled with bill=${}, tip={}%, people={} (a correct tip calculator shows tip ${}, total ${}, per person ${})",
            format_cents(self.bill_cents),
            self.tip_percent,
            self.people,
            format_cents(b.tip_cents),
            format_cents(b.total_cents),
            format_cents(b.per_person_cents),
        )
    }
}

/// Render cents as `12.34`
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// A single probe step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProbeStep {
    /// Fill text/number inputs with the given values, one per field
    FillInputs { limit: usize, values: Vec<String> },

    /// Drag range sliders to `position` (0.0 - 1.0) of their width
    DragSliders { limit: usize, position: f64 },

    /// Move dropdowns to their second option
    SelectDropdowns { limit: usize },

    /// Click the first visible actionable button
    ClickButton,

    /// Toggle checkboxes and radios
    ToggleChecks { limit: usize },

    /// Scroll the page down
    Scroll { pixels: i64 },
}

impl ProbeStep {
    /// Stable step name used in outcomes and logs
    pub fn name(&self) -> &'static str {
        match self {
            ProbeStep::FillInputs { .. } => "fill_inputs",
            ProbeStep::DragSliders { .. } => "drag_sliders",
            ProbeStep::SelectDropdowns { .. } => "select_dropdowns",
            ProbeStep::ClickButton => "click_button",
            ProbeStep::ToggleChecks { .. } => "toggle_checks",
            ProbeStep::Scroll { .. } => "scroll",
        }
    }
}

/// Ordered probe sequence plus timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionPolicy {
    pub steps: Vec<ProbeStep>,
    /// Timeout for each individual element action
    pub action_timeout_ms: u64,
    /// Pause after each step so the app can react
    pub step_settle_ms: u64,
}

impl InteractionPolicy {
    /// The standard probe sequence driven by a scenario's values
    pub fn for_scenario(scenario: &TipScenario) -> Self {
        Self {
            steps: vec![
                ProbeStep::FillInputs {
                    limit: 3,
                    values: scenario.fill_values(),
                },
                ProbeStep::DragSliders {
                    limit: 2,
                    position: 0.75,
                },
                ProbeStep::SelectDropdowns { limit: 2 },
                ProbeStep::ClickButton,
                ProbeStep::ToggleChecks { limit: 2 },
                ProbeStep::Scroll { pixels: 600 },
            ],
            action_timeout_ms: 3_000,
            step_settle_ms: 400,
        }
    }

    /// No interaction at all: before and after show the idle page
    pub fn none() -> Self {
        Self {
            steps: Vec::new(),
            action_timeout_ms: 3_000,
            step_settle_ms: 0,
        }
    }

    pub fn with_action_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.action_timeout_ms = timeout_ms;
        self
    }
}

impl Default for InteractionPolicy {
    fn default() -> Self {
        Self::for_scenario(&TipScenario::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_scenario_breakdown() {
        let scenario = TipScenario::default();
        let b = scenario.breakdown();
        assert_eq!(format_cents(b.tip_cents), "17.10");
        assert_eq!(format_cents(b.total_cents), "102.60");
        assert_eq!(format_cents(b.per_person_cents), "34.20");
        assert_eq!(scenario.fill_values(), vec!["85.50", "20", "3"]);
    }

    #[test]
    fn test_breakdown_rounds_to_cent() {
        let scenario = TipScenario {
            bill_cents: 1001,
            tip_percent: 15,
            people: 4,
        };
        let b = scenario.breakdown();
        // 10.01 * 0.15 = 1.5015
        assert_eq!(b.tip_cents, 150);
        assert_eq!(b.total_cents, 1151);
        // 11.51 / 4 = 2.8775
        assert_eq!(b.per_person_cents, 288);
    }

    #[test]
    fn test_describe_mentions_expected_amounts() {
        let text = TipScenario::default().describe();
        assert!(text.contains("$85.50"));
        assert!(text.contains("$102.60"));
        assert!(text.contains("$34.20"));
    }

    #[test]
    fn test_default_policy_order_and_limits() {
        let policy = InteractionPolicy::default();
        let names: Vec<&str> = policy.steps.iter().map(ProbeStep::name).collect();
        assert_eq!(
            names,
            [
                "fill_inputs",
                "drag_sliders",
                "select_dropdowns",
                "click_button",
                "toggle_checks",
                "scroll"
            ]
        );
        assert_eq!(
            policy.steps[1],
            ProbeStep::DragSliders {
                limit: 2,
                position: 0.75
            }
        );
    }

    #[test]
    fn test_step_serialization_is_tagged() {
        let json = serde_json::to_value(ProbeStep::SelectDropdowns { limit: 2 }).unwrap();
        assert_eq!(json["action"], "select_dropdowns");
        assert_eq!(json["limit"], 2);
    }
}
