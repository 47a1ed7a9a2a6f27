//! Per-framework runtime policy

use serde::Serialize;
use std::time::Duration;

use crate::types::Framework;

/// Static runtime policy for one framework
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkRuntimeConfig {
    pub name: String,
    /// How long the app may take to answer 200
    pub startup_timeout: Duration,
    /// Settle delay after navigation, before the first screenshot
    pub screenshot_delay: Duration,
    /// Path appended to `http://host:port`
    pub url_suffix: &'static str,
    /// Settle delay after the interaction sequence
    pub click_delay: Duration,
    pub requires_bokeh: bool,
    pub extra_requirements: Vec<String>,
}

impl FrameworkRuntimeConfig {
    fn base(name: &str) -> Self {
        Self {
            name: name.to_string(),
            startup_timeout: Duration::from_secs(60),
            screenshot_delay: Duration::from_millis(1500),
            url_suffix: "",
            click_delay: Duration::from_millis(1000),
            requires_bokeh: false,
            extra_requirements: Vec::new(),
        }
    }

    fn timings(mut self, startup_secs: u64, screenshot_ms: u64, click_ms: u64) -> Self {
        self.startup_timeout = Duration::from_secs(startup_secs);
        self.screenshot_delay = Duration::from_millis(screenshot_ms);
        self.click_delay = Duration::from_millis(click_ms);
        self
    }
}

/// Look up the runtime policy for a framework.
///
/// Unsupported frameworks get the base policy; they never reach Gate 2 anyway.
pub fn framework_config(framework: &Framework) -> FrameworkRuntimeConfig {
    let name = framework.as_str();
    match framework {
        Framework::Streamlit => FrameworkRuntimeConfig::base(name).timings(60, 2000, 1200),
        Framework::Gradio | Framework::Shiny | Framework::Dash => {
            FrameworkRuntimeConfig::base(name).timings(90, 2000, 1200)
        }
        Framework::Panel => FrameworkRuntimeConfig {
            url_suffix: "/app",
            requires_bokeh: true,
            extra_requirements: vec!["panel".to_string(), "bokeh".to_string()],
            ..FrameworkRuntimeConfig::base(name).timings(120, 3000, 2000)
        },
        Framework::Unsupported(_) => FrameworkRuntimeConfig::base(name),
    }
}
