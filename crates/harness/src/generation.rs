//! App generation: prompt the model, parse its structured answer

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use uibench_common::{ChallengeLevel, Framework, GeneratedAppSpec};

use crate::error::HarnessResult;
use crate::llm::{ChatMessage, ChatModel};
use crate::prompts::build_generation_prompt;

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex"))
}

fn embedded_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

fn parse_spec(candidate: &str) -> Option<GeneratedAppSpec> {
    serde_json::from_str::<GeneratedAppSpec>(candidate).ok()
}

/// Extract a [`GeneratedAppSpec`] from model output.
///
/// Tried in order: the whole text as JSON, the first fenced code block, the
/// widest `{...}` span. Anything else yields [`GeneratedAppSpec::fallback`].
pub fn parse_response(text: &str) -> GeneratedAppSpec {
    if let Some(spec) = parse_spec(text.trim()) {
        debug!("Parsed response as direct JSON");
        return spec;
    }

    if let Some(spec) = fenced_block_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_spec(m.as_str()))
    {
        debug!("Parsed response from markdown code block");
        return spec;
    }

    if let Some(spec) = embedded_object_re()
        .find(text)
        .and_then(|m| parse_spec(m.as_str()))
    {
        debug!("Parsed response from embedded JSON");
        return spec;
    }

    warn!("Failed to parse model response, using fallback");
    GeneratedAppSpec::fallback()
}

/// Ask `model_id` for one app. Call failures propagate; unparseable output
/// does not.
pub async fn generate_app(
    chat: &dyn ChatModel,
    model_id: &str,
    framework: &Framework,
    level: ChallengeLevel,
    host: &str,
    port: u16,
) -> HarnessResult<GeneratedAppSpec> {
    let prompt = build_generation_prompt(framework, level, host, port);
    info!("Generating {}/{} app on port {}", framework, level, port);

    let response = chat.complete(model_id, vec![ChatMessage::user(prompt)]).await?;
    Ok(parse_response(&response))
}
