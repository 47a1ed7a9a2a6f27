//! Prompt text for app generation and screenshot grading

use uibench_common::{ChallengeLevel, Framework};

use crate::probe::TipScenario;

/// Placeholder replaced with the framework name in challenge prompts
const FRAMEWORK_PLACEHOLDER: &str = "[FRAMEWORK]";

/// The task a model must build for a challenge level
pub fn challenge_prompt(level: ChallengeLevel) -> &'static str {
    match level {
        ChallengeLevel::Beginner => {
            "Create a [FRAMEWORK] app that displays a title 'My First App'. \
             Include a text input field asking for a user's name and a button. \
             When clicked, display a greeting message 'Hello, {name}!' below the button."
        }
        ChallengeLevel::Intermediate => {
            "Build a [FRAMEWORK] dashboard using the 'Penguins' dataset. \
             It should have a sidebar with a dropdown to filter by 'Island'. \
             The main area should display a scatter plot of Flipper Length vs. Body Mass, \
             colored by Species. Ensure the plot updates when the filter changes."
        }
        ChallengeLevel::Advanced => {
            "Create a To-Do list application in [FRAMEWORK]. Users must be able to add tasks, \
             mark them as 'Complete' (striking them through), and delete them. \
             The list must persist in the session state so it doesn't vanish on \
             page reload/interaction."
        }
        ChallengeLevel::Expert => {
            "Build a Real-Time Stock Ticker Monitor in [FRAMEWORK]. \
             1. Use a dark theme custom CSS/Styling. \
             2. Simulate a live feed updating a line chart every 1s. Avoid flicker. \
             3. Include a 'Buy/Sell' control panel that logs transactions to a data table below the chart. \
             4. Ensure the layout is responsive (mobile-friendly)."
        }
    }
}

/// Challenge prompt with the framework filled in
pub fn task_text(framework: &Framework, level: ChallengeLevel) -> String {
    challenge_prompt(level).replace(FRAMEWORK_PLACEHOLDER, framework.as_str())
}

/// Framework-specific hosting rules given to the generating model
fn framework_notes(framework: &Framework, host: &str, port: u16) -> String {
    match framework {
        Framework::Streamlit => "Use Streamlit best practices. Do not use external files. \
             The app must be runnable via Streamlit CLI."
            .to_string(),
        Framework::Gradio => format!(
            "Use Gradio. The app should run via `python app.py` and must call \
             `launch(server_name=\"{host}\", server_port={port}, share=False)` for local hosting."
        ),
        Framework::Shiny => {
            "Use Shiny for Python. Provide a single `app.py` for UI + server.".to_string()
        }
        Framework::Panel => "Use Panel (HoloViz). The app should run via `panel serve app.py`. \
             Use `pn.extension()` at the top. Make the main component servable with `.servable()`. \
             Do NOT use `pn.serve()` or `pn.panel().show()` since the app will be served via `panel serve`. \
             Ensure there is at least one `pn.widgets.Button` with a click handler. \
             Include 'panel' and 'bokeh' in requirements."
            .to_string(),
        Framework::Dash => format!(
            "Use Plotly Dash. The app must run via `python app.py`. \
             You MUST define `PORT = {port}` and then call exactly: \
             `app.run(host=\"{host}\", port=PORT, debug=False)`. \
             Do not use `app.run_server`. Do not pick a different host. Do not ignore the provided PORT."
        ),
        Framework::Unsupported(name) => format!(
            "Use {name}. The app should run via `python app.py` and serve on {host}:{port}."
        ),
    }
}

/// Full prompt for generating one app
pub fn build_generation_prompt(
    framework: &Framework,
    level: ChallengeLevel,
    host: &str,
    port: u16,
) -> String {
    [
        "You are an expert Python UI engineer.".to_string(),
        "Generate a visually polished, modern dashboard-like app.".to_string(),
        "Constraints:".to_string(),
        "- Output must be valid Python.".to_string(),
        "- Prefer a single file named `app.py`.".to_string(),
        "- No placeholder pseudocode; everything must run.".to_string(),
        "- Keep dependencies minimal.".to_string(),
        format!("- The app must bind to http://{}:{} (where applicable).", host, port),
        "- Avoid downloading large assets at runtime.".to_string(),
        String::new(),
        format!("Framework-specific notes: {}", framework_notes(framework, host, port)),
        String::new(),
        format!("TASK: {}", task_text(framework, level)),
        String::new(),
        "IMPORTANT: You MUST respond with ONLY a JSON object (no markdown, no extra text). Use this exact format:".to_string(),
        r#"{"code": "<full app.py contents with escaped newlines as \\n>", "run_command": "<command>", "requirements_txt": "<package1\npackage2>", "instructions": "<any extra steps>"}"#.to_string(),
    ]
    .join("\n")
}

/// Instructions for the grading model
pub const GRADER_INSTRUCTIONS: &str = "\
You are a strict UI judge evaluating dashboard screenshots.
Use the screenshots + task criterion to decide whether the answer is correct.
Respond with exactly one of:
GRADE: C  (correct)
GRADE: I  (incorrect)
Then add 1-2 short sentences explaining why.";

/// Question the solver model answers about a pair of screenshots
pub fn solver_question(framework: &Framework, level: ChallengeLevel) -> String {
    [
        "Decide whether the attached screenshots show a functional app".to_string(),
        "that meets the TASK requirements and responds to the UI interaction.".to_string(),
        "Return a verdict in this exact format:".to_string(),
        "ANSWER: PASS|FAIL".to_string(),
        "REASON: <one short sentence>".to_string(),
        String::new(),
        format!("FRAMEWORK: {}", framework),
        format!("TASK: {}", task_text(framework, level)),
        format!(
            "NOTE: Screenshot 1 is before interaction, screenshot 2 is after an automated pass over the UI: {}, sliders moved, dropdowns changed, the first button clicked, toggles flipped, and the page scrolled.",
            TipScenario::default().describe()
        ),
    ]
    .join("\n")
}

/// What the grader checks the solver's verdict against
pub const GRADING_CRITERION: &str = "\
The solver's verdict must match what is visible in the screenshots.
PASS only if the screenshots look like a working app UI and plausibly satisfy the TASK,
including evidence that the UI interaction updated the app.
FAIL if the screenshots show an error/traceback/blank page, or do not satisfy the TASK.";

/// Grader prompt wrapping the question, the solver's answer and the criterion
pub fn grader_prompt(question: &str, answer: &str, criterion: &str) -> String {
    format!(
        "{}\n\n[BEGIN DATA]\n***\n[Task]: {}\n***\n[Submission]: {}\n***\n[Criterion]: {}\n***\n[END DATA]",
        GRADER_INSTRUCTIONS, question, answer, criterion
    )
}
