//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use uibench_common::{EvalResult, Gate2Result, Gate3Result};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// One line per job
    Plain,
}

fn gate1_cell(result: &EvalResult) -> String {
    if result.gate1.ok {
        "pass".to_string()
    } else {
        "FAIL".to_string()
    }
}

fn gate2_cell(gate2: &Gate2Result) -> String {
    if gate2.skipped_reason.is_some() {
        "skipped".to_string()
    } else if gate2.ok {
        match gate2.visual_change_percent {
            Some(change) => format!("pass ({:.1}% changed)", change),
            None => "pass".to_string(),
        }
    } else {
        "FAIL".to_string()
    }
}

fn gate3_cell(gate3: Option<&Gate3Result>) -> String {
    match gate3 {
        None => "-".to_string(),
        Some(g) if g.skipped_reason.is_some() => "skipped".to_string(),
        Some(g) if !g.ok => "error".to_string(),
        Some(g) => match g.passed {
            Some(true) => "pass".to_string(),
            Some(false) => "FAIL".to_string(),
            None => "undecided".to_string(),
        },
    }
}

fn row(result: &EvalResult) -> Vec<String> {
    vec![
        result.framework.to_string(),
        result.level.to_string(),
        result.model_id.clone(),
        gate1_cell(result),
        gate2_cell(&result.gate2),
        gate3_cell(result.gate3.as_ref()),
    ]
}

/// Print every job result
pub fn print_results(results: &[EvalResult], format: OutputFormat) -> anyhow::Result<()> {
    if results.is_empty() {
        println!("No jobs were run.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Framework", "Level", "Model", "Gate 1", "Gate 2", "Gate 3"]);
            for result in results {
                table.add_row(row(result));
            }
            println!("{table}");
            print_totals(results);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
        OutputFormat::Plain => {
            for result in results {
                println!("{}", row(result).join("\t"));
            }
        }
    }
    Ok(())
}

/// Pass counts per gate
fn print_totals(results: &[EvalResult]) {
    let total = results.len();
    let gate1 = results.iter().filter(|r| r.gate1.ok).count();
    let gate2 = results.iter().filter(|r| r.gate2.ok).count();
    let gate3 = results
        .iter()
        .filter(|r| r.gate3.as_ref().and_then(|g| g.passed) == Some(true))
        .count();

    let line = format!(
        "Gate 1: {}/{}  Gate 2: {}/{}  Gate 3: {}/{}",
        gate1, total, gate2, total, gate3, total
    );
    if gate1 == total && gate2 == total {
        println!("✅ {}", line.green());
    } else {
        println!("⚠️  {}", line.yellow());
    }
}
