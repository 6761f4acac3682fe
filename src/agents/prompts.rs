//! System prompts for the built-in agents.
//!
//! Prompts are plain Markdown under `PROMPTS_DIR` so they can be tuned
//! without rebuilding. The copies compiled into the binary are used when a
//! file is missing.

use std::path::Path;

use super::AgentKind;
use crate::tools::ToolRegistry;

const BROKER: &str = include_str!("../../prompts/broker.md");
const TRAVEL: &str = include_str!("../../prompts/travel.md");
const ALFRED: &str = include_str!("../../prompts/alfred.md");
const INVESTOR: &str = include_str!("../../prompts/investor.md");

fn file_name(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Broker => "broker.md",
        AgentKind::Travel => "travel.md",
        AgentKind::Alfred => "alfred.md",
        AgentKind::Investor => "investor.md",
    }
}

fn builtin(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Broker => BROKER,
        AgentKind::Travel => TRAVEL,
        AgentKind::Alfred => ALFRED,
        AgentKind::Investor => INVESTOR,
    }
}

/// Read the agent's prompt from `dir`, falling back to the built-in copy.
pub fn load_prompt(dir: &Path, kind: AgentKind) -> String {
    let path = dir.join(file_name(kind));
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!("Prompt {} is empty, using built-in prompt", path.display());
            builtin(kind).to_string()
        }
        Err(e) => {
            tracing::warn!(
                "Cannot read prompt {} ({}), using built-in prompt",
                path.display(),
                e
            );
            builtin(kind).to_string()
        }
    }
}

/// Append the tool list to a prompt.
pub fn with_tool_list(prompt: &str, tools: &ToolRegistry) -> String {
    if tools.is_empty() {
        return prompt.trim_end().to_string();
    }
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\n## Available Tools\n{}",
        prompt.trim_end(),
        tool_descriptions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{DateTimeToolSpec, ToolRegistry};

    #[test]
    fn test_file_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("travel.md"), "Custom travel prompt").unwrap();
        assert_eq!(load_prompt(dir.path(), AgentKind::Travel), "Custom travel prompt");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = load_prompt(dir.path(), AgentKind::Alfred);
        assert!(prompt.starts_with("Your name is Alfred."));
    }

    #[test]
    fn test_tool_list_appended() {
        let tools = ToolRegistry::new().with_spec(&DateTimeToolSpec);
        let prompt = with_tool_list("Be helpful.\n", &tools);
        assert!(prompt.starts_with("Be helpful.\n\n## Available Tools\n"));
        assert!(prompt.contains("- **current_date_and_time**:"));
        assert_eq!(with_tool_list("Be helpful.\n", &ToolRegistry::new()), "Be helpful.");
    }
}
