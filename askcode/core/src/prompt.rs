//! Prompt Construction
//!
//! Turns a conversation history into the single prompt string expected by the
//! generation endpoint, and holds the canned instructions and language hints
//! used when a session is opened on a code selection.

use std::fmt;
use std::str::FromStr;

use crate::messages::{Message, Role};

/// Opening line of every system message and single-shot prompt
pub const ENGINEER_PREAMBLE: &str = "You are a senior software engineer. Be concise and precise.";

/// Linearise a history for the generation endpoint
///
/// System messages are emitted verbatim, every other message as
/// `"<role>: <content>"`, each on its own line, followed by a trailing
/// `"assistant:"` cue.
#[must_use]
pub fn linearize(messages: &[Message]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(messages.len() + 1);
    for msg in messages {
        match msg.role {
            Role::System => parts.push(msg.content.clone()),
            role => parts.push(format!("{}: {}", role.as_str(), msg.content)),
        }
    }
    parts.push("assistant:".to_string());
    parts.join("\n")
}

/// Build the pinned system message for a code selection
#[must_use]
pub fn system_context(code: &str, lang: &str) -> Message {
    Message::system(format!(
        "{ENGINEER_PREAMBLE} Pinned code context follows.\n\n```{lang}\n{code}\n```"
    ))
}

/// Build a one-shot prompt for a task against a piece of code
#[must_use]
pub fn build_task_prompt(task: &str, code: &str, lang: &str) -> String {
    format!("{ENGINEER_PREAMBLE}\n\nTask:\n{task}\n\nCode:\n```{lang}\n{code}\n```")
}

/// Best-effort highlight language from a file name
#[must_use]
pub fn lang_hint(file_name: &str) -> &'static str {
    const MAPPING: &[(&str, &str)] = &[
        (".py", "python"),
        (".java", "java"),
        (".kt", "kotlin"),
        (".ts", "typescript"),
        (".tsx", "tsx"),
        (".js", "javascript"),
        (".jsx", "jsx"),
        (".go", "go"),
        (".rb", "ruby"),
        (".rs", "rust"),
        (".cs", "csharp"),
        (".c", "c"),
        (".h", "c"),
        (".cpp", "cpp"),
        (".cc", "cpp"),
        (".hpp", "cpp"),
        (".m", "objectivec"),
        (".mm", "objectivec"),
        (".scss", "scss"),
        (".css", "css"),
        (".html", "html"),
        (".sql", "sql"),
        (".xml", "xml"),
        (".yml", "yaml"),
        (".yaml", "yaml"),
        (".sh", "bash"),
        (".json", "json"),
    ];

    let name = file_name.to_lowercase();
    MAPPING
        .iter()
        .find(|(ext, _)| name.ends_with(ext))
        .map_or("plaintext", |&(_, lang)| lang)
}

/// Canned instructions offered for every session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Explain,
    Refactor,
    Tests,
    Performance,
    Simplify,
}

impl Action {
    /// All actions, in menu order
    pub const ALL: [Action; 5] = [
        Action::Explain,
        Action::Refactor,
        Action::Tests,
        Action::Performance,
        Action::Simplify,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::Explain => "explain",
            Action::Refactor => "refactor",
            Action::Tests => "tests",
            Action::Performance => "performance",
            Action::Simplify => "simplify",
        }
    }

    /// Instruction sent as the user message
    #[must_use]
    pub fn instruction(&self) -> &'static str {
        match self {
            Action::Explain => {
                "Explain what this code does, list concrete risks, and break down the flow."
            }
            Action::Refactor => {
                "Refactor for readability. Follow professional best practices like SRP \
                 (Single Responsibility Principle) and Preserve behavior."
            }
            Action::Tests => {
                "Generate focused unit tests with Arrange-Act-Assert structure and cover edge cases."
            }
            Action::Performance => {
                "Rewrite for maximum performance gain without changing functionality."
            }
            Action::Simplify => {
                "Simplify the code to make it more readable and easier to understand while \
                 preserving its original functionality."
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Action::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Action::ALL.iter().map(Action::name).collect();
                format!("unknown action '{s}' (expected one of: {})", names.join(", "))
            })
    }
}
