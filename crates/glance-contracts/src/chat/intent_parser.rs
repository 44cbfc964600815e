use std::collections::BTreeMap;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

/// What a single line of chat input asks the session to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentAction {
    /// Blank or whitespace-only input. Creates no turn.
    Noop,
    /// A free-text question for the model.
    Ask,
    Upload,
    ShowImage,
    History,
    Help,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: IntentAction,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, String>,
}

impl Intent {
    fn new(action: IntentAction, raw: &str) -> Self {
        Self {
            action,
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

fn lookup(command: &str, table: &[CommandSpec]) -> Option<IntentAction> {
    table
        .iter()
        .find_map(|entry| (entry.command == command).then_some(entry.action))
}

/// Splits `/name rest` into a lowercased name and the trimmed remainder.
/// Returns `None` when the slash is not followed by a command word, or when
/// the word runs into a path (`/etc/hosts`, `/menu.png`).
fn split_command(line: &str) -> Option<(String, &str)> {
    let tail = line.strip_prefix('/')?;
    let end = tail
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(tail.len());
    if end == 0 || tail[end..].starts_with(['/', '.', '\\']) {
        return None;
    }
    Some((tail[..end].to_ascii_lowercase(), tail[end..].trim()))
}

/// Shell-style unquoting of a single path. Unquoted paths containing spaces
/// come back as several words and are rejoined.
fn path_argument(arg: &str) -> Option<String> {
    let words = shell_words::split(arg)
        .unwrap_or_else(|_| arg.split_whitespace().map(str::to_string).collect());
    let path = words
        .into_iter()
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!path.is_empty()).then_some(path)
}

pub fn parse_intent(text: &str) -> Intent {
    let line = text.trim();
    if line.is_empty() {
        return Intent::new(IntentAction::Noop, text);
    }

    let Some((command, arg)) = split_command(line) else {
        let mut intent = Intent::new(IntentAction::Ask, text);
        intent.prompt = Some(text.to_string());
        return intent;
    };

    if let Some(action) = lookup(&command, SINGLE_PATH_COMMANDS) {
        let mut intent = Intent::new(action, text);
        if let Some(path) = path_argument(arg) {
            intent.command_args.insert("path".into(), path);
        }
        intent
    } else if let Some(action) = lookup(&command, NO_ARG_COMMANDS) {
        Intent::new(action, text)
    } else {
        let mut intent = Intent::new(IntentAction::Unknown, text);
        intent.command_args.insert("command".into(), command);
        intent.command_args.insert("arg".into(), arg.to_string());
        intent
    }
}
