use super::intent_parser::IntentAction;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: IntentAction,
}

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: IntentAction::Upload,
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image",
        action: IntentAction::ShowImage,
    },
    CommandSpec {
        command: "history",
        action: IntentAction::History,
    },
    CommandSpec {
        command: "help",
        action: IntentAction::Help,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &["/upload <path>", "/image", "/history", "/help"];
