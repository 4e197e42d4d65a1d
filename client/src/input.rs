//! Terminal input parsing and frame formatting for display

use shared::Frame;

pub const QUIT_COMMAND: &str = "quit";
pub const WHO_COMMAND: &str = "\\who";
pub const MSG_COMMAND: &str = "\\msg";
pub const MSG_USAGE: &str = "Usage: \\msg <user> <message>";

/// One line of user input, interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Who,
    Whisper { target: String, message: String },
    Quit,
    /// Blank line
    Nothing,
    /// Recognized command with missing arguments; carries the usage hint
    Invalid(&'static str),
}

impl Command {
    /// Frame to send for this command, if any
    pub fn into_frame(self, identity: &str) -> Option<Frame> {
        match self {
            Command::Say(text) => Some(Frame::chat(identity, &text)),
            Command::Who => Some(Frame::who(identity)),
            Command::Whisper { target, message } => {
                Some(Frame::private_chat(identity, &target, &message))
            }
            Command::Quit => Some(Frame::quit(identity)),
            Command::Nothing | Command::Invalid(_) => None,
        }
    }
}

pub fn parse_line(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Command::Nothing;
    }
    if trimmed == QUIT_COMMAND {
        return Command::Quit;
    }
    if trimmed == WHO_COMMAND {
        return Command::Who;
    }

    if let Some(rest) = trimmed.strip_prefix(MSG_COMMAND) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return parse_whisper(rest);
        }
    }

    Command::Say(line.to_string())
}

fn parse_whisper(rest: &str) -> Command {
    match rest.trim_start().split_once(char::is_whitespace) {
        Some((target, message)) if !message.trim().is_empty() => Command::Whisper {
            target: target.to_string(),
            message: message.trim_start().to_string(),
        },
        _ => Command::Invalid(MSG_USAGE),
    }
}

/// Renders a received frame as `<identity>: <text>`
pub fn format_frame(frame: &Frame) -> String {
    format!("{}: {}", frame.identity(), frame.text().trim_end_matches('\n'))
}
