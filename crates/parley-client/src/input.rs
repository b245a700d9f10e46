//! Parsing of lines typed at the prompt.

use parley_protocol::Message;

/// Command that ends the session.
pub const EXIT_COMMAND: &str = "/exit";

/// What a line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Leave the chat.
    Exit,
    /// Nothing to send.
    Empty,
    /// Send a message.
    Send(Message),
}

/// Interpret one line typed by `username`.
///
/// `dest:text` addresses `dest`, splitting at the first colon only so the
/// text may contain colons itself. A line without a colon is sent back to
/// the user. Trailing line endings are ignored.
pub fn parse_line(line: &str, username: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.trim() == EXIT_COMMAND {
        return Input::Exit;
    }
    if line.trim().is_empty() {
        return Input::Empty;
    }

    let message = match line.split_once(':') {
        Some((destination, text)) => Message::new(username, destination.trim(), text),
        None => Message::new(username, username, line),
    };
    Input::Send(message)
}
