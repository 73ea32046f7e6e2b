use std::fmt;

/// Every line on the wire ends with this byte.
pub const DELIMITER: u8 = b'\n';

/// Lines starting with this character are directives, not chat content.
pub const CONTROL_PREFIX: char = '/';

/// First line the server sends when the naming handshake is enabled.
pub const NAME_PROMPT: &str = "Enter your name:";

/// A line received from a client, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Text(&'a str),
    Directive(Directive),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `/exit` or `/quit`: close this connection.
    Exit,
    /// `/name <display name>`. The name may be empty.
    Name(String),
    /// Anything else behind the control prefix, prefix included.
    Unknown(String),
}

impl Directive {
    /// Wire form of the directive, as a client would type it.
    pub fn to_line(&self) -> String {
        match self {
            Directive::Exit => "/exit".to_string(),
            Directive::Name(name) => format!("/name {name}"),
            Directive::Unknown(raw) => raw.clone(),
        }
    }
}

/// Classify an already trimmed line.
pub fn parse(line: &str) -> Input<'_> {
    let Some(body) = line.strip_prefix(CONTROL_PREFIX) else {
        return Input::Text(line);
    };
    let (command, argument) = match body.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (body, ""),
    };
    let directive = if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit")
    {
        Directive::Exit
    } else if command.eq_ignore_ascii_case("name") {
        Directive::Name(argument.to_string())
    } else {
        Directive::Unknown(format!("{CONTROL_PREFIX}{command}"))
    };
    Input::Directive(directive)
}

/// A line sent by the server. `Display` renders the wire form without delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine<'a> {
    Chat { sender: &'a str, content: &'a str },
    Joined(&'a str),
    Left(&'a str),
    /// Addressed to a single client only.
    Notice(&'a str),
    Prompt,
    /// Zero content. Clients drop it while framing.
    KeepAlive,
}

impl fmt::Display for ServerLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Chat { sender, content } => write!(f, "{sender}: {content}"),
            ServerLine::Joined(name) => write!(f, "{name} joined the chat"),
            ServerLine::Left(name) => write!(f, "{name} left the chat"),
            ServerLine::Notice(text) => write!(f, "* {text}"),
            ServerLine::Prompt => f.write_str(NAME_PROMPT),
            ServerLine::KeepAlive => Ok(()),
        }
    }
}
