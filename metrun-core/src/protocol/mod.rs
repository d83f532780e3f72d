//! Control socket protocol
//!
//! Every request is a single line of shell-like tokens; every reply is a single
//! line of text. Requests the controller does not understand (or cannot parse)
//! are echoed back as `<cmd>: <args>`. Step output in `retval` replies is
//! escaped with [`escape_reply`] so it cannot span lines.

use thiserror::Error;

use crate::domain::history::PathBinding;

/// Reply used when there is nothing to report (no retval, empty queue)
pub const NONE_MARKER: &str = "None";
/// Reply to `exit` and `close`
pub const FAREWELL: &str = "bye";
/// Reply to `set_wd`
pub const SET_WD_REPLY: &str = "Seems fair.";
/// Reply to `stop`
pub const STOP_REPLY: &str = "I'll ask the controller to stop.";
/// Reply to `new`
pub const NEW_PROJECT_REPLY: &str = "Great! Will do!";

/// A request line that could not be mapped to a [`Request`]
///
/// Its `Display` form is exactly the echo reply the controller sends back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command}: {}", args.join(" "))]
pub struct ProtocolError {
    pub command: String,
    pub args: Vec<String>,
}

impl ProtocolError {
    fn echo(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
        }
    }
}

/// A parsed control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Enqueue a command
    Start(Vec<String>),
    /// Report controller state
    Status,
    /// Fetch the captured result of a step
    Retval(u64),
    /// List current and pending steps
    Queue,
    /// Set the working directory used for dispatch
    SetWd(String),
    /// Cancel the current step and clear the queue
    Stop,
    /// Open a project
    New(String),
    /// List tool path bindings
    Paths,
    /// Record a tool path binding
    Bind { name: String, path: String },
    /// List recorded projects with their steps
    Projects,
    /// Disconnect, leaving the server up
    Exit,
    /// Disconnect and shut the server down
    Close,
}

impl Request {
    /// Parses a request line
    ///
    /// Lines with unbalanced quotes fall back to whitespace splitting so that
    /// the echo reply still carries the client's words.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let tokens = shell_words::split(line)
            .unwrap_or_else(|_| line.split_whitespace().map(str::to_string).collect());

        let (command, args) = match tokens.split_first() {
            Some((command, args)) => (command.as_str(), args),
            None => ("", &[][..]),
        };

        let request = match (command, args) {
            ("start", [_, ..]) => Request::Start(args.to_vec()),
            ("status", _) => Request::Status,
            ("retval", [pid, ..]) => match pid.parse::<u64>() {
                Ok(pid) => Request::Retval(pid),
                Err(_) => return Err(ProtocolError::echo(command, args)),
            },
            ("queue", _) => Request::Queue,
            ("set_wd", [dir, ..]) => Request::SetWd(dir.clone()),
            ("stop", _) => Request::Stop,
            ("new", [name, ..]) => Request::New(name.clone()),
            ("paths", _) => Request::Paths,
            ("bind", [name, path, ..]) => Request::Bind {
                name: name.clone(),
                path: path.clone(),
            },
            ("projects", _) => Request::Projects,
            ("exit", _) => Request::Exit,
            ("close", _) => Request::Close,
            _ => return Err(ProtocolError::echo(command, args)),
        };

        Ok(request)
    }

    /// Encodes the request as a protocol line (without the trailing newline)
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let line = match self {
            Request::Start(argv) => format!("start {}", join(argv)?),
            Request::Status => "status".to_string(),
            Request::Retval(pid) => format!("retval {}", pid),
            Request::Queue => "queue".to_string(),
            Request::SetWd(dir) => format!("set_wd {}", join(std::slice::from_ref(dir))?),
            Request::Stop => "stop".to_string(),
            Request::New(name) => format!("new {}", join(std::slice::from_ref(name))?),
            Request::Paths => "paths".to_string(),
            Request::Bind { name, path } => {
                format!("bind {}", join(&[name.clone(), path.clone()])?)
            }
            Request::Projects => "projects".to_string(),
            Request::Exit => "exit".to_string(),
            Request::Close => "close".to_string(),
        };
        Ok(line)
    }
}

/// Quotes words into one request line; a newline would split the request
fn join(words: &[String]) -> Result<String, ProtocolError> {
    if words.iter().any(|word| word.contains('\n')) {
        return Err(ProtocolError::echo("quote", words));
    }
    Ok(shell_words::join(words))
}

/// Serialises path bindings as the `paths` reply: a JSON list of `[name, path]` pairs
pub fn encode_paths(bindings: &[PathBinding]) -> String {
    let pairs: Vec<(&str, &str)> = bindings
        .iter()
        .map(|b| (b.name.as_str(), b.path.as_str()))
        .collect();
    serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
}

/// Escapes free text so that it fits on one reply line
///
/// Backslashes and line breaks become `\\`, `\n` and `\r`.
pub fn escape_reply(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape_reply`]; unknown escapes are kept as written
pub fn unescape_reply(line: &str) -> String {
    let mut text = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('r') => text.push('\r'),
            Some('\\') => text.push('\\'),
            Some(other) => {
                text.push('\\');
                text.push(other);
            }
            None => text.push('\\'),
        }
    }
    text
}

/// Parses a `paths` reply
pub fn decode_paths(reply: &str) -> Result<Vec<PathBinding>, serde_json::Error> {
    let pairs: Vec<(String, String)> = serde_json::from_str(reply)?;
    Ok(pairs
        .into_iter()
        .map(|(name, path)| PathBinding { name, path })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_keeps_quoted_arguments() {
        let request = Request::parse(r#"start echo "hello world" >out.txt"#).unwrap();
        assert_eq!(
            request,
            Request::Start(vec![
                "echo".to_string(),
                "hello world".to_string(),
                ">out.txt".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_simple_requests() {
        assert_eq!(Request::parse("status\n").unwrap(), Request::Status);
        assert_eq!(Request::parse("queue").unwrap(), Request::Queue);
        assert_eq!(Request::parse("retval 7").unwrap(), Request::Retval(7));
        assert_eq!(
            Request::parse("set_wd ./run_001").unwrap(),
            Request::SetWd("./run_001".to_string())
        );
        assert_eq!(
            Request::parse("new run_001").unwrap(),
            Request::New("run_001".to_string())
        );
        assert_eq!(Request::parse("close").unwrap(), Request::Close);
    }

    #[test]
    fn test_unknown_command_is_echoed() {
        let err = Request::parse("frobnicate a b").unwrap_err();
        assert_eq!(err.to_string(), "frobnicate: a b");
    }

    #[test]
    fn test_malformed_arguments_are_echoed() {
        assert_eq!(Request::parse("start").unwrap_err().to_string(), "start: ");
        assert_eq!(
            Request::parse("retval abc").unwrap_err().to_string(),
            "retval: abc"
        );
        assert_eq!(Request::parse("").unwrap_err().to_string(), ": ");
    }

    #[test]
    fn test_unbalanced_quotes_fall_back_to_whitespace() {
        let err = Request::parse(r#"hello "world"#).unwrap_err();
        assert_eq!(err.to_string(), r#"hello: "world"#);
    }

    #[test]
    fn test_encode_then_parse_preserves_argv() {
        let request = Request::Start(vec![
            "prinseq-lite.pl".to_string(),
            "-fastq".to_string(),
            "/data/my reads.fastq".to_string(),
        ]);
        let line = request.encode().unwrap();
        assert_eq!(Request::parse(&line).unwrap(), request);
    }

    #[test]
    fn test_multiline_reply_stays_on_one_line() {
        let output = "reads\t12\nC:\\data\\x\r\nend";
        let line = escape_reply(output);
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert_eq!(unescape_reply(&line), output);
        assert_eq!(escape_reply("a\nb"), "a\\nb");
    }

    #[test]
    fn test_unknown_escapes_are_kept() {
        assert_eq!(unescape_reply(r"x\ty\"), r"x\ty\");
    }

    #[test]
    fn test_paths_reply_is_list_of_pairs() {
        let bindings = vec![PathBinding {
            name: "kraken".to_string(),
            path: "/opt/kraken/kraken".to_string(),
        }];
        let reply = encode_paths(&bindings);
        assert_eq!(reply, r#"[["kraken","/opt/kraken/kraken"]]"#);
        assert_eq!(decode_paths(&reply).unwrap(), bindings);
    }
}
