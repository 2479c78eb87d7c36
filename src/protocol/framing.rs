//! Incremental line framer for the peer protocol.
//!
//! Every inbound message is one command line optionally followed by one
//! argument line:
//!
//! ```text
//! ping\n
//! exec\n[7,"misc/skillwin",["@mr1001"]]\n
//! doret\n[3,"$hello"]\n
//! ```
//!
//! Lines are `\n`-terminated; any `\r` is stripped. The argument line is a
//! single JSON array. Chunks from the socket may split or concatenate
//! messages arbitrarily, so the framer keeps one [`Accumulator`] of partial
//! state between calls to [`Framer::feed`].

use thiserror::Error;

use crate::constants::MAX_LINE_LENGTH;

/// Inbound command kinds.
///
/// Closed set: the peer cannot introduce new commands without a new
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Placeholder before a command line has been classified. Never valid
    /// on the wire.
    Unset,
    /// Execute a script: `[pid, path, args]`.
    Exec,
    /// Keepalive; answered with `pong`.
    Ping,
    /// Reply to an outbound request: `[request_id, result]`.
    DoRet,
}

impl CommandKind {
    const KNOWN: [(&'static str, CommandKind); 4] = [
        ("unset", CommandKind::Unset),
        ("exec", CommandKind::Exec),
        ("ping", CommandKind::Ping),
        ("doret", CommandKind::DoRet),
    ];

    /// Classify a command line case-insensitively. Unknown names map to
    /// [`CommandKind::Unset`].
    pub fn classify(line: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(line))
            .map_or(Self::Unset, |(_, kind)| *kind)
    }

    /// Whether the command is followed by an argument line.
    pub fn takes_arguments(self) -> bool {
        !matches!(self, Self::Ping)
    }

    /// Lowercase wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Exec => "exec",
            Self::Ping => "ping",
            Self::DoRet => "doret",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Classified command.
    pub command: CommandKind,
    /// Elements of the argument line, still in wire form. `doret` results
    /// are forwarded undecoded; everything else is decoded by the codec.
    pub arguments: Vec<serde_json::Value>,
    /// The line that completed this message (the argument line, or the
    /// command line for commands without arguments).
    pub raw_line: String,
}

/// Errors that end a connection: the protocol cannot resynchronize.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The command line did not name a known command.
    #[error("Unsupported command: {0}")]
    UnknownCommand(String),
    /// The argument line is not a JSON array.
    #[error("Unable to parse JSON data: {text}")]
    MalformedArguments {
        /// Offending argument line.
        text: String,
        /// Parser error, when the line was not valid JSON at all.
        #[source]
        source: Option<serde_json::Error>,
    },
    /// A line exceeded [`MAX_LINE_LENGTH`] bytes.
    #[error("Protocol line too long: {length} bytes (max {MAX_LINE_LENGTH})")]
    LineTooLong {
        /// Bytes buffered when the limit was hit.
        length: usize,
    },
    /// A completed line was not valid UTF-8.
    #[error("Protocol line is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Accumulator progress. Only moves forward, or to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the command line.
    Uninitialized,
    /// Command line complete, waiting for the argument line.
    CommandReceived,
    /// Argument line complete.
    ArgsReceived,
    /// Terminal failure.
    Error,
}

/// Partial parse state for the message currently being received.
#[derive(Debug)]
pub struct Accumulator {
    stage: Stage,
    partial_command: Vec<u8>,
    partial_args: Vec<u8>,
    command: CommandKind,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            stage: Stage::Uninitialized,
            partial_command: Vec::new(),
            partial_args: Vec::new(),
            command: CommandKind::Unset,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Consume bytes from `data`. Returns the unconsumed remainder and the
    /// message, if this call completed one.
    fn append<'a>(
        &mut self,
        data: &'a [u8],
    ) -> Result<(&'a [u8], Option<Message>), FramingError> {
        match self.stage {
            Stage::Uninitialized => {
                let Some((line, rest)) = take_line(&mut self.partial_command, data)? else {
                    return Ok((&[], None));
                };
                let message = self.accept_command(line)?;
                Ok((rest, message))
            }
            Stage::CommandReceived => {
                let Some((line, rest)) = take_line(&mut self.partial_args, data)? else {
                    return Ok((&[], None));
                };
                let message = self.accept_arguments(line)?;
                Ok((rest, Some(message)))
            }
            // A finished accumulator is dropped by the framer before the
            // next byte arrives.
            Stage::ArgsReceived | Stage::Error => Ok((data, None)),
        }
    }

    fn accept_command(&mut self, line: String) -> Result<Option<Message>, FramingError> {
        let command = CommandKind::classify(&line);
        if command == CommandKind::Unset {
            self.stage = Stage::Error;
            return Err(FramingError::UnknownCommand(line));
        }
        self.command = command;
        self.stage = Stage::CommandReceived;

        if command.takes_arguments() {
            return Ok(None);
        }
        Ok(Some(Message {
            command,
            arguments: Vec::new(),
            raw_line: line,
        }))
    }

    fn accept_arguments(&mut self, line: String) -> Result<Message, FramingError> {
        let arguments = if line.is_empty() {
            Vec::new()
        } else {
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(serde_json::Value::Array(items)) => items,
                Ok(_) => {
                    self.stage = Stage::Error;
                    return Err(FramingError::MalformedArguments {
                        text: line,
                        source: None,
                    });
                }
                Err(e) => {
                    self.stage = Stage::Error;
                    return Err(FramingError::MalformedArguments {
                        text: line,
                        source: Some(e),
                    });
                }
            }
        };
        self.stage = Stage::ArgsReceived;
        Ok(Message {
            command: self.command,
            arguments,
            raw_line: line,
        })
    }
}

/// Append `data` to `partial` up to the first newline.
///
/// Returns the completed line (with `\r` removed) and the bytes after the
/// newline, or `None` if no newline has been seen yet.
fn take_line<'a>(
    partial: &mut Vec<u8>,
    data: &'a [u8],
) -> Result<Option<(String, &'a [u8])>, FramingError> {
    let (head, rest) = match data.iter().position(|b| *b == b'\n') {
        Some(pos) => (&data[..pos], Some(&data[pos + 1..])),
        None => (data, None),
    };
    partial.extend(head.iter().copied().filter(|b| *b != b'\r'));
    if partial.len() > MAX_LINE_LENGTH {
        return Err(FramingError::LineTooLong {
            length: partial.len(),
        });
    }

    let Some(rest) = rest else {
        return Ok(None);
    };
    let line = String::from_utf8(std::mem::take(partial))?;
    Ok(Some((line, rest)))
}

/// Incremental framer, one per connection.
///
/// Holds at most one live [`Accumulator`]; it is created on the first byte
/// of a message and dropped when the message completes or fails.
#[derive(Debug, Default)]
pub struct Framer {
    accumulator: Option<Accumulator>,
}

impl Framer {
    /// Create a framer with no partial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every message it completes.
    ///
    /// # Errors
    ///
    /// Returns the first framing failure. Messages completed earlier in the
    /// same chunk are discarded; use [`Framer::feed_with`] to observe them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, FramingError> {
        let mut messages = Vec::new();
        self.feed_with(bytes, |message| messages.push(message))?;
        Ok(messages)
    }

    /// Feed a chunk, handing each completed message to `on_message` as
    /// soon as it is framed.
    ///
    /// Bytes left over after a completed message are fed again, so one
    /// chunk may yield several messages plus the start of the next.
    pub fn feed_with<F>(&mut self, bytes: &[u8], mut on_message: F) -> Result<(), FramingError>
    where
        F: FnMut(Message),
    {
        let mut data = bytes;
        while !data.is_empty() {
            let accumulator = self.accumulator.get_or_insert_with(Accumulator::new);
            match accumulator.append(data) {
                Ok((rest, completed)) => {
                    if let Some(message) = completed {
                        self.accumulator = None;
                        on_message(message);
                    }
                    data = rest;
                }
                Err(e) => {
                    self.accumulator = None;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stage of the in-progress message, if any bytes of it have arrived.
    pub fn stage(&self) -> Option<Stage> {
        self.accumulator.as_ref().map(Accumulator::stage)
    }

    /// Returns true if part of a message is buffered.
    pub fn has_partial(&self) -> bool {
        self.accumulator.is_some()
    }
}
