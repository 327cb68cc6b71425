//! Text commands understood by the simulation.
//!
//! [`Command`] renders to the exact grammar the simulation parses, and
//! [`parse_command`] reads the same grammar back, tokenizing quoted
//! arguments the way the simulation does: a quote opens only after a space
//! and closes only before a space or the end of input.

use std::{fmt, num::ParseIntError, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("step count must be positive")]
    NonPositiveStep,
    #[error("{0} must not be empty")]
    EmptyArgument(&'static str),
    #[error("{0} must be quoted")]
    ExpectedQuoted(&'static str),
    #[error("'{0}' must not contain a single quote")]
    QuoteInArgument(String),
    #[error("quote at byte {0} is not delimited by spaces")]
    MisplacedQuote(usize),
    #[error("unterminated quote at byte {0}")]
    UnterminatedQuote(usize),
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),
    #[error("unknown {kind} policy '{name}'")]
    UnknownPolicy { kind: &'static str, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourcePolicy {
    Qlen,
    SimpleLat,
    RecursiveLat,
}

impl SourcePolicy {
    pub const ALL: [SourcePolicy; 3] = [
        SourcePolicy::Qlen,
        SourcePolicy::SimpleLat,
        SourcePolicy::RecursiveLat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourcePolicy::Qlen => "qlen",
            SourcePolicy::SimpleLat => "simplelat",
            SourcePolicy::RecursiveLat => "recursivelat",
        }
    }
}

impl FromStr for SourcePolicy {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| CommandError::UnknownPolicy {
                kind: "source",
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPolicy {
    Fifo,
    Ready,
    Sjf,
}

impl RequestPolicy {
    pub const ALL: [RequestPolicy; 3] = [RequestPolicy::Fifo, RequestPolicy::Ready, RequestPolicy::Sjf];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestPolicy::Fifo => "fifo",
            RequestPolicy::Ready => "ready",
            RequestPolicy::Sjf => "sjf",
        }
    }
}

impl FromStr for RequestPolicy {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| CommandError::UnknownPolicy {
                kind: "request",
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyTarget {
    /// Every existing building (`*`).
    All,
    /// Buildings created afterwards.
    Default,
    Building(String),
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyTarget::All => f.write_str("*"),
            PolicyTarget::Default => f.write_str("default"),
            PolicyTarget::Building(name) => write!(f, "'{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Step(u32),
    Finish,
    Verbose(u32),
    Connect { source: String, destination: String },
    Disconnect { source: String, destination: String },
    Request { item: String, building: String },
    SetSourcePolicy { policy: SourcePolicy, target: PolicyTarget },
    SetRequestPolicy { policy: RequestPolicy, target: PolicyTarget },
    AddDrone { building: String },
    Remove { building: String },
    Save { filename: String },
}

impl Command {
    /// Checks the argument rules the grammar cannot express by itself.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Command::Step(0) => Err(CommandError::NonPositiveStep),
            Command::Step(_) | Command::Finish | Command::Verbose(_) => Ok(()),
            Command::Connect {
                source,
                destination,
            }
            | Command::Disconnect {
                source,
                destination,
            } => {
                check_quoted_arg(source, "source building")?;
                check_quoted_arg(destination, "destination building")
            }
            Command::Request { item, building } => {
                check_quoted_arg(item, "item")?;
                check_quoted_arg(building, "building")
            }
            Command::SetSourcePolicy { target, .. } | Command::SetRequestPolicy { target, .. } => {
                match target {
                    PolicyTarget::Building(name) => check_quoted_arg(name, "building"),
                    PolicyTarget::All | PolicyTarget::Default => Ok(()),
                }
            }
            Command::AddDrone { building } | Command::Remove { building } => {
                check_quoted_arg(building, "building")
            }
            Command::Save { filename } => check_filename(filename),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Step(n) => write!(f, "step {n}"),
            Command::Finish => f.write_str("finish"),
            Command::Verbose(n) => write!(f, "verbose {n}"),
            Command::Connect {
                source,
                destination,
            } => write!(f, "connect '{source}' to '{destination}'"),
            Command::Disconnect {
                source,
                destination,
            } => write!(f, "disconnect '{source}' to '{destination}'"),
            Command::Request { item, building } => write!(f, "request '{item}' from '{building}'"),
            Command::SetSourcePolicy { policy, target } => {
                write!(f, "set policy source '{}' on {target}", policy.as_str())
            }
            Command::SetRequestPolicy { policy, target } => {
                write!(f, "set policy request '{}' on {target}", policy.as_str())
            }
            Command::AddDrone { building } => write!(f, "add_drone at '{building}'"),
            Command::Remove { building } => write!(f, "remove '{building}'"),
            Command::Save { filename } => write!(f, "save {filename}"),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}

fn check_quoted_arg(value: &str, what: &'static str) -> Result<(), CommandError> {
    if value.is_empty() {
        return Err(CommandError::EmptyArgument(what));
    }
    if value.contains('\'') {
        return Err(CommandError::QuoteInArgument(value.to_string()));
    }
    Ok(())
}

fn check_filename(filename: &str) -> Result<(), CommandError> {
    if filename.is_empty() || filename.chars().any(char::is_whitespace) || filename.contains('\'') {
        return Err(CommandError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
}

fn push_words<'a>(tokens: &mut Vec<Token<'a>>, chunk: &'a str) {
    tokens.extend(chunk.split_whitespace().map(Token::Word));
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, CommandError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;
    loop {
        let Some(open) = input[start..].find('\'').map(|rel| start + rel) else {
            push_words(&mut tokens, &input[start..]);
            return Ok(tokens);
        };
        if open == 0 || bytes[open - 1] != b' ' {
            return Err(CommandError::MisplacedQuote(open));
        }
        let close = input[open + 1..]
            .find('\'')
            .map(|rel| open + 1 + rel)
            .ok_or(CommandError::UnterminatedQuote(open))?;
        if close + 1 != input.len() && bytes[close + 1] != b' ' {
            return Err(CommandError::MisplacedQuote(close));
        }
        push_words(&mut tokens, &input[start..open]);
        tokens.push(Token::Quoted(&input[open + 1..close]));
        start = close + 1;
    }
}

struct Tokens<'a> {
    inner: std::vec::IntoIter<Token<'a>>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self, what: &'static str) -> Result<Token<'a>, CommandError> {
        self.inner.next().ok_or(CommandError::MissingArgument(what))
    }

    fn word(&mut self, what: &'static str) -> Result<&'a str, CommandError> {
        match self.next(what)? {
            Token::Word(word) => Ok(word),
            Token::Quoted(text) => Err(CommandError::UnexpectedToken(format!("'{text}'"))),
        }
    }

    fn keyword(&mut self, expected: &'static str) -> Result<(), CommandError> {
        let word = self.word(expected)?;
        if word == expected {
            Ok(())
        } else {
            Err(CommandError::UnexpectedToken(word.to_string()))
        }
    }

    fn quoted(&mut self, what: &'static str) -> Result<String, CommandError> {
        match self.next(what)? {
            Token::Quoted(text) => {
                check_quoted_arg(text, what)?;
                Ok(text.to_string())
            }
            Token::Word(_) => Err(CommandError::ExpectedQuoted(what)),
        }
    }

    fn target(&mut self) -> Result<PolicyTarget, CommandError> {
        match self.next("policy target")? {
            Token::Word("*") => Ok(PolicyTarget::All),
            Token::Word("default") => Ok(PolicyTarget::Default),
            Token::Word(other) => Err(CommandError::UnexpectedToken(other.to_string())),
            Token::Quoted(name) => {
                check_quoted_arg(name, "building")?;
                Ok(PolicyTarget::Building(name.to_string()))
            }
        }
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.inner.next() {
            None => Ok(()),
            Some(Token::Word(word)) => Err(CommandError::UnexpectedToken(word.to_string())),
            Some(Token::Quoted(text)) => Err(CommandError::UnexpectedToken(format!("'{text}'"))),
        }
    }
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

pub fn parse_command(input: &str) -> Result<Command, CommandError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    let mut tokens = Tokens {
        inner: tokenize(trimmed)?.into_iter(),
    };
    let verb = tokens.word("command")?;

    let command = match verb {
        "step" => {
            let steps = parse_u32(tokens.word("step count")?, "step count")?;
            Command::Step(steps)
        }
        "finish" => Command::Finish,
        "verbose" => Command::Verbose(parse_u32(tokens.word("verbosity")?, "verbosity")?),
        "connect" | "disconnect" => {
            let source = tokens.quoted("source building")?;
            tokens.keyword("to")?;
            let destination = tokens.quoted("destination building")?;
            if verb == "connect" {
                Command::Connect {
                    source,
                    destination,
                }
            } else {
                Command::Disconnect {
                    source,
                    destination,
                }
            }
        }
        "request" => {
            let item = tokens.quoted("item")?;
            tokens.keyword("from")?;
            let building = tokens.quoted("building")?;
            Command::Request { item, building }
        }
        "set" => {
            tokens.keyword("policy")?;
            let kind = tokens.word("policy type")?;
            let name = tokens.quoted("policy name")?;
            tokens.keyword("on")?;
            let target = tokens.target()?;
            match kind {
                "source" => Command::SetSourcePolicy {
                    policy: name.parse()?,
                    target,
                },
                "request" => Command::SetRequestPolicy {
                    policy: name.parse()?,
                    target,
                },
                other => return Err(CommandError::UnexpectedToken(other.to_string())),
            }
        }
        "add_drone" => {
            tokens.keyword("at")?;
            Command::AddDrone {
                building: tokens.quoted("building")?,
            }
        }
        "remove" => Command::Remove {
            building: tokens.quoted("building")?,
        },
        "save" => Command::Save {
            filename: tokens.word("filename")?.to_string(),
        },
        other => return Err(CommandError::UnknownCommand(other.to_string())),
    };
    tokens.finish()?;
    command.validate()?;
    Ok(command)
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
