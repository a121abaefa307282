#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! runs `winnow`-style parsers over that slice, so the whole pipeline works
//! without an allocator.

use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use crate::sequencer::RequestKind;
use crate::subsystems::SubsystemId;

use super::catalog::{self, CommandTag};

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `ms` or `s`.
    #[regex(r"[0-9]+(?:ms|s)", priority = 2)]
    Duration,
    #[regex(r"[0-9]+")]
    Integer,
    /// Keyword or subsystem name; matched case-insensitively later.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    #[token("=")]
    Equals,
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Anything the lexer does not recognize.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long: token buffer exhausted after {processed} items")
            }
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        lexeme: &'a str,
    },
    InvalidDuration {
        lexeme: &'a str,
    },
    TickLimit {
        lexeme: &'a str,
    },
    UnknownSubsystem {
        lexeme: &'a str,
    },
    InvalidToken {
        lexeme: &'a str,
        span: Range<usize>,
    },
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        match token {
            Some(token) if token.kind != TokenKind::Eol => GrammarError::UnexpectedToken {
                expected,
                found: token.lexeme,
                span: token.span.clone(),
            },
            _ => GrammarError::UnexpectedEnd { expected },
        }
    }
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found `{found}` at {span:?}"),
            GrammarError::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarError::InvalidInteger { lexeme } => write!(f, "invalid integer `{lexeme}`"),
            GrammarError::InvalidDuration { lexeme } => write!(f, "invalid duration `{lexeme}`"),
            GrammarError::TickLimit { lexeme } => {
                write!(f, "`{lexeme}` exceeds {MAX_TICKS_PER_COMMAND} ticks per command")
            }
            GrammarError::UnknownSubsystem { lexeme } => write!(f, "unknown subsystem `{lexeme}`"),
            GrammarError::InvalidToken { lexeme, span } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];
type Parsed<'src, T> = Result<T, ErrMode<GrammarError<'src>>>;

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Largest number of ticks a single `tick` command may run.
pub const MAX_TICKS_PER_COMMAND: u32 = 100_000;

/// How far a `tick` command advances the sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickSpan {
    Ticks(u32),
    Duration(Duration),
}

/// Structured console commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Request(RequestKind),
    Tick(TickSpan),
    Status,
    Stall(SubsystemId),
    Ready { subsystem: SubsystemId, after: u16 },
    Help { topic: Option<&'a str> },
}

/// Tokenizes one console line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    let records = cache
        .tokens()
        .filter(|record| !record.skipped)
        .map(|record| (record.token, record.start..record.end));
    let trailing = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| (TokenKind::Error, partial.start..partial.start + partial.fragment.len()));

    for (kind, span) in records.chain(trailing) {
        let lexeme = &line[span.clone()];
        buffer
            .push(Token { kind, lexeme, span })
            .map_err(|_| LexError::TooManyTokens {
                processed: MAX_TOKENS + 1,
            })?;
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::InvalidToken {
            lexeme: token.lexeme,
            span: token.span.clone(),
        }));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => return Err(ParseError::Grammar(err)),
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;
        let Some(spec) = catalog::find(keyword.lexeme) else {
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&keyword),
            )));
        };

        match spec.tag {
            CommandTag::Request => request_kind(input).map(Command::Request),
            CommandTag::Tick => tick_span(input).map(Command::Tick),
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Stall => subsystem(input).map(Command::Stall),
            CommandTag::Ready => {
                let subsystem = subsystem(input)?;
                let after = after_assignment(input)?.unwrap_or(0);
                Ok(Command::Ready { subsystem, after })
            }
            CommandTag::Help => Ok(Command::Help {
                topic: optional_kind(input, TokenKind::Ident).map(|token| token.lexeme),
            }),
        }
    }
}

fn request_kind<'src>(input: &mut Input<'src, '_>) -> Parsed<'src, RequestKind> {
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            let kind = if token.lexeme.eq_ignore_ascii_case("init") {
                RequestKind::InitRequest
            } else if token.lexeme.eq_ignore_ascii_case("error") {
                RequestKind::ErrorRequest
            } else {
                return Err(ErrMode::Backtrack(GrammarError::unexpected(
                    "init, error or a request code",
                    Some(token),
                )));
            };
            *input = rest;
            Ok(kind)
        }
        Some((token, rest)) if token.kind == TokenKind::Integer => {
            let raw = parse_integer::<u8>(token).map_err(ErrMode::Cut)?;
            *input = rest;
            Ok(RequestKind::from_raw(raw))
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            "init, error or a request code",
            other.map(|(token, _)| token),
        ))),
    }
}

fn tick_span<'src>(input: &mut Input<'src, '_>) -> Parsed<'src, TickSpan> {
    if let Some(token) = optional_kind(input, TokenKind::Integer) {
        let ticks = parse_integer::<u32>(&token).map_err(ErrMode::Cut)?;
        if ticks > MAX_TICKS_PER_COMMAND {
            return Err(ErrMode::Cut(GrammarError::TickLimit {
                lexeme: token.lexeme,
            }));
        }
        return Ok(TickSpan::Ticks(ticks));
    }
    if let Some(token) = optional_kind(input, TokenKind::Duration) {
        return parse_duration(&token)
            .map(TickSpan::Duration)
            .map_err(ErrMode::Cut);
    }
    Ok(TickSpan::Ticks(1))
}

fn subsystem<'src>(input: &mut Input<'src, '_>) -> Parsed<'src, SubsystemId> {
    let token = expect_kind(TokenKind::Ident, "subsystem").parse_next(input)?;
    SubsystemId::from_label(token.lexeme).ok_or(ErrMode::Cut(GrammarError::UnknownSubsystem {
        lexeme: token.lexeme,
    }))
}

fn after_assignment<'src>(input: &mut Input<'src, '_>) -> Parsed<'src, Option<u16>> {
    match input.first() {
        Some(token) if token.kind == TokenKind::Ident && token.lexeme.eq_ignore_ascii_case("after") => {
            *input = &input[1..];
            let _ = expect_kind(TokenKind::Equals, "=").parse_next(input)?;
            let value = expect_kind(TokenKind::Integer, "integer").parse_next(input)?;
            parse_integer::<u16>(&value).map(Some).map_err(ErrMode::Cut)
        }
        Some(token) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected("after=N", Some(token)),
        )),
        _ => Ok(None),
    }
}

/// Consumes the next token when it has the given kind.
fn optional_kind<'src>(input: &mut Input<'src, '_>, kind: TokenKind) -> Option<Token<'src>> {
    match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Some(token.clone())
        }
        _ => None,
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}

fn parse_integer<'a, T: core::str::FromStr>(token: &Token<'a>) -> Result<T, GrammarError<'a>> {
    token
        .lexeme
        .parse::<T>()
        .map_err(|_| GrammarError::InvalidInteger {
            lexeme: token.lexeme,
        })
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let invalid = || GrammarError::InvalidDuration {
        lexeme: token.lexeme,
    };
    let text = token.lexeme;
    if let Some(millis) = text.strip_suffix("ms") {
        let millis = millis.parse::<u32>().map_err(|_| invalid())?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some(seconds) = text.strip_suffix('s') {
        let seconds = seconds.parse::<u32>().map_err(|_| invalid())?;
        Ok(Duration::from_secs(seconds.into()))
    } else {
        Err(invalid())
    }
}
