//! Lexical analysis of a single input line.
//!
//! The lexer is a small finite state machine with three mutually exclusive
//! modes: unquoted, inside single quotes and inside double quotes. Quote
//! characters and escapes are consumed here, so every [`Token::Word`] carries
//! the final, unescaped text of one shell word.

use crate::parser::{RedirectMode, RedirectStream};

/// A token produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A complete word with quotes and escapes already removed.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
    /// `>` or `1>`.
    RedirectStdoutTruncate,
    /// `>>` or `1>>`.
    RedirectStdoutAppend,
    /// `2>`.
    RedirectStderrTruncate,
    /// `2>>`.
    RedirectStderrAppend,
}

impl Token {
    /// Stream and mode of a redirection token, `None` for words and pipes.
    pub fn redirection(&self) -> Option<(RedirectStream, RedirectMode)> {
        match self {
            Token::RedirectStdoutTruncate => Some((RedirectStream::Stdout, RedirectMode::Truncate)),
            Token::RedirectStdoutAppend => Some((RedirectStream::Stdout, RedirectMode::Append)),
            Token::RedirectStderrTruncate => Some((RedirectStream::Stderr, RedirectMode::Truncate)),
            Token::RedirectStderrAppend => Some((RedirectStream::Stderr, RedirectMode::Append)),
            Token::Word(_) | Token::Pipe => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    // Set once anything (even an empty quoted string) belongs to the word.
    word_started: bool,
    out: Vec<Token>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Unquoted,
            buffer: String::new(),
            word_started: false,
            out: Vec::new(),
        }
    }

    fn make_tokens(mut self) -> Vec<Token> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Unquoted => self.handle_unquoted(ch),
                LexingState::SingleQuoted => self.handle_single_quote(ch),
                LexingState::DoubleQuoted => self.handle_double_quote(ch),
            }
        }

        // An unterminated quote closes implicitly at end of input.
        self.finish_word();
        self.out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            '\\' => {
                match self.read_char() {
                    Some(next) => self.buffer.push(next),
                    None => self.buffer.push('\\'),
                }
                self.word_started = true;
            }
            '|' => self.push_operator(Token::Pipe),
            '>' => {
                let token = if self.peek_char() == Some('>') {
                    self.read_char();
                    Token::RedirectStdoutAppend
                } else {
                    Token::RedirectStdoutTruncate
                };
                self.push_operator(token);
            }
            '1' | '2' if self.peek_char() == Some('>') => {
                self.read_char();
                let append = self.peek_char() == Some('>');
                if append {
                    self.read_char();
                }
                let token = match (ch, append) {
                    ('1', false) => Token::RedirectStdoutTruncate,
                    ('1', true) => Token::RedirectStdoutAppend,
                    (_, false) => Token::RedirectStderrTruncate,
                    (_, true) => Token::RedirectStderrAppend,
                };
                self.push_operator(token);
            }
            '\'' => {
                self.state = LexingState::SingleQuoted;
                self.word_started = true;
            }
            '"' => {
                self.state = LexingState::DoubleQuoted;
                self.word_started = true;
            }
            c if c.is_whitespace() => self.finish_word(),
            c => {
                self.buffer.push(c);
                self.word_started = true;
            }
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::Unquoted,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::Unquoted,
            '\\' => match self.peek_char() {
                Some(next @ ('"' | '\\')) => {
                    self.read_char();
                    self.buffer.push(next);
                }
                _ => self.buffer.push('\\'),
            },
            c => self.buffer.push(c),
        }
    }

    fn push_operator(&mut self, token: Token) {
        self.finish_word();
        self.out.push(token);
    }

    fn finish_word(&mut self) {
        if self.word_started {
            self.out.push(Token::Word(std::mem::take(&mut self.buffer)));
            self.word_started = false;
        }
    }
}

/// Split `line` into tokens, applying quoting and escaping rules.
///
/// Never fails: unterminated quotes are closed at end of input.
pub fn tokenize(line: &str) -> Vec<Token> {
    let tokens = LexingFSM::new(line).make_tokens();
    log::trace!("tokenized {line:?} into {tokens:?}");
    tokens
}

/// Only the words of `line`, dropping every operator.
pub fn words(line: &str) -> Vec<String> {
    tokenize(line)
        .into_iter()
        .filter_map(|token| match token {
            Token::Word(word) => Some(word),
            _ => None,
        })
        .collect()
}
