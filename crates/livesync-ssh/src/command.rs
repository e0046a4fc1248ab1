//! External command description and shell-safe rendering

use std::borrow::Cow;
use std::fmt;

/// A program and its arguments, run without a local shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render as a command line that can be pasted into a POSIX shell
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Quote one word for a POSIX shell
///
/// Words with interior NUL bytes cannot be quoted and are rendered as-is;
/// they cannot be passed to a process either.
pub fn quote(word: &str) -> Cow<'_, str> {
    shlex::try_quote(word).unwrap_or(Cow::Borrowed(word))
}

/// Join words into one remote command string, quoting each
pub fn join<'a, I>(words: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    words.into_iter().map(quote).collect::<Vec<_>>().join(" ")
}
