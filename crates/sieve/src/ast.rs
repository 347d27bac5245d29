//! The pre-parsed script tree handed to the validator.
//!
//! The parser front end that produces this tree from script text lives
//! outside the workspace; tests and embedders build it through the
//! constructors below. The validator checks and rewrites nodes in place;
//! the generator consumes the rewritten tree.

use crate::diagnostics::Span;
use crate::operands::OperandValue;

/// One argument value as parsed from the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    String(String),
    StringList(Vec<String>),
    Number(u64),
    /// A `:tagged` argument (stored without the leading colon).
    Tag(String),
}

/// Expected kind of a positional or tag-value argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    StringList,
    Number,
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::StringList => "string list",
            ArgKind::Number => "number",
        }
    }

    /// Whether `value` satisfies this kind. A single string satisfies a
    /// string-list position; the validator rewrites it to a one-item list.
    pub fn accepts(self, value: &ArgValue) -> bool {
        match (self, value) {
            (ArgKind::String, ArgValue::String(_)) => true,
            (ArgKind::StringList, ArgValue::StringList(_) | ArgValue::String(_)) => true,
            (ArgKind::Number, ArgValue::Number(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub value: ArgValue,
    pub span: Span,
}

impl Argument {
    pub fn new(value: ArgValue, span: Span) -> Self {
        Self { value, span }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.value {
            ArgValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match &self.value {
            ArgValue::StringList(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match &self.value {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A tagged argument after validation, ready for the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTag {
    /// Emitted as an `(opt_code, operand)` pair in the optional-operand run.
    Operand { opt_code: u64, value: OperandValue },
    /// Emitted through the reserved side-effect opt code; `payload` is
    /// `OperandValue::Omitted` when the side effect carries no data.
    SideEffect {
        extension: &'static str,
        code: u64,
        payload: OperandValue,
    },
}

/// A test node: the condition part of `if`/`elsif` or a subtest of
/// `allof`/`anyof`/`not`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestNode {
    pub identifier: String,
    pub span: Span,
    pub args: Vec<Argument>,
    pub tests: Vec<TestNode>,
    pub resolved_tags: Vec<ResolvedTag>,
}

impl TestNode {
    pub fn new(identifier: &str, line: u32) -> Self {
        Self {
            identifier: identifier.to_string(),
            span: Span::at_line(line),
            args: Vec::new(),
            tests: Vec::new(),
            resolved_tags: Vec::new(),
        }
    }

    pub fn arg(mut self, value: ArgValue) -> Self {
        let span = self.span;
        self.args.push(Argument::new(value, span));
        self
    }

    pub fn subtest(mut self, test: TestNode) -> Self {
        self.tests.push(test);
        self
    }
}

/// A command node; `test` is set for `if`/`elsif`, `block` for any command
/// that carries a `{ ... }` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    pub identifier: String,
    pub span: Span,
    pub args: Vec<Argument>,
    pub test: Option<TestNode>,
    pub block: Vec<CommandNode>,
    pub resolved_tags: Vec<ResolvedTag>,
}

impl CommandNode {
    pub fn new(identifier: &str, line: u32) -> Self {
        Self {
            identifier: identifier.to_string(),
            span: Span::at_line(line),
            args: Vec::new(),
            test: None,
            block: Vec::new(),
            resolved_tags: Vec::new(),
        }
    }

    pub fn arg(mut self, value: ArgValue) -> Self {
        let span = self.span;
        self.args.push(Argument::new(value, span));
        self
    }

    pub fn test(mut self, test: TestNode) -> Self {
        self.test = Some(test);
        self
    }

    pub fn block(mut self, commands: Vec<CommandNode>) -> Self {
        self.block = commands;
        self
    }
}

/// A whole script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub commands: Vec<CommandNode>,
}

impl Script {
    pub fn new(commands: Vec<CommandNode>) -> Self {
        Self { commands }
    }
}
