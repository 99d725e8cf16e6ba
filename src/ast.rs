//! Box abstract syntax tree.
//!
//! A program is an ordered list of blocks; block bodies mix commands,
//! pipelines, and nested blocks. Argument expressions form a closed sum:
//! literal (possibly carrying unexpanded `$` fragments), opaque literal,
//! variable reference, data-block lookup, command substitution.

use std::collections::HashMap;
use std::fmt;

use crate::error::Pos;

/// Index applied to a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// `[*]` — the whole list.
    Splat,
    /// `[n]` — zero-based element.
    At(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Bareword or double-quoted text; `$…`/`${…}`/`$(…)` fragments inside
    /// are expanded at evaluation time.
    Literal(String),
    /// Single-quoted text: opaque, never expanded.
    RawLiteral(String),
    /// `$name`, `$3`, `${name}`, `${name[*]}`, `${name[2]}`.
    Variable { name: String, index: Option<Index> },
    /// `${block.field}` or `${namespace.block.field}` (or the bare dotted
    /// `$a.b` form).
    HeaderLookup { path: String },
    /// `` `…` `` or `$(…)` — the inner source is reparsed and run.
    CommandSub { source: String },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(s) | Expr::RawLiteral(s) => write!(f, "{s}"),
            Expr::Variable { name, index } => match index {
                None => write!(f, "${name}"),
                Some(Index::Splat) => write!(f, "${{{name}[*]}}"),
                Some(Index::At(i)) => write!(f, "${{{name}[{i}]}}"),
            },
            Expr::HeaderLookup { path } => write!(f, "${{{path}}}"),
            Expr::CommandSub { source } => write!(f, "$({source})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>` — truncate-create stdout.
    Stdout,
    /// `>>` — append-create stdout.
    StdoutAppend,
    /// `2>` — truncate-create stderr.
    Stderr,
}

impl RedirectKind {
    pub fn symbol(self) -> &'static str {
        match self {
            RedirectKind::Stdout => ">",
            RedirectKind::StdoutAppend => ">>",
            RedirectKind::Stderr => "2>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    /// Target path; expanded like a literal at evaluation time.
    pub target: String,
}

/// What happens when the command fails. The fallback variants carry their
/// fallback command, so a policy that requires one cannot exist without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Default: a non-zero exit halts the enclosing scope.
    FailFast,
    /// `cmd ?` — swallow the failure, keep the status.
    Ignore,
    /// `cmd ? fallback` — run the fallback, continue with status 0.
    FallbackThenContinue(Box<Cmd>),
    /// `cmd ! fallback` — run the fallback, then halt with the original
    /// status.
    FallbackThenHalt(Box<Cmd>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub verb: String,
    pub args: Vec<Expr>,
    pub redirects: Vec<Redirect>,
    pub policy: ErrorPolicy,
    pub pos: Pos,
}

/// A non-empty sequence of commands connected by pipes. The parser only
/// builds one for two or more stages; a single command stays a `Cmd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Cmd>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Cmd(Cmd),
    Pipeline(Pipeline),
    Block(Block),
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Cmd(c) => c.pos,
            Stmt::Pipeline(p) => p.pos,
            Stmt::Block(b) => b.pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Main,
    Function,
    Data,
    /// Control structures (`if`/`for`/`while`/`else`) and user tags.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Function or data name, control-structure keyword, or empty for main.
    pub label: String,
    /// Declared parameter names for functions (each possibly
    /// `name=default`); raw header words for control structures.
    pub args: Vec<String>,
    /// Flags such as `-i` from the block header.
    pub modifiers: Vec<String>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

/// One `import` statement: the path as written, the namespace derived from
/// the file name, and the fully parsed sub-program. The imported file's main
/// block, if any, is never run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    pub namespace: String,
    pub program: Program,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub blocks: Vec<Block>,
    /// Function name → index into `blocks`.
    pub functions: HashMap<String, usize>,
    /// Data block name → index into `blocks`.
    pub data: HashMap<String, usize>,
    /// Index of the main block, explicit or synthesized.
    pub main: Option<usize>,
    pub imports: Vec<Import>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Block> {
        self.functions.get(name).map(|&i| &self.blocks[i])
    }

    pub fn main_block(&self) -> Option<&Block> {
        self.main.map(|i| &self.blocks[i])
    }

    pub fn data_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Data)
    }

    pub fn namespace(&self, name: &str) -> Option<&Import> {
        self.imports.iter().find(|i| i.namespace == name)
    }

    pub fn namespace_function(&self, namespace: &str, name: &str) -> Option<&Block> {
        self.namespace(namespace)?.program.function(name)
    }
}
