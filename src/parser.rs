//! Box parser — token stream to `Program`.
//!
//! Line-oriented: one physical line is one command (or one pipeline), with
//! blocks opened by `[…]` headers and closed by `end`. Control structures
//! (`if`/`for`/`while`) are plain words at the start of a line inside a
//! block body and close with their own `end`. Import statements are consumed
//! at top level and side-effect the program's import table.

use std::path::{Path, PathBuf};

use crate::ast::{
    Block, BlockKind, Cmd, ErrorPolicy, Expr, Import, Index, Pipeline, Program, Redirect,
    RedirectKind, Stmt,
};
use crate::error::{BoxError, BoxResult, Location, Pos};
use crate::imports;
use crate::lexer::{Lexer, Token, TokenKind};

/// Lex and parse a complete source file.
pub fn parse_source(source: &str, filename: &str) -> BoxResult<Program> {
    parse_source_at_depth(source, filename, 0)
}

pub(crate) fn parse_source_at_depth(
    source: &str,
    filename: &str,
    depth: usize,
) -> BoxResult<Program> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens, filename, depth).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    filename: String,
    base_dir: PathBuf,
    import_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, filename: &str, import_depth: usize) -> Self {
        let parent = Path::new(filename).parent();
        let base_dir = match parent {
            Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        };
        Self {
            tokens,
            pos: 0,
            filename: filename.to_string(),
            base_dir,
            import_depth,
        }
    }

    pub fn parse(&mut self) -> BoxResult<Program> {
        let mut program = Program::default();
        let mut top: Vec<Stmt> = Vec::new();
        let mut seen_paths: Vec<PathBuf> = Vec::new();
        let mut import_positions: Vec<(String, Pos)> = Vec::new();

        loop {
            self.skip_line_noise();
            match self.kind() {
                TokenKind::Eof => break,
                TokenKind::HeaderStart => {
                    let block = self.parse_block()?;
                    self.install_block(&mut program, block)?;
                }
                TokenKind::Word if self.peek().value == "import" => {
                    self.parse_import(&mut program, &mut seen_paths, &mut import_positions)?;
                }
                TokenKind::BlockEnd => {
                    return Err(self
                        .err_at("unmatched 'end'", self.peek().pos)
                        .with_help("every 'end' must close a block header or control structure"));
                }
                _ => top.push(self.parse_line()?),
            }
        }

        if !top.is_empty() {
            if program.main.is_some() {
                return Err(self
                    .err_at("commands outside a block", top[0].pos())
                    .with_help("move top-level commands into the [main] block"));
            }
            let pos = top[0].pos();
            program.blocks.push(Block {
                kind: BlockKind::Main,
                label: String::new(),
                args: Vec::new(),
                modifiers: Vec::new(),
                body: top,
                pos,
            });
            program.main = Some(program.blocks.len() - 1);
        }

        for (namespace, pos) in &import_positions {
            if program.functions.contains_key(namespace) || program.data.contains_key(namespace) {
                return Err(self
                    .err_at(
                        format!("import namespace '{namespace}' collides with a local definition"),
                        *pos,
                    )
                    .with_help("rename the imported file or the local function/data block"));
            }
        }

        Ok(program)
    }

    // ── token helpers ───────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn at_end(&self) -> bool {
        self.kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !self.at_end() {
            self.pos += 1;
        }
        tok
    }

    fn skip_line_noise(&mut self) {
        while matches!(self.kind(), TokenKind::Newline | TokenKind::Comment) {
            self.pos += 1;
        }
    }

    fn err_at(&self, msg: impl Into<String>, pos: Pos) -> BoxError {
        BoxError::new(msg).at(Location::new(&self.filename, pos))
    }

    /// The current token plus any expression tokens glued to it with no
    /// intervening whitespace.
    fn collect_group(&mut self) -> Vec<Token> {
        let mut group = vec![self.advance()];
        while is_expr_kind(self.kind())
            && self.peek().start == group.last().expect("group is non-empty").end
        {
            group.push(self.advance());
        }
        group
    }

    // ── imports ─────────────────────────────────────────────────────

    fn parse_import(
        &mut self,
        program: &mut Program,
        seen_paths: &mut Vec<PathBuf>,
        positions: &mut Vec<(String, Pos)>,
    ) -> BoxResult<()> {
        let kw = self.advance();
        let path_tok = match self.kind() {
            TokenKind::Word | TokenKind::SingleQuote | TokenKind::DoubleQuote => self.advance(),
            _ => {
                return Err(self
                    .err_at("import: missing path", kw.pos)
                    .with_help("usage: import path/to/module.box"));
            }
        };
        match self.kind() {
            TokenKind::Newline | TokenKind::Eof | TokenKind::Comment => {}
            _ => {
                return Err(
                    self.err_at("import: unexpected tokens after path", self.peek().pos)
                );
            }
        }

        let loc = Location::new(&self.filename, path_tok.pos);
        let (canonical, sub) =
            imports::load(&self.base_dir, &path_tok.value, loc, self.import_depth)?;

        // Re-importing the exact same resolved path is a no-op.
        if seen_paths.contains(&canonical) {
            return Ok(());
        }

        let namespace = imports::namespace_of(&path_tok.value);
        if program.namespace(&namespace).is_some() {
            return Err(self.err_at(
                format!("duplicate import namespace '{namespace}'"),
                path_tok.pos,
            ));
        }

        seen_paths.push(canonical);
        positions.push((namespace.clone(), path_tok.pos));
        program.imports.push(Import {
            path: path_tok.value,
            namespace,
            program: sub,
        });
        Ok(())
    }

    // ── blocks ──────────────────────────────────────────────────────

    fn parse_block(&mut self) -> BoxResult<Block> {
        let header = self.advance();
        if header.unterminated {
            return Err(self.err_at("unclosed block header", header.pos));
        }

        let inner = header
            .value
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim();
        let parts: Vec<&str> = inner.split_whitespace().collect();
        if parts.is_empty() {
            return Err(self.err_at("empty block header", header.pos));
        }

        let mut block = Block {
            kind: BlockKind::Custom,
            label: String::new(),
            args: Vec::new(),
            modifiers: Vec::new(),
            body: Vec::new(),
            pos: header.pos,
        };

        let mut i = 1;
        while i < parts.len() && parts[i].starts_with('-') {
            block.modifiers.push(parts[i].to_string());
            i += 1;
        }

        match parts[0] {
            "main" => {
                block.kind = BlockKind::Main;
                if i < parts.len() {
                    return Err(self.err_at("[main] block cannot have arguments", header.pos));
                }
            }
            "fn" => {
                block.kind = BlockKind::Function;
                if i >= parts.len() {
                    return Err(self
                        .err_at("[fn] block missing function name", header.pos)
                        .with_help("write [fn name arg1 arg2=default]"));
                }
                block.label = parts[i].to_string();
                block.args = parts[i + 1..].iter().map(|s| s.to_string()).collect();
            }
            "data" => {
                block.kind = BlockKind::Data;
                if i >= parts.len() {
                    return Err(self.err_at("[data] block missing data name", header.pos));
                }
                block.label = parts[i].to_string();
                if i + 1 < parts.len() {
                    return Err(self.err_at("[data] block takes no arguments", header.pos));
                }
            }
            custom => {
                block.kind = BlockKind::Custom;
                block.label = custom.to_string();
                block.args = parts[i..].iter().map(|s| s.to_string()).collect();
            }
        }

        block.body = if block.kind == BlockKind::Data {
            self.parse_data_rows(header.pos)?
        } else {
            self.parse_body(header.pos, "block")?
        };
        Ok(block)
    }

    fn install_block(&mut self, program: &mut Program, block: Block) -> BoxResult<()> {
        let idx = program.blocks.len();
        match block.kind {
            BlockKind::Main => {
                if program.main.is_some() {
                    return Err(self.err_at("multiple [main] blocks", block.pos));
                }
                program.main = Some(idx);
            }
            BlockKind::Function => {
                if program.functions.contains_key(&block.label) {
                    return Err(
                        self.err_at(format!("duplicate function '{}'", block.label), block.pos)
                    );
                }
                program.functions.insert(block.label.clone(), idx);
            }
            BlockKind::Data => {
                if program.data.contains_key(&block.label) {
                    return Err(self.err_at(
                        format!("duplicate data block '{}'", block.label),
                        block.pos,
                    ));
                }
                program.data.insert(block.label.clone(), idx);
            }
            BlockKind::Custom => {}
        }
        program.blocks.push(block);
        Ok(())
    }

    /// Body of a block or of a `for`/`while`: lines until the matching `end`.
    fn parse_body(&mut self, open_pos: Pos, what: &str) -> BoxResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            self.skip_line_noise();
            match self.kind() {
                TokenKind::Eof => {
                    return Err(self
                        .err_at(format!("unclosed {what}"), open_pos)
                        .with_help("add 'end' to close it"));
                }
                TokenKind::BlockEnd => {
                    self.advance();
                    return Ok(body);
                }
                TokenKind::HeaderStart => body.push(Stmt::Block(self.parse_block()?)),
                TokenKind::Word if is_control_keyword(&self.peek().value) => {
                    body.push(Stmt::Block(self.parse_control()?));
                }
                TokenKind::Word if self.peek().value == "else" => {
                    return Err(self.err_at("'else' without a matching 'if'", self.peek().pos));
                }
                _ => body.push(self.parse_line()?),
            }
        }
    }

    // ── control structures ──────────────────────────────────────────

    fn parse_control(&mut self) -> BoxResult<Block> {
        let kw = self.advance();
        let args = self.parse_header_args();

        let mut block = Block {
            kind: BlockKind::Custom,
            label: kw.value.clone(),
            args,
            modifiers: Vec::new(),
            body: Vec::new(),
            pos: kw.pos,
        };

        if kw.value == "if" {
            let (then_body, else_arm) = self.parse_if_body(kw.pos)?;
            block.body = then_body;
            if let Some((else_body, else_pos)) = else_arm {
                block.body.push(Stmt::Block(Block {
                    kind: BlockKind::Custom,
                    label: "else".to_string(),
                    args: Vec::new(),
                    modifiers: Vec::new(),
                    body: else_body,
                    pos: else_pos,
                }));
            }
        } else {
            block.body = self.parse_body(kw.pos, &format!("'{}' block", kw.value))?;
        }
        Ok(block)
    }

    /// Header words after `if`/`for`/`while`, up to the end of the line,
    /// normalized back to their source-ish spelling for re-evaluation.
    fn parse_header_args(&mut self) -> Vec<String> {
        let mut args = Vec::new();
        loop {
            match self.kind() {
                TokenKind::Newline => {
                    self.advance();
                    break;
                }
                TokenKind::Eof | TokenKind::BlockEnd => break,
                TokenKind::Comment => {
                    self.advance();
                }
                k if is_expr_kind(k) => {
                    let group = self.collect_group();
                    args.push(header_arg(&group));
                }
                _ => {
                    let tok = self.advance();
                    args.push(tok.value);
                }
            }
        }
        args
    }

    /// `if` bodies may contain one `else`; both arms share the closing `end`.
    #[allow(clippy::type_complexity)]
    fn parse_if_body(
        &mut self,
        open_pos: Pos,
    ) -> BoxResult<(Vec<Stmt>, Option<(Vec<Stmt>, Pos)>)> {
        let mut body = Vec::new();
        loop {
            self.skip_line_noise();
            match self.kind() {
                TokenKind::Eof => {
                    return Err(self
                        .err_at("unclosed 'if' block", open_pos)
                        .with_help("add 'end' to close it"));
                }
                TokenKind::BlockEnd => {
                    self.advance();
                    return Ok((body, None));
                }
                TokenKind::Word if self.peek().value == "else" => {
                    let else_pos = self.peek().pos;
                    self.advance();
                    let else_body = self.parse_body(else_pos, "'else' block")?;
                    return Ok((body, Some((else_body, else_pos))));
                }
                TokenKind::HeaderStart => body.push(Stmt::Block(self.parse_block()?)),
                TokenKind::Word if is_control_keyword(&self.peek().value) => {
                    body.push(Stmt::Block(self.parse_control()?));
                }
                _ => body.push(self.parse_line()?),
            }
        }
    }

    // ── data blocks ─────────────────────────────────────────────────

    /// Data bodies consist solely of `key value…` rows.
    fn parse_data_rows(&mut self, open_pos: Pos) -> BoxResult<Vec<Stmt>> {
        let mut rows = Vec::new();
        loop {
            self.skip_line_noise();
            match self.kind() {
                TokenKind::Eof => {
                    return Err(self
                        .err_at("unclosed data block", open_pos)
                        .with_help("add 'end' to close it"));
                }
                TokenKind::BlockEnd => {
                    self.advance();
                    return Ok(rows);
                }
                _ => {
                    let mut line: Vec<Token> = Vec::new();
                    loop {
                        match self.kind() {
                            TokenKind::Newline => {
                                self.advance();
                                break;
                            }
                            TokenKind::Eof | TokenKind::BlockEnd => break,
                            TokenKind::Comment => {
                                self.advance();
                            }
                            _ => line.push(self.advance()),
                        }
                    }
                    if line.is_empty() {
                        continue;
                    }
                    for tok in &line {
                        if matches!(
                            tok.kind,
                            TokenKind::Pipeline | TokenKind::Redirect | TokenKind::IgnoreError
                        ) {
                            return Err(self
                                .err_at("data rows must be 'key value…' pairs", tok.pos)
                                .with_help(
                                    "pipelines, redirects, and error policies are not allowed \
                                     inside [data] blocks",
                                ));
                        }
                    }
                    let key = &line[0];
                    if key.kind != TokenKind::Word {
                        return Err(self.err_at("data row must start with a key word", key.pos));
                    }
                    let mut args = Vec::new();
                    let mut i = 1;
                    while i < line.len() {
                        let mut j = i + 1;
                        while j < line.len()
                            && is_expr_kind(line[j].kind)
                            && line[j].start == line[j - 1].end
                        {
                            j += 1;
                        }
                        args.push(self.expr_from_group(&line[i..j])?);
                        i = j;
                    }
                    rows.push(Stmt::Cmd(Cmd {
                        verb: key.value.clone(),
                        args,
                        redirects: Vec::new(),
                        policy: ErrorPolicy::FailFast,
                        pos: key.pos,
                    }));
                }
            }
        }
    }

    // ── commands and pipelines ──────────────────────────────────────

    /// One physical line: a command, or a `|`-separated pipeline.
    fn parse_line(&mut self) -> BoxResult<Stmt> {
        let start_pos = self.peek().pos;
        let mut line: Vec<Token> = Vec::new();
        loop {
            match self.kind() {
                TokenKind::Newline => {
                    self.advance();
                    break;
                }
                TokenKind::Eof | TokenKind::BlockEnd => break,
                TokenKind::Comment => {
                    self.advance();
                }
                _ => line.push(self.advance()),
            }
        }

        let mut groups: Vec<Vec<Token>> = vec![Vec::new()];
        for tok in line {
            if tok.kind == TokenKind::Pipeline {
                groups.push(Vec::new());
            } else {
                groups.last_mut().expect("groups never empty").push(tok);
            }
        }

        if groups.len() == 1 {
            return Ok(Stmt::Cmd(self.parse_stage(&groups[0], start_pos)?));
        }

        let mut stages = Vec::with_capacity(groups.len());
        for group in &groups {
            if group.is_empty() {
                return Err(self.err_at("empty pipeline stage", start_pos));
            }
            stages.push(self.parse_stage(group, start_pos)?);
        }
        Ok(Stmt::Pipeline(Pipeline {
            stages,
            pos: start_pos,
        }))
    }

    /// One pipeline stage: verb, argument expressions, redirects, and an
    /// optional error-policy suffix whose fallback is parsed recursively.
    fn parse_stage(&mut self, tokens: &[Token], line_pos: Pos) -> BoxResult<Cmd> {
        let Some(first) = tokens.first() else {
            return Err(self.err_at("expected command", line_pos));
        };
        if first.kind != TokenKind::Word {
            return Err(self.err_at(
                format!("expected command, found '{}'", first.value),
                first.pos,
            ));
        }

        let mut cmd = Cmd {
            verb: first.value.clone(),
            args: Vec::new(),
            redirects: Vec::new(),
            policy: ErrorPolicy::FailFast,
            pos: first.pos,
        };

        let mut i = 1;
        while i < tokens.len() {
            let tok = &tokens[i];
            match tok.kind {
                TokenKind::Redirect => {
                    let Some(target) = tokens.get(i + 1) else {
                        return Err(self.err_at(
                            format!("redirect '{}' missing target", tok.value),
                            tok.pos,
                        ));
                    };
                    if !is_expr_kind(target.kind) {
                        return Err(
                            self.err_at("redirect target must be a path", target.pos)
                        );
                    }
                    let kind = match tok.value.as_str() {
                        ">" => RedirectKind::Stdout,
                        ">>" => RedirectKind::StdoutAppend,
                        _ => RedirectKind::Stderr,
                    };
                    cmd.redirects.push(Redirect {
                        kind,
                        target: composite_fragment(target),
                    });
                    i += 2;
                }
                TokenKind::IgnoreError => {
                    let rest = &tokens[i + 1..];
                    cmd.policy = if rest.is_empty() {
                        ErrorPolicy::Ignore
                    } else {
                        ErrorPolicy::FallbackThenContinue(Box::new(
                            self.parse_stage(rest, tok.pos)?,
                        ))
                    };
                    return Ok(cmd);
                }
                TokenKind::Word if tok.value == "!" => {
                    let rest = &tokens[i + 1..];
                    if rest.is_empty() {
                        return Err(self
                            .err_at("'!' requires a fallback command", tok.pos)
                            .with_help(
                                "write 'cmd ! fallback', or 'cmd ?' to ignore failures",
                            ));
                    }
                    cmd.policy =
                        ErrorPolicy::FallbackThenHalt(Box::new(self.parse_stage(rest, tok.pos)?));
                    return Ok(cmd);
                }
                k if is_expr_kind(k) => {
                    let mut j = i + 1;
                    while j < tokens.len()
                        && is_expr_kind(tokens[j].kind)
                        && tokens[j].start == tokens[j - 1].end
                    {
                        j += 1;
                    }
                    cmd.args.push(self.expr_from_group(&tokens[i..j])?);
                    i = j;
                }
                _ => {
                    return Err(
                        self.err_at(format!("unexpected token '{}'", tok.value), tok.pos)
                    );
                }
            }
        }
        Ok(cmd)
    }

    // ── expressions ─────────────────────────────────────────────────

    /// Adjacent tokens (no whitespace between them) concatenate into one
    /// composite literal so `${f}.o` evaluates as a single argument.
    fn expr_from_group(&self, group: &[Token]) -> BoxResult<Expr> {
        if group.len() == 1 {
            return self.expr_from_token(&group[0]);
        }
        let mut text = String::new();
        for tok in group {
            if tok.unterminated {
                return Err(self.unterminated_err(tok));
            }
            text.push_str(&composite_fragment(tok));
        }
        Ok(Expr::Literal(text))
    }

    fn expr_from_token(&self, tok: &Token) -> BoxResult<Expr> {
        if tok.unterminated {
            return Err(self.unterminated_err(tok));
        }
        match tok.kind {
            TokenKind::Word | TokenKind::DoubleQuote => Ok(Expr::Literal(tok.value.clone())),
            TokenKind::SingleQuote => Ok(Expr::RawLiteral(tok.value.clone())),
            TokenKind::CommandSub => Ok(Expr::CommandSub {
                source: tok.value.clone(),
            }),
            TokenKind::HeaderLookup => {
                let parts: Vec<&str> = tok.value.split('.').collect();
                if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
                    return Err(self
                        .err_at(format!("malformed dot-path '{}'", tok.value), tok.pos)
                        .with_help("data lookups use block.field or namespace.block.field"));
                }
                Ok(Expr::HeaderLookup {
                    path: tok.value.clone(),
                })
            }
            TokenKind::Variable => self.variable_expr(tok),
            _ => Err(self.err_at(format!("unexpected token '{}'", tok.value), tok.pos)),
        }
    }

    fn variable_expr(&self, tok: &Token) -> BoxResult<Expr> {
        let v = &tok.value;
        // Affix-stripping forms (`${f%.c}`, `${f#src/}`) stay literal and
        // are handled by the `${…}` expansion pass.
        if v.contains('%') || v.contains('#') {
            return Ok(Expr::Literal(format!("${{{v}}}")));
        }
        let Some(open) = v.find('[') else {
            if v.is_empty() {
                return Err(self.err_at("missing variable name", tok.pos));
            }
            return Ok(Expr::Variable {
                name: v.clone(),
                index: None,
            });
        };

        let close = v.rfind(']').filter(|&c| c > open);
        let Some(close) = close else {
            return Err(self.err_at(format!("invalid array reference '{v}'"), tok.pos));
        };
        let name = &v[..open];
        let idx = &v[open + 1..close];
        if name.is_empty() {
            return Err(self.err_at("missing variable name", tok.pos));
        }
        let index = if idx == "*" {
            Index::Splat
        } else {
            match idx.parse::<usize>() {
                Ok(n) => Index::At(n),
                Err(_) => {
                    return Err(self
                        .err_at(format!("invalid array index '{idx}'"), tok.pos)
                        .with_help("use * for the whole list or a non-negative number"));
                }
            }
        };
        Ok(Expr::Variable {
            name: name.to_string(),
            index: Some(index),
        })
    }

    fn unterminated_err(&self, tok: &Token) -> BoxError {
        let what = match tok.kind {
            TokenKind::SingleQuote | TokenKind::DoubleQuote => "unterminated string literal",
            TokenKind::CommandSub => "unterminated command substitution",
            _ => "unterminated '${' expansion",
        };
        self.err_at(what, tok.pos)
            .with_help("the closing delimiter is missing")
    }
}

fn is_control_keyword(word: &str) -> bool {
    matches!(word, "if" | "for" | "while")
}

fn is_expr_kind(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Word
            | TokenKind::SingleQuote
            | TokenKind::DoubleQuote
            | TokenKind::Variable
            | TokenKind::HeaderLookup
            | TokenKind::CommandSub
    )
}

/// Source-ish spelling of a token for composite literals and control
/// headers. Variables normalize to the `${…}` form, which expansion treats
/// identically.
fn composite_fragment(tok: &Token) -> String {
    match tok.kind {
        TokenKind::Variable | TokenKind::HeaderLookup => format!("${{{}}}", tok.value),
        TokenKind::CommandSub => format!("$({})", tok.value),
        _ => tok.value.clone(),
    }
}

/// Control-header spelling: a plain `$name` stays `$name` so undefined
/// variables in conditions are still caught.
fn header_arg(group: &[Token]) -> String {
    if group.len() == 1 {
        let tok = &group[0];
        if tok.kind == TokenKind::Variable && !tok.value.contains('[') {
            return format!("${}", tok.value);
        }
        return composite_fragment(tok);
    }
    group.iter().map(composite_fragment).collect()
}
