//! Box tree-walking evaluator — `Program` + argv to effects.
//!
//! Walks block bodies in a frame stack, expanding arguments in three passes
//! (`$(…)`, then `${…}`, then `$name`), resolving verbs against user
//! functions, namespaces, and the builtin table, and enforcing the
//! error-policy discipline: any non-zero exit halts the enclosing scope
//! unless a `?`/`!` suffix intervenes.

use std::io::{self, Read};
use std::mem;
use std::thread;

use tracing::debug;

use crate::ast::{Block, BlockKind, Cmd, ErrorPolicy, Expr, Index, Pipeline, Program, RedirectKind, Stmt};
use crate::builtins::{self, VerbCx};
use crate::error::{BoxError, BoxResult, Location, Pos};
use crate::parser;
use crate::scope::Environment;
use crate::stream::{InputTarget, OutputTarget, ProcessTable, Streams};
use crate::value::Value;

/// Why a result unwinds. Loops consume `Break`/`Continue`, function calls
/// consume `Return`; `Exit` and the error-policy `Halt` unwind everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return,
    Exit,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: i32,
    pub flow: Flow,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            status: 0,
            flow: Flow::Normal,
        }
    }

    pub fn status(status: i32) -> Self {
        Self {
            status,
            flow: Flow::Normal,
        }
    }

    pub fn with_flow(status: i32, flow: Flow) -> Self {
        Self { status, flow }
    }
}

const MAX_CALL_DEPTH: usize = 200;

struct RedirectGuard {
    stdout: Option<OutputTarget>,
    stderr: Option<OutputTarget>,
}

pub struct Evaluator<'a> {
    program: &'a Program,
    env: Environment,
    streams: Streams,
    procs: ProcessTable,
    filename: String,
    call_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a Program, filename: impl Into<String>) -> Self {
        Self {
            program,
            env: Environment::new(),
            streams: Streams::inherited(),
            procs: ProcessTable::new(),
            filename: filename.into(),
            call_depth: 0,
        }
    }

    /// Run the program: bind argv, materialize data blocks and imports,
    /// dispatch to an `-i` function or the main block. Returns the exit
    /// status for controlled termination; errors carry a formatted
    /// diagnostic.
    pub fn run(&mut self, args: &[String]) -> BoxResult<i32> {
        let program = self.program;

        self.env.set("argv", args.iter().cloned().collect::<Value>());
        if let Some(first) = args.first() {
            self.env.set("0", Value::single(first.clone()));
        }
        for (i, arg) in args.iter().enumerate() {
            self.env.set((i + 1).to_string(), Value::single(arg.clone()));
        }
        self.env.set_status(0);

        for import in &program.imports {
            debug!(namespace = %import.namespace, path = %import.path, "materializing import");
            for block in import.program.data_blocks() {
                self.load_data_block(block, Some(&import.namespace))?;
            }
        }
        for block in program.data_blocks() {
            self.load_data_block(block, None)?;
        }

        if let Some(first) = args.first() {
            if let Some(f) = program.function(first) {
                if f.modifiers.iter().any(|m| m == "-i") {
                    debug!(function = %first, "dispatching to -i function");
                    let call_args: Vec<Value> =
                        args[1..].iter().map(|a| Value::single(a.clone())).collect();
                    let outcome = self.call_function(f, &call_args, None)?;
                    return Ok(outcome.status);
                }
            }
        }

        match program.main_block() {
            Some(main) => {
                let outcome = self.eval_body(&main.body)?;
                Ok(match outcome.flow {
                    Flow::Normal => 0,
                    _ => outcome.status,
                })
            }
            None => Ok(0),
        }
    }

    /// Data rows are `key value…` pairs; values are expanded and flattened.
    fn load_data_block(&mut self, block: &Block, namespace: Option<&str>) -> BoxResult<()> {
        let table = match namespace {
            Some(ns) => format!("{ns}.{}", block.label),
            None => block.label.clone(),
        };
        for stmt in &block.body {
            let Stmt::Cmd(cmd) = stmt else { continue };
            if cmd.args.is_empty() {
                continue;
            }
            let mut values = Vec::new();
            for arg in &cmd.args {
                values.extend(self.eval_expr(arg)?.into_items());
            }
            self.env
                .set_data_field(&table, cmd.verb.clone(), Value::new(values));
        }
        Ok(())
    }

    // ── statement execution ─────────────────────────────────────────

    fn eval_body(&mut self, body: &[Stmt]) -> BoxResult<Outcome> {
        for stmt in body {
            let outcome = self.eval_stmt(stmt)?;
            if outcome.flow != Flow::Normal {
                return Ok(outcome);
            }
        }
        Ok(Outcome::ok())
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> BoxResult<Outcome> {
        match stmt {
            Stmt::Cmd(cmd) => self.eval_command(cmd),
            Stmt::Pipeline(pipeline) => self.eval_pipeline(pipeline),
            Stmt::Block(block) => match block.kind {
                BlockKind::Custom => self.eval_control(block),
                _ => self.eval_body(&block.body),
            },
        }
    }

    // ── commands and error policy ───────────────────────────────────

    fn eval_command(&mut self, cmd: &Cmd) -> BoxResult<Outcome> {
        let invoked = self.invoke_command(cmd);
        self.apply_policy(cmd, invoked)
    }

    /// Evaluate arguments, set up redirections, resolve and invoke the verb,
    /// tear down, update `status`. No policy applied yet — the caller wraps
    /// this whole sequence so that `?` can swallow argument and redirect
    /// failures as well.
    fn invoke_command(&mut self, cmd: &Cmd) -> BoxResult<Outcome> {
        let mut args = Vec::with_capacity(cmd.args.len());
        for expr in &cmd.args {
            let value = self
                .eval_expr(expr)
                .map_err(|e| self.located(e, cmd.pos))?;
            args.push(value);
        }

        let guard = self.apply_redirects(cmd)?;
        let result = self.resolve_and_invoke(cmd, &args);
        self.restore_redirects(guard);
        let mut outcome = result?;

        self.env.set_status(outcome.status);
        // spawn's PID stays visible in $status; control flow sees success.
        if cmd.verb == "spawn" {
            outcome.status = 0;
        }
        Ok(outcome)
    }

    fn apply_policy(&mut self, cmd: &Cmd, invoked: BoxResult<Outcome>) -> BoxResult<Outcome> {
        match invoked {
            // break/continue/return/exit are deliberate control flow,
            // recognized by loops and function calls, never by policy. A
            // Halt is a failure escalating out of a callee and stays
            // catchable here.
            Ok(outcome)
                if matches!(
                    outcome.flow,
                    Flow::Break | Flow::Continue | Flow::Return | Flow::Exit
                ) =>
            {
                Ok(outcome)
            }
            Ok(outcome) if outcome.status == 0 => Ok(outcome),
            Ok(outcome) => self.handle_failure(cmd, outcome.status, None),
            Err(e) => self.handle_failure(cmd, 1, Some(e)),
        }
    }

    fn handle_failure(
        &mut self,
        cmd: &Cmd,
        status: i32,
        error: Option<BoxError>,
    ) -> BoxResult<Outcome> {
        self.env.set_status(status);
        match &cmd.policy {
            ErrorPolicy::FailFast => match error {
                Some(e) => Err(e),
                None => Ok(Outcome::with_flow(status, Flow::Halt)),
            },
            ErrorPolicy::Ignore => Ok(Outcome::status(status)),
            ErrorPolicy::FallbackThenContinue(fallback) => {
                let _ = self.eval_command(fallback);
                Ok(Outcome::ok())
            }
            ErrorPolicy::FallbackThenHalt(fallback) => {
                let _ = self.eval_command(fallback);
                match error {
                    Some(e) => Err(e),
                    None => Ok(Outcome::with_flow(status, Flow::Halt)),
                }
            }
        }
    }

    /// Verb resolution order: local function, namespace-context function,
    /// dotted namespace call, builtin, unknown.
    fn resolve_and_invoke(&mut self, cmd: &Cmd, args: &[Value]) -> BoxResult<Outcome> {
        let program = self.program;

        if let Some(f) = program.function(&cmd.verb) {
            return self.call_function(f, args, None);
        }

        if let Some(ns) = self.env.namespace().map(str::to_string) {
            if let Some(f) = program.namespace_function(&ns, &cmd.verb) {
                return self.call_function(f, args, Some(ns));
            }
        }

        if cmd.verb.contains('.') {
            let parts: Vec<&str> = cmd.verb.split('.').collect();
            if parts.len() != 2 {
                return Err(self.located(
                    BoxError::new(format!("invalid namespaced call '{}'", cmd.verb)),
                    cmd.pos,
                ));
            }
            let (ns, name) = (parts[0], parts[1]);
            let Some(import) = program.namespace(ns) else {
                return Err(self.located(
                    BoxError::new(format!("namespace '{ns}' not found")).with_help(
                        "namespaces come from 'import' statements at the top of the file",
                    ),
                    cmd.pos,
                ));
            };
            let Some(f) = import.program.function(name) else {
                return Err(self.located(
                    BoxError::new(format!("function '{name}' not found in namespace '{ns}'")),
                    cmd.pos,
                ));
            };
            return self.call_function(f, args, Some(ns.to_string()));
        }

        let mut cx = VerbCx {
            env: &mut self.env,
            streams: &mut self.streams,
            procs: &self.procs,
        };
        if let Some(result) = builtins::dispatch(&cmd.verb, args, &mut cx) {
            return result.map_err(|e| self.located(e, cmd.pos));
        }

        Err(BoxError::new(format!("unknown command: {}", cmd.verb))
            .at(Location::new(&self.filename, cmd.pos))
            .with_help(format!(
                "'{}' is not a built-in verb or a known function",
                cmd.verb
            )))
    }

    // ── function calls ──────────────────────────────────────────────

    fn call_function(
        &mut self,
        f: &Block,
        args: &[Value],
        namespace: Option<String>,
    ) -> BoxResult<Outcome> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.located(
                BoxError::new(format!("call depth exceeded invoking '{}'", f.label))
                    .with_help("check for unbounded recursion"),
                f.pos,
            ));
        }
        debug!(function = %f.label, argc = args.len(), "calling function");

        // A list argument supplies one positional per element, so splats
        // forward cleanly.
        let positional: Vec<String> = args
            .iter()
            .flat_map(|v| v.items().iter().cloned())
            .collect();

        self.env.push_function(namespace);
        self.call_depth += 1;

        for (i, decl) in f.args.iter().enumerate() {
            let (name, default) = match decl.split_once('=') {
                Some((n, d)) => (n, Some(d)),
                None => (decl.as_str(), None),
            };
            match positional.get(i) {
                Some(v) => self.env.set(name, Value::single(v.clone())),
                None => {
                    if let Some(d) = default {
                        self.env.set(name, Value::single(d));
                    }
                    // No default: left unset, like any undefined variable.
                }
            }
        }
        for (i, extra) in positional.iter().enumerate().skip(f.args.len()) {
            self.env.set((i + 1).to_string(), Value::single(extra.clone()));
        }

        let result = self.eval_body(&f.body);
        self.call_depth -= 1;
        self.env.pop();
        let outcome = result?;

        Ok(match outcome.flow {
            Flow::Return | Flow::Break | Flow::Continue => Outcome::status(outcome.status),
            _ => outcome,
        })
    }

    // ── control structures ──────────────────────────────────────────

    fn eval_control(&mut self, block: &Block) -> BoxResult<Outcome> {
        self.env.push_control();
        let result = match block.label.as_str() {
            "if" => self.eval_if(block),
            "for" => self.eval_for(block),
            "while" => self.eval_while(block),
            _ => self.eval_body(&block.body),
        };
        self.env.pop();
        result
    }

    fn eval_if(&mut self, block: &Block) -> BoxResult<Outcome> {
        if block.args.is_empty() {
            return Err(self.located(BoxError::new("if: missing condition"), block.pos));
        }
        let status = self.eval_condition(&block.args, block.pos)?;

        let else_at = block
            .body
            .iter()
            .position(|s| matches!(s, Stmt::Block(b) if b.label == "else"));

        if status == 0 {
            let then_body = match else_at {
                Some(i) => &block.body[..i],
                None => &block.body[..],
            };
            self.eval_body(then_body)
        } else if let Some(i) = else_at {
            let Stmt::Block(else_block) = &block.body[i] else {
                unreachable!("else position always names a block");
            };
            self.eval_body(&else_block.body)
        } else {
            Ok(Outcome::ok())
        }
    }

    fn eval_for(&mut self, block: &Block) -> BoxResult<Outcome> {
        if block.args.len() < 3 || block.args[1] != "in" {
            return Err(self.located(
                BoxError::new("for: expected 'for var in items…'"),
                block.pos,
            ));
        }
        let var = block.args[0].clone();

        let mut items: Vec<String> = Vec::new();
        for raw in &block.args[2..] {
            if let Some(name) = splat_name(raw) {
                // `${xs[*]}` contributes every element as its own iteration.
                if let Some(value) = self.env.get(name) {
                    items.extend(value.items().iter().cloned());
                }
            } else {
                items.push(self.expand_literal(raw)?);
            }
        }

        'iterations: for item in items {
            self.env.set(var.clone(), Value::single(item));
            for stmt in &block.body {
                let outcome = self.eval_stmt(stmt)?;
                match outcome.flow {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Outcome::status(outcome.status)),
                    Flow::Continue => continue 'iterations,
                    Flow::Return | Flow::Exit | Flow::Halt => return Ok(outcome),
                }
            }
        }
        Ok(Outcome::ok())
    }

    fn eval_while(&mut self, block: &Block) -> BoxResult<Outcome> {
        if block.args.is_empty() {
            return Err(self.located(BoxError::new("while: missing condition"), block.pos));
        }
        'iterations: loop {
            if self.eval_condition(&block.args, block.pos)? != 0 {
                break;
            }
            for stmt in &block.body {
                let outcome = self.eval_stmt(stmt)?;
                match outcome.flow {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Outcome::status(outcome.status)),
                    Flow::Continue => continue 'iterations,
                    Flow::Return | Flow::Exit | Flow::Halt => return Ok(outcome),
                }
            }
        }
        Ok(Outcome::ok())
    }

    /// Run a condition with fail-fast neutralized: a non-zero status picks a
    /// branch instead of halting. Hard errors still propagate.
    fn eval_condition(&mut self, args: &[String], pos: Pos) -> BoxResult<i32> {
        let cmd = Cmd {
            verb: args[0].clone(),
            args: args[1..].iter().map(|a| condition_expr(a)).collect(),
            redirects: Vec::new(),
            policy: ErrorPolicy::FailFast,
            pos,
        };
        let outcome = self.invoke_command(&cmd)?;
        Ok(outcome.status)
    }

    // ── pipelines ───────────────────────────────────────────────────

    fn eval_pipeline(&mut self, pipeline: &Pipeline) -> BoxResult<Outcome> {
        let n = pipeline.stages.len();
        if n == 1 {
            let outcome = self.eval_command(&pipeline.stages[0])?;
            self.env.set_status_list(&[outcome.status]);
            return Ok(outcome);
        }
        debug!(stages = n, "running pipeline");

        let mut codes: Vec<i32> = Vec::with_capacity(n);
        let mut saved_stdout: Option<OutputTarget> = None;
        let mut saved_stdin: Option<InputTarget> = None;
        let mut next_reader: Option<io::PipeReader> = None;
        let mut last = Outcome::ok();
        let mut failure: Option<BoxError> = None;

        for (i, stage) in pipeline.stages.iter().enumerate() {
            if let Some(reader) = next_reader.take() {
                let old = mem::replace(&mut self.streams.stdin, InputTarget::Pipe(reader));
                if i == 1 {
                    saved_stdin = Some(old);
                }
            }

            if i + 1 < n {
                match io::pipe() {
                    Ok((reader, writer)) => {
                        next_reader = Some(reader);
                        // Swapping in the new write end also drops the
                        // previous stage's, closing it before the next
                        // stage reads.
                        let old =
                            mem::replace(&mut self.streams.stdout, OutputTarget::Pipe(writer));
                        if i == 0 {
                            saved_stdout = Some(old);
                        }
                    }
                    Err(e) => {
                        failure = Some(self.located(
                            BoxError::new(format!("pipeline: cannot create pipe: {e}")),
                            pipeline.pos,
                        ));
                        break;
                    }
                }
            } else if let Some(original) = saved_stdout.take() {
                let _closed = mem::replace(&mut self.streams.stdout, original);
            }

            match self.eval_command(stage) {
                Ok(outcome) => {
                    codes.push(outcome.status);
                    last = outcome;
                }
                Err(e) => {
                    codes.push(1);
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(original) = saved_stdout.take() {
            let _closed = mem::replace(&mut self.streams.stdout, original);
        }
        if let Some(original) = saved_stdin.take() {
            let _closed = mem::replace(&mut self.streams.stdin, original);
        }
        drop(next_reader);

        self.env.set_status_list(&codes);
        match failure {
            Some(e) => Err(e),
            None => Ok(last),
        }
    }

    // ── redirections ────────────────────────────────────────────────

    fn apply_redirects(&mut self, cmd: &Cmd) -> BoxResult<RedirectGuard> {
        let mut guard = RedirectGuard {
            stdout: None,
            stderr: None,
        };
        for redirect in &cmd.redirects {
            let target = match self.expand_literal(&redirect.target) {
                Ok(t) => t,
                Err(e) => {
                    self.restore_redirects(guard);
                    return Err(e);
                }
            };
            let file = match redirect.kind {
                RedirectKind::Stdout | RedirectKind::Stderr => std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&target),
                RedirectKind::StdoutAppend => std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&target),
            };
            let file = match file {
                Ok(f) => f,
                Err(e) => {
                    self.restore_redirects(guard);
                    return Err(self.located(
                        BoxError::new(format!(
                            "redirect {} {target}: {e}",
                            redirect.kind.symbol()
                        )),
                        cmd.pos,
                    ));
                }
            };
            match redirect.kind {
                RedirectKind::Stdout | RedirectKind::StdoutAppend => {
                    let old = mem::replace(&mut self.streams.stdout, OutputTarget::File(file));
                    if guard.stdout.is_none() {
                        guard.stdout = Some(old);
                    }
                }
                RedirectKind::Stderr => {
                    let old = mem::replace(&mut self.streams.stderr, OutputTarget::File(file));
                    if guard.stderr.is_none() {
                        guard.stderr = Some(old);
                    }
                }
            }
        }
        Ok(guard)
    }

    fn restore_redirects(&mut self, guard: RedirectGuard) {
        if let Some(target) = guard.stdout {
            self.streams.stdout = target;
        }
        if let Some(target) = guard.stderr {
            self.streams.stderr = target;
        }
    }

    // ── expression evaluation ───────────────────────────────────────

    fn eval_expr(&mut self, expr: &Expr) -> BoxResult<Value> {
        match expr {
            Expr::Literal(text) => Ok(Value::single(self.expand_literal(text)?)),
            Expr::RawLiteral(text) => Ok(Value::single(text.clone())),
            Expr::Variable { name, index } => {
                let value = self.env.get(name).cloned().ok_or_else(|| {
                    BoxError::new(format!("undefined variable: {name}")).with_help(format!(
                        "check the spelling, or define it with 'set {name} value'"
                    ))
                })?;
                Ok(match index {
                    None => Value::single(value.first()),
                    Some(Index::Splat) => value,
                    Some(Index::At(i)) => match value.get(*i) {
                        Some(item) => Value::single(item),
                        None => Value::empty(),
                    },
                })
            }
            Expr::HeaderLookup { path } => self.header_lookup(path),
            Expr::CommandSub { source } => self.command_substitution(source),
        }
    }

    fn header_lookup(&self, path: &str) -> BoxResult<Value> {
        let parts: Vec<&str> = path.split('.').collect();
        let found = match parts.as_slice() {
            [block, field] => self.data_lookup(block, field),
            [ns, block, field] => self.env.data_field(&format!("{ns}.{block}"), field),
            _ => None,
        };
        found.cloned().ok_or_else(|| {
            BoxError::new(format!("undefined header field: {path}"))
                .with_help("declare the field in a [data] block before using it")
        })
    }

    /// Unqualified data lookups inside an imported function see that
    /// import's own blocks first.
    fn data_lookup(&self, block: &str, field: &str) -> Option<&Value> {
        if let Some(ns) = self.env.namespace() {
            if let Some(value) = self.env.data_field(&format!("{ns}.{block}"), field) {
                return Some(value);
            }
        }
        self.env.data_field(block, field)
    }

    // ── three-pass literal expansion ────────────────────────────────

    fn expand_literal(&mut self, text: &str) -> BoxResult<String> {
        let after_subs = self.expand_command_subs(text)?;
        let after_braced = self.expand_braced(&after_subs);
        Ok(self.expand_plain(&after_braced))
    }

    /// Pass 1: `$(…)` (parentheses nest) becomes the string coercion of the
    /// captured output.
    fn expand_command_subs(&mut self, text: &str) -> BoxResult<String> {
        if !text.contains("$(") {
            return Ok(text.to_string());
        }
        let bytes = text.as_bytes();
        let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'(') {
                let mut depth = 1usize;
                let mut j = i + 2;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if depth == 0 {
                    let value = self.command_substitution(&text[i + 2..j])?;
                    out.extend_from_slice(value.first().as_bytes());
                    i = j + 1;
                    continue;
                }
                // Unbalanced: keep the rest literally.
                out.extend_from_slice(&bytes[i..]);
                break;
            }
            out.push(bytes[i]);
            i += 1;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Pass 2: `${…}` — indexed variables, dotted data lookups, or plain
    /// names. Missing names expand to the empty string here.
    fn expand_braced(&mut self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        let bytes = text.as_bytes();
        let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
                if let Some(close) = text[i + 2..].find('}') {
                    let inner = &text[i + 2..i + 2 + close];
                    out.extend_from_slice(self.braced_value(inner).as_bytes());
                    i = i + 2 + close + 1;
                    continue;
                }
                out.extend_from_slice(&bytes[i..]);
                break;
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn braced_value(&self, inner: &str) -> String {
        if let (Some(open), Some(close)) = (inner.find('['), inner.rfind(']')) {
            if open < close {
                let name = &inner[..open];
                let idx = &inner[open + 1..close];
                let Some(value) = self.env.get(name) else {
                    return String::new();
                };
                if idx == "*" {
                    return value.join(" ");
                }
                if let Ok(n) = idx.parse::<usize>() {
                    return value.get(n).unwrap_or("").to_string();
                }
                return String::new();
            }
        }
        // ${name%suffix} / ${name#prefix} — literal affix stripping, so
        // `${f%.c}.o` turns main.c into main.o.
        if let Some((name, suffix)) = inner.split_once('%') {
            if is_identifier(name) {
                let v = self.env.get(name).map(|v| v.first()).unwrap_or("");
                return v.strip_suffix(suffix).unwrap_or(v).to_string();
            }
        }
        if let Some((name, prefix)) = inner.split_once('#') {
            if is_identifier(name) {
                let v = self.env.get(name).map(|v| v.first()).unwrap_or("");
                return v.strip_prefix(prefix).unwrap_or(v).to_string();
            }
        }
        if inner.contains('.') {
            let parts: Vec<&str> = inner.split('.').collect();
            let found = match parts.as_slice() {
                [block, field] => self.data_lookup(block, field),
                [ns, block, field] => self.env.data_field(&format!("{ns}.{block}"), field),
                _ => None,
            };
            return found.map(|v| v.first().to_string()).unwrap_or_default();
        }
        self.env
            .get(inner)
            .map(|v| v.first().to_string())
            .unwrap_or_default()
    }

    /// Pass 3: `$name` / `$<digits>` become string coercions; a `$` not
    /// followed by an identifier stays literal.
    fn expand_plain(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        let bytes = text.as_bytes();
        let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                if j > i + 1 {
                    if let Some(value) = self.env.get(&text[i + 1..j]) {
                        out.extend_from_slice(value.first().as_bytes());
                    }
                    i = j;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    // ── command substitution ────────────────────────────────────────

    /// Parse and run `source` as a mini-program, capturing its stdout.
    /// Output is trimmed of trailing newlines and split at the rest into a
    /// list value.
    fn command_substitution(&mut self, source: &str) -> BoxResult<Value> {
        debug!(bytes = source.len(), "command substitution");
        let program = parser::parse_source(source, "command-substitution").map_err(|e| {
            if e.code.is_none() {
                e.with_code(source)
            } else {
                e
            }
        })?;
        let Some(main) = program.main_block() else {
            return Ok(Value::single(""));
        };

        let (mut reader, writer) = io::pipe()?;
        self.env.push_capture();
        let saved = mem::replace(&mut self.streams.stdout, OutputTarget::Pipe(writer));

        // Drain on a helper thread: a sub-program writing more than the
        // pipe buffer holds would otherwise deadlock.
        let drainer = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        });

        let result = self.eval_body(&main.body);

        let writer = mem::replace(&mut self.streams.stdout, saved);
        drop(writer);
        let buf = drainer.join().unwrap_or_default();
        self.env.pop();
        result?;

        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim_end_matches('\n');
        if trimmed.is_empty() {
            return Ok(Value::single(""));
        }
        Ok(trimmed.split('\n').map(str::to_string).collect())
    }

    fn located(&self, e: BoxError, pos: Pos) -> BoxError {
        if e.location.is_none() {
            e.at(Location::new(&self.filename, pos))
        } else {
            e
        }
    }
}

/// `$name` header words rebuild as variable references so undefined
/// variables in conditions still raise; everything else re-expands as a
/// literal.
fn condition_expr(raw: &str) -> Expr {
    if let Some(name) = raw.strip_prefix('$') {
        if !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Expr::Variable {
                name: name.to_string(),
                index: None,
            };
        }
    }
    Expr::Literal(raw.to_string())
}

/// `${name[*]}`, exactly — the one loop-item form that splices a whole list.
fn splat_name(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
    let name = inner.strip_suffix("[*]")?;
    is_identifier(name).then_some(name)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_status(source: &str) -> i32 {
        let program = parser::parse_source(source, "test.box").expect("parse failed");
        let mut evaluator = Evaluator::new(&program, "test.box");
        evaluator.run(&[]).expect("run failed")
    }

    #[test]
    fn expand_plain_variables() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        ev.env.set("name", Value::single("world"));
        assert_eq!(ev.expand_literal("hi $name!").unwrap(), "hi world!");
        assert_eq!(ev.expand_literal("$missing").unwrap(), "");
        assert_eq!(ev.expand_literal("just $ money").unwrap(), "just $ money");
    }

    #[test]
    fn expand_braced_index_and_splat() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        ev.env.set(
            "xs",
            Value::new(vec!["1".into(), "2".into(), "3".into()]),
        );
        assert_eq!(ev.expand_literal("${xs[*]}").unwrap(), "1 2 3");
        assert_eq!(ev.expand_literal("${xs[1]}").unwrap(), "2");
        assert_eq!(ev.expand_literal("${xs[9]}").unwrap(), "");
        assert_eq!(ev.expand_literal("${xs[bad]}").unwrap(), "");
    }

    #[test]
    fn expand_affix_stripping() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        ev.env.set("f", Value::single("src/main.c"));
        assert_eq!(ev.expand_literal("${f%.c}.o").unwrap(), "src/main.o");
        assert_eq!(ev.expand_literal("${f#src/}").unwrap(), "main.c");
        // Affixes that do not match leave the value alone.
        assert_eq!(ev.expand_literal("${f%.rs}").unwrap(), "src/main.c");
    }

    #[test]
    fn expand_data_lookup() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        ev.env
            .set_data_field("config", "name", Value::single("app"));
        assert_eq!(ev.expand_literal("${config.name}").unwrap(), "app");
        assert_eq!(ev.expand_literal("${config.missing}").unwrap(), "");
    }

    #[test]
    fn substitution_captures_output_as_lines() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        let value = ev.command_substitution("echo one\necho two").unwrap();
        assert_eq!(value.items(), ["one", "two"]);
    }

    #[test]
    fn substitution_inside_literal_uses_first_line() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        let s = ev.expand_literal("got $(echo a\necho b) here").unwrap();
        assert_eq!(s, "got a here");
    }

    #[test]
    fn substitution_writes_are_discarded() {
        let program = Program::default();
        let mut ev = Evaluator::new(&program, "test.box");
        ev.env.set("x", Value::single("outer"));
        ev.command_substitution("set x inner\necho $x").unwrap();
        assert_eq!(ev.env.get("x").unwrap().first(), "outer");
    }

    #[test]
    fn undefined_variable_in_argument_is_an_error() {
        let program = parser::parse_source("[main]\nlen $nope\nend", "test.box").unwrap();
        let mut ev = Evaluator::new(&program, "test.box");
        let err = ev.run(&[]).unwrap_err();
        assert!(err.message.contains("undefined variable"));
    }

    #[test]
    fn fail_fast_halts_with_status() {
        assert_eq!(run_status("[main]\nexists \"/box-no-such-path\"\nend"), 1);
    }

    #[test]
    fn ignore_policy_swallows_failure() {
        assert_eq!(run_status("[main]\nexists \"/box-no-such-path\" ?\nend"), 0);
    }

    #[test]
    fn exit_sets_controlled_status() {
        assert_eq!(run_status("[main]\nexit 7\necho unreachable\nend"), 7);
    }

    #[test]
    fn condition_expr_classification() {
        assert_eq!(
            condition_expr("$x"),
            Expr::Variable {
                name: "x".into(),
                index: None
            }
        );
        assert_eq!(condition_expr("plain"), Expr::Literal("plain".into()));
        assert_eq!(condition_expr("${x[*]}"), Expr::Literal("${x[*]}".into()));
    }

    #[test]
    fn splat_name_detection() {
        assert_eq!(splat_name("${files[*]}"), Some("files"));
        assert_eq!(splat_name("${files[0]}"), None);
        assert_eq!(splat_name("$files"), None);
    }
}
