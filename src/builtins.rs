//! Box built-in verbs.
//!
//! A fixed, case-sensitive table from verb name to implementation. Each verb
//! validates its own arity, performs its effect against the scope and the
//! current streams, and reports its result either as the exit status or as a
//! scope variable named `_<verb>_result`.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{BoxError, BoxResult};
use crate::eval::{Flow, Outcome};
use crate::scope::Environment;
use crate::stream::{ProcessTable, Streams};
use crate::value::Value;

/// Everything a verb may touch: the scope chain, the current standard
/// streams, and the spawned-process table.
pub struct VerbCx<'a> {
    pub env: &'a mut Environment,
    pub streams: &'a mut Streams,
    pub procs: &'a ProcessTable,
}

// ── dispatch ────────────────────────────────────────────────────────

/// Invoke a builtin by name.
///
/// Returns `None` when the verb is unknown (the caller reports it), and
/// `Some(result)` otherwise.
pub fn dispatch(verb: &str, args: &[Value], cx: &mut VerbCx) -> Option<BoxResult<Outcome>> {
    let result = match verb {
        // Core
        "echo" => verb_echo(args, cx),
        "set" => verb_set(args, cx),
        "exit" => verb_exit(args, cx),
        "return" => verb_return(args, cx),

        // Filesystem
        "cd" => verb_cd(args),
        "copy" => verb_copy(args),
        "move" => verb_move(args),
        "delete" => verb_delete(args),
        "mkdir" => verb_mkdir(args),
        "touch" => verb_touch(args),
        "link" => verb_link(args),
        "exists" => verb_exists(args),
        "write" => verb_write(args),
        "mktemp" => verb_mktemp(args, cx),

        // Utility
        "len" => verb_len(args, cx),
        "glob" => verb_glob(args, cx),
        "match" => verb_match(args),
        "hash" => verb_hash(args, cx),
        "sleep" => verb_sleep(args),

        // I/O
        "env" => verb_env(args, cx),
        "prompt" => verb_prompt(args, cx),
        "cat" => verb_cat(args, cx),
        "join" => verb_join(args, cx),

        // Processes
        "run" => verb_run(args, cx),
        "spawn" => verb_spawn(args, cx),
        "wait" => verb_wait(args, cx),

        // Arithmetic
        "arith" => verb_arith(args, cx),

        // Network and archives
        "download" => verb_download(args),
        "tar" => verb_tar(args),
        "untar" => verb_untar(args),

        // Control flow
        "test" => verb_test(args),
        "break" => Ok(Outcome::with_flow(0, Flow::Break)),
        "continue" => Ok(Outcome::with_flow(0, Flow::Continue)),

        _ => return None,
    };
    Some(result)
}

// ── arity and conversion helpers ────────────────────────────────────

fn check_exact(name: &str, args: &[Value], n: usize) -> BoxResult<()> {
    if args.len() != n {
        return Err(BoxError::new(format!(
            "{name}: requires exactly {n} argument{}; got {}",
            if n == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn check_min(name: &str, args: &[Value], min: usize) -> BoxResult<()> {
    if args.len() < min {
        return Err(BoxError::new(format!(
            "{name}: requires at least {min} argument{}; got {}",
            if min == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn check_range(name: &str, args: &[Value], min: usize, max: usize) -> BoxResult<()> {
    if args.len() < min || args.len() > max {
        return Err(BoxError::new(format!(
            "{name}: requires {min} to {max} arguments; got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Every element of every argument, in order.
fn flatten(args: &[Value]) -> Vec<String> {
    args.iter()
        .flat_map(|v| v.items().iter().cloned())
        .collect()
}

fn to_decimal(name: &str, raw: &str) -> BoxResult<BigDecimal> {
    BigDecimal::from_str(raw.trim())
        .map_err(|_| BoxError::new(format!("{name}: invalid number: {raw}")))
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

// ── core verbs ──────────────────────────────────────────────────────

fn verb_echo(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    let mut line = flatten(args).join(" ");
    line.push('\n');
    cx.streams
        .write_stdout(line.as_bytes())
        .map_err(|e| BoxError::new(format!("echo: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_set(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_min("set", args, 1)?;
    let name = args[0].first().to_string();
    if name.is_empty() {
        return Err(BoxError::new("set: missing variable name"));
    }
    cx.env.set(name, Value::new(flatten(&args[1..])));
    Ok(Outcome::ok())
}

fn parse_status(args: &[Value]) -> i32 {
    args.first()
        .and_then(|v| v.first().trim().parse::<i32>().ok())
        .unwrap_or(0)
}

fn verb_exit(args: &[Value], _cx: &mut VerbCx) -> BoxResult<Outcome> {
    Ok(Outcome::with_flow(parse_status(args), Flow::Exit))
}

fn verb_return(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    let status = parse_status(args);
    cx.env.set_status(status);
    Ok(Outcome::with_flow(status, Flow::Return))
}

// ── filesystem verbs ────────────────────────────────────────────────

fn verb_cd(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("cd", args, 1)?;
    let dir = args[0].first();
    std::env::set_current_dir(dir).map_err(|e| BoxError::new(format!("cd: {dir}: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_copy(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("copy", args, 2)?;
    let (src, dst) = (args[0].first(), args[1].first());
    fs::copy(src, dst).map_err(|e| BoxError::new(format!("copy: {src}: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_move(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("move", args, 2)?;
    let (src, dst) = (args[0].first(), args[1].first());
    fs::rename(src, dst).map_err(|e| BoxError::new(format!("move: {src}: {e}")))?;
    Ok(Outcome::ok())
}

/// Recursive delete; a missing path is not an error.
fn verb_delete(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("delete", args, 1)?;
    let path = args[0].first();
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Outcome::ok()),
        Err(e) => Err(BoxError::new(format!("delete: {path}: {e}"))),
        Ok(meta) => {
            let result = if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            result.map_err(|e| BoxError::new(format!("delete: {path}: {e}")))?;
            Ok(Outcome::ok())
        }
    }
}

fn verb_mkdir(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("mkdir", args, 1)?;
    let path = args[0].first();
    fs::create_dir_all(path).map_err(|e| BoxError::new(format!("mkdir: {path}: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_touch(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("touch", args, 1)?;
    let path = args[0].first();
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BoxError::new(format!("touch: {path}: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_link(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("link", args, 2)?;
    let (target, link) = (args[0].first(), args[1].first());
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
            .map_err(|e| BoxError::new(format!("link: {link}: {e}")))?;
        Ok(Outcome::ok())
    }
    #[cfg(not(unix))]
    {
        let _ = (target, link);
        Err(BoxError::new(
            "link: symbolic links are not supported on this platform",
        ))
    }
}

fn verb_exists(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("exists", args, 1)?;
    if fs::metadata(args[0].first()).is_ok() {
        Ok(Outcome::ok())
    } else {
        Ok(Outcome::status(1))
    }
}

fn verb_write(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("write", args, 2)?;
    let (path, content) = (args[0].first(), args[1].first());
    fs::write(path, content).map_err(|e| BoxError::new(format!("write: {path}: {e}")))?;
    Ok(Outcome::ok())
}

fn verb_mktemp(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_range("mktemp", args, 0, 1)?;
    let pattern = args
        .first()
        .map(|v| v.first().to_string())
        .unwrap_or_else(|| "box".to_string());
    let dir = tempfile::Builder::new()
        .prefix(&pattern)
        .tempdir()
        .map_err(|e| BoxError::new(format!("mktemp: {e}")))?;
    let path = dir.keep();
    cx.env.set(
        "_mktemp_result",
        Value::single(path.to_string_lossy().into_owned()),
    );
    Ok(Outcome::ok())
}

// ── utility verbs ───────────────────────────────────────────────────

fn verb_len(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_exact("len", args, 1)?;
    cx.env
        .set("_len_result", Value::single(args[0].len().to_string()));
    Ok(Outcome::ok())
}

fn verb_glob(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_exact("glob", args, 1)?;
    let pattern = args[0].first();
    let paths = glob::glob(pattern).map_err(|e| BoxError::new(format!("glob: {e}")))?;
    let matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    cx.env.set("_glob_result", Value::new(matches));
    Ok(Outcome::ok())
}

/// Status 0 when the item matches any pattern.
fn verb_match(args: &[Value]) -> BoxResult<Outcome> {
    check_min("match", args, 2)?;
    let text = args[0].first();
    for pat in &args[1..] {
        let pattern = glob::Pattern::new(pat.first())
            .map_err(|e| BoxError::new(format!("match: {e}")))?;
        if pattern.matches(text) {
            return Ok(Outcome::ok());
        }
    }
    Ok(Outcome::status(1))
}

/// SHA-256 of a regular file's bytes, or of the literal string.
fn verb_hash(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_exact("hash", args, 1)?;
    let target = args[0].first();
    let digest = match fs::metadata(target) {
        Ok(meta) if meta.is_file() => {
            let mut file =
                File::open(target).map_err(|e| BoxError::new(format!("hash: {target}: {e}")))?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)
                .map_err(|e| BoxError::new(format!("hash: {target}: {e}")))?;
            hasher.finalize()
        }
        _ => Sha256::digest(target.as_bytes()),
    };
    cx.env
        .set("_hash_result", Value::single(hex_digest(&digest)));
    Ok(Outcome::ok())
}

fn verb_sleep(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("sleep", args, 1)?;
    let raw = args[0].first().trim();
    let seconds: f64 = raw
        .parse()
        .map_err(|_| BoxError::new(format!("sleep: invalid duration '{raw}'")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(BoxError::new(
            "sleep: duration must be a non-negative number of seconds",
        ));
    }
    thread::sleep(Duration::from_secs_f64(seconds));
    Ok(Outcome::ok())
}

// ── I/O verbs ───────────────────────────────────────────────────────

fn verb_env(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    match args.len() {
        0 => {
            let vars: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
            cx.env.set("_env_result", Value::new(vars));
            Ok(Outcome::ok())
        }
        1 => {
            let value = std::env::var(args[0].first()).unwrap_or_default();
            cx.env.set("_env_result", Value::single(value));
            Ok(Outcome::ok())
        }
        2 => {
            let key = args[0].first();
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(BoxError::new(format!("env: invalid variable name '{key}'")));
            }
            // Process-wide mutation; the interpreter is single-threaded and
            // the pipe drainer threads never read the environment.
            unsafe { std::env::set_var(key, args[1].first()) };
            Ok(Outcome::ok())
        }
        _ => Err(BoxError::new("env: requires 0, 1, or 2 arguments")),
    }
}

/// Print the optional message, read one line, bind `reply` and
/// `_prompt_result`. Status 1 at end of input.
fn verb_prompt(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_range("prompt", args, 0, 1)?;
    if let Some(msg) = args.first() {
        cx.streams
            .write_stdout(msg.first().as_bytes())
            .map_err(|e| BoxError::new(format!("prompt: {e}")))?;
    }
    match cx
        .streams
        .read_stdin_line()
        .map_err(|e| BoxError::new(format!("prompt: {e}")))?
    {
        Some(line) => {
            cx.env.set("reply", Value::single(line.clone()));
            cx.env.set("_prompt_result", Value::single(line));
            Ok(Outcome::ok())
        }
        None => Ok(Outcome::status(1)),
    }
}

/// Write the named files to stdout; with no arguments, copy stdin through.
fn verb_cat(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    if args.is_empty() {
        let text = cx
            .streams
            .read_stdin_to_string()
            .map_err(|e| BoxError::new(format!("cat: {e}")))?;
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            out.push_str(line);
            out.push('\n');
        }
        cx.streams
            .write_stdout(out.as_bytes())
            .map_err(|e| BoxError::new(format!("cat: {e}")))?;
        return Ok(Outcome::ok());
    }
    for path in flatten(args) {
        let bytes =
            fs::read(&path).map_err(|e| BoxError::new(format!("cat: {path}: {e}")))?;
        cx.streams
            .write_stdout(&bytes)
            .map_err(|e| BoxError::new(format!("cat: {path}: {e}")))?;
    }
    Ok(Outcome::ok())
}

/// Joined value goes both to stdout and to `_join_result`, so it composes
/// with substitution and with plain variable use.
fn verb_join(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_min("join", args, 2)?;
    let sep = args[0].first();
    let joined = flatten(&args[1..]).join(sep);
    cx.streams
        .write_stdout(joined.as_bytes())
        .map_err(|e| BoxError::new(format!("join: {e}")))?;
    cx.env.set("_join_result", Value::single(joined));
    Ok(Outcome::ok())
}

// ── process verbs ───────────────────────────────────────────────────

/// Run an external command wired to the interpreter's current streams and
/// wait for it; the exit code becomes the status.
fn verb_run(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_min("run", args, 1)?;
    let name = args[0].first();
    let rest = flatten(&args[1..]);
    debug!(command = %name, "run");
    let status = Command::new(name)
        .args(&rest)
        .stdin(stdio(cx.streams.stdin_stdio(), "run")?)
        .stdout(stdio(cx.streams.stdout_stdio(), "run")?)
        .stderr(stdio(cx.streams.stderr_stdio(), "run")?)
        .status()
        .map_err(|e| BoxError::new(format!("run: {name}: {e}")))?;
    Ok(Outcome::status(status.code().unwrap_or(1)))
}

/// Start a detached child; the PID is the status, and the child stays in
/// the process table until `wait` reaps it.
fn verb_spawn(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_min("spawn", args, 1)?;
    let name = args[0].first();
    let rest = flatten(&args[1..]);
    let child = Command::new(name)
        .args(&rest)
        .stdin(stdio(cx.streams.stdin_stdio(), "spawn")?)
        .stdout(stdio(cx.streams.stdout_stdio(), "spawn")?)
        .stderr(stdio(cx.streams.stderr_stdio(), "spawn")?)
        .spawn()
        .map_err(|e| BoxError::new(format!("spawn: {name}: {e}")))?;
    let pid = cx.procs.register(child);
    debug!(pid, command = %name, "spawned child");
    Ok(Outcome::status(i32::try_from(pid).unwrap_or(i32::MAX)))
}

fn verb_wait(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_exact("wait", args, 1)?;
    let pid: u32 = args[0]
        .first()
        .trim()
        .parse()
        .map_err(|_| BoxError::new("wait: invalid PID"))?;
    let mut child = cx.procs.take(pid)?;
    let status = child
        .wait()
        .map_err(|e| BoxError::new(format!("wait: {e}")))?;
    debug!(pid, "reaped child");
    Ok(Outcome::status(status.code().unwrap_or(1)))
}

fn stdio(handle: io::Result<std::process::Stdio>, name: &str) -> BoxResult<std::process::Stdio> {
    handle.map_err(|e| BoxError::new(format!("{name}: {e}")))
}

// ── arithmetic ──────────────────────────────────────────────────────

/// Decimal arithmetic over string operands. Integer results stay integers;
/// comparisons yield "1"/"0".
fn verb_arith(args: &[Value], cx: &mut VerbCx) -> BoxResult<Outcome> {
    check_exact("arith", args, 3)?;
    let a = to_decimal("arith", args[0].first())?;
    let op = args[1].first();
    let b = to_decimal("arith", args[2].first())?;

    let result = match op {
        "+" => format_decimal(&(&a + &b)),
        "-" => format_decimal(&(&a - &b)),
        "*" => format_decimal(&(&a * &b)),
        "/" => {
            if b.is_zero() {
                return Err(BoxError::new("arith: division by zero"));
            }
            format_decimal(&(&a / &b))
        }
        "%" => {
            if b.is_zero() {
                return Err(BoxError::new("arith: modulo by zero"));
            }
            // Truncating remainder: a - (a ÷ b) * b.
            let quotient = trunc_div(&a, &b);
            format_decimal(&(&a - &quotient * &b))
        }
        "**" => format_decimal(&pow_decimal(&a, &b)?),
        "==" => bool_str(a == b),
        "!=" => bool_str(a != b),
        "<" => bool_str(a < b),
        ">" => bool_str(a > b),
        "<=" => bool_str(a <= b),
        ">=" => bool_str(a >= b),
        other => return Err(BoxError::new(format!("arith: unknown operator: {other}"))),
    };

    cx.env.set("_arith_result", Value::single(result));
    Ok(Outcome::ok())
}

fn bool_str(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

/// Divide and truncate toward zero.
fn trunc_div(a: &BigDecimal, b: &BigDecimal) -> BigDecimal {
    (a / b).with_scale_round(0, RoundingMode::Down)
}

fn pow_decimal(base: &BigDecimal, exponent: &BigDecimal) -> BoxResult<BigDecimal> {
    if !exponent.is_integer() {
        return Err(BoxError::new("arith: exponent must be a whole number"));
    }
    let exp: i64 = exponent
        .normalized()
        .to_string()
        .parse()
        .map_err(|_| BoxError::new("arith: exponent too large"))?;
    if exp.abs() > 100_000 {
        return Err(BoxError::new("arith: exponent exceeds limits"));
    }
    if exp == 0 {
        return Ok(BigDecimal::from(1));
    }
    if exp < 0 {
        if base.is_zero() {
            return Err(BoxError::new("arith: zero raised to a negative power"));
        }
        return Ok(BigDecimal::from(1) / pow_decimal(base, &BigDecimal::from(-exp))?);
    }
    // Exponentiation by squaring.
    let mut result = BigDecimal::from(1);
    let mut b = base.clone();
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result *= &b;
        }
        b = &b * &b;
        e >>= 1;
    }
    Ok(result)
}

/// Plain decimal rendering with trailing zeros stripped.
fn format_decimal(d: &BigDecimal) -> String {
    let s = d.normalized().to_string();
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

// ── network and archive verbs ───────────────────────────────────────

fn verb_download(args: &[Value]) -> BoxResult<Outcome> {
    check_range("download", args, 2, 3)?;
    let url = args[0].first();
    let dest = args[1].first();
    let expected = args.get(2).map(|v| v.first().to_string());

    if let Some(parent) = Path::new(dest).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                BoxError::new(format!("download: cannot create {}: {e}", parent.display()))
            })?;
        }
    }

    let response = ureq::get(url)
        .call()
        .map_err(|e| BoxError::new(format!("download: failed to fetch {url}: {e}")))?;
    let mut reader = response.into_reader();
    let mut out =
        File::create(dest).map_err(|e| BoxError::new(format!("download: {dest}: {e}")))?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| BoxError::new(format!("download: {url}: {e}")))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .map_err(|e| BoxError::new(format!("download: {dest}: {e}")))?;
        if expected.is_some() {
            hasher.update(&buf[..n]);
        }
    }
    drop(out);

    if let Some(expected) = expected {
        let actual = hex_digest(&hasher.finalize());
        if actual != expected {
            let _ = fs::remove_file(dest);
            return Err(BoxError::new(format!("download: hash mismatch for {dest}"))
                .with_help(format!("expected {expected}, got {actual}")));
        }
    }
    Ok(Outcome::ok())
}

/// Compression is chosen by the archive suffix: `.gz`/`.tgz` for gzip,
/// `.zst`/`.tzst` for zstd, anything else plain tar.
fn verb_tar(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("tar", args, 2)?;
    let src = args[0].first();
    let dest = args[1].first();

    let file = File::create(dest).map_err(|e| BoxError::new(format!("tar: {dest}: {e}")))?;
    let writer: Box<dyn Write> = if dest.ends_with(".gz") || dest.ends_with(".tgz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else if dest.ends_with(".zst") || dest.ends_with(".tzst") {
        Box::new(
            zstd::Encoder::new(file, 0)
                .map_err(|e| BoxError::new(format!("tar: {e}")))?
                .auto_finish(),
        )
    } else {
        Box::new(file)
    };

    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    let is_file = fs::metadata(src).map(|m| m.is_file()).unwrap_or(false);
    if is_file {
        let name = Path::new(src)
            .file_name()
            .ok_or_else(|| BoxError::new(format!("tar: invalid source '{src}'")))?;
        builder
            .append_path_with_name(src, name)
            .map_err(|e| BoxError::new(format!("tar: {src}: {e}")))?;
    } else {
        builder
            .append_dir_all(".", src)
            .map_err(|e| BoxError::new(format!("tar: {src}: {e}")))?;
    }
    let writer = builder
        .into_inner()
        .map_err(|e| BoxError::new(format!("tar: {e}")))?;
    drop(writer); // finishes the compression stream
    Ok(Outcome::ok())
}

fn verb_untar(args: &[Value]) -> BoxResult<Outcome> {
    check_exact("untar", args, 2)?;
    let archive = args[0].first();
    let dest = args[1].first();

    let file = File::open(archive).map_err(|e| BoxError::new(format!("untar: {archive}: {e}")))?;
    let reader: Box<dyn Read> = if archive.ends_with(".gz") || archive.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else if archive.ends_with(".zst") || archive.ends_with(".tzst") {
        Box::new(zstd::Decoder::new(file).map_err(|e| BoxError::new(format!("untar: {e}")))?)
    } else {
        Box::new(file)
    };

    fs::create_dir_all(dest).map_err(|e| BoxError::new(format!("untar: {dest}: {e}")))?;
    let mut archive_reader = tar::Archive::new(reader);
    archive_reader
        .unpack(dest)
        .map_err(|e| BoxError::new(format!("untar: {e}")))?;
    Ok(Outcome::ok())
}

// ── condition helper ────────────────────────────────────────────────

/// Status 0 for a non-empty first argument.
fn verb_test(args: &[Value]) -> BoxResult<Outcome> {
    if args.is_empty() || args[0].first().is_empty() {
        return Ok(Outcome::status(1));
    }
    Ok(Outcome::ok())
}
