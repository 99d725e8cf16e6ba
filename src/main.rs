//! Box command-line driver: run a script, or dump its tokens or parse tree.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use boxlang::ast::{Block, BlockKind, Cmd, ErrorPolicy, Stmt};
use boxlang::eval::Evaluator;
use boxlang::lexer::{Lexer, TokenKind};
use boxlang::parser;

#[derive(Parser)]
#[command(name = "box")]
#[command(about = "A deterministic scripting language for builds and automation")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Mode>,

    /// Box script to execute
    script: Option<PathBuf>,

    /// Arguments passed to the script (accessible as $1…$N and argv)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Mode {
    /// Dump the token stream for a script
    Lex { script: PathBuf },
    /// Dump the parsed program tree
    Ast { script: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match &cli.command {
        Some(Mode::Lex { script }) => lex_dump(script),
        Some(Mode::Ast { script }) => ast_dump(script),
        None => match &cli.script {
            Some(script) => run_script(script, &cli.args),
            None => {
                eprintln!("usage: box <script.box> [args…]");
                eprintln!("       box lex <script.box>");
                eprintln!("       box ast <script.box>");
                1
            }
        },
    };
    std::process::exit(code);
}

fn read_source(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("box: cannot read {}: {e}", path.display());
        1
    })
}

fn run_script(path: &Path, args: &[String]) -> i32 {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy();
    let program = match parser::parse_source(&source, &filename) {
        Ok(p) => p,
        Err(e) => {
            eprint!("{}", e.render());
            return 1;
        }
    };
    let mut evaluator = Evaluator::new(&program, filename.as_ref());
    match evaluator.run(args) {
        Ok(status) => status,
        Err(e) => {
            eprint!("{}", e.render());
            1
        }
    }
}

fn lex_dump(path: &Path) -> i32 {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let tokens = Lexer::new(&source).tokenize();
    println!("{:<5} {:<4} {:<13} value", "line", "col", "kind");
    for token in &tokens {
        if matches!(token.kind, TokenKind::Newline | TokenKind::Comment) {
            continue;
        }
        if token.kind == TokenKind::Eof {
            break;
        }
        println!(
            "{:<5} {:<4} {:<13} {}",
            token.pos.line,
            token.pos.col,
            format!("{:?}", token.kind),
            token.value
        );
    }
    0
}

fn ast_dump(path: &Path) -> i32 {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy();
    let program = match parser::parse_source(&source, &filename) {
        Ok(p) => p,
        Err(e) => {
            eprint!("{}", e.render());
            return 1;
        }
    };

    println!(
        "program: {} block(s), {} function(s), {} data block(s), {} import(s)",
        program.blocks.len(),
        program.functions.len(),
        program.data.len(),
        program.imports.len()
    );
    for import in &program.imports {
        println!("import {} as {}", import.path, import.namespace);
    }
    for block in &program.blocks {
        print_block(block, 0);
    }
    0
}

fn print_block(block: &Block, indent: usize) {
    let pad = "  ".repeat(indent);
    let modifiers = if block.modifiers.is_empty() {
        String::new()
    } else {
        format!(" {}", block.modifiers.join(" "))
    };
    let header = match block.kind {
        BlockKind::Main => "[main]".to_string(),
        BlockKind::Function => {
            let args = if block.args.is_empty() {
                String::new()
            } else {
                format!(" {}", block.args.join(" "))
            };
            format!("[fn{modifiers} {}{args}]", block.label)
        }
        BlockKind::Data => format!("[data {}]", block.label),
        BlockKind::Custom => {
            if block.args.is_empty() {
                block.label.clone()
            } else {
                format!("{} {}", block.label, block.args.join(" "))
            }
        }
    };
    println!("{pad}{header}");
    for stmt in &block.body {
        print_stmt(stmt, indent + 1);
    }
}

fn print_stmt(stmt: &Stmt, indent: usize) {
    let pad = "  ".repeat(indent);
    match stmt {
        Stmt::Cmd(cmd) => println!("{pad}{}", format_cmd(cmd)),
        Stmt::Pipeline(pipeline) => {
            println!("{pad}pipeline ({} stages)", pipeline.stages.len());
            for stage in &pipeline.stages {
                println!("{pad}  | {}", format_cmd(stage));
            }
        }
        Stmt::Block(block) => print_block(block, indent),
    }
}

fn format_cmd(cmd: &Cmd) -> String {
    let mut out = cmd.verb.clone();
    for arg in &cmd.args {
        out.push(' ');
        out.push_str(&arg.to_string());
    }
    for redirect in &cmd.redirects {
        out.push_str(&format!(" {} {}", redirect.kind.symbol(), redirect.target));
    }
    match &cmd.policy {
        ErrorPolicy::FailFast => {}
        ErrorPolicy::Ignore => out.push_str(" ?"),
        ErrorPolicy::FallbackThenContinue(fb) => out.push_str(&format!(" ? {}", format_cmd(fb))),
        ErrorPolicy::FallbackThenHalt(fb) => out.push_str(&format!(" ! {}", format_cmd(fb))),
    }
    out
}
