//! Box lexer — byte buffer to a stream of positioned tokens.
//!
//! Lexing is total: any byte sequence produces a finite token stream ending
//! with `Eof`. Malformed quoting is not an error here — an unterminated
//! quote marks its token and the parser reports it. One `Newline` token is
//! kept per physical line boundary so the parser can enforce the
//! one-line-one-command rule.

use crate::error::Pos;

/// Token kinds. `Word` is the catch-all: any run of bytes that is not
/// whitespace and not one of the reserved characters `| > ? # ' " $ [ ]` `` ` ``.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    SingleQuote,
    DoubleQuote,
    CommandSub,
    Variable,
    HeaderLookup,
    Redirect,
    Pipeline,
    IgnoreError,
    HeaderStart,
    BlockEnd,
    Comment,
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: Pos,
    /// Byte span in the source; adjacent spans mean no whitespace between
    /// tokens, which the parser uses to build composite arguments.
    pub start: usize,
    pub end: usize,
    /// The closing delimiter was missing when input ran out.
    pub unterminated: bool,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, pos: Pos, start: usize, end: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            pos,
            start,
            end,
            unterminated: false,
        }
    }
}

pub struct Lexer {
    bytes: Vec<u8>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            bytes: source.as_bytes().to_vec(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Lex the whole input. The returned stream always ends with `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    // ── cursor helpers ──────────────────────────────────────────────

    fn cur(&self) -> u8 {
        self.bytes.get(self.pos).copied().unwrap_or(0)
    }

    fn peek(&self) -> u8 {
        self.bytes.get(self.pos + 1).copied().unwrap_or(0)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn advance(&mut self) {
        if self.cur() == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
    }

    fn slice(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.bytes[start..end]).into_owned()
    }

    fn skip_blanks(&mut self) {
        while matches!(self.cur(), b' ' | b'\t' | b'\r') {
            self.advance();
        }
    }

    // ── token readers ───────────────────────────────────────────────

    fn next_token(&mut self) -> Token {
        self.skip_blanks();

        let pos = Pos::new(self.line, self.col);
        let start = self.pos;

        match self.cur() {
            0 if self.at_end() => Token::new(TokenKind::Eof, "", pos, start, start),
            b'\n' => {
                self.advance();
                Token::new(TokenKind::Newline, "\n", pos, start, self.pos)
            }
            b'#' => {
                self.advance();
                let text_start = self.pos;
                while !self.at_end() && self.cur() != b'\n' {
                    self.advance();
                }
                let value = self.slice(text_start, self.pos);
                Token::new(TokenKind::Comment, value, pos, start, self.pos)
            }
            b'\'' => self.read_single_quote(pos, start),
            b'"' => self.read_double_quote(pos, start),
            b'`' => self.read_backtick(pos, start),
            b'$' => {
                if self.peek() == b'(' {
                    self.read_dollar_paren(pos, start)
                } else {
                    self.read_variable(pos, start)
                }
            }
            b'|' => {
                self.advance();
                Token::new(TokenKind::Pipeline, "|", pos, start, self.pos)
            }
            b'>' => {
                self.advance();
                if self.cur() == b'>' {
                    self.advance();
                    Token::new(TokenKind::Redirect, ">>", pos, start, self.pos)
                } else {
                    Token::new(TokenKind::Redirect, ">", pos, start, self.pos)
                }
            }
            b'2' if self.peek() == b'>' => {
                self.advance();
                self.advance();
                Token::new(TokenKind::Redirect, "2>", pos, start, self.pos)
            }
            b'?' => {
                self.advance();
                Token::new(TokenKind::IgnoreError, "?", pos, start, self.pos)
            }
            b'[' => {
                while !self.at_end() && self.cur() != b']' {
                    self.advance();
                }
                let mut unterminated = true;
                if self.cur() == b']' {
                    self.advance();
                    unterminated = false;
                }
                // Brackets stay in the value.
                let mut token = Token::new(
                    TokenKind::HeaderStart,
                    self.slice(start, self.pos),
                    pos,
                    start,
                    self.pos,
                );
                token.unterminated = unterminated;
                token
            }
            b']' => {
                self.advance();
                Token::new(TokenKind::Word, "]", pos, start, self.pos)
            }
            _ => {
                let value = self.read_word();
                let kind = if value == "end" {
                    TokenKind::BlockEnd
                } else {
                    TokenKind::Word
                };
                Token::new(kind, value, pos, start, self.pos)
            }
        }
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while !self.at_end()
            && !self.cur().is_ascii_whitespace()
            && !matches!(
                self.cur(),
                b'|' | b'>' | b'?' | b'#' | b'\'' | b'"' | b'$' | b'[' | b']' | b'`'
            )
        {
            self.advance();
        }
        self.slice(start, self.pos)
    }

    /// Single quotes delimit opaque bytes: no escapes, no later expansion.
    fn read_single_quote(&mut self, pos: Pos, start: usize) -> Token {
        self.advance();
        let text_start = self.pos;
        while !self.at_end() && self.cur() != b'\'' {
            self.advance();
        }
        let value = self.slice(text_start, self.pos);
        let mut unterminated = true;
        if self.cur() == b'\'' {
            self.advance();
            unterminated = false;
        }
        let mut token = Token::new(TokenKind::SingleQuote, value, pos, start, self.pos);
        token.unterminated = unterminated;
        token
    }

    /// Double quotes apply C-style escapes now; `$` sequences are kept
    /// verbatim for expansion at evaluation time. Unknown escapes are
    /// preserved as written.
    fn read_double_quote(&mut self, pos: Pos, start: usize) -> Token {
        self.advance();
        let mut value: Vec<u8> = Vec::new();
        while !self.at_end() && self.cur() != b'"' {
            if self.cur() == b'\\' {
                self.advance();
                match self.cur() {
                    b'n' => value.push(b'\n'),
                    b't' => value.push(b'\t'),
                    b'r' => value.push(b'\r'),
                    b'\\' => value.push(b'\\'),
                    b'"' => value.push(b'"'),
                    0 => break,
                    other => {
                        value.push(b'\\');
                        value.push(other);
                    }
                }
                self.advance();
            } else {
                value.push(self.cur());
                self.advance();
            }
        }
        let mut unterminated = true;
        if self.cur() == b'"' {
            self.advance();
            unterminated = false;
        }
        let mut token = Token::new(
            TokenKind::DoubleQuote,
            String::from_utf8_lossy(&value).into_owned(),
            pos,
            start,
            self.pos,
        );
        token.unterminated = unterminated;
        token
    }

    fn read_backtick(&mut self, pos: Pos, start: usize) -> Token {
        self.advance();
        let text_start = self.pos;
        while !self.at_end() && self.cur() != b'`' {
            self.advance();
        }
        let value = self.slice(text_start, self.pos);
        let mut unterminated = true;
        if self.cur() == b'`' {
            self.advance();
            unterminated = false;
        }
        let mut token = Token::new(TokenKind::CommandSub, value, pos, start, self.pos);
        token.unterminated = unterminated;
        token
    }

    /// `$( … )` with balanced nested parentheses.
    fn read_dollar_paren(&mut self, pos: Pos, start: usize) -> Token {
        self.advance(); // $
        self.advance(); // (
        let text_start = self.pos;
        let mut depth = 1usize;
        while !self.at_end() && depth > 0 {
            match self.cur() {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            if depth > 0 {
                self.advance();
            }
        }
        let value = self.slice(text_start, self.pos);
        let mut unterminated = true;
        if self.cur() == b')' {
            self.advance();
            unterminated = false;
        }
        let mut token = Token::new(TokenKind::CommandSub, value, pos, start, self.pos);
        token.unterminated = unterminated;
        token
    }

    /// `$name`, `$<digits>`, `$name[idx]`, `${…}`, and the dotted forms that
    /// lex as header lookups instead.
    fn read_variable(&mut self, pos: Pos, start: usize) -> Token {
        self.advance(); // $

        if self.cur() == b'{' {
            self.advance();
            let text_start = self.pos;
            while !self.at_end() && self.cur() != b'}' {
                self.advance();
            }
            let value = self.slice(text_start, self.pos);
            let mut unterminated = true;
            if self.cur() == b'}' {
                self.advance();
                unterminated = false;
            }
            // A dotted path (with no index brackets and no affix-stripping
            // operator) is a header lookup.
            let kind = if value.contains('.')
                && !value.contains('[')
                && !value.contains('%')
                && !value.contains('#')
            {
                TokenKind::HeaderLookup
            } else {
                TokenKind::Variable
            };
            let mut token = Token::new(kind, value, pos, start, self.pos);
            token.unterminated = unterminated;
            return token;
        }

        let name_start = self.pos;
        while self.cur().is_ascii_alphanumeric() || self.cur() == b'_' {
            self.advance();
        }
        if self.pos == name_start {
            // Lone `$` is just a word.
            return Token::new(TokenKind::Word, "$", pos, start, self.pos);
        }

        if self.cur() == b'[' {
            while !self.at_end() && self.cur() != b']' {
                self.advance();
            }
            let mut unterminated = true;
            if self.cur() == b']' {
                self.advance();
                unterminated = false;
            }
            let mut token = Token::new(
                TokenKind::Variable,
                self.slice(name_start, self.pos),
                pos,
                start,
                self.pos,
            );
            token.unterminated = unterminated;
            return token;
        }

        // Bare dotted form `$a.b.c` lexes as a header lookup.
        if self.cur() == b'.' && (self.peek().is_ascii_alphabetic() || self.peek() == b'_') {
            while self.cur() == b'.' && (self.peek().is_ascii_alphabetic() || self.peek() == b'_') {
                self.advance(); // .
                while self.cur().is_ascii_alphanumeric() || self.cur() == b'_' {
                    self.advance();
                }
            }
            return Token::new(
                TokenKind::HeaderLookup,
                self.slice(name_start, self.pos),
                pos,
                start,
                self.pos,
            );
        }

        Token::new(
            TokenKind::Variable,
            self.slice(name_start, self.pos),
            pos,
            start,
            self.pos,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source).tokenize().iter().map(|t| t.kind).collect()
    }

    fn tokens(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize()
    }

    #[test]
    fn simple_words() {
        assert_eq!(
            kinds("echo hello world"),
            vec![
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn quoted_strings() {
        let toks = tokens(r#"echo "hello world" 'raw string'"#);
        assert_eq!(toks[1].kind, TokenKind::DoubleQuote);
        assert_eq!(toks[1].value, "hello world");
        assert_eq!(toks[2].kind, TokenKind::SingleQuote);
        assert_eq!(toks[2].value, "raw string");
    }

    #[test]
    fn double_quote_escapes() {
        let toks = tokens(r#""a\tb\n" "\z""#);
        assert_eq!(toks[0].value, "a\tb\n");
        assert_eq!(toks[1].value, "\\z");
    }

    #[test]
    fn dollar_preserved_in_double_quote() {
        let toks = tokens(r#""hi $name""#);
        assert_eq!(toks[0].value, "hi $name");
    }

    #[test]
    fn variables_and_header_lookups() {
        let toks = tokens("echo $var ${array[*]} ${config.field} $a.b.c");
        assert_eq!(toks[1].kind, TokenKind::Variable);
        assert_eq!(toks[1].value, "var");
        assert_eq!(toks[2].kind, TokenKind::Variable);
        assert_eq!(toks[2].value, "array[*]");
        assert_eq!(toks[3].kind, TokenKind::HeaderLookup);
        assert_eq!(toks[3].value, "config.field");
        assert_eq!(toks[4].kind, TokenKind::HeaderLookup);
        assert_eq!(toks[4].value, "a.b.c");
    }

    #[test]
    fn affix_forms_are_variables_not_lookups() {
        let toks = tokens("echo ${f%.c} ${f#src/}");
        assert_eq!(toks[1].kind, TokenKind::Variable);
        assert_eq!(toks[1].value, "f%.c");
        assert_eq!(toks[2].kind, TokenKind::Variable);
        assert_eq!(toks[2].value, "f#src/");
    }

    #[test]
    fn positional_variable() {
        let toks = tokens("echo $1");
        assert_eq!(toks[1].kind, TokenKind::Variable);
        assert_eq!(toks[1].value, "1");
    }

    #[test]
    fn bare_index_form() {
        let toks = tokens("echo $files[2]");
        assert_eq!(toks[1].kind, TokenKind::Variable);
        assert_eq!(toks[1].value, "files[2]");
    }

    #[test]
    fn redirects() {
        let toks = tokens("cmd > file >> log 2> errs");
        assert_eq!(toks[1].kind, TokenKind::Redirect);
        assert_eq!(toks[1].value, ">");
        assert_eq!(toks[3].kind, TokenKind::Redirect);
        assert_eq!(toks[3].value, ">>");
        assert_eq!(toks[5].kind, TokenKind::Redirect);
        assert_eq!(toks[5].value, "2>");
    }

    #[test]
    fn leading_two_is_a_word() {
        let toks = tokens("version 2.0 count 123");
        assert!(toks.iter().take(4).all(|t| t.kind == TokenKind::Word));
        assert_eq!(toks[1].value, "2.0");
    }

    #[test]
    fn error_suffix_tokens() {
        assert_eq!(
            kinds("cmd ? echo fallback"),
            vec![
                TokenKind::Word,
                TokenKind::IgnoreError,
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn block_tokens() {
        let toks = tokens("[main] echo hello end");
        assert_eq!(toks[0].kind, TokenKind::HeaderStart);
        assert_eq!(toks[0].value, "[main]");
        assert_eq!(toks[3].kind, TokenKind::BlockEnd);
    }

    #[test]
    fn command_substitutions() {
        let toks = tokens("set x `ls -la` $(echo $(inner))");
        assert_eq!(toks[2].kind, TokenKind::CommandSub);
        assert_eq!(toks[2].value, "ls -la");
        assert_eq!(toks[3].kind, TokenKind::CommandSub);
        assert_eq!(toks[3].value, "echo $(inner)");
    }

    #[test]
    fn comments_and_newlines() {
        let toks = tokens("# top\necho hi # inline\n");
        assert_eq!(toks[0].kind, TokenKind::Comment);
        assert_eq!(toks[0].value, " top");
        assert_eq!(toks[1].kind, TokenKind::Newline);
        assert_eq!(toks[4].kind, TokenKind::Comment);
        assert_eq!(toks[5].kind, TokenKind::Newline);
        assert_eq!(toks[6].kind, TokenKind::Eof);
    }

    #[test]
    fn adjacency_spans() {
        let toks = tokens("${f}.o ${g} .o");
        assert_eq!(toks[0].end, toks[1].start, "no gap between ${{f}} and .o");
        assert_ne!(toks[2].end, toks[3].start, "gap between ${{g}} and .o");
    }

    #[test]
    fn unterminated_quote_is_flagged() {
        let toks = tokens("echo \"oops");
        assert_eq!(toks[1].kind, TokenKind::DoubleQuote);
        assert!(toks[1].unterminated);
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn lexing_is_total_on_junk() {
        let toks = tokens("]]'''$ \"`");
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }
}
