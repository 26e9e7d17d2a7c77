// Lexical analyzer (llex.c)
// Tokens are produced on demand with one token of lookahead. Source text is
// raw bytes: strings may hold any byte, identifiers are ASCII.

use super::LuaTokenKind;
use crate::compiler::CompileError;
use crate::lua_value::str_to_number;

/// Semantic value of a token
#[derive(Debug, Clone, PartialEq)]
pub enum SemInfo {
    None,
    Number(f64),
    /// Name or string contents, escapes already processed
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: LuaTokenKind,
    pub seminfo: SemInfo,
    start: usize,
    end: usize,
}

pub struct LuaLexer<'a> {
    src: &'a [u8],
    pos: usize,
    /// Line of the last character read
    pub line: u32,
    /// Line of the last token consumed
    pub lastline: u32,
    pub token: Token,
    lookahead: Option<Token>,
    chunk: String,
}

impl<'a> LuaLexer<'a> {
    /// `chunk` is the formatted chunk id used as message prefix
    pub fn new(src: &'a [u8], chunk: String) -> Self {
        LuaLexer {
            src,
            pos: 0,
            line: 1,
            lastline: 1,
            token: Token {
                kind: LuaTokenKind::TkEof,
                seminfo: SemInfo::None,
                start: 0,
                end: 0,
            },
            lookahead: None,
            chunk,
        }
    }

    pub fn current_token(&self) -> LuaTokenKind {
        self.token.kind
    }

    /// luaX_next
    pub fn next(&mut self) -> Result<(), CompileError> {
        self.lastline = self.line;
        self.token = match self.lookahead.take() {
            Some(t) => t,
            None => self.scan()?,
        };
        Ok(())
    }

    /// luaX_lookahead
    pub fn lookahead(&mut self) -> Result<LuaTokenKind, CompileError> {
        if let Some(t) = &self.lookahead {
            return Ok(t.kind);
        }
        let t = self.scan()?;
        let kind = t.kind;
        self.lookahead = Some(t);
        Ok(kind)
    }

    /// Takes the name or string payload of the current token
    pub fn take_bytes(&mut self) -> Vec<u8> {
        match std::mem::replace(&mut self.token.seminfo, SemInfo::None) {
            SemInfo::Bytes(b) => b,
            _ => Vec::new(),
        }
    }

    pub fn number(&self) -> f64 {
        match self.token.seminfo {
            SemInfo::Number(n) => n,
            _ => 0.0,
        }
    }

    // ============ Errors ============

    fn token_text(&self, t: &Token) -> String {
        match t.kind {
            k if k.has_seminfo() => self.text(t.start, t.end),
            LuaTokenKind::TkUnknown => {
                let c = self.src.get(t.start).copied().unwrap_or(0);
                if c.is_ascii_control() {
                    format!("char({c})")
                } else {
                    (c as char).to_string()
                }
            }
            k => k.to_user_string().to_string(),
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.src.len());
        String::from_utf8_lossy(&self.src[start.min(end)..end]).into_owned()
    }

    /// luaX_lexerror
    pub fn error(&self, msg: &str, near: Option<&str>) -> CompileError {
        let msg = match near {
            Some(near) => format!("{msg} near '{near}'"),
            None => msg.to_string(),
        };
        CompileError::Syntax {
            chunk: self.chunk.clone(),
            line: self.line,
            msg,
        }
    }

    /// luaX_syntaxerror: error near the current token
    pub fn syntax_error(&self, msg: &str) -> CompileError {
        let near = self.token_text(&self.token);
        self.error(msg, Some(&near))
    }

    // ============ Scanner ============

    #[inline]
    fn current(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn token(&self, kind: LuaTokenKind, start: usize, seminfo: SemInfo) -> Token {
        Token {
            kind,
            seminfo,
            start,
            end: self.pos,
        }
    }

    /// Skips one line break ("\n", "\r", "\n\r" or "\r\n")
    fn inc_line(&mut self) -> Result<(), CompileError> {
        let old = self.current();
        self.pos += 1;
        if matches!(self.current(), Some(b'\n' | b'\r')) && self.current() != old {
            self.pos += 1;
        }
        if self.line >= i32::MAX as u32 {
            return Err(self.error("chunk has too many lines", None));
        }
        self.line += 1;
        Ok(())
    }

    /// At `[` or `]`: the level of a long bracket, or -(count+1) when the
    /// `=` run is not followed by the same bracket
    fn skip_sep(&mut self) -> isize {
        let s = self.src[self.pos];
        self.pos += 1;
        let mut count = 0;
        while self.current() == Some(b'=') {
            self.pos += 1;
            count += 1;
        }
        if self.current() == Some(s) {
            count
        } else {
            -count - 1
        }
    }

    fn scan(&mut self) -> Result<Token, CompileError> {
        loop {
            let start = self.pos;
            let Some(c) = self.current() else {
                return Ok(self.token(LuaTokenKind::TkEof, start, SemInfo::None));
            };
            match c {
                b'\n' | b'\r' => self.inc_line()?,
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'-' => {
                    self.pos += 1;
                    if self.current() != Some(b'-') {
                        return Ok(self.token(LuaTokenKind::TkMinus, start, SemInfo::None));
                    }
                    self.pos += 1;
                    if self.current() == Some(b'[') {
                        let sep = self.skip_sep();
                        if sep >= 0 {
                            self.read_long_string(sep, false)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.current() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b'[' => {
                    let sep = self.skip_sep();
                    if sep >= 0 {
                        let s = self.read_long_string(sep, true)?;
                        return Ok(self.token(LuaTokenKind::TkString, start, SemInfo::Bytes(s)));
                    }
                    if sep == -1 {
                        return Ok(self.token(LuaTokenKind::TkLeftBracket, start, SemInfo::None));
                    }
                    let near = self.text(start, self.pos);
                    return Err(self.error("invalid long string delimiter", Some(&near)));
                }
                b'=' | b'<' | b'>' | b'~' => {
                    self.pos += 1;
                    let with_eq = self.current() == Some(b'=');
                    if with_eq {
                        self.pos += 1;
                    }
                    let kind = match (c, with_eq) {
                        (b'=', true) => LuaTokenKind::TkEq,
                        (b'=', false) => LuaTokenKind::TkAssign,
                        (b'<', true) => LuaTokenKind::TkLe,
                        (b'<', false) => LuaTokenKind::TkLt,
                        (b'>', true) => LuaTokenKind::TkGe,
                        (b'>', false) => LuaTokenKind::TkGt,
                        (_, true) => LuaTokenKind::TkNe,
                        (_, false) => LuaTokenKind::TkUnknown,
                    };
                    return Ok(self.token(kind, start, SemInfo::None));
                }
                b'"' | b'\'' => {
                    let s = self.read_string(c, start)?;
                    return Ok(self.token(LuaTokenKind::TkString, start, SemInfo::Bytes(s)));
                }
                b'.' => {
                    let rest = &self.src[self.pos..];
                    let kind = if rest.starts_with(b"...") {
                        self.pos += 3;
                        LuaTokenKind::TkDots
                    } else if rest.starts_with(b"..") {
                        self.pos += 2;
                        LuaTokenKind::TkConcat
                    } else if rest.get(1).is_some_and(|d| d.is_ascii_digit()) {
                        return self.read_numeral(start);
                    } else {
                        self.pos += 1;
                        LuaTokenKind::TkDot
                    };
                    return Ok(self.token(kind, start, SemInfo::None));
                }
                b'0'..=b'9' => return self.read_numeral(start),
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    while self
                        .current()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
                    {
                        self.pos += 1;
                    }
                    let word = &self.src[start..self.pos];
                    return Ok(match LuaTokenKind::from_keyword(word) {
                        Some(kind) => self.token(kind, start, SemInfo::None),
                        None => {
                            let name = word.to_vec();
                            self.token(LuaTokenKind::TkName, start, SemInfo::Bytes(name))
                        }
                    });
                }
                _ => {
                    self.pos += 1;
                    let kind = match c {
                        b'+' => LuaTokenKind::TkPlus,
                        b'*' => LuaTokenKind::TkMul,
                        b'/' => LuaTokenKind::TkDiv,
                        b'%' => LuaTokenKind::TkMod,
                        b'^' => LuaTokenKind::TkPow,
                        b'#' => LuaTokenKind::TkLen,
                        b',' => LuaTokenKind::TkComma,
                        b':' => LuaTokenKind::TkColon,
                        b';' => LuaTokenKind::TkSemicolon,
                        b']' => LuaTokenKind::TkRightBracket,
                        b'(' => LuaTokenKind::TkLeftParen,
                        b')' => LuaTokenKind::TkRightParen,
                        b'{' => LuaTokenKind::TkLeftBrace,
                        b'}' => LuaTokenKind::TkRightBrace,
                        _ => LuaTokenKind::TkUnknown,
                    };
                    return Ok(self.token(kind, start, SemInfo::None));
                }
            }
        }
    }

    fn read_numeral(&mut self, start: usize) -> Result<Token, CompileError> {
        while self.current().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        if matches!(self.current(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.current(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
        }
        while self
            .current()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        match str_to_number(&self.src[start..self.pos]) {
            Some(n) => Ok(self.token(LuaTokenKind::TkNumber, start, SemInfo::Number(n))),
            None => {
                let near = self.text(start, self.pos);
                Err(self.error("malformed number", Some(&near)))
            }
        }
    }

    /// Body of a long string or comment; positioned after the first
    /// bracket and its `=` run
    fn read_long_string(&mut self, sep: isize, is_string: bool) -> Result<Vec<u8>, CompileError> {
        self.pos += 1;
        if matches!(self.current(), Some(b'\n' | b'\r')) {
            self.inc_line()?;
        }
        let mut buf = Vec::new();
        loop {
            match self.current() {
                None => {
                    let msg = if is_string {
                        "unfinished long string"
                    } else {
                        "unfinished long comment"
                    };
                    return Err(self.error(msg, Some("<eof>")));
                }
                Some(b'[') => {
                    let from = self.pos;
                    if self.skip_sep() == sep {
                        if sep == 0 {
                            return Err(self.error("nesting of [[...]] is deprecated", Some("[")));
                        }
                        self.pos += 1;
                    }
                    buf.extend_from_slice(&self.src[from..self.pos]);
                }
                Some(b']') => {
                    let from = self.pos;
                    if self.skip_sep() == sep {
                        self.pos += 1;
                        return Ok(buf);
                    }
                    buf.extend_from_slice(&self.src[from..self.pos]);
                }
                Some(b'\n' | b'\r') => {
                    buf.push(b'\n');
                    self.inc_line()?;
                }
                Some(c) => {
                    if is_string {
                        buf.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
    }

    fn read_string(&mut self, del: u8, start: usize) -> Result<Vec<u8>, CompileError> {
        self.pos += 1;
        let mut buf = Vec::new();
        loop {
            match self.current() {
                None => return Err(self.error("unfinished string", Some("<eof>"))),
                Some(b'\n' | b'\r') => {
                    let near = self.text(start, self.pos);
                    return Err(self.error("unfinished string", Some(&near)));
                }
                Some(c) if c == del => {
                    self.pos += 1;
                    return Ok(buf);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let Some(e) = self.current() else {
                        continue;
                    };
                    let byte = match e {
                        b'a' => 0x07,
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'v' => 0x0b,
                        b'\n' | b'\r' => {
                            buf.push(b'\n');
                            self.inc_line()?;
                            continue;
                        }
                        d if d.is_ascii_digit() => {
                            let mut value = 0u32;
                            let mut n = 0;
                            while n < 3 && self.current().is_some_and(|c| c.is_ascii_digit()) {
                                value = value * 10 + u32::from(self.src[self.pos] - b'0');
                                self.pos += 1;
                                n += 1;
                            }
                            if value > u32::from(u8::MAX) {
                                let near = self.text(start, self.pos);
                                return Err(self.error("escape sequence too large", Some(&near)));
                            }
                            buf.push(value as u8);
                            continue;
                        }
                        other => other,
                    };
                    buf.push(byte);
                    self.pos += 1;
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<LuaTokenKind> {
        let mut lex = LuaLexer::new(src.as_bytes(), "test".to_string());
        let mut out = Vec::new();
        loop {
            lex.next().unwrap();
            if lex.current_token() == LuaTokenKind::TkEof {
                return out;
            }
            out.push(lex.current_token());
        }
    }

    #[test]
    fn test_operators_and_keywords() {
        use LuaTokenKind::*;
        assert_eq!(
            kinds("local x = a..b ~= ... -- comment\n<= >= == #t"),
            vec![TkLocal, TkName, TkAssign, TkName, TkConcat, TkName, TkNe, TkDots, TkLe, TkGe, TkEq, TkLen, TkName]
        );
    }

    #[test]
    fn test_long_strings_and_comments() {
        let mut lex = LuaLexer::new(b"--[==[ skip\n ]==] [[\nline1\nline2]]", "test".into());
        lex.next().unwrap();
        assert_eq!(lex.current_token(), LuaTokenKind::TkString);
        assert_eq!(lex.take_bytes(), b"line1\nline2");
        assert_eq!(lex.line, 4);
    }

    #[test]
    fn test_escapes() {
        let mut lex = LuaLexer::new(br#""a\tb\65\\\"""#, "test".into());
        lex.next().unwrap();
        assert_eq!(lex.take_bytes(), b"a\tbA\\\"");
    }

    #[test]
    fn test_numbers() {
        let mut lex = LuaLexer::new(b"3 0x10 1e2 .5", "test".into());
        let mut nums = Vec::new();
        for _ in 0..4 {
            lex.next().unwrap();
            nums.push(lex.number());
        }
        assert_eq!(nums, vec![3.0, 16.0, 100.0, 0.5]);
    }

    #[test]
    fn test_lexical_errors() {
        let mut lex = LuaLexer::new(b"x = \"abc", "test".into());
        lex.next().unwrap();
        lex.next().unwrap();
        let err = lex.next().unwrap_err();
        assert_eq!(err.to_string(), "test:1: unfinished string near '<eof>'");

        let mut lex = LuaLexer::new(b"3x", "test".into());
        let err = lex.next().unwrap_err();
        assert_eq!(err.to_string(), "test:1: malformed number near '3x'");
    }
}
