use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaTokenKind {
    // KeyWord
    TkAnd,
    TkBreak,
    TkDo,
    TkElse,
    TkElseIf,
    TkEnd,
    TkFalse,
    TkFor,
    TkFunction,
    TkIf,
    TkIn,
    TkLocal,
    TkNil,
    TkNot,
    TkOr,
    TkRepeat,
    TkReturn,
    TkThen,
    TkTrue,
    TkUntil,
    TkWhile,

    TkPlus,      // +
    TkMinus,     // -
    TkMul,       // *
    TkDiv,       // /
    TkMod,       // %
    TkPow,       // ^
    TkLen,       // #
    TkDot,       // .
    TkConcat,    // ..
    TkDots,      // ...
    TkComma,     // ,
    TkAssign,    // =
    TkEq,        // ==
    TkGe,        // >=
    TkLe,        // <=
    TkNe,        // ~=
    TkLt,        // <
    TkGt,        // >
    TkColon,     // :
    TkSemicolon, // ;

    TkLeftBracket,  // [
    TkRightBracket, // ]
    TkLeftParen,    // (
    TkRightParen,   // )
    TkLeftBrace,    // {
    TkRightBrace,   // }

    TkNumber, // number
    TkName,   // name
    TkString, // string
    TkEof,    // eof

    /// Any other single character, returned as is
    TkUnknown,
}

impl fmt::Display for LuaTokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

impl LuaTokenKind {
    /// Token text as used in messages (luaX_token2str)
    pub fn to_user_string(&self) -> &'static str {
        match self {
            LuaTokenKind::TkAnd => "and",
            LuaTokenKind::TkBreak => "break",
            LuaTokenKind::TkDo => "do",
            LuaTokenKind::TkElse => "else",
            LuaTokenKind::TkElseIf => "elseif",
            LuaTokenKind::TkEnd => "end",
            LuaTokenKind::TkFalse => "false",
            LuaTokenKind::TkFor => "for",
            LuaTokenKind::TkFunction => "function",
            LuaTokenKind::TkIf => "if",
            LuaTokenKind::TkIn => "in",
            LuaTokenKind::TkLocal => "local",
            LuaTokenKind::TkNil => "nil",
            LuaTokenKind::TkNot => "not",
            LuaTokenKind::TkOr => "or",
            LuaTokenKind::TkRepeat => "repeat",
            LuaTokenKind::TkReturn => "return",
            LuaTokenKind::TkThen => "then",
            LuaTokenKind::TkTrue => "true",
            LuaTokenKind::TkUntil => "until",
            LuaTokenKind::TkWhile => "while",
            LuaTokenKind::TkPlus => "+",
            LuaTokenKind::TkMinus => "-",
            LuaTokenKind::TkMul => "*",
            LuaTokenKind::TkDiv => "/",
            LuaTokenKind::TkMod => "%",
            LuaTokenKind::TkPow => "^",
            LuaTokenKind::TkLen => "#",
            LuaTokenKind::TkDot => ".",
            LuaTokenKind::TkConcat => "..",
            LuaTokenKind::TkDots => "...",
            LuaTokenKind::TkComma => ",",
            LuaTokenKind::TkAssign => "=",
            LuaTokenKind::TkEq => "==",
            LuaTokenKind::TkGe => ">=",
            LuaTokenKind::TkLe => "<=",
            LuaTokenKind::TkNe => "~=",
            LuaTokenKind::TkLt => "<",
            LuaTokenKind::TkGt => ">",
            LuaTokenKind::TkColon => ":",
            LuaTokenKind::TkSemicolon => ";",
            LuaTokenKind::TkLeftBracket => "[",
            LuaTokenKind::TkRightBracket => "]",
            LuaTokenKind::TkLeftParen => "(",
            LuaTokenKind::TkRightParen => ")",
            LuaTokenKind::TkLeftBrace => "{",
            LuaTokenKind::TkRightBrace => "}",
            LuaTokenKind::TkNumber => "<number>",
            LuaTokenKind::TkName => "<name>",
            LuaTokenKind::TkString => "<string>",
            LuaTokenKind::TkEof => "<eof>",
            LuaTokenKind::TkUnknown => "<unknown>",
        }
    }

    pub fn from_keyword(word: &[u8]) -> Option<Self> {
        let kind = match word {
            b"and" => LuaTokenKind::TkAnd,
            b"break" => LuaTokenKind::TkBreak,
            b"do" => LuaTokenKind::TkDo,
            b"else" => LuaTokenKind::TkElse,
            b"elseif" => LuaTokenKind::TkElseIf,
            b"end" => LuaTokenKind::TkEnd,
            b"false" => LuaTokenKind::TkFalse,
            b"for" => LuaTokenKind::TkFor,
            b"function" => LuaTokenKind::TkFunction,
            b"if" => LuaTokenKind::TkIf,
            b"in" => LuaTokenKind::TkIn,
            b"local" => LuaTokenKind::TkLocal,
            b"nil" => LuaTokenKind::TkNil,
            b"not" => LuaTokenKind::TkNot,
            b"or" => LuaTokenKind::TkOr,
            b"repeat" => LuaTokenKind::TkRepeat,
            b"return" => LuaTokenKind::TkReturn,
            b"then" => LuaTokenKind::TkThen,
            b"true" => LuaTokenKind::TkTrue,
            b"until" => LuaTokenKind::TkUntil,
            b"while" => LuaTokenKind::TkWhile,
            _ => return None,
        };
        Some(kind)
    }

    /// Tokens whose message text is their source text
    pub fn has_seminfo(&self) -> bool {
        matches!(
            self,
            LuaTokenKind::TkName | LuaTokenKind::TkString | LuaTokenKind::TkNumber
        )
    }
}
