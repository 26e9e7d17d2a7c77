mod lexer;
mod lua_token_kind;

pub use crate::compiler::parser::{
    lexer::{LuaLexer, SemInfo, Token},
    lua_token_kind::LuaTokenKind,
};
