use crate::lua_value::LuaValue;

/// Result codes of protected operations (`lua.h`). The numeric values are
/// part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LuaStatus {
    Ok = 0,
    ErrRun = 1,
    Yield = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    ErrErr = 5,
}

impl LuaStatus {
    pub fn is_ok(self) -> bool {
        self == LuaStatus::Ok
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error raised inside the engine. The error object travels with the
/// variant; `Memory` and `ErrorHandler` use fixed messages.
///
/// `Yield` is not an error from the script's point of view: it unwinds the
/// Rust frames of a coroutine back to `resume`.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LuaError {
    #[error("runtime error")]
    Runtime(LuaValue),
    #[error("syntax error")]
    Syntax(LuaValue),
    #[error("not enough memory")]
    Memory,
    #[error("error in error handling")]
    ErrorHandler,
    #[error("coroutine yield")]
    Yield,
}

impl LuaError {
    pub fn status(&self) -> LuaStatus {
        match self {
            LuaError::Runtime(_) => LuaStatus::ErrRun,
            LuaError::Syntax(_) => LuaStatus::ErrSyntax,
            LuaError::Memory => LuaStatus::ErrMem,
            LuaError::ErrorHandler => LuaStatus::ErrErr,
            LuaError::Yield => LuaStatus::Yield,
        }
    }
}

pub type LuaResult<T> = Result<T, LuaError>;
