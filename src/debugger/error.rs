use crate::debugger::breakpoint::BreakpointKey;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    FromUtf8(#[from] FromUtf8Error),
    #[error(transparent)]
    RegEx(#[from] regex::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- session state errors --------------------------------------
    #[error("session is not active")]
    SessionClosed,
    #[error("can not use this command on postmortem mode")]
    Postmortem,
    #[error("unknown configuration: {0}")]
    UnknownConfigKey(String),
    #[error("invalid value for configuration `{0}`: {1}")]
    ConfigValue(&'static str, String),

    // --------------------------------- breakpoint errors -----------------------------------------
    #[error("duplicated breakpoint: {0}")]
    DuplicateBreakpoint(String),
    #[error("breakpoint number {0} not found")]
    BreakpointNotFound(usize),
    #[error("source file not found: {0}")]
    SourceNotFound(String),
    #[error("unknown breakpoint format: {0}")]
    BreakpointFormat(String),
    #[error("breakpoint {0} is not resolved yet")]
    BreakpointUnresolved(BreakpointKey),

    // --------------------------------- thread errors ---------------------------------------------
    #[error("thread client #{0} not found")]
    ThreadNotFound(u32),
    #[error("thread #{0} is not controllable yet")]
    ThreadNotWaiting(u32),
    #[error("out of frame index: {0}")]
    FrameIndex(usize),

    // --------------------------------- evaluation errors -----------------------------------------
    #[error("eval error: {0}")]
    Eval(String),

    // --------------------------------- wire protocol errors --------------------------------------
    #[error("greeting message error: {0}")]
    Greeting(String),
    #[error("incompatible version ({0}, client: {1})")]
    VersionMismatch(&'static str, String),
    #[error("cookie mismatch ({0:?} was sent)")]
    CookieMismatch(String),
    #[error("malformed {0} message: {1}")]
    Protocol(&'static str, String),
    #[error("unknown request: {0}")]
    UnknownRequest(String),
    #[error("reference {0} not found")]
    UnknownReference(i64),

    // --------------------------------- websocket errors ------------------------------------------
    #[error("websocket handshake failed: {0}")]
    WsHandshake(String),
    #[error("unsupported websocket opcode: {0}")]
    WsOpcode(u8),
    #[error("client frame is not masked")]
    WsUnmasked,

    // --------------------------------- transport errors ------------------------------------------
    #[error("connection closed")]
    Disconnected,
}

impl Error {
    /// Return a hint to the owning loop - recover and keep the session alive,
    /// or tear the current connection/adapter down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::SessionClosed => false,
            Error::Postmortem => false,
            Error::UnknownConfigKey(_) => false,
            Error::ConfigValue(_, _) => false,
            Error::DuplicateBreakpoint(_) => false,
            Error::BreakpointNotFound(_) => false,
            Error::SourceNotFound(_) => false,
            Error::BreakpointFormat(_) => false,
            Error::BreakpointUnresolved(_) => false,
            Error::ThreadNotFound(_) => false,
            Error::ThreadNotWaiting(_) => false,
            Error::FrameIndex(_) => false,
            Error::Eval(_) => false,
            Error::UnknownRequest(_) => false,
            Error::UnknownReference(_) => false,
            Error::RegEx(_) => false,
            Error::Json(_) => false,
            Error::Utf8(_) => false,
            Error::FromUtf8(_) => false,

            // connection-fatal errors
            Error::IO(_) => true,
            Error::Greeting(_) => true,
            Error::VersionMismatch(_, _) => true,
            Error::CookieMismatch(_) => true,
            Error::Protocol(_, _) => true,
            Error::WsHandshake(_) => true,
            Error::WsOpcode(_) => true,
            Error::WsUnmasked => true,
            Error::Disconnected => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
