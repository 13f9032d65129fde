// SPDX-License-Identifier: MIT

//! Process-exit codes for `main()` (§6: `0`/`1`/`2`/`64`), carried as a
//! value instead of calling `std::process::exit` deep in a command
//! handler — matches the teacher's `oj-cli::exit_error` split between
//! "decide the code" and "actually exit".

use std::fmt;

/// `1`: configuration is unreadable or malformed.
pub const CONFIG_ERROR: i32 = 1;
/// `2`: the daemon or the requested operation failed at runtime.
pub const RUNTIME_ERROR: i32 = 2;
/// `64` (`EX_USAGE`): the command line itself was invalid.
pub const USAGE_ERROR: i32 = 64;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(CONFIG_ERROR, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RUNTIME_ERROR, message)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE_ERROR, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}
