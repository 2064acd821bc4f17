//! Text command protocol spoken to the board controller over SPI.
//!
//! `Var<value\n` sets a variable, `Var>\n` reads it back. Answers are a
//! single line; a leading `!` marks a board-side error.

use crate::error::{HwError, Result};

pub const BRIDGE: &str = "Bridge";
pub const ENABLE_AD_MES: &str = "EnableADmes";

pub fn set_command(variable: &str, value: impl std::fmt::Display) -> String {
    format!("{variable}<{value}\n")
}

pub fn get_command(variable: &str) -> String {
    format!("{variable}>\n")
}

/// Strip the trailing newline and turn `!`-prefixed answers into errors.
pub fn parse_answer(raw: &str) -> Result<&str> {
    let ans = raw.trim_end_matches(['\n', '\0']);
    match ans.strip_prefix('!') {
        Some(err) => Err(HwError::Board(err.to_string())),
        None => Ok(ans),
    }
}

/// Compare a read-back answer with the value just written.
pub fn check_readback(variable: &'static str, expected: &str, answer: &str) -> Result<()> {
    if answer.trim() == expected {
        Ok(())
    } else {
        Err(HwError::Readback {
            variable,
            expected: expected.to_string(),
            got: answer.to_string(),
        })
    }
}
