//! Interactive prompt seam.
//!
//! Workflows ask questions through [`Prompter`]; the CLI answers with
//! terminal widgets and tests answer from a script.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Archive passphrase. Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Source of interactive answers.
pub trait Prompter {
    /// Pick one of `items`; `None` when the user backs out.
    fn select(&self, prompt: &str, items: &[String]) -> Result<Option<usize>>;

    /// Read a secret without echo.
    fn passphrase(&self, prompt: &str) -> Result<Passphrase>;

    /// Yes/no question.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Show a prominent status line.
    fn banner(&self, text: &str);
}

/// Ask for a new passphrase twice.
///
/// An empty entry or a mismatch is a precondition failure; there is no
/// second attempt.
pub fn read_new_passphrase(prompter: &dyn Prompter) -> Result<Passphrase> {
    let first = prompter.passphrase("Archive passphrase")?;
    if first.is_empty() {
        return Err(Error::precondition("passphrase must not be empty"));
    }
    let second = prompter.passphrase("Repeat passphrase")?;
    if first != second {
        return Err(Error::precondition("passphrases do not match"));
    }
    Ok(first)
}

/// Ask the user to pick a VM name from `names`.
pub fn select_name(prompter: &dyn Prompter, prompt: &str, names: &[String]) -> Result<String> {
    match prompter.select(prompt, names)? {
        Some(index) => names
            .get(index)
            .cloned()
            .ok_or_else(|| Error::prompt(format!("selection {index} out of range"))),
        None => Err(Error::prompt("selection cancelled")),
    }
}
