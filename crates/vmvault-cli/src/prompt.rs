//! dialoguer-backed prompts.

use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Password, Select};
use indicatif::ProgressBar;
use vmvault_core::{Error, Passphrase, Prompter, Result};

/// Terminal prompter.
///
/// Prompts are drawn with the workflow spinner suspended, so a question
/// asked mid-workflow is not overdrawn.
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
    spinner: ProgressBar,
}

impl DialoguerPrompter {
    pub fn new(spinner: ProgressBar) -> Self {
        Self {
            theme: ColorfulTheme::default(),
            spinner,
        }
    }
}

impl Prompter for DialoguerPrompter {
    fn select(&self, prompt: &str, items: &[String]) -> Result<Option<usize>> {
        self.spinner.suspend(|| {
            Select::with_theme(&self.theme)
                .with_prompt(prompt)
                .items(items)
                .default(0)
                .interact_opt()
                .map_err(prompt_error)
        })
    }

    fn passphrase(&self, prompt: &str) -> Result<Passphrase> {
        self.spinner.suspend(|| {
            Password::with_theme(&self.theme)
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map(Passphrase::new)
                .map_err(prompt_error)
        })
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        self.spinner.suspend(|| {
            Confirm::with_theme(&self.theme)
                .with_prompt(prompt)
                .default(default)
                .interact()
                .map_err(prompt_error)
        })
    }

    fn banner(&self, text: &str) {
        let rule = "═".repeat(text.chars().count() + 4);
        self.spinner.suspend(|| {
            println!();
            println!("{}", style(&rule).cyan());
            println!("  {}", style(text).bold());
            println!("{}", style(&rule).cyan());
            println!();
        });
    }
}

fn prompt_error(err: dialoguer::Error) -> Error {
    Error::prompt(err.to_string())
}
