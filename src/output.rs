//! # Output Configuration
//!
//! Colour policy for the command-line report. Follows the usual
//! conventions:
//! - `--color=never|always|auto`
//! - `NO_COLOR` disables colours when set (https://no-color.org/)
//! - `CLICOLOR=0` disables and `CLICOLOR_FORCE=1` forces colours
//! - `TERM=dumb` disables colours

use std::env;

use console::{style, StyledObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// `color_flag` is `"always"`, `"never"` or `"auto"`; anything else is
    /// treated as auto.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    pub fn without_color() -> Self {
        Self { use_color: false }
    }

    fn styled<'a>(&self, text: &'a str) -> StyledObject<&'a str> {
        style(text).force_styling(self.use_color)
    }

    /// `[ OK ]` / `[FAIL]` marker for a check result.
    pub fn status(&self, ok: bool) -> String {
        if ok {
            self.styled("[ OK ]").green().to_string()
        } else {
            self.styled("[FAIL]").red().bold().to_string()
        }
    }

    /// Marker for a snapshot entry's trigger decision.
    pub fn trigger(&self, changed: bool, triggers: bool) -> String {
        match (changed, triggers) {
            (true, true) => self.styled("changed").yellow().to_string(),
            (true, false) => self.styled("changed, ignored").dim().to_string(),
            (false, _) => self.styled("unchanged").dim().to_string(),
        }
    }

    pub fn heading(&self, text: &str) -> String {
        self.styled(text).bold().to_string()
    }

    pub fn warning(&self, text: &str) -> String {
        self.styled(text).yellow().to_string()
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}
