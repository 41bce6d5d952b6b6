//! Argument vocabulary of the client commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Message priority, as understood by the daemon's queueing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    Important,
    Message,
    Text,
    Notification,
    Progress,
}

/// Which connections a setting or flow command applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    /// This connection only.
    #[default]
    Current,
    /// Every connection of the daemon.
    All,
    /// A single connection by client id.
    Client(u32),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Current => f.write_str("self"),
            Scope::All => f.write_str("all"),
            Scope::Client(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PunctuationMode {
    All,
    Some,
    None,
}

/// How capital letters are signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CapitalLetters {
    None,
    Spell,
    Icon,
}

/// Symbolic voice types; the daemon maps them onto real voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum VoiceType {
    Male1,
    Male2,
    Male3,
    Female1,
    Female2,
    Female3,
    ChildMale,
    ChildFemale,
}

/// Whether spoken text is plain or SSML markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DataMode {
    Text,
    Ssml,
}

/// One entry of `LIST SYNTHESIS_VOICES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub variant: String,
}

impl VoiceInfo {
    /// Parse a tab separated `name language variant` line. Missing trailing
    /// fields are reported as `none`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t').map(str::trim);
        let name = fields.next().filter(|n| !n.is_empty())?.to_string();
        let mut next = || {
            fields
                .next()
                .filter(|f| !f.is_empty())
                .unwrap_or("none")
                .to_string()
        };
        let language = next();
        let variant = next();
        Some(Self {
            name,
            language,
            variant,
        })
    }
}
