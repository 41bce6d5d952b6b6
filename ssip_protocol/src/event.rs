//! Asynchronous notifications pushed by the daemon (7xx frames).

use crate::protocol::Reply;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Class of a pushed event.
///
/// The string form is the name the daemon expects in
/// `SET self NOTIFICATION <name> on|off`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[strum(serialize = "index_marks")]
    #[serde(rename = "index_marks")]
    IndexMark,
    Begin,
    End,
    Cancel,
    Pause,
    Resume,
}

impl EventType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            700 => Some(EventType::IndexMark),
            701 => Some(EventType::Begin),
            702 => Some(EventType::End),
            703 => Some(EventType::Cancel),
            704 => Some(EventType::Pause),
            705 => Some(EventType::Resume),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            EventType::IndexMark => 700,
            EventType::Begin => 701,
            EventType::End => 702,
            EventType::Cancel => 703,
            EventType::Pause => 704,
            EventType::Resume => 705,
        }
    }

    /// No further events follow a terminal one for the same message.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::End | EventType::Cancel)
    }
}

/// One notification about a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub message_id: u32,
    pub client_id: u32,
    /// Only set for index marks.
    pub index_mark: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventParseError {
    #[error("unknown event code {0}")]
    UnknownCode(u16),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

impl TryFrom<&Reply> for Event {
    type Error = EventParseError;

    fn try_from(reply: &Reply) -> Result<Self, Self::Error> {
        let event_type =
            EventType::from_code(reply.code).ok_or(EventParseError::UnknownCode(reply.code))?;

        let message_id = parse_field(reply.data.first(), "message id")?;
        let client_id = parse_field(reply.data.get(1), "client id")?;

        let index_mark = if event_type == EventType::IndexMark {
            Some(
                reply
                    .data
                    .get(2)
                    .cloned()
                    .ok_or(EventParseError::MissingField("index mark name"))?,
            )
        } else {
            None
        };

        Ok(Event {
            event_type,
            message_id,
            client_id,
            index_mark,
        })
    }
}

fn parse_field(field: Option<&String>, name: &'static str) -> Result<u32, EventParseError> {
    let field = field.ok_or(EventParseError::MissingField(name))?;
    field
        .trim()
        .parse()
        .map_err(|_| EventParseError::InvalidNumber(field.clone()))
}
