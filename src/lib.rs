pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::SsipClient;
pub use config::{ClientIdentity, ConfigError, ConnectionConfig};
pub use error::{ClientError, Result};
pub use ssip_protocol::{Event, EventType};
pub use types::{CapitalLetters, DataMode, Priority, PunctuationMode, Scope, VoiceInfo, VoiceType};
