//! High level client for the speech daemon.
//!
//! [`SsipClient`] wraps a [`Connection`], performs the session handshake and
//! turns each operation into its SSIP command after checking the arguments
//! locally. A rejected argument never reaches the wire.

use crate::config::{ClientIdentity, ConnectionConfig};
use crate::error::{ClientError, Result};
use crate::types::{
    CapitalLetters, DataMode, Priority, PunctuationMode, Scope, VoiceInfo, VoiceType,
};
use log::{debug, info, warn};
use ssip_protocol::{Connection, Event, EventType, Reply, Subscription};
use std::fmt;
use strum::IntoEnumIterator;

/// Valid range of rate, pitch, pitch range and volume.
pub const MIN_VALUE: i32 = -100;
pub const MAX_VALUE: i32 = 100;

pub struct SsipClient {
    connection: Connection,
    identity: ClientIdentity,
}

impl SsipClient {
    /// Connect to the daemon and register this client.
    ///
    /// Registration names the client, learns the client id the daemon
    /// assigned to it and switches on every event notification, so events
    /// only depend on which callbacks are installed.
    pub fn connect(config: &ConnectionConfig, identity: &ClientIdentity) -> Result<Self> {
        let connection = Connection::connect(&config.address())?;
        Self::with_connection(connection, identity)
    }

    /// Register over an already open connection.
    pub fn with_connection(connection: Connection, identity: &ClientIdentity) -> Result<Self> {
        let name = identity.full_name();
        check_token("client name", &name)?;

        let client = Self {
            connection,
            identity: identity.clone(),
        };

        client.command("SET", &[&Scope::Current, &"CLIENT_NAME", &name])?;

        let reply = client.command("HISTORY", &[&"GET", &"CLIENT_ID"])?;
        let client_id = reply
            .data
            .first()
            .and_then(|id| id.trim().parse::<u32>().ok())
            .ok_or_else(|| ClientError::UnexpectedReply {
                command: "HISTORY GET CLIENT_ID".to_string(),
                reason: format!("no client id in {:?}", reply.data),
            })?;
        client.connection.set_client_id(client_id);

        for event_type in EventType::iter() {
            client.set_notification(event_type, true)?;
        }

        info!("✅ Registered as '{}' with client id {}", name, client_id);
        Ok(client)
    }

    // ----- speech -----

    /// Queue `text` for synthesis. Returns the message id when the daemon
    /// reports one.
    pub fn speak(&self, text: &str) -> Result<Option<u32>> {
        self.speak_with(text, None)
    }

    /// Like [`SsipClient::speak`], delivering the events of the new message
    /// to `callback`. An empty `events` slice means every event type.
    ///
    /// The callback runs on the connection's reading thread and must not
    /// call back into this client.
    pub fn speak_tracked<F>(
        &self,
        text: &str,
        events: &[EventType],
        callback: F,
    ) -> Result<Option<u32>>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut subscription = Subscription::new(callback);
        if !events.is_empty() {
            subscription = subscription.with_event_types(events);
        }
        self.speak_with(text, Some(subscription))
    }

    fn speak_with(&self, text: &str, subscription: Option<Subscription>) -> Result<Option<u32>> {
        if text.is_empty() {
            return Err(ClientError::invalid("text to speak is empty"));
        }

        self.command("SPEAK", &[])?;
        let reply = self.connection.send_data_tracked(text, subscription)?;
        let message_id = reply.message_id();
        debug!("🗣️ Queued {} byte(s) as message {:?}", text.len(), message_id);
        Ok(message_id)
    }

    /// Speak a single character. A space is sent by name.
    pub fn speak_char(&self, character: char) -> Result<Option<u32>> {
        let argument = match character {
            ' ' => "space".to_string(),
            '\r' | '\n' => {
                return Err(ClientError::invalid("line breaks cannot be spoken as characters"))
            }
            other => other.to_string(),
        };
        Ok(self.command("CHAR", &[&argument])?.message_id())
    }

    /// Speak a key name such as `ctrl_a` or `shift_F5`.
    pub fn key(&self, name: &str) -> Result<Option<u32>> {
        check_token("key name", name)?;
        Ok(self.command("KEY", &[&name])?.message_id())
    }

    pub fn sound_icon(&self, name: &str) -> Result<Option<u32>> {
        check_token("sound icon", name)?;
        Ok(self.command("SOUND_ICON", &[&name])?.message_id())
    }

    // ----- flow control -----

    /// Stop the current message and drop everything queued.
    pub fn cancel(&self, scope: Scope) -> Result<()> {
        self.command("CANCEL", &[&scope]).map(drop)
    }

    /// Stop the current message only.
    pub fn stop(&self, scope: Scope) -> Result<()> {
        self.command("STOP", &[&scope]).map(drop)
    }

    pub fn pause(&self, scope: Scope) -> Result<()> {
        self.command("PAUSE", &[&scope]).map(drop)
    }

    pub fn resume(&self, scope: Scope) -> Result<()> {
        self.command("RESUME", &[&scope]).map(drop)
    }

    /// Messages sent until [`SsipClient::block_end`] are spoken as one unit.
    pub fn block_begin(&self) -> Result<()> {
        self.command("BLOCK", &[&"BEGIN"]).map(drop)
    }

    pub fn block_end(&self) -> Result<()> {
        self.command("BLOCK", &[&"END"]).map(drop)
    }

    // ----- settings -----

    /// Priority of the messages this client sends from now on.
    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        self.set(Scope::Current, "PRIORITY", &priority)
    }

    pub fn set_data_mode(&self, mode: DataMode) -> Result<()> {
        let value = match mode {
            DataMode::Ssml => "on",
            DataMode::Text => "off",
        };
        self.set(Scope::Current, "SSML_MODE", &value)
    }

    pub fn set_language(&self, language: &str, scope: Scope) -> Result<()> {
        check_token("language", language)?;
        self.set(scope, "LANGUAGE", &language)
    }

    pub fn set_output_module(&self, module: &str, scope: Scope) -> Result<()> {
        check_token("output module", module)?;
        self.set(scope, "OUTPUT_MODULE", &module)
    }

    pub fn set_pitch(&self, value: i32, scope: Scope) -> Result<()> {
        self.set(scope, "PITCH", &check_range("pitch", value)?)
    }

    pub fn set_pitch_range(&self, value: i32, scope: Scope) -> Result<()> {
        self.set(scope, "PITCH_RANGE", &check_range("pitch range", value)?)
    }

    pub fn set_rate(&self, value: i32, scope: Scope) -> Result<()> {
        self.set(scope, "RATE", &check_range("rate", value)?)
    }

    pub fn set_volume(&self, value: i32, scope: Scope) -> Result<()> {
        self.set(scope, "VOLUME", &check_range("volume", value)?)
    }

    pub fn set_punctuation(&self, mode: PunctuationMode, scope: Scope) -> Result<()> {
        self.set(scope, "PUNCTUATION", &mode)
    }

    pub fn set_spelling(&self, enabled: bool, scope: Scope) -> Result<()> {
        self.set(scope, "SPELLING", &on_off(enabled))
    }

    pub fn set_cap_let_recogn(&self, mode: CapitalLetters, scope: Scope) -> Result<()> {
        self.set(scope, "CAP_LET_RECOGN", &mode)
    }

    /// Select one of the symbolic voices.
    pub fn set_voice(&self, voice: VoiceType, scope: Scope) -> Result<()> {
        self.set(scope, "VOICE_TYPE", &voice)
    }

    /// Select a voice of the output module by name, as listed by
    /// [`SsipClient::list_synthesis_voices`].
    pub fn set_synthesis_voice(&self, name: &str, scope: Scope) -> Result<()> {
        check_token("synthesis voice", name)?;
        self.set(scope, "SYNTHESIS_VOICE", &name)
    }

    /// Number of characters repeated as context when speech resumes.
    pub fn set_pause_context(&self, characters: u32, scope: Scope) -> Result<()> {
        self.set(scope, "PAUSE_CONTEXT", &characters)
    }

    /// Switch the daemon's notifications for one event type.
    pub fn set_notification(&self, event_type: EventType, enabled: bool) -> Result<()> {
        self.command(
            "SET",
            &[&Scope::Current, &"NOTIFICATION", &event_type, &on_off(enabled)],
        )
        .map(drop)
    }

    // ----- queries -----

    pub fn get_output_module(&self) -> Result<String> {
        let reply = self.command("GET", &[&"OUTPUT_MODULE"])?;
        reply
            .data
            .first()
            .map(|module| module.trim().to_string())
            .ok_or_else(|| ClientError::UnexpectedReply {
                command: "GET OUTPUT_MODULE".to_string(),
                reason: "no module name in reply".to_string(),
            })
    }

    pub fn list_output_modules(&self) -> Result<Vec<String>> {
        let reply = self.command("LIST", &[&"OUTPUT_MODULES"])?;
        Ok(non_empty_lines(&reply))
    }

    /// Symbolic voice names the daemon knows about.
    pub fn list_voices(&self) -> Result<Vec<String>> {
        let reply = self.command("LIST", &[&"VOICES"])?;
        Ok(non_empty_lines(&reply))
    }

    /// Voices of the current output module.
    pub fn list_synthesis_voices(&self) -> Result<Vec<VoiceInfo>> {
        let reply = self.command("LIST", &[&"SYNTHESIS_VOICES"])?;
        let voices: Vec<VoiceInfo> = reply
            .data
            .iter()
            .filter_map(|line| VoiceInfo::parse(line))
            .collect();
        if voices.len() != reply.data.len() {
            warn!(
                "⚠️ Skipped {} unparsable voice line(s)",
                reply.data.len() - voices.len()
            );
        }
        Ok(voices)
    }

    // ----- events and lifecycle -----

    /// Receive every event of this client, in addition to any per-message
    /// callbacks. Replaces a previously installed callback.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.connection.set_callback(callback);
    }

    pub fn clear_event_callback(&self) {
        self.connection.clear_callback();
    }

    /// The id the daemon assigned to this client at registration.
    pub fn client_id(&self) -> Option<u32> {
        self.connection.client_id()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_alive()
    }

    /// Say goodbye to the daemon and close the connection. Idempotent.
    ///
    /// `QUIT` is skipped when another thread is waiting for a reply; that
    /// caller is released with an error once the connection closes.
    pub fn close(&self) {
        if self.connection.is_alive() {
            match self.connection.try_send_command("QUIT", &[]) {
                Ok(Some(_)) => {}
                Ok(None) => debug!("Request in flight, closing without QUIT"),
                Err(e) => debug!("QUIT not acknowledged: {}", e),
            }
        }
        self.connection.close();
    }

    fn set(&self, scope: Scope, setting: &str, value: &dyn fmt::Display) -> Result<()> {
        self.command("SET", &[&scope, &setting, value]).map(drop)
    }

    fn command(&self, name: &str, args: &[&dyn fmt::Display]) -> Result<Reply> {
        Ok(self.connection.send_command(name, args)?)
    }
}

impl Drop for SsipClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SsipClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsipClient")
            .field("identity", &self.identity.full_name())
            .field("connection", &self.connection)
            .finish()
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// A single command argument: not empty and no line breaks.
fn check_token(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClientError::invalid(format!("{} is empty", what)));
    }
    if value.contains(['\r', '\n']) {
        return Err(ClientError::invalid(format!("{} contains a line break", what)));
    }
    Ok(())
}

fn check_range(what: &str, value: i32) -> Result<i32> {
    if (MIN_VALUE..=MAX_VALUE).contains(&value) {
        Ok(value)
    } else {
        Err(ClientError::invalid(format!(
            "{} {} outside {}..={}",
            what, value, MIN_VALUE, MAX_VALUE
        )))
    }
}

fn non_empty_lines(reply: &Reply) -> Vec<String> {
    reply
        .data
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
