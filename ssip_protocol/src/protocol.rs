use std::fmt;
use std::io::{self, Read};
use thiserror::Error;

/// Line delimiter used in both directions.
pub const NEWLINE: &str = "\r\n";

/// Terminator of a data block: a line consisting of a single dot.
pub const END_OF_DATA: &str = "\r\n.\r\n";

/// Port the speech daemon listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 6560;

/// Host used when no address is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Malformed data received from server: {0}")]
    Malformed(String),
}

/// A complete server reply: `(code, message, data lines)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
    pub data: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, message: impl Into<String>, data: Vec<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// 2xx replies acknowledge a command or data block.
    pub fn is_success(&self) -> bool {
        self.code / 100 == 2
    }

    /// 7xx frames are pushed by the daemon and never answer a request.
    pub fn is_event(&self) -> bool {
        self.code / 100 == 7
    }

    /// Message id assigned by the daemon to an accepted data block.
    pub fn message_id(&self) -> Option<u32> {
        self.data.first().and_then(|id| id.trim().parse().ok())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Build a command line: name and stringified arguments, space separated,
/// terminated by CR LF.
pub fn format_command(name: &str, args: &[&dyn fmt::Display]) -> String {
    let mut line = String::from(name);
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    line.push_str(NEWLINE);
    line
}

/// Splits a byte source into CR LF delimited lines and assembles them into
/// replies.
///
/// The internal buffer survives between calls, so bytes belonging to the
/// next frame that arrive together with the current one are never lost.
pub struct ReplyReader<R> {
    source: R,
    buffer: Vec<u8>,
}

impl<R: Read> ReplyReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Read one line, without its delimiter. Blocks until a full line is
    /// buffered or the source reports end of stream.
    pub fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut searched = 0;

        loop {
            if let Some(pos) = find_newline(&self.buffer, searched) {
                let line: Vec<u8> = self.buffer.drain(..pos + NEWLINE.len()).collect();
                return String::from_utf8(line[..pos].to_vec())
                    .map_err(|_| ProtocolError::Malformed("line is not valid UTF-8".to_string()));
            }
            // A delimiter may straddle two reads, so re-check the last byte.
            searched = self.buffer.len().saturating_sub(1);

            let read = match self.source.read(&mut chunk) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::Io(e)),
            };
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read lines until the terminal line of a reply and return the whole
    /// reply. Continuation text is collected as data, in order.
    pub fn read_reply(&mut self) -> Result<Reply, ProtocolError> {
        let mut data = Vec::new();
        let mut expected_code: Option<String> = None;

        loop {
            let line = self.read_line()?;
            let (code, terminal, text) = split_reply_line(&line)?;

            if let Some(expected) = &expected_code {
                if expected != code {
                    return Err(ProtocolError::Malformed(format!(
                        "code changed from {} to {} within one reply",
                        expected, code
                    )));
                }
            }

            if terminal {
                let code = code.parse::<u16>().map_err(|_| {
                    ProtocolError::Malformed(format!("non-numeric reply code '{}'", code))
                })?;
                return Ok(Reply::new(code, text, data));
            }

            data.push(text.to_string());
            expected_code = Some(code.to_string());
        }
    }
}

fn find_newline(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(NEWLINE.len())
        .position(|w| w == NEWLINE.as_bytes())
        .map(|pos| pos + from)
}

/// Split `CCC-TEXT` / `CCC TEXT` into code, terminal flag and text.
fn split_reply_line(line: &str) -> Result<(&str, bool, &str), ProtocolError> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 {
        return Err(ProtocolError::Malformed(format!("line too short: {:?}", line)));
    }
    if !bytes[..3].iter().all(u8::is_ascii_alphanumeric) {
        return Err(ProtocolError::Malformed(format!("invalid reply code in {:?}", line)));
    }
    let terminal = match bytes[3] {
        b' ' => true,
        b'-' => false,
        _ => {
            return Err(ProtocolError::Malformed(format!("invalid separator in {:?}", line)));
        }
    };
    // The first four bytes are ASCII, so both slices fall on char boundaries.
    Ok((&line[..3], terminal, &line[4..]))
}
