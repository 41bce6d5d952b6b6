//! A scriptable stand-in for the speech daemon.
//!
//! The mock accepts a single client on a loopback port and hands each
//! request to a handler closure, which answers through a [`Responder`].
//! Data blocks are recognised the way the daemon does it: after a command
//! was answered with `230`, the next bytes up to the end-of-data line form
//! one block.

use crate::protocol::NEWLINE;
use log::debug;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Reply code the daemon uses to start a data block.
const RECEIVING_DATA: u16 = 230;

/// One unit received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A command line, without its CR LF.
    Command(String),
    /// A data block as it appeared on the wire: still escaped, without the
    /// terminating dot line.
    Data(String),
}

/// Write side of the mock's client connection.
#[derive(Clone)]
pub struct Responder {
    stream: Arc<Mutex<TcpStream>>,
    last_code: Arc<Mutex<Option<u16>>>,
}

impl Responder {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            last_code: Arc::new(Mutex::new(None)),
        }
    }

    /// Write a reply; `data` lines go out as continuation lines first.
    pub fn reply(&self, code: u16, message: &str, data: &[&str]) -> io::Result<()> {
        *self.last_code.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
        self.raw(&encode_reply(code, message, data))
    }

    /// Push an event frame. Index marks carry `mark` as third data line.
    pub fn event(
        &self,
        code: u16,
        message_id: u32,
        client_id: u32,
        mark: Option<&str>,
    ) -> io::Result<()> {
        let message_id = message_id.to_string();
        let client_id = client_id.to_string();
        let mut data = vec![message_id.as_str(), client_id.as_str()];
        if let Some(mark) = mark {
            data.push(mark);
        }
        self.raw(&encode_reply(code, "EVENT", &data))
    }

    /// Write bytes verbatim.
    pub fn raw(&self, text: &str) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.write_all(text.as_bytes())?;
        stream.flush()
    }

    /// Abruptly close the client's socket from the daemon side.
    pub fn sever(&self) {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn take_last_code(&self) -> Option<u16> {
        self.last_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn encode_reply(code: u16, message: &str, data: &[&str]) -> String {
    let mut out = String::new();
    for line in data {
        out.push_str(&format!("{}-{}{}", code, line, NEWLINE));
    }
    out.push_str(&format!("{} {}{}", code, message, NEWLINE));
    out
}

pub struct MockDaemon {
    address: String,
    requests: Arc<Mutex<Vec<Request>>>,
    responder: Arc<Mutex<Option<Responder>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockDaemon {
    /// Bind a loopback port and serve the first client that connects.
    pub fn start<F>(handler: F) -> io::Result<Self>
    where
        F: FnMut(&Request, &mut Responder) -> io::Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?.to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder = Arc::new(Mutex::new(None));

        let thread_requests = Arc::clone(&requests);
        let thread_responder = Arc::clone(&responder);
        let handle = thread::spawn(move || {
            if let Err(e) = serve(listener, handler, thread_requests, thread_responder) {
                debug!("Mock daemon finished: {}", e);
            }
        });

        Ok(Self {
            address,
            requests,
            responder,
            handle: Some(handle),
        })
    }

    /// `host:port` to connect to.
    pub fn address(&self) -> String {
        self.address.clone()
    }

    pub fn host(&self) -> String {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or_default()
    }

    /// Everything received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands received so far, data blocks left out.
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Command(line) => Some(line),
                Request::Data(_) => None,
            })
            .collect()
    }

    /// Handle for pushing frames outside the handler. `None` until the
    /// client has been accepted.
    pub fn responder(&self) -> Option<Responder> {
        self.responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the client to disconnect and the serving thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve<F>(
    listener: TcpListener,
    mut handler: F,
    requests: Arc<Mutex<Vec<Request>>>,
    slot: Arc<Mutex<Option<Responder>>>,
) -> io::Result<()>
where
    F: FnMut(&Request, &mut Responder) -> io::Result<()>,
{
    let (stream, peer) = listener.accept()?;
    drop(listener);
    debug!("🤖 Mock daemon accepted {}", peer);

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut responder = Responder::new(stream);
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(responder.clone());

    let mut in_data = false;
    loop {
        let request = if in_data {
            match read_data_block(&mut reader)? {
                Some(block) => Request::Data(block),
                None => break,
            }
        } else {
            match read_crlf_line(&mut reader)? {
                Some(line) => Request::Command(line),
                None => break,
            }
        };

        requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        handler(&request, &mut responder)?;
        let answered = responder.take_last_code();
        in_data = matches!(request, Request::Command(_)) && answered == Some(RECEIVING_DATA);
    }

    debug!("🤖 Mock daemon client disconnected");
    Ok(())
}

fn read_crlf_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if line.ends_with(NEWLINE) {
            line.truncate(line.len() - NEWLINE.len());
            return Ok(Some(line));
        }
    }
}

fn read_data_block(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut lines = Vec::new();
    while let Some(line) = read_crlf_line(reader)? {
        if line == "." {
            return Ok(Some(lines.join(NEWLINE)));
        }
        lines.push(line);
    }
    Ok(None)
}
