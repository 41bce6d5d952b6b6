//! The protocol engine: one socket, one reading thread, blocking senders.
//!
//! The reading thread is the only reader of the socket. Every frame it
//! assembles is either a reply (handed to the caller blocked in
//! [`Connection::send_command`] or [`Connection::send_data`]) or a 7xx event
//! (routed to callbacks on the reading thread itself).
//!
//! Callbacks must not send on the connection that invoked them: the reply
//! they would wait for can only be delivered by the thread running the
//! callback. Such a send fails with [`SsipError::Communication`] instead of
//! hanging.

use crate::dispatch::{EventCallback, EventDispatcher, Subscription};
use crate::error::{Result, SsipError};
use crate::escape::encode_data_block;
use crate::event::Event;
use crate::protocol::{format_command, ProtocolError, Reply, ReplyReader};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::fmt;
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle, ThreadId};

/// Why the reading thread stopped.
#[derive(Debug, Clone)]
enum ReaderExit {
    PeerClosed,
    Violation(String),
    Io(String),
}

/// State shared between the reading thread and callers.
struct Shared {
    dispatcher: Mutex<EventDispatcher>,
    client_id: Mutex<Option<u32>>,
    running: AtomicBool,
    closed: AtomicBool,
    exit: Mutex<Option<ReaderExit>>,
}

impl Shared {
    fn dispatcher(&self) -> MutexGuard<'_, EventDispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client_id(&self) -> Option<u32> {
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The error every caller sees once the reading thread is gone.
    fn dead_error(&self) -> SsipError {
        if self.closed.load(Ordering::SeqCst) {
            return SsipError::Communication("connection closed".to_string());
        }
        match self.exit.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(ReaderExit::Violation(detail)) => SsipError::ProtocolViolation(detail),
            Some(ReaderExit::Io(detail)) => {
                SsipError::Communication(format!("socket error: {}", detail))
            }
            Some(ReaderExit::PeerClosed) | None => {
                SsipError::Communication("connection closed by the daemon".to_string())
            }
        }
    }

    fn handle_event(&self, reply: &Reply) {
        let event = match Event::try_from(reply) {
            Ok(event) => event,
            Err(e) => {
                warn!("⚠️ Dropping event frame {}: {}", reply, e);
                return;
            }
        };

        if let Some(own_id) = self.client_id() {
            if event.client_id != own_id {
                debug!(
                    "🔇 Ignoring event for client {} (this connection is {})",
                    event.client_id, own_id
                );
                return;
            }
        }

        let targets = self.dispatcher().route(&event);
        debug!(
            "📣 {:?} for message {} -> {} callback(s)",
            event.event_type,
            event.message_id,
            targets.len()
        );

        for callback in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(
                    "❌ Event callback panicked while handling {:?} for message {}",
                    event.event_type, event.message_id
                );
            }
        }
    }
}

/// Write half of the socket plus the receiving end of the reply queue.
/// Holding this lock is what makes a request "in flight".
struct SendHalf {
    writer: BufWriter<TcpStream>,
    replies: Receiver<Reply>,
}

/// A live SSIP connection.
pub struct Connection {
    send_half: Mutex<SendHalf>,
    stream: TcpStream,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    reader_thread: ThreadId,
    peer: String,
}

impl Connection {
    /// Connect to the daemon at `address` (`host:port`).
    pub fn connect(address: &str) -> Result<Self> {
        info!("📡 Connecting to speech daemon at {}", address);

        let stream = TcpStream::connect(address).map_err(|source| SsipError::Connect {
            address: address.to_string(),
            source,
        })?;

        let connection = Self::new(stream)?;
        info!("✅ Connected to speech daemon at {}", connection.peer);
        Ok(connection)
    }

    /// Take ownership of an already connected stream and start reading it.
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());

        let io_error = |e: std::io::Error| SsipError::Communication(e.to_string());
        stream.set_nodelay(true).map_err(io_error)?;
        let reader_stream = stream.try_clone().map_err(io_error)?;
        let writer_stream = stream.try_clone().map_err(io_error)?;

        let shared = Arc::new(Shared {
            dispatcher: Mutex::new(EventDispatcher::new()),
            client_id: Mutex::new(None),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            exit: Mutex::new(None),
        });

        let (reply_tx, reply_rx) = unbounded();
        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("ssip-reader".to_string())
            .spawn(move || run_reader(ReplyReader::new(reader_stream), reader_shared, reply_tx))
            .map_err(io_error)?;
        let reader_thread = reader.thread().id();

        Ok(Self {
            send_half: Mutex::new(SendHalf {
                writer: BufWriter::new(writer_stream),
                replies: reply_rx,
            }),
            stream,
            shared,
            reader: Mutex::new(Some(reader)),
            reader_thread,
            peer,
        })
    }

    /// Send `name` with stringified `args` and wait for the reply.
    ///
    /// Fails with [`SsipError::Command`] when the reply is not 2xx.
    pub fn send_command(&self, name: &str, args: &[&dyn fmt::Display]) -> Result<Reply> {
        let line = format_command(name, args);
        let command = line.trim_end().to_string();

        let reply = self.transact(&line, None)?;
        if !reply.is_success() {
            warn!("⚠️ Command '{}' rejected: {}", command, reply);
            return Err(SsipError::Command {
                code: reply.code,
                message: reply.message,
                command,
            });
        }
        Ok(reply)
    }

    /// Send a data block (after `SPEAK`) and wait for the reply.
    ///
    /// Fails with [`SsipError::Data`] when the reply is not 2xx. On success
    /// the first data line, when present, is the message id.
    pub fn send_data(&self, data: &str) -> Result<Reply> {
        self.send_data_tracked(data, None)
    }

    /// Like [`Connection::send_data`], additionally subscribing to the
    /// events of the resulting message. The subscription is installed by the
    /// reading thread before the reply is released, so no event of the new
    /// message can slip past it.
    pub fn send_data_tracked(
        &self,
        data: &str,
        subscription: Option<Subscription>,
    ) -> Result<Reply> {
        let block = encode_data_block(data);
        let reply = self.transact(&block, subscription)?;
        if !reply.is_success() {
            warn!("⚠️ Data block rejected: {}", reply);
            return Err(SsipError::Data {
                code: reply.code,
                message: reply.message,
                data: block,
            });
        }
        Ok(reply)
    }

    /// Like [`Connection::send_command`], but gives up instead of waiting
    /// when another request is in flight. Returns `Ok(None)` in that case.
    pub fn try_send_command(
        &self,
        name: &str,
        args: &[&dyn fmt::Display],
    ) -> Result<Option<Reply>> {
        self.check_not_reader()?;

        let mut half = match self.send_half.try_lock() {
            Ok(half) => half,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Skipping '{}': a request is in flight", name);
                return Ok(None);
            }
        };

        let line = format_command(name, args);
        let reply = self.exchange(&mut half, &line, None)?;
        if !reply.is_success() {
            return Err(SsipError::Command {
                code: reply.code,
                message: reply.message,
                command: line.trim_end().to_string(),
            });
        }
        Ok(Some(reply))
    }

    fn transact(&self, payload: &str, subscription: Option<Subscription>) -> Result<Reply> {
        self.check_not_reader()?;

        let mut half = self
            .send_half
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.exchange(&mut half, payload, subscription)
    }

    fn check_not_reader(&self) -> Result<()> {
        if thread::current().id() == self.reader_thread {
            return Err(SsipError::Communication(
                "cannot send from an event callback on the same connection".to_string(),
            ));
        }
        Ok(())
    }

    /// Write `payload` and wait for its reply. The caller holds the send lock.
    fn exchange(
        &self,
        half: &mut SendHalf,
        payload: &str,
        subscription: Option<Subscription>,
    ) -> Result<Reply> {
        if !self.is_alive() {
            return Err(self.shared.dead_error());
        }

        let tracked = subscription.is_some();
        if tracked {
            self.shared.dispatcher().set_pending(subscription);
        }

        debug!("📤 {:?}", payload);
        let written = half
            .writer
            .write_all(payload.as_bytes())
            .and_then(|_| half.writer.flush());

        let result = match written {
            Ok(()) => half.replies.recv().map_err(|_| self.shared.dead_error()),
            Err(e) => {
                warn!("⚠️ Write to {} failed: {}", self.peer, e);
                Err(SsipError::Communication(format!("write failed: {}", e)))
            }
        };

        if tracked && result.is_err() {
            self.shared.dispatcher().set_pending(None);
        }

        let reply = result?;
        debug!("📥 {} {:?}", reply, reply.data);
        Ok(reply)
    }

    /// Install the connection-wide event sink, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        self.shared.dispatcher().set_callback(callback);
    }

    pub fn clear_callback(&self) {
        self.shared.dispatcher().clear_callback();
    }

    /// Subscribe to the events of an already known message id.
    pub fn subscribe(&self, message_id: u32, subscription: Subscription) {
        self.shared.dispatcher().subscribe(message_id, subscription);
    }

    pub fn unsubscribe(&self, message_id: u32) -> bool {
        self.shared.dispatcher().unsubscribe(message_id)
    }

    pub fn is_subscribed(&self, message_id: u32) -> bool {
        self.shared.dispatcher().is_subscribed(message_id)
    }

    /// Events addressed to any other client id are dropped once this is set.
    pub fn set_client_id(&self, client_id: u32) {
        *self
            .shared
            .client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(client_id);
    }

    pub fn client_id(&self) -> Option<u32> {
        self.shared.client_id()
    }

    /// True while the reading thread runs and `close` has not been called.
    pub fn is_alive(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && !self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Close the connection. Idempotent.
    ///
    /// Both socket directions are shut down so the blocked read returns,
    /// then the reading thread is joined. Callers blocked on a reply are
    /// released with [`SsipError::Communication`].
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🔌 Closing connection to {}", self.peer);

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Socket shutdown: {}", e);
        }

        if thread::current().id() == self.reader_thread {
            warn!("⚠️ Connection closed from an event callback; reader exits on its own");
            return;
        }

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("❌ SSIP reader thread panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("client_id", &self.client_id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Body of the reading thread.
fn run_reader(mut framer: ReplyReader<TcpStream>, shared: Arc<Shared>, replies: Sender<Reply>) {
    debug!("🎧 SSIP reader started");

    let exit = loop {
        match framer.read_reply() {
            Ok(reply) if reply.is_event() => shared.handle_event(&reply),
            Ok(reply) => {
                if let Some(message_id) = shared.dispatcher().attach_pending(&reply) {
                    debug!("🔔 Tracking message {}", message_id);
                }
                if replies.send(reply).is_err() {
                    // Receiver gone: the connection itself was dropped.
                    break ReaderExit::PeerClosed;
                }
            }
            Err(ProtocolError::ConnectionClosed) => break ReaderExit::PeerClosed,
            Err(ProtocolError::Malformed(detail)) => {
                error!("❌ Protocol violation, abandoning connection: {}", detail);
                break ReaderExit::Violation(detail);
            }
            Err(ProtocolError::Io(e)) => break ReaderExit::Io(e.to_string()),
        }
    };

    if !shared.closed.load(Ordering::SeqCst) {
        match &exit {
            ReaderExit::PeerClosed => info!("🔌 Speech daemon closed the connection"),
            other => warn!("⚠️ SSIP reader stopped: {:?}", other),
        }
    }

    // Record why before the sender drops and wakes any waiting caller.
    *shared.exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit);
    shared.running.store(false, Ordering::SeqCst);
    drop(replies);

    debug!("🛑 SSIP reader stopped");
}
