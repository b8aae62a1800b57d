//! Transport adapter: a bidirectional message channel abstraction, plus a
//! reference TCP implementation (§6 "Transport adapter").

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use synckit_proto::wire::FrameCodec;
use synckit_proto::Message;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::error::{SyncKitError, SyncKitResult};

/// Connection lifecycle state (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The handshake has not completed yet.
    Connecting,
    /// The channel is open and ready to send/receive.
    Open,
    /// `close()` was called; in-flight messages may still drain.
    Closing,
    /// The channel is fully closed.
    Closed,
}

type MessageCallback = Box<dyn FnMut(Message) + Send>;
type LifecycleCallback = Box<dyn FnMut() + Send>;

/// A bidirectional channel carrying [`Message`] values (§6).
///
/// Implementors own their own concurrency; the sync manager only ever
/// observes `state()` and registers callbacks.
pub trait TransportAdapter: Send + Sync {
    /// Send one message over the channel.
    fn send(&self, message: Message) -> SyncKitResult<()>;

    /// Register a callback invoked for every incoming message.
    fn on_message(&self, callback: MessageCallback);

    /// Register a callback invoked once the channel opens.
    fn on_open(&self, callback: LifecycleCallback);

    /// Register a callback invoked once the channel closes.
    fn on_close(&self, callback: LifecycleCallback);

    /// The channel's current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Begin closing the channel.
    fn close(&self);
}

#[derive(Default)]
struct Callbacks {
    on_message: Vec<MessageCallback>,
    on_open: Vec<LifecycleCallback>,
    on_close: Vec<LifecycleCallback>,
}

/// A length-delimited TCP transport using the binary wire framing (§4.H),
/// via `synckit-proto`'s `FrameCodec` over `tokio_util::codec::Framed`.
pub struct TcpTransport {
    state: Mutex<ConnectionState>,
    callbacks: Mutex<Callbacks>,
    outbound: tokio::sync::mpsc::UnboundedSender<Message>,
}

impl TcpTransport {
    /// Take ownership of an already-connected socket and spawn the
    /// read/write pump tasks.
    #[must_use]
    pub fn spawn(stream: TcpStream) -> Arc<Self> {
        let framed = Framed::new(stream, FrameCodec::default());
        let (mut sink, mut source) = framed.split();
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

        let transport = Arc::new(Self {
            state: Mutex::new(ConnectionState::Connecting),
            callbacks: Mutex::new(Callbacks::default()),
            outbound: outbound_tx,
        });

        *transport.state.lock() = ConnectionState::Open;
        for cb in &mut transport.callbacks.lock().on_open {
            cb();
        }

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let read_transport = transport.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(frame) => {
                        for cb in &mut read_transport.callbacks.lock().on_message {
                            cb(frame.message.clone());
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "transport frame decode failed, closing connection");
                        break;
                    }
                }
            }
            *read_transport.state.lock() = ConnectionState::Closed;
            for cb in &mut read_transport.callbacks.lock().on_close {
                cb();
            }
        });

        transport
    }
}

impl TransportAdapter for TcpTransport {
    fn send(&self, message: Message) -> SyncKitResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| SyncKitError::TransportFailure("connection closed".to_string()))
    }

    fn on_message(&self, callback: MessageCallback) {
        self.callbacks.lock().on_message.push(callback);
    }

    fn on_open(&self, callback: LifecycleCallback) {
        self.callbacks.lock().on_open.push(callback);
    }

    fn on_close(&self, callback: LifecycleCallback) {
        self.callbacks.lock().on_close.push(callback);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn close(&self) {
        *self.state.lock() = ConnectionState::Closing;
    }
}
