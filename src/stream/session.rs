//! Long-lived subscription session with automatic reconnects.
//!
//! `StreamSession` is a handle to a background worker that owns the
//! connection, the frame parser and the reconnect timer. Transport chunks and
//! timer fires are funnelled into the worker's queue, so parsing, state
//! transitions and reconnect scheduling never run concurrently for one
//! session.
//!
//! Updates are stamped with the session generation. Only `connect` and
//! `disconnect` bump it, before returning, and [`StreamUpdates`] drops anything
//! stamped with an older one, so no update from a superseded connection
//! reaches the consumer after either call. Automatic reconnects keep the
//! generation; inside the worker each connection also has a private epoch that
//! rejects chunks from connections already torn down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::stream::client::{ByteStream, StreamClient, StreamError};
use crate::stream::parser::FrameParser;
use crate::stream::proto::{ConnectionState, Event, StreamUpdate};
use crate::stream::providers::SubscriptionStore;
use crate::stream::reconnect::ReconnectController;

/// Callback interface for consumers that prefer observers over channels.
pub trait StreamListener {
    fn on_open(&mut self) {}

    fn on_event(&mut self, event: Event);

    fn on_close(&mut self, _error: Option<StreamError>) {}
}

/// Consumer side of a session.
#[derive(Debug)]
pub struct StreamUpdates {
    receiver: mpsc::UnboundedReceiver<Stamped>,
    generation: Arc<AtomicU64>,
}

impl StreamUpdates {
    /// Receives the next update not superseded by a later `connect` or
    /// `disconnect`.
    ///
    /// Returns `None` once the session handle has been dropped.
    pub async fn recv(&mut self) -> Option<StreamUpdate> {
        loop {
            let stamped = self.receiver.recv().await?;
            if stamped.generation == self.generation.load(Ordering::SeqCst) {
                return Some(stamped.update);
            }
            trace!(
                event = "stream_update_discarded",
                generation = stamped.generation
            );
        }
    }

    /// Drives `listener` until the session is dropped.
    pub async fn deliver_to<L>(&mut self, listener: &mut L)
    where
        L: StreamListener + ?Sized,
    {
        while let Some(update) = self.recv().await {
            match update {
                StreamUpdate::Opened => listener.on_open(),
                StreamUpdate::Event(event) => listener.on_event(event),
                StreamUpdate::Closed(error) => listener.on_close(error),
            }
        }
    }
}

/// Handle to one subscription's connection lifecycle.
///
/// Dropping the handle stops the worker, the in-flight request and any
/// pending reconnect.
#[derive(Debug)]
pub struct StreamSession {
    commands: mpsc::UnboundedSender<Command>,
    generation: Arc<AtomicU64>,
    state: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

impl StreamSession {
    /// Starts the session worker on the current tokio runtime.
    ///
    /// The session starts [`ConnectionState::Idle`]; nothing is requested
    /// until [`connect`](Self::connect) is called.
    pub fn spawn(
        client: StreamClient,
        store: Arc<dyn SubscriptionStore>,
    ) -> (Self, StreamUpdates) {
        let generation = Arc::new(AtomicU64::new(0));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let worker = SessionWorker {
            reconnect: ReconnectController::new(client.backoff()),
            client,
            store,
            generation: Arc::clone(&generation),
            current_generation: 0,
            current_epoch: 0,
            parser: FrameParser::new(),
            connection: None,
            subscription_id: None,
            state: state_tx,
            updates: update_tx,
            signals: signal_tx,
        };
        let worker = tokio::spawn(worker.run(command_rx, signal_rx));

        let session = Self {
            commands: command_tx,
            generation: Arc::clone(&generation),
            state: state_rx,
            worker,
        };
        let updates = StreamUpdates {
            receiver: update_rx,
            generation,
        };
        (session, updates)
    }

    /// Opens the stream for `subscription_id`, replacing any existing
    /// connection and pending reconnect.
    ///
    /// [`StreamUpdate::Opened`] is delivered as soon as the request has been
    /// issued, before the server answers.
    pub fn connect(&self, subscription_id: impl Into<String>) -> Result<(), StreamError> {
        let generation = self.advance_generation();
        self.send(Command::Connect {
            generation,
            subscription_id: subscription_id.into(),
        })
    }

    /// Cancels the connection and any pending reconnect. No further update of
    /// the cancelled connection is delivered once this returns.
    pub fn disconnect(&self) -> Result<(), StreamError> {
        let generation = self.advance_generation();
        self.send(Command::Disconnect { generation })
    }

    /// Last state published by the worker.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send(&self, command: Command) -> Result<(), StreamError> {
        self.commands
            .send(command)
            .map_err(|_| StreamError::SessionClosed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[derive(Debug)]
struct Stamped {
    generation: u64,
    update: StreamUpdate,
}

#[derive(Debug)]
enum Command {
    Connect {
        generation: u64,
        subscription_id: String,
    },
    Disconnect {
        generation: u64,
    },
}

#[derive(Debug)]
enum Signal {
    Chunk {
        epoch: u64,
        chunk: Bytes,
    },
    Ended {
        epoch: u64,
        error: Option<StreamError>,
    },
    ReconnectDue {
        ticket: u64,
    },
}

struct SessionWorker {
    client: StreamClient,
    store: Arc<dyn SubscriptionStore>,
    generation: Arc<AtomicU64>,
    /// Generation of the last command applied; stamps emitted updates.
    current_generation: u64,
    /// Identifies the live connection among those this worker has opened.
    current_epoch: u64,
    parser: FrameParser,
    reconnect: ReconnectController,
    connection: Option<JoinHandle<()>>,
    subscription_id: Option<String>,
    state: watch::Sender<ConnectionState>,
    updates: mpsc::UnboundedSender<Stamped>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }
        debug!(event = "stream_session_stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                generation,
                subscription_id,
            } => {
                self.teardown();
                self.reconnect.reset();
                self.current_generation = generation;
                if self.is_superseded() {
                    debug!(event = "stream_connect_superseded", generation);
                    return;
                }
                self.open(subscription_id);
            }
            Command::Disconnect { generation } => {
                let was_active = self.connection.is_some() || self.reconnect.is_pending();
                self.teardown();
                self.reconnect.reset();
                self.current_generation = generation;
                self.set_state(ConnectionState::Idle);
                if was_active {
                    debug!(
                        event = "stream_disconnected",
                        subscription_id = self.subscription_id.as_deref().unwrap_or_default()
                    );
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Chunk { epoch, chunk } => {
                if epoch != self.current_epoch || self.connection.is_none() || chunk.is_empty() {
                    return;
                }
                if *self.state.borrow() == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Open);
                    self.reconnect.record_success();
                }
                for event in self.parser.feed(&chunk) {
                    self.emit(StreamUpdate::Event(event));
                }
            }
            Signal::Ended { epoch, error } => {
                if epoch != self.current_epoch || self.connection.is_none() {
                    return;
                }
                self.connection = None;
                self.parser.clear();
                self.set_state(ConnectionState::Closed);

                match &error {
                    Some(err) => warn!(
                        event = "stream_terminated",
                        subscription_id = self.subscription_id.as_deref().unwrap_or_default(),
                        error = %err
                    ),
                    None => info!(
                        event = "stream_terminated",
                        subscription_id = self.subscription_id.as_deref().unwrap_or_default()
                    ),
                }
                self.emit(StreamUpdate::Closed(error));
                self.schedule_reconnect();
            }
            Signal::ReconnectDue { ticket } => {
                if !self.reconnect.take_due(ticket) {
                    return;
                }
                self.resume();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let signals = self.signals.clone();
        self.reconnect.schedule(move |ticket| {
            let _ = signals.send(Signal::ReconnectDue { ticket });
        });
    }

    fn resume(&mut self) {
        let Some(subscription_id) = self.store.current_subscription() else {
            warn!(event = "stream_reconnect_skipped", reason = "no current subscription");
            return;
        };

        // A consumer command is already queued; it decides what happens next.
        if self.is_superseded() {
            debug!(
                event = "stream_reconnect_superseded",
                generation = self.current_generation
            );
            return;
        }

        info!(
            event = "stream_reconnecting",
            subscription_id = %subscription_id,
            generation = self.current_generation
        );
        self.open(subscription_id);
    }

    fn is_superseded(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.current_generation
    }

    fn open(&mut self, subscription_id: String) {
        let request = match self.client.build_request(&subscription_id) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    event = "stream_connect_abandoned",
                    subscription_id = %subscription_id,
                    error = %err
                );
                self.set_state(ConnectionState::Idle);
                return;
            }
        };

        self.current_epoch += 1;
        let epoch = self.current_epoch;
        let body = self.client.open(request);
        let signals = self.signals.clone();
        self.connection = Some(tokio::spawn(read_connection(epoch, body, signals)));
        self.set_state(ConnectionState::Connecting);

        debug!(
            event = "stream_connect_issued",
            subscription_id = %subscription_id,
            epoch
        );
        self.subscription_id = Some(subscription_id);
        self.emit(StreamUpdate::Opened);
    }

    fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
        self.parser.clear();
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, update: StreamUpdate) {
        let _ = self.updates.send(Stamped {
            generation: self.current_generation,
            update,
        });
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.teardown();
        self.reconnect.cancel();
    }
}

async fn read_connection(
    epoch: u64,
    body: BoxFuture<'static, Result<ByteStream, StreamError>>,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let error = match body.await {
        Ok(mut body) => loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    if signals.send(Signal::Chunk { epoch, chunk }).is_err() {
                        return;
                    }
                }
                Some(Err(err)) => break Some(err),
                None => break None,
            }
        },
        Err(err) => Some(err),
    };
    let _ = signals.send(Signal::Ended { epoch, error });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use super::{Stamped, StreamListener, StreamSession, StreamUpdates};
    use crate::stream::client::StreamError;
    use crate::stream::proto::{ConnectionState, Event, StreamUpdate};

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
    }

    impl StreamListener for Recorder {
        fn on_open(&mut self) {
            self.log.push("open".to_string());
        }

        fn on_event(&mut self, event: Event) {
            self.log.push(format!("event:{}", event.name));
        }

        fn on_close(&mut self, error: Option<StreamError>) {
            self.log.push(format!("close:{}", error.is_some()));
        }
    }

    fn stamped(generation: u64, update: StreamUpdate) -> Stamped {
        Stamped { generation, update }
    }

    #[tokio::test]
    async fn updates_from_older_generations_are_discarded() {
        let generation = Arc::new(AtomicU64::new(1));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut updates = StreamUpdates {
            receiver: rx,
            generation: Arc::clone(&generation),
        };

        tx.send(stamped(1, StreamUpdate::Event(Event::new("old", Default::default()))))
            .expect("send");
        generation.store(2, Ordering::SeqCst);
        tx.send(stamped(2, StreamUpdate::Event(Event::new("new", Default::default()))))
            .expect("send");
        drop(tx);

        match updates.recv().await {
            Some(StreamUpdate::Event(event)) => assert_eq!(event.name, "new"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn listener_receives_updates_in_order() {
        let generation = Arc::new(AtomicU64::new(3));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut updates = StreamUpdates {
            receiver: rx,
            generation,
        };

        tx.send(stamped(3, StreamUpdate::Opened)).expect("send");
        tx.send(stamped(3, StreamUpdate::Event(Event::default())))
            .expect("send");
        tx.send(stamped(3, StreamUpdate::Closed(None))).expect("send");
        tx.send(stamped(
            3,
            StreamUpdate::Closed(Some(StreamError::Protocol("reset".to_string()))),
        ))
        .expect("send");
        drop(tx);

        let mut recorder = Recorder::default();
        updates.deliver_to(&mut recorder).await;
        assert_eq!(
            recorder.log,
            vec!["open", "event:message", "close:false", "close:true"]
        );
    }

    #[tokio::test]
    async fn default_listener_callbacks_ignore_open_and_close() {
        struct EventsOnly(Vec<String>);

        impl StreamListener for EventsOnly {
            fn on_event(&mut self, event: Event) {
                self.0.push(event.name);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut updates = StreamUpdates {
            receiver: rx,
            generation: Arc::new(AtomicU64::new(0)),
        };
        tx.send(stamped(0, StreamUpdate::Opened)).expect("send");
        tx.send(stamped(0, StreamUpdate::Event(Event::default())))
            .expect("send");
        tx.send(stamped(
            0,
            StreamUpdate::Closed(Some(StreamError::Protocol("reset".to_string()))),
        ))
        .expect("send");
        drop(tx);

        let mut listener = EventsOnly(Vec::new());
        updates.deliver_to(&mut listener).await;
        assert_eq!(listener.0, vec!["message"]);
    }

    #[tokio::test]
    async fn commands_after_worker_exit_report_session_closed() {
        let (commands, command_rx) = mpsc::unbounded_channel();
        drop(command_rx);
        let (_state_tx, state) = watch::channel(ConnectionState::Idle);
        let session = StreamSession {
            commands,
            generation: Arc::new(AtomicU64::new(0)),
            state,
            worker: tokio::spawn(async {}),
        };

        assert!(matches!(
            session.connect("house-1"),
            Err(StreamError::SessionClosed)
        ));
        assert!(matches!(session.disconnect(), Err(StreamError::SessionClosed)));
    }
}
