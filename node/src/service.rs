//! Task wiring around the consensus engine.
//!
//! The runtime runs a small set of cooperating tasks with queues at every
//! boundary:
//!
//! - a **reader** task turning inbound frames into events,
//! - a **writer** task draining the outbound envelope queue to the socket,
//! - a **stdin** task turning command lines into events,
//! - one-shot **timer** tasks that enqueue their expiry as an event,
//! - and the single **consensus loop** below, the only place the engine
//!   (and with it chain, mempool, ledger, and vote state) is touched.
//!
//! Timer expirations never mutate state from a side task; they come back
//! through the same queue as everything else.

use {
    crate::{
        persist,
        repl::{self, ReplOutcome},
        settings::Settings,
    },
    log::{error, info, warn},
    stakesim_consensus::{
        config::ConfigError,
        engine::{ConsensusEngine, EngineOutput, TimerRequest},
        ledger::WalletLedger,
        message::Message,
    },
    stakesim_net::{
        config::NetConfig,
        error::NetError,
        message::Envelope,
        transport,
    },
    std::{path::PathBuf, time::Duration},
    thiserror::Error,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpStream,
        sync::mpsc,
    },
};

/// Fatal errors bringing a node down.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Everything the consensus loop can be woken up by.
#[derive(Debug)]
enum NodeEvent {
    /// A decoded frame from the relay.
    Inbound(Envelope),
    /// A line typed at the prompt.
    Command(String),
    /// A timer armed by the engine fired.
    Timer(TimerRequest),
    /// The relay connection died.
    Disconnected,
}

/// Run a node until the user exits, the relay says goodbye, or the
/// connection is permanently lost together with the command stream.
pub async fn run_node(node_id: &str, settings: &Settings) -> Result<(), NodeError> {
    let config = settings.consensus_config();
    config.validate()?;
    let net = NetConfig::default();
    let data_dir = persist::data_dir(node_id);

    let genesis_state = WalletLedger::seeded(settings.initial_state.clone());
    let chain = persist::restore_chain(&data_dir, genesis_state);
    let mut engine = ConsensusEngine::with_chain(node_id, config, chain);

    let (events_tx, mut events_rx) = mpsc::channel::<NodeEvent>(net.channel_buffer_size);
    spawn_stdin(events_tx.clone());

    let addr = settings.server_addr();
    let mut connection = Connection::establish(&addr, &net, events_tx.clone()).await?;
    connection.send(Envelope::new(node_id, Message::Hello)).await?;
    info!(
        "node {node_id} started, connected to relay at {addr}, chain height {}",
        engine.chain().height()
    );

    // Align with the longest live chain before participating.
    let output = engine.request_sync();
    process_output(node_id, &engine, &connection, &events_tx, &data_dir, output).await;

    while let Some(event) = events_rx.recv().await {
        let output = match event {
            NodeEvent::Inbound(envelope) => {
                Some(engine.handle_message(&envelope.sender_id, envelope.message))
            }
            NodeEvent::Timer(TimerRequest::VoteTimeout { block_hash, .. }) => {
                Some(engine.on_vote_timeout(&block_hash))
            }
            NodeEvent::Timer(TimerRequest::SyncDeadline { .. }) => {
                Some(engine.on_sync_deadline())
            }
            NodeEvent::Command(line) => match repl::dispatch(&mut engine, &line) {
                ReplOutcome::Handled(output) => output,
                ReplOutcome::Exit => break,
            },
            NodeEvent::Disconnected => {
                warn!("lost connection to the relay, reconnecting");
                match Connection::establish(&addr, &net, events_tx.clone()).await {
                    Ok(reconnected) => {
                        connection = reconnected;
                        if let Err(e) =
                            connection.send(Envelope::new(node_id, Message::Hello)).await
                        {
                            warn!("could not announce ourselves after reconnect: {e}");
                        }
                        info!("reconnected to relay at {addr}");
                        Some(engine.request_sync())
                    }
                    Err(e) => {
                        error!("reconnect failed ({e}); node is offline, local state kept");
                        None
                    }
                }
            }
        };
        if let Some(output) = output {
            let shutdown =
                process_output(node_id, &engine, &connection, &events_tx, &data_dir, output)
                    .await;
            if shutdown {
                break;
            }
        }
    }

    info!("node {node_id} exiting");
    if let Err(e) = connection.send(Envelope::new(node_id, Message::Bye)).await {
        warn!("could not send goodbye: {e}");
    }
    if let Err(e) = persist::save_chain(&data_dir, engine.chain().active()) {
        warn!("could not save chain on exit: {e}");
    }
    Ok(())
}

/// Execute one engine output: broadcast, arm timers, persist on head
/// changes. Returns whether the engine asked to shut down.
async fn process_output(
    node_id: &str,
    engine: &ConsensusEngine,
    connection: &Connection,
    events: &mpsc::Sender<NodeEvent>,
    data_dir: &PathBuf,
    output: EngineOutput,
) -> bool {
    for message in output.outbound {
        if let Err(e) = connection.send(Envelope::new(node_id, message)).await {
            warn!("outbound send failed: {e}");
        }
    }
    for timer in output.timers {
        let events = events.clone();
        let seconds = match &timer {
            TimerRequest::VoteTimeout { seconds, .. } => *seconds,
            TimerRequest::SyncDeadline { seconds } => *seconds,
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            let _ = events.send(NodeEvent::Timer(timer)).await;
        });
    }
    if output.head_changed {
        if let Err(e) = persist::save_chain(data_dir, engine.chain().active()) {
            warn!("could not persist chain: {e}");
        }
    }
    output.shutdown
}

/// A live relay connection: a writer task fed through `outbound` and a
/// reader task feeding the event queue until EOF or a transport error.
struct Connection {
    outbound: mpsc::Sender<Envelope>,
}

impl Connection {
    /// Connect with bounded exponential backoff.
    async fn establish(
        addr: &str,
        net: &NetConfig,
        events: mpsc::Sender<NodeEvent>,
    ) -> Result<Connection, NetError> {
        let mut delay = net.reconnect_base_delay_ms;
        let mut attempt = 1;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(Self::spawn_io(stream, net, events)),
                Err(e) => {
                    if attempt >= net.reconnect_max_attempts {
                        return Err(NetError::Transport(e));
                    }
                    warn!(
                        "connect to {addr} failed (attempt {attempt}/{}): {e}",
                        net.reconnect_max_attempts
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(net.reconnect_max_delay_ms);
                    attempt += 1;
                }
            }
        }
    }

    fn spawn_io(stream: TcpStream, net: &NetConfig, events: mpsc::Sender<NodeEvent>) -> Connection {
        let (mut read_half, mut write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(net.channel_buffer_size);
        let max = net.max_message_size;

        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Err(e) = transport::write_envelope(&mut write_half, &envelope, max).await {
                    warn!("outbound write failed: {e}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match transport::read_envelope(&mut read_half, max).await {
                    Ok(Some(envelope)) => {
                        if events.send(NodeEvent::Inbound(envelope)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(NetError::Serialization(e)) => {
                        // Drop the frame, keep the connection.
                        warn!("malformed frame from relay: {e}");
                    }
                    Err(e) => {
                        warn!("transport error: {e}");
                        break;
                    }
                }
            }
            let _ = events.send(NodeEvent::Disconnected).await;
        });

        Connection {
            outbound: outbound_tx,
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<(), NetError> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| NetError::ChannelClosed)
    }
}

/// Forward command lines from stdin into the event queue.
fn spawn_stdin(events: mpsc::Sender<NodeEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if events.send(NodeEvent::Command(line)).await.is_err() {
                return;
            }
        }
    });
}
