//! The central relay every node connects to.
//!
//! The relay fans every inbound frame out to all other connected clients
//! without inspecting message semantics; the only payload it looks at is
//! `Hello`, which binds a connection to a node id. On top of plain fan-out
//! it provides the simulation knobs: a periodic `Step` broadcast that
//! prompts the elected validator to forge, per-node packet dropping (the
//! named node stops *receiving* deliveries; its own traffic still
//! propagates), and per-node delivery delay.

use {
    crate::{
        config::NetConfig,
        error::Result,
        message::Envelope,
        transport,
    },
    log::{debug, error, info, warn},
    stakesim_consensus::message::{Message, SERVER_ID},
    std::{
        collections::{HashMap, HashSet},
        net::SocketAddr,
        sync::{Arc, Mutex, MutexGuard},
        time::Duration,
    },
    tokio::{
        net::{TcpListener, TcpStream},
        sync::{mpsc, Notify},
        task::JoinHandle,
    },
};

/// Relay endpoint and stepping behavior.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface to bind on.
    pub host: String,
    /// Port to bind on (0 picks a free port; useful in tests).
    pub port: u16,
    /// Seconds between automatic `Step` broadcasts.
    pub step_interval: f64,
    /// Whether to start the automatic step loop at all. Disabled for
    /// manually driven experiments.
    pub auto_step: bool,
    /// Transport limits.
    pub net: NetConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            step_interval: 5.0,
            auto_step: true,
            net: NetConfig::default(),
        }
    }
}

struct ClientHandle {
    /// Set once the client's `Hello` arrives.
    node_id: Option<String>,
    /// Queue drained by the client's writer task.
    outbound: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct RelayState {
    clients: HashMap<u64, ClientHandle>,
    next_client_id: u64,
    /// Node ids currently cut off from deliveries.
    drop_set: HashSet<String>,
    /// Node id -> artificial delivery delay in seconds.
    delay_map: HashMap<String, f64>,
}

/// A running relay and its admin surface.
pub struct Relay {
    local_addr: SocketAddr,
    config: RelayConfig,
    state: Arc<Mutex<RelayState>>,
    shutdown: Arc<Notify>,
    step_task: Mutex<Option<JoinHandle<()>>>,
    accept_task: JoinHandle<()>,
}

impl Relay {
    /// Bind and start accepting connections. The automatic step loop is
    /// started when the config asks for it.
    pub async fn start(config: RelayConfig) -> Result<Relay> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!("relay listening on {local_addr}");

        let state = Arc::new(Mutex::new(RelayState::default()));
        let shutdown = Arc::new(Notify::new());

        let accept_state = state.clone();
        let accept_shutdown = shutdown.clone();
        let net = config.net.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!("accepted connection from {addr}");
                            tokio::spawn(handle_client(stream, accept_state.clone(), net.clone()));
                        }
                        Err(e) => error!("accept error: {e}"),
                    },
                    _ = accept_shutdown.notified() => break,
                }
            }
        });

        let relay = Relay {
            local_addr,
            config,
            state,
            shutdown,
            step_task: Mutex::new(None),
            accept_task,
        };
        if relay.config.auto_step {
            relay.start_steps();
        }
        Ok(relay)
    }

    /// The bound address (useful when the port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcast one `Step` right now.
    pub async fn step(&self) {
        if let Ok(frame) =
            Envelope::new(SERVER_ID, Message::Step).serialize_framed(self.config.net.max_message_size)
        {
            broadcast(&self.state, None, frame).await;
            info!("broadcast step to all nodes");
        }
    }

    /// Start the periodic step loop (idempotent).
    pub fn start_steps(&self) {
        let mut task = self.locked_step_task();
        if task.is_some() {
            return;
        }
        let state = self.state.clone();
        let interval = self.config.step_interval;
        let max = self.config.net.max_message_size;
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs_f64(interval)).await;
                if let Ok(frame) =
                    Envelope::new(SERVER_ID, Message::Step).serialize_framed(max)
                {
                    broadcast(&state, None, frame).await;
                    info!("broadcast step to all nodes");
                }
            }
        }));
        info!("automatic steps every {interval}s");
    }

    /// Stop the periodic step loop.
    pub fn stop_steps(&self) {
        if let Some(task) = self.locked_step_task().take() {
            task.abort();
            info!("stopped automatic steps");
        }
    }

    /// Cut a node off from deliveries (or restore it).
    pub fn set_drop(&self, node_id: &str, enabled: bool) {
        let mut state = self.locked_state();
        if enabled {
            state.drop_set.insert(node_id.to_string());
        } else {
            state.drop_set.remove(node_id);
        }
        info!("drop {node_id} -> {}", if enabled { "on" } else { "off" });
    }

    /// Flip a node's drop flag; returns the new setting.
    pub fn toggle_drop(&self, node_id: &str) -> bool {
        let enabled = !self.locked_state().drop_set.contains(node_id);
        self.set_drop(node_id, enabled);
        enabled
    }

    /// Currently dropped node ids, sorted.
    pub fn drops(&self) -> Vec<String> {
        let mut drops: Vec<String> = self.locked_state().drop_set.iter().cloned().collect();
        drops.sort();
        drops
    }

    /// Delay (or undelay, with `None`) deliveries to a node.
    pub fn set_delay(&self, node_id: &str, seconds: Option<f64>) {
        let mut state = self.locked_state();
        match seconds {
            Some(secs) => {
                state.delay_map.insert(node_id.to_string(), secs);
                info!("delay {node_id} -> {}ms", (secs * 1000.0) as u64);
            }
            None => {
                state.delay_map.remove(node_id);
                info!("delay {node_id} -> off");
            }
        }
    }

    /// Current delays in milliseconds, sorted by node id.
    pub fn delays(&self) -> Vec<(String, u64)> {
        let mut delays: Vec<(String, u64)> = self
            .locked_state()
            .delay_map
            .iter()
            .map(|(id, secs)| (id.clone(), (secs * 1000.0) as u64))
            .collect();
        delays.sort();
        delays
    }

    /// Node ids of the currently registered clients, sorted.
    pub fn connected_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .locked_state()
            .clients
            .values()
            .filter_map(|c| c.node_id.clone())
            .collect();
        nodes.sort();
        nodes
    }

    /// Announce shutdown to every client and stop accepting connections.
    pub async fn shutdown(&self) {
        info!("shutting down relay");
        self.stop_steps();
        if let Ok(frame) =
            Envelope::new(SERVER_ID, Message::Bye).serialize_framed(self.config.net.max_message_size)
        {
            broadcast(&self.state, None, frame).await;
        }
        self.shutdown.notify_waiters();
        self.accept_task.abort();
    }

    fn locked_state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().expect("relay state lock")
    }

    fn locked_step_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.step_task.lock().expect("relay step task lock")
    }
}

/// Fan a framed message out to every client except `origin`, honoring the
/// drop set and delay map (both keyed by the receiving node's id).
async fn broadcast(state: &Arc<Mutex<RelayState>>, origin: Option<u64>, frame: Vec<u8>) {
    let mut targets = Vec::new();
    {
        let state = state.lock().expect("relay state lock");
        for (client_id, client) in &state.clients {
            if Some(*client_id) == origin {
                continue;
            }
            let delay = match &client.node_id {
                Some(node_id) => {
                    if state.drop_set.contains(node_id) {
                        debug!("dropping delivery to {node_id}");
                        continue;
                    }
                    state.delay_map.get(node_id).copied()
                }
                None => None,
            };
            targets.push((client.outbound.clone(), delay));
        }
    }
    for (outbound, delay) in targets {
        let frame = frame.clone();
        match delay {
            Some(seconds) => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                    let _ = outbound.send(frame).await;
                });
            }
            None => {
                let _ = outbound.send(frame).await;
            }
        }
    }
}

/// Per-connection loop: register, relay every readable frame, announce the
/// departure on EOF or error.
async fn handle_client(stream: TcpStream, state: Arc<Mutex<RelayState>>, net: NetConfig) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(net.channel_buffer_size);

    let client_id = {
        let mut state = state.lock().expect("relay state lock");
        let client_id = state.next_client_id;
        state.next_client_id += 1;
        state.clients.insert(
            client_id,
            ClientHandle {
                node_id: None,
                outbound: outbound_tx,
            },
        );
        client_id
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if transport::write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        match transport::read_frame(&mut read_half, net.max_message_size).await {
            Ok(Some(payload)) => match Envelope::deserialize(&payload) {
                Ok(envelope) => {
                    if matches!(envelope.message, Message::Hello) {
                        info!("node {} connected", envelope.sender_id);
                        let mut state = state.lock().expect("relay state lock");
                        if let Some(client) = state.clients.get_mut(&client_id) {
                            client.node_id = Some(envelope.sender_id.clone());
                        }
                    }
                    debug!("relaying {} from {}", envelope.kind(), envelope.sender_id);
                    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
                    frame.extend_from_slice(&payload);
                    broadcast(&state, Some(client_id), frame).await;
                }
                Err(e) => {
                    // Keep the connection; the peer may just be confused.
                    warn!("malformed frame from client {client_id}: {e}");
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!("read error from client {client_id}: {e}");
                break;
            }
        }
    }

    let node_id = {
        let mut state = state.lock().expect("relay state lock");
        state
            .clients
            .remove(&client_id)
            .and_then(|client| client.node_id)
    };
    writer.abort();

    if let Some(node_id) = node_id {
        info!("node {node_id} disconnected");
        if let Ok(frame) =
            Envelope::new(&node_id, Message::Bye).serialize_framed(net.max_message_size)
        {
            broadcast(&state, None, frame).await;
        }
    }
}
