//! Default/reference `TransportAdapter` (component A), backed by libp2p
//! request-response. One long-lived Swarm runs on a background task; each
//! `download()` call sends a `Command::Fetch` and awaits a oneshot reply,
//! so many chunk downloads can be in flight against the same Swarm at once.

use crate::core::transport::{ChunkSink, SinkOutcome, TransferReport, TransportAdapter, TransportError};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::StreamExt;
use libp2p::{
    gossipsub, identity, noise,
    swarm::{Config as SwarmConfig, Executor, NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport,
};
use libp2p_request_response as rr;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHUNK_PROTOCOL: &str = "/swarmget/chunk/1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const CONTENT_TOPIC: &str = "swarmget-content";

/// Gossipsub payload announcing the verified digest for `content_key`. This
/// is the wire shape the Hash Oracle (component, spec §6.2) rides on top of
/// this same Swarm: `Lookup(content-key) -> digest?` / `Publish(content-key,
/// digest)`, not a peer-presence index.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Announcement {
    content_key: String,
    digest: String,
}

/// Wire request: pull up to `max_bytes` starting at `start_offset` from
/// `remote_path`. Mirrors the teacher's `(hash, offset)` pair, extended
/// with an explicit length cap so a slow host can't stream unboundedly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ChunkRequest {
    remote_path: String,
    start_offset: u64,
    max_bytes: u64,
}

#[derive(Clone, Default)]
struct ChunkCodec;

#[async_trait::async_trait]
impl rr::Codec for ChunkCodec {
    type Protocol = String;
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    async fn read_request<T>(&mut self, _p: &Self::Protocol, io: &mut T) -> std::io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        io.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read_response<T>(&mut self, _p: &Self::Protocol, io: &mut T) -> std::io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        io.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn write_request<T>(&mut self, _p: &Self::Protocol, io: &mut T, req: Self::Request) -> std::io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&req).await
    }

    async fn write_response<T>(&mut self, _p: &Self::Protocol, io: &mut T, res: Self::Response) -> std::io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&res).await
    }
}

fn encode_request(req: &ChunkRequest) -> Vec<u8> {
    bincode::serialize(req).unwrap_or_default()
}

fn decode_request(buf: &[u8]) -> std::result::Result<ChunkRequest, Box<bincode::ErrorKind>> {
    bincode::deserialize(buf)
}

#[derive(NetworkBehaviour)]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    rr: rr::Behaviour<ChunkCodec>,
}

struct TokioExec;
impl Executor for TokioExec {
    fn exec(&self, fut: std::pin::Pin<Box<dyn futures::Future<Output = ()> + Send + 'static>>) {
        tokio::spawn(fut);
    }
}

enum Command {
    Dial {
        addr: Multiaddr,
    },
    Fetch {
        peer: String,
        request: ChunkRequest,
        reply: oneshot::Sender<std::result::Result<Vec<u8>, TransportError>>,
    },
    Publish {
        content_key: String,
        digest: String,
    },
    Lookup {
        content_key: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// A file-serving callback: given `(remote_path, start_offset, max_bytes)`,
/// returns the bytes this node has available to serve a peer's request.
/// Left pluggable rather than baked into the Swarm loop, since seeding is
/// orthogonal to the download path this crate cares about.
pub trait LocalContentServer: Send + Sync + 'static {
    fn read_at(&self, remote_path: &str, start_offset: u64, max_bytes: u64) -> std::io::Result<Vec<u8>>;
}

/// A server that serves nothing; used when this node is a pure downloader.
pub struct NoLocalContent;

impl LocalContentServer for NoLocalContent {
    fn read_at(&self, _remote_path: &str, _start_offset: u64, _max_bytes: u64) -> std::io::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub struct Libp2pTransport {
    command_tx: mpsc::Sender<Command>,
    local_peer_id: PeerId,
    _runtime: JoinHandle<()>,
}

impl Libp2pTransport {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub async fn dial(&self, addr: Multiaddr) {
        let _ = self.command_tx.send(Command::Dial { addr }).await;
    }

    /// Announces, over gossipsub, the verified digest for `content_key`.
    pub async fn publish_digest(&self, content_key: &str, digest: &str) {
        let _ = self
            .command_tx
            .send(Command::Publish {
                content_key: content_key.to_string(),
                digest: digest.to_string(),
            })
            .await;
    }

    /// Returns the last digest observed (locally published or gossiped) for
    /// `content_key`, if any.
    pub async fn lookup_digest(&self, content_key: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Lookup {
                content_key: content_key.to_string(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn new(content: impl LocalContentServer) -> crate::utils::error::Result<Self> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::new(tcp::Config::default())
            .upgrade(libp2p::core::upgrade::Version::V1)
            .authenticate(noise::Config::new(&local_key).map_err(|e| {
                crate::utils::error::SwarmError::invalid_config(format!("noise config: {e}"))
            })?)
            .multiplex(yamux::Config::default())
            .timeout(REQUEST_TIMEOUT)
            .boxed();

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .validation_mode(gossipsub::ValidationMode::None)
            .message_id_fn(|m| gossipsub::MessageId::from(&m.data[..]))
            .build()
            .map_err(|e| crate::utils::error::SwarmError::invalid_config(format!("gossipsub config: {e:?}")))?;
        let mut gossipsub = gossipsub::Behaviour::new(gossipsub::MessageAuthenticity::Anonymous, gossipsub_config)
            .map_err(|e| crate::utils::error::SwarmError::invalid_config(e.to_string()))?;
        let topic = gossipsub::IdentTopic::new(CONTENT_TOPIC);
        gossipsub
            .subscribe(&topic)
            .map_err(|e| crate::utils::error::SwarmError::invalid_config(e.to_string()))?;

        let protocols = std::iter::once((CHUNK_PROTOCOL.to_string(), rr::ProtocolSupport::Full));
        let rr = rr::Behaviour::<ChunkCodec>::new(protocols, Default::default());

        let behaviour = Behaviour { gossipsub, rr };
        let mut swarm = Swarm::new(transport, behaviour, local_peer_id, SwarmConfig::with_executor(TokioExec));

        let (command_tx, command_rx) = mpsc::channel::<Command>(256);
        let runtime = tokio::spawn(run_swarm_loop(swarm, command_rx, Box::new(content), topic));

        Ok(Self {
            command_tx,
            local_peer_id,
            _runtime: runtime,
        })
    }
}

async fn run_swarm_loop(
    mut swarm: Swarm<Behaviour>,
    mut command_rx: mpsc::Receiver<Command>,
    content: Box<dyn LocalContentServer>,
    topic: gossipsub::IdentTopic,
) {
    let mut pending: HashMap<rr::OutboundRequestId, oneshot::Sender<std::result::Result<Vec<u8>, TransportError>>> =
        HashMap::new();
    let mut peer_ids: HashMap<String, PeerId> = HashMap::new();
    // content_key -> last known digest, fed by our own Publish commands and
    // by gossipsub Announcements from other nodes.
    let mut known_content: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => match cmd {
                Command::Dial { addr } => {
                    let _ = Swarm::dial(&mut swarm, addr);
                }
                Command::Fetch { peer, request, reply } => {
                    let peer_id = match peer_ids.get(&peer) {
                        Some(id) => *id,
                        None => match PeerId::from_str(&peer) {
                            Ok(id) => {
                                peer_ids.insert(peer.clone(), id);
                                id
                            }
                            Err(_) => {
                                let _ = reply.send(Err(TransportError::Other(format!("invalid peer id: {peer}"))));
                                continue;
                            }
                        },
                    };
                    let request_id = swarm.behaviour_mut().rr.send_request(&peer_id, encode_request(&request));
                    pending.insert(request_id, reply);
                }
                Command::Publish { content_key, digest } => {
                    let announcement = Announcement { content_key: content_key.clone(), digest: digest.clone() };
                    if let Ok(payload) = bincode::serialize(&announcement) {
                        let _ = swarm.behaviour_mut().gossipsub.publish(topic.clone(), payload);
                    }
                    known_content.insert(content_key, digest);
                }
                Command::Lookup { content_key, reply } => {
                    let _ = reply.send(known_content.get(&content_key).cloned());
                }
            },
            event = swarm.select_next_some() => {
                match event {
                    SwarmEvent::Behaviour(BehaviourEvent::Rr(ev)) => {
                        handle_rr_event(&mut swarm, ev, &mut pending, content.as_ref());
                    }
                    SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                        if let Ok(announcement) = bincode::deserialize::<Announcement>(&message.data) {
                            known_content.insert(announcement.content_key, announcement.digest);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn handle_rr_event(
    swarm: &mut Swarm<Behaviour>,
    event: rr::Event<Vec<u8>, Vec<u8>>,
    pending: &mut HashMap<rr::OutboundRequestId, oneshot::Sender<std::result::Result<Vec<u8>, TransportError>>>,
    content: &dyn LocalContentServer,
) {
    match event {
        rr::Event::Message { message, .. } => match message {
            rr::Message::Request { request, channel, .. } => {
                let response = match decode_request(&request) {
                    Ok(req) => content
                        .read_at(&req.remote_path, req.start_offset, req.max_bytes)
                        .unwrap_or_default(),
                    Err(_) => Vec::new(),
                };
                let _ = swarm.behaviour_mut().rr.send_response(channel, response);
            }
            rr::Message::Response { request_id, response } => {
                if let Some(reply) = pending.remove(&request_id) {
                    let _ = reply.send(Ok(response));
                }
            }
        },
        rr::Event::OutboundFailure { request_id, error, .. } => {
            if let Some(reply) = pending.remove(&request_id) {
                let _ = reply.send(Err(TransportError::Other(format!("{error:?}"))));
            }
        }
        rr::Event::InboundFailure { .. } | rr::Event::ResponseSent { .. } => {}
    }
}

#[async_trait]
impl TransportAdapter for Libp2pTransport {
    async fn download(
        &self,
        peer: &str,
        remote_path: &str,
        start_offset: u64,
        sink: &mut ChunkSink,
        cancel: CancellationToken,
    ) -> std::result::Result<TransferReport, TransportError> {
        let started = Instant::now();
        let mut offset = start_offset;
        let mut ttfb_ms = None;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let (reply_tx, reply_rx) = oneshot::channel();
            let request = ChunkRequest {
                remote_path: remote_path.to_string(),
                start_offset: offset,
                max_bytes: 256 * 1024,
            };
            self.command_tx
                .send(Command::Fetch {
                    peer: peer.to_string(),
                    request,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| TransportError::Other("transport runtime shut down".to_string()))?;

            let response: Vec<u8> = tokio::select! {
                res = reply_rx => {
                    let inner = res.map_err(|_| TransportError::Other("transport runtime dropped reply".to_string()))?;
                    inner?
                }
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            };

            if ttfb_ms.is_none() {
                ttfb_ms = Some(started.elapsed().as_millis() as u64);
            }
            if response.is_empty() {
                if sink.is_done() || offset == start_offset {
                    break;
                }
                return Err(TransportError::Other("peer closed stream before chunk was satisfied".to_string()));
            }

            let consumed = response.len() as u64;
            let outcome = sink.accept(&response).await.map_err(|e| TransportError::Other(e.to_string()))?;
            offset += consumed;
            if outcome == SinkOutcome::Done {
                break;
            }
        }

        Ok(TransferReport {
            bytes_written: sink.written(),
            ttfb_ms: ttfb_ms.unwrap_or(0),
        })
    }
}
