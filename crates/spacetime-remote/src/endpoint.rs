//! The serving half of a node: accepts links and answers push and pull
//! requests against the shared graph.

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::frame::{read_frame, write_frame};
use crate::link::PeerLink;
use crate::message::{Message, Request, RequestType, Response, Status};
use parking_lot::Mutex;
use spacetime_core::{PeerId, TransactionId};
use spacetime_graph::{GraphError, VersionGraph};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// A node's presence on the network.
///
/// One endpoint per graph: it names the node, keeps the per-peer links, and
/// serves incoming connections. Outgoing links are [`Remote`](crate::Remote)s
/// built on it.
pub struct Endpoint {
    name: PeerId,
    graph: Arc<VersionGraph>,
    config: RemoteConfig,
    tie_breaker: u64,
    links: Mutex<HashMap<PeerId, Arc<PeerLink>>>,
}

impl Endpoint {
    /// The endpoint speaks under the graph's name.
    pub fn new(graph: Arc<VersionGraph>, config: RemoteConfig) -> Arc<Self> {
        Arc::new(Endpoint {
            name: graph.name().clone(),
            graph,
            config,
            tie_breaker: rand::random(),
            links: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &PeerId {
        &self.name
    }

    pub fn graph(&self) -> &Arc<VersionGraph> {
        &self.graph
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    /// The link to `peer`, created on first use.
    pub fn link(&self, peer: &PeerId) -> Arc<PeerLink> {
        let mut links = self.links.lock();
        Arc::clone(
            links
                .entry(peer.clone())
                .or_insert_with(|| Arc::new(PeerLink::new(peer.clone(), self.tie_breaker))),
        )
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    fn hello(&self) -> Message {
        Message::Hello {
            app_name: self.name.clone(),
            tie_breaker: self.tie_breaker,
        }
    }

    fn welcome(&self, message: Option<Message>) -> Result<Arc<PeerLink>> {
        match message {
            Some(Message::Hello {
                app_name,
                tie_breaker,
            }) => {
                if app_name == self.name {
                    return Err(RemoteError::Protocol(format!(
                        "peer claims our own name {}",
                        app_name
                    )));
                }
                let link = self.link(&app_name);
                link.set_remote_tie(tie_breaker);
                Ok(link)
            }
            Some(other) => Err(RemoteError::unexpected("Hello", &other)),
            None => Err(RemoteError::Closed),
        }
    }

    /// Client side of the handshake: speak first, then learn the peer.
    pub(crate) async fn greet<S>(&self, stream: &mut S) -> Result<Arc<PeerLink>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max = self.config.max_frame_len;
        write_frame(stream, &self.hello(), max).await?;
        self.welcome(read_frame(stream, max).await?)
    }

    async fn answer_greeting<S>(&self, stream: &mut S) -> Result<Arc<PeerLink>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max = self.config.max_frame_len;
        let link = self.welcome(read_frame(stream, max).await?)?;
        write_frame(stream, &self.hello(), max).await?;
        Ok(link)
    }

    // ------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------

    /// Accept connections forever, serving each on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(node = %self.name, addr = ?listener.local_addr().ok(), "Listening");
        loop {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let endpoint = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = endpoint.serve_connection(stream).await {
                    warn!(%addr, error = %e, "Connection failed");
                }
            });
        }
    }

    /// Serve one connection until the peer closes it.
    pub async fn serve_connection<S>(self: Arc<Self>, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let link = self.answer_greeting(&mut stream).await?;
        info!(node = %self.name, peer = %link.peer(), "Peer connected");

        let max = self.config.max_frame_len;
        loop {
            match read_frame(&mut stream, max).await? {
                None => {
                    info!(node = %self.name, peer = %link.peer(), "Peer disconnected");
                    return Ok(());
                }
                Some(Message::Request(request)) => {
                    self.handle_request(&link, request, &mut stream).await?;
                }
                Some(other) => return Err(RemoteError::unexpected("Request", &other)),
            }
        }
    }

    async fn handle_request<S>(&self, link: &PeerLink, request: Request, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if &request.app_name != link.peer() {
            return Err(RemoteError::Protocol(format!(
                "request from {} on the link of {}",
                request.app_name,
                link.peer()
            )));
        }
        self.apply_confirmations(link.peer(), &request.confirmed);

        if link.should_reject(&self.name) {
            warn!(node = %self.name, peer = %link.peer(), kind = ?request.request_type, "Rejecting request, link is busy");
            let refusal = Response::refusal(self.name.clone(), Status::LockReject);
            return write_frame(stream, &Message::Response(refusal), self.config.max_frame_len).await;
        }

        match request.request_type {
            RequestType::Push => self.serve_push(link, request, stream).await,
            RequestType::Pull => self.serve_pull(link, request, stream).await,
        }
    }

    /// Confirmations name offers of ours the peer applied. Stale ones are
    /// expected after retries.
    pub(crate) fn apply_confirmations(&self, peer: &PeerId, confirmed: &[TransactionId]) {
        for txid in confirmed {
            match self.graph.confirm(peer, txid) {
                Ok(version) => debug!(peer = %peer, txid = %txid, version = %version, "Offer confirmed"),
                Err(e) => debug!(peer = %peer, txid = %txid, error = %e, "Ignoring confirmation"),
            }
        }
    }

    async fn serve_push<S>(&self, link: &PeerLink, request: Request, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = link.peer().clone();
        let max = self.config.max_frame_len;
        if !request.wait {
            let early = Response::success(
                self.name.clone(),
                vec![self.graph.head()],
                self.graph.drain_confirmed(&peer),
            );
            write_frame(stream, &Message::Response(early), max).await?;
        }

        let payload = request.data.unwrap_or_default();
        let edges = payload.edges.len();
        let graph = Arc::clone(&self.graph);
        let origin = peer.clone();
        let head = tokio::task::spawn_blocking(move || graph.put_with(&origin, &payload.refs, &payload.frontier, payload.edges))
            .await??;
        if let Some(txid) = request.transaction_id {
            self.graph.acknowledge(&peer, txid);
        }
        if let Some(version) = request.versions.last() {
            link.set_version_from_remote(version.clone());
        }
        info!(node = %self.name, peer = %peer, edges, head = %head, "Applied push");

        if request.wait {
            let reply = Response::success(self.name.clone(), vec![head], self.graph.drain_confirmed(&peer));
            write_frame(stream, &Message::Response(reply), max).await?;
        }
        Ok(())
    }

    async fn serve_pull<S>(&self, link: &PeerLink, request: Request, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = link.peer().clone();
        let max = self.config.max_frame_len;
        if request.wait {
            let graph = Arc::clone(&self.graph);
            let known = request.versions.clone();
            let timeout = request.wait_duration();
            let waited = tokio::task::spawn_blocking(move || graph.wait_for_change(&known, timeout)).await?;
            match waited {
                Ok(()) => {}
                Err(GraphError::Timeout(_)) => {
                    debug!(node = %self.name, peer = %peer, ?timeout, "Long poll timed out");
                    let refusal = Response::refusal(self.name.clone(), Status::Timeout);
                    return write_frame(stream, &Message::Response(refusal), max).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let offer = self.graph.get(&peer, &request.versions)?;
        let head = offer.head.clone();
        let txid = offer.transaction_id.clone();
        let edges = offer.edges.len();
        let reply = Response::offer(self.name.clone(), offer, self.graph.drain_confirmed(&peer));
        if let Err(e) = write_frame(stream, &Message::Response(reply), max).await {
            if let Some(txid) = &txid {
                self.graph.abandon(txid);
            }
            return Err(e);
        }
        let Some(txid) = txid else {
            return Ok(());
        };
        debug!(node = %self.name, peer = %peer, edges, txid = %txid, "Offered edges");

        match read_frame(stream, max).await {
            Ok(Some(Message::Ack {
                accepted: true,
                transaction_id,
            })) if transaction_id == txid => {
                self.graph.confirm(&peer, &txid)?;
                link.set_version_from_self(head);
                Ok(())
            }
            Ok(Some(Message::Ack {
                accepted: false,
                transaction_id,
            })) if transaction_id == txid => {
                warn!(node = %self.name, peer = %peer, txid = %txid, "Peer refused offer");
                self.graph.abandon(&txid);
                Ok(())
            }
            Ok(Some(other)) => {
                self.graph.abandon(&txid);
                Err(RemoteError::unexpected("Ack", &other))
            }
            Ok(None) => {
                self.graph.abandon(&txid);
                Err(RemoteError::Closed)
            }
            Err(e) => {
                self.graph.abandon(&txid);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("peers", &self.peers())
            .finish()
    }
}
