//! The client half of a link: pushes our history to one peer and fetches
//! theirs.

use crate::endpoint::Endpoint;
use crate::error::{RemoteError, Result};
use crate::frame::{read_frame, write_frame};
use crate::link::PeerLink;
use crate::message::{Message, Request, Response, Status};
use spacetime_core::{PeerId, TransactionId, VersionId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one attempt.
enum Attempt<T> {
    Done(T),
    Rejected,
}

/// An outgoing connection to one peer's [`Endpoint`].
///
/// Requests on one remote are serialised; open several remotes to the same
/// peer for parallel traffic.
pub struct Remote<S = TcpStream> {
    endpoint: Arc<Endpoint>,
    link: Arc<PeerLink>,
    stream: Mutex<S>,
}

impl Remote<TcpStream> {
    pub async fn connect(endpoint: Arc<Endpoint>, addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::over(endpoint, stream).await
    }
}

impl<S> Remote<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the handshake over an established stream.
    pub async fn over(endpoint: Arc<Endpoint>, mut stream: S) -> Result<Self> {
        let link = endpoint.greet(&mut stream).await?;
        info!(node = %endpoint.name(), peer = %link.peer(), "Connected");
        Ok(Remote {
            endpoint,
            link,
            stream: Mutex::new(stream),
        })
    }

    pub fn peer(&self) -> &PeerId {
        self.link.peer()
    }

    pub fn link(&self) -> &Arc<PeerLink> {
        &self.link
    }

    /// Send the peer everything it is missing. With `wait` the call returns
    /// once the peer applied the edges, otherwise once it received them.
    pub async fn push(&self, wait: bool) -> Result<()> {
        self.retrying("push", || self.try_push(wait)).await
    }

    /// Pull what the peer has and we lack, apply it, and return our new head.
    ///
    /// With `wait` the peer holds the request until it has something new or
    /// `timeout` passes; the latter is [`RemoteError::Timeout`] and leaves
    /// the local graph untouched.
    pub async fn fetch(&self, wait: bool, timeout: Duration) -> Result<VersionId> {
        self.retrying("fetch", || self.try_fetch(wait, timeout)).await
    }

    /// Fetch, then push and wait for the peer to apply it.
    pub async fn sync(&self) -> Result<VersionId> {
        let head = self.fetch(false, Duration::ZERO).await?;
        self.push(true).await?;
        Ok(head)
    }

    async fn retrying<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>>>,
    {
        let config = self.endpoint.config();
        let mut rejections = 0;
        loop {
            match attempt().await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Rejected => {
                    rejections += 1;
                    if rejections > config.max_retries {
                        return Err(RemoteError::LockRejected {
                            peer: self.peer().to_string(),
                            attempts: rejections,
                        });
                    }
                    warn!(peer = %self.peer(), attempt = rejections, "Lock rejected, retrying {}", what);
                    tokio::time::sleep(config.retry_backoff).await;
                }
            }
        }
    }

    async fn try_push(&self, wait: bool) -> Result<Attempt<()>> {
        let mut stream = self.stream.lock().await;
        let _active = self.link.activate();
        let graph = self.endpoint.graph();
        let peer = self.peer();

        let offer = graph.get(peer, &self.link.shared_versions(graph))?;
        let confirmed = graph.drain_confirmed(peer);
        let Some(txid) = offer.transaction_id.clone() else {
            if confirmed.is_empty() {
                debug!(peer = %peer, "Nothing to push");
                return Ok(Attempt::Done(()));
            }
            let request = Request::push(self.endpoint.name().clone(), offer, wait, confirmed.clone());
            return match self.round_trip(&mut *stream, request, None).await {
                Ok(response) => self.settle_push(response, None),
                Err(e) => {
                    self.requeue(&confirmed);
                    Err(e)
                }
            };
        };

        let head = offer.head.clone();
        let edges = offer.edges.len();
        self.link.set_outstanding(Some(txid.clone()));
        let request = Request::push(self.endpoint.name().clone(), offer, wait, confirmed.clone());
        let outcome = match self.round_trip(&mut *stream, request, None).await {
            Ok(response) => self.settle_push(response, Some(head)),
            Err(e) => {
                self.requeue(&confirmed);
                Err(e)
            }
        };
        self.link.set_outstanding(None);
        match &outcome {
            Ok(Attempt::Done(())) => info!(peer = %peer, edges, txid = %txid, "Pushed"),
            _ => {
                graph.abandon(&txid);
            }
        }
        outcome
    }

    fn settle_push(&self, response: Response, head: Option<VersionId>) -> Result<Attempt<()>> {
        match response.status {
            Status::LockReject => Ok(Attempt::Rejected),
            Status::Timeout => Err(RemoteError::unexpected("push reply", &response.status)),
            Status::Success => {
                self.endpoint.apply_confirmations(self.peer(), &response.confirmed);
                if let Some(head) = head {
                    self.link.set_version_from_self(head);
                }
                Ok(Attempt::Done(()))
            }
        }
    }

    async fn try_fetch(&self, wait: bool, timeout: Duration) -> Result<Attempt<VersionId>> {
        let mut stream = self.stream.lock().await;
        let _active = self.link.activate();
        let graph = self.endpoint.graph();
        let peer = self.peer();

        let mut versions = vec![graph.head()];
        versions.extend(self.link.shared_versions(graph));
        versions.dedup();
        let confirmed = graph.drain_confirmed(peer);
        let request = Request::pull(
            self.endpoint.name().clone(),
            versions,
            wait.then_some(timeout),
            confirmed.clone(),
        );
        let patience = if wait { Some(timeout) } else { None };
        let response = match self.round_trip(&mut *stream, request, patience).await {
            Ok(response) => response,
            Err(e) => {
                self.requeue(&confirmed);
                return Err(e);
            }
        };

        match response.status {
            Status::LockReject => return Ok(Attempt::Rejected),
            Status::Timeout => return Err(RemoteError::Timeout(timeout)),
            Status::Success => {}
        }
        self.endpoint.apply_confirmations(peer, &response.confirmed);
        let remote_head = response.versions.first().cloned();
        let payload = response.data.unwrap_or_default();

        let Some(txid) = response.transaction_id else {
            if let Some(version) = remote_head {
                self.link.set_version_from_remote(version);
            }
            return Ok(Attempt::Done(graph.head()));
        };

        let edges = payload.edges.len();
        let applying = Arc::clone(graph);
        let origin = peer.clone();
        let applied = tokio::task::spawn_blocking(move || applying.put_with(&origin, &payload.refs, &payload.frontier, payload.edges))
            .await
            .map_err(RemoteError::from)
            .and_then(|put| put.map_err(RemoteError::from));

        let max = self.endpoint.config().max_frame_len;
        let ack = Message::Ack {
            accepted: applied.is_ok(),
            transaction_id: txid.clone(),
        };
        write_frame(&mut *stream, &ack, max).await?;

        let head = applied?;
        self.link.set_version_from_remote(remote_head.unwrap_or_else(|| head.clone()));
        info!(peer = %peer, edges, txid = %txid, head = %head, "Fetched");
        Ok(Attempt::Done(head))
    }

    /// Put drained confirmations back after a failed exchange.
    fn requeue(&self, confirmed: &[TransactionId]) {
        for txid in confirmed {
            self.endpoint.graph().acknowledge(self.peer(), txid.clone());
        }
    }

    async fn round_trip(&self, stream: &mut S, request: Request, patience: Option<Duration>) -> Result<Response> {
        let config = self.endpoint.config();
        write_frame(stream, &Message::Request(request), config.max_frame_len).await?;
        let limit = patience.unwrap_or_default() + config.reply_grace;
        match tokio::time::timeout(limit, read_frame(stream, config.max_frame_len)).await {
            Err(_) => Err(RemoteError::Timeout(limit)),
            Ok(read) => match read? {
                Some(Message::Response(response)) => Ok(response),
                Some(other) => Err(RemoteError::unexpected("Response", &other)),
                None => Err(RemoteError::Closed),
            },
        }
    }
}

impl<S> std::fmt::Debug for Remote<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("node", self.endpoint.name())
            .field("peer", self.link.peer())
            .finish()
    }
}
