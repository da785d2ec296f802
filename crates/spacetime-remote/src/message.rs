//! Wire messages exchanged over a link.
//!
//! Field names follow the envelope the peers agree on (`AppName`,
//! `RequestType`, ...), so a CBOR dump of a frame reads the same on both
//! ends regardless of implementation.

use serde::{Deserialize, Serialize};
use spacetime_core::{PeerId, TransactionId, VersionId};
use spacetime_graph::{Edge, Frontier, GetResult};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Push,
    Pull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Timeout,
    LockReject,
}

/// Edges plus the references their sender declares.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "DATA")]
    pub edges: Vec<Edge>,
    #[serde(rename = "REFS")]
    pub refs: BTreeMap<PeerId, VersionId>,
    /// What the sender knows other nodes to hold.
    #[serde(rename = "FRONTIER", default)]
    pub frontier: Frontier,
}

impl From<GetResult> for Payload {
    fn from(offer: GetResult) -> Self {
        Payload {
            edges: offer.edges,
            refs: offer.remote_refs,
            frontier: offer.frontier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub app_name: PeerId,
    pub request_type: RequestType,
    pub versions: Vec<VersionId>,
    pub data: Option<Payload>,
    pub wait: bool,
    /// Long-poll limit in seconds.
    pub wait_timeout: f64,
    pub transaction_id: Option<TransactionId>,
    /// Transactions of the receiver that the sender applied.
    pub confirmed: Vec<TransactionId>,
}

impl Request {
    pub fn push(
        app_name: PeerId,
        offer: GetResult,
        wait: bool,
        confirmed: Vec<TransactionId>,
    ) -> Self {
        Request {
            app_name,
            request_type: RequestType::Push,
            versions: vec![offer.head.clone()],
            transaction_id: offer.transaction_id.clone(),
            data: Some(offer.into()),
            wait,
            wait_timeout: 0.0,
            confirmed,
        }
    }

    pub fn pull(
        app_name: PeerId,
        versions: Vec<VersionId>,
        wait: Option<Duration>,
        confirmed: Vec<TransactionId>,
    ) -> Self {
        Request {
            app_name,
            request_type: RequestType::Pull,
            versions,
            data: None,
            wait: wait.is_some(),
            wait_timeout: wait.map(|timeout| timeout.as_secs_f64()).unwrap_or_default(),
            transaction_id: None,
            confirmed,
        }
    }

    /// The long-poll limit; malformed values count as zero.
    pub fn wait_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_timeout).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub app_name: PeerId,
    pub status: Status,
    pub data: Option<Payload>,
    pub versions: Vec<VersionId>,
    pub transaction_id: Option<TransactionId>,
    pub confirmed: Vec<TransactionId>,
}

impl Response {
    pub fn success(app_name: PeerId, versions: Vec<VersionId>, confirmed: Vec<TransactionId>) -> Self {
        Response {
            app_name,
            status: Status::Success,
            data: None,
            versions,
            transaction_id: None,
            confirmed,
        }
    }

    pub fn offer(app_name: PeerId, offer: GetResult, confirmed: Vec<TransactionId>) -> Self {
        Response {
            app_name,
            status: Status::Success,
            versions: vec![offer.head.clone()],
            transaction_id: offer.transaction_id.clone(),
            data: Some(offer.into()),
            confirmed,
        }
    }

    pub fn refusal(app_name: PeerId, status: Status) -> Self {
        Response {
            app_name,
            status,
            data: None,
            versions: Vec::new(),
            transaction_id: None,
            confirmed: Vec::new(),
        }
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First frame in each direction: who is speaking and its random
    /// tie-breaker for lock fairness.
    Hello { app_name: PeerId, tie_breaker: u64 },
    Request(Request),
    Response(Response),
    /// Sent by a puller after applying (or failing to apply) an offer.
    Ack {
        accepted: bool,
        transaction_id: TransactionId,
    },
}
