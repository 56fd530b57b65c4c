//! Request/response boundary between an inspection UI and the page.
//!
//! The UI runs in its own context and talks to the page over a channel.
//! Every request gets an id and a [`CancellationToken`]; a response to a
//! cancelled request is never delivered, and the server skips requests
//! that were cancelled before it reached them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dom::NodeId;
use crate::error::Result;
use crate::oplog::TrackingRef;
use crate::origin_path::{
    OriginPath, OriginStep, RootOrigin, StepView, get_root_origin_at_char, step_views,
    where_does_char_come_from,
};
use crate::page::Page;

#[derive(Debug, Clone, PartialEq)]
pub enum InspectorQuery {
    /// Resolve a rendered character to its DOM assignment step.
    RootOriginAtChar { node: NodeId, offset: usize },
    /// Walk the full path from a resolved origin.
    WhereDoesCharComeFrom { origin: RootOrigin },
    /// Display fields of one entry at one character.
    Entry { index: TrackingRef, offset: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InspectorResponse {
    RootOrigin { origin: RootOrigin, step: StepView },
    OriginPath { path: OriginPath, steps: Vec<StepView> },
    Entry { step: StepView },
    Error { message: String },
}

pub struct InspectorRequest {
    pub id: u64,
    pub query: InspectorQuery,
    cancel: CancellationToken,
    reply: oneshot::Sender<InspectorResponse>,
}

impl InspectorRequest {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Create a connected client and request receiver.
pub fn channel() -> (InspectorClient, mpsc::UnboundedReceiver<InspectorRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InspectorClient {
            tx,
            next_id: AtomicU64::new(1),
        },
        rx,
    )
}

/// Sending half used by the UI.
pub struct InspectorClient {
    tx: mpsc::UnboundedSender<InspectorRequest>,
    next_id: AtomicU64,
}

impl InspectorClient {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn send(&self, query: InspectorQuery) -> PendingResponse {
        let id = self.next_id();
        let cancel = CancellationToken::new();
        let (reply, rx) = oneshot::channel();
        let request = InspectorRequest {
            id,
            query,
            cancel: cancel.clone(),
            reply,
        };
        if self.tx.send(request).is_err() {
            debug!(id, "inspector server is gone");
        }
        PendingResponse { id, cancel, rx }
    }
}

/// Handle to an outstanding request.
pub struct PendingResponse {
    id: u64,
    cancel: CancellationToken,
    rx: oneshot::Receiver<InspectorResponse>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The response, or `None` if the request was cancelled or the server
    /// dropped it.
    pub async fn recv(self) -> Option<InspectorResponse> {
        let PendingResponse { cancel, rx, .. } = self;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = rx => response.ok(),
        }
    }

    /// Like [`recv`](Self::recv), calling `on_slow` once if no answer
    /// arrived within `after`.
    pub async fn recv_with_slow_notice<F>(self, after: Duration, on_slow: F) -> Option<InspectorResponse>
    where
        F: FnOnce(),
    {
        let id = self.id;
        let recv = self.recv();
        tokio::pin!(recv);
        tokio::select! {
            biased;
            response = &mut recv => return response,
            _ = tokio::time::sleep(after) => {
                debug!(id, ?after, "inspector response is slow");
                on_slow();
            }
        }
        recv.await
    }
}

/// Answer requests until every client is dropped. Returns how many were
/// answered.
pub async fn serve(page: &Page, mut requests: mpsc::UnboundedReceiver<InspectorRequest>) -> usize {
    let mut answered = 0;
    while let Some(request) = requests.recv().await {
        if request.is_cancelled() {
            debug!(id = request.id, "skipping cancelled inspector request");
            continue;
        }
        let response = handle_query(page, &request.query);
        if request.reply.send(response).is_err() {
            debug!(id = request.id, "requester went away");
        } else {
            answered += 1;
        }
    }
    answered
}

/// Answer one query synchronously.
pub fn handle_query(page: &Page, query: &InspectorQuery) -> InspectorResponse {
    answer(page, query).unwrap_or_else(|e| InspectorResponse::Error {
        message: e.to_string(),
    })
}

fn answer(page: &Page, query: &InspectorQuery) -> Result<InspectorResponse> {
    let log = page.log();
    Ok(match query {
        InspectorQuery::RootOriginAtChar { node, offset } => {
            let origin = get_root_origin_at_char(page, *node, *offset)?;
            InspectorResponse::RootOrigin {
                origin,
                step: StepView::new(log, origin.step)?,
            }
        }
        InspectorQuery::WhereDoesCharComeFrom { origin } => {
            let path = where_does_char_come_from(log, *origin)?;
            let steps = step_views(log, &path)?;
            InspectorResponse::OriginPath { path, steps }
        }
        InspectorQuery::Entry { index, offset } => InspectorResponse::Entry {
            step: StepView::new(
                log,
                OriginStep {
                    entry: *index,
                    offset: *offset,
                },
            )?,
        },
    })
}

/// UI state fed by inspector responses.
///
/// Starting a new selection cancels the request behind the previous one,
/// and a response is only applied if it belongs to the latest selection.
#[derive(Debug)]
pub struct Selection<T> {
    generation: u64,
    current: Option<CancellationToken>,
    value: Option<T>,
}

impl<T> Selection<T> {
    pub fn new() -> Self {
        Self {
            generation: 0,
            current: None,
            value: None,
        }
    }

    /// Track `pending` as the active request. Returns its generation.
    pub fn begin(&mut self, pending: &PendingResponse) -> u64 {
        if let Some(previous) = self.current.replace(pending.cancel_handle()) {
            previous.cancel();
        }
        self.generation += 1;
        self.generation
    }

    /// Store `value` if `generation` is still current.
    pub fn apply(&mut self, generation: u64, value: T) -> bool {
        if generation != self.generation {
            return false;
        }
        self.value = Some(value);
        self.current = None;
        true
    }

    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        self.generation += 1;
        self.value = None;
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self::new()
    }
}
