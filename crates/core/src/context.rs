use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Result, TracelineError};
use crate::header::TraceHeader;
use crate::ids::{EntityId, TraceId};
use crate::model::{HttpInfo, MAX_METADATA_BYTES, SegmentSnapshot, SubsegmentSnapshot};

/// Receives closed segment trees. Implementations must not block: `submit`
/// is called from request paths and from `Drop`.
pub trait SegmentSink: Send + Sync + 'static {
    fn submit(&self, segment: SegmentSnapshot);
}

/// Opens root segments and hands out contexts. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn SegmentSink>,
}

struct Node {
    name: String,
    id: EntityId,
    seq: u64,
    start_ts: DateTime<Utc>,
    end_ts: Option<DateTime<Utc>>,
    error: bool,
    fault: bool,
    http: Option<HttpInfo>,
    metadata: BTreeMap<String, Value>,
    children: Vec<Arc<Mutex<Node>>>,
}

impl Node {
    fn new(name: &str, seq: u64) -> Self {
        Self {
            name: name.to_string(),
            id: EntityId::generate(),
            seq,
            start_ts: Utc::now(),
            end_ts: None,
            error: false,
            fault: false,
            http: None,
            metadata: BTreeMap::new(),
            children: Vec::new(),
        }
    }
}

struct RootState {
    trace_id: TraceId,
    upstream_parent: Option<EntityId>,
    sampled: bool,
    seq: AtomicU64,
    metadata_bytes: AtomicUsize,
    closed: AtomicBool,
    segment: Arc<Mutex<Node>>,
    sink: Arc<dyn SegmentSink>,
}

/// Explicit tracing context carried through the call chain. Clones share
/// the same segment tree; `entity` points at the currently active segment
/// or subsegment.
#[derive(Clone)]
pub struct TraceContext {
    root: Arc<RootState>,
    entity: Arc<Mutex<Node>>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn SegmentSink>) -> Self {
        Self { sink }
    }

    /// Opens the root segment for one request, adopting the trace id from a
    /// parsed inbound header or generating a fresh one.
    pub fn open_segment(
        &self,
        name: &str,
        header: Option<&TraceHeader>,
    ) -> (TraceContext, SegmentGuard) {
        let (trace_id, upstream_parent, sampled) = match header {
            Some(h) => (h.root.clone(), h.parent.clone(), h.sampled.unwrap_or(true)),
            None => (TraceId::generate(), None, true),
        };

        let segment = Arc::new(Mutex::new(Node::new(name, 0)));
        let root = Arc::new(RootState {
            trace_id,
            upstream_parent,
            sampled,
            seq: AtomicU64::new(1),
            metadata_bytes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            segment: segment.clone(),
            sink: self.sink.clone(),
        });

        let cx = TraceContext {
            root: root.clone(),
            entity: segment,
        };
        (cx, SegmentGuard { root, done: false })
    }
}

impl TraceContext {
    pub fn trace_id(&self) -> TraceId {
        self.root.trace_id.clone()
    }

    pub fn is_sampled(&self) -> bool {
        self.root.sampled
    }

    pub fn entity_id(&self) -> EntityId {
        lock_node(&self.entity).id.clone()
    }

    /// Egress header value: the trace root, the active entity as parent and
    /// the sampling decision.
    pub fn header_value(&self) -> String {
        TraceHeader {
            root: self.root.trace_id.clone(),
            parent: Some(self.entity_id()),
            sampled: Some(self.root.sampled),
        }
        .to_value()
    }

    pub fn set_http_request(&self, method: &str, path: &str) {
        let mut node = lock_node(&self.entity);
        let status = node.http.as_ref().and_then(|h| h.status);
        node.http = Some(HttpInfo {
            method: method.to_string(),
            path: path.to_string(),
            status,
        });
    }

    /// Attaches a metadata entry to the active entity. Fails without
    /// mutating anything when the 64 KiB per-segment ceiling would be
    /// crossed, or when the active entity is already closed. Overwriting a
    /// key releases the replaced entry's bytes from the budget.
    pub fn put_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if self.root.closed.load(Ordering::SeqCst) {
            return Err(TracelineError::Closed(format!(
                "cannot attach metadata {key:?}: segment already closed"
            )));
        }

        let serialized = serde_json::to_vec(&value)
            .map_err(|e| TracelineError::Internal(format!("metadata serialization failed: {e}")))?;
        let entry_bytes = key.len() + serialized.len();

        let mut node = lock_node(&self.entity);
        if node.end_ts.is_some() {
            return Err(TracelineError::Closed(format!(
                "cannot attach metadata {key:?}: {} already closed",
                node.name
            )));
        }
        let replaced_bytes = node
            .metadata
            .get(&key)
            .and_then(|old| serde_json::to_vec(old).ok())
            .map_or(0, |old| key.len() + old.len());

        if entry_bytes > replaced_bytes {
            let growth = entry_bytes - replaced_bytes;
            let mut current = self.root.metadata_bytes.load(Ordering::Relaxed);
            loop {
                let attempted = current + growth;
                if attempted > MAX_METADATA_BYTES {
                    return Err(TracelineError::MetadataLimit {
                        attempted,
                        limit: MAX_METADATA_BYTES,
                    });
                }
                match self.root.metadata_bytes.compare_exchange_weak(
                    current,
                    attempted,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        } else {
            self.root
                .metadata_bytes
                .fetch_sub(replaced_bytes - entry_bytes, Ordering::Relaxed);
        }

        node.metadata.insert(key, value);
        Ok(())
    }

    /// Opens a child subsegment under the active entity and returns the
    /// derived context plus its guard. Safe to call concurrently from
    /// workers sharing one request; siblings get distinct ids and sequence
    /// numbers.
    pub fn open_subsegment(&self, name: &str) -> (TraceContext, SubsegmentGuard) {
        let seq = self.root.seq.fetch_add(1, Ordering::Relaxed);
        let child = Arc::new(Mutex::new(Node::new(name, seq)));
        lock_node(&self.entity).children.push(child.clone());

        let cx = TraceContext {
            root: self.root.clone(),
            entity: child.clone(),
        };
        (cx, SubsegmentGuard { node: child, done: false })
    }
}

/// Closes the root segment exactly once. Dropping an unclosed guard (panic,
/// cancelled future) closes the segment with a fault marker so no tree is
/// ever leaked unterminated.
pub struct SegmentGuard {
    root: Arc<RootState>,
    done: bool,
}

impl SegmentGuard {
    /// Normal-path close; a 4xx status marks the segment errored, a 5xx
    /// status marks it faulted.
    pub fn close(mut self, status: Option<u16>) {
        self.done = true;
        self.root.close(status, false);
    }

    /// Close after a handler-level failure.
    pub fn close_error(mut self) {
        self.done = true;
        self.root.close(None, true);
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        if !self.done {
            self.root.close(None, true);
        }
    }
}

/// Closes one subsegment exactly once; `Drop` covers panic and cancelled
/// futures with a fault marker.
pub struct SubsegmentGuard {
    node: Arc<Mutex<Node>>,
    done: bool,
}

impl SubsegmentGuard {
    pub fn finish(mut self, errored: bool) {
        self.done = true;
        close_node(&self.node, errored, false, None);
    }

    pub fn finish_with_status(mut self, status: u16) {
        self.done = true;
        close_node(
            &self.node,
            (400..500).contains(&status),
            status >= 500,
            Some(status),
        );
    }
}

impl Drop for SubsegmentGuard {
    fn drop(&mut self) {
        if !self.done {
            close_node(&self.node, false, true, None);
        }
    }
}

/// Wraps a bounded unit of async work in a subsegment. The subsegment is
/// closed unconditionally and the work's result is returned unchanged.
pub async fn capture<F, Fut, T, E>(
    cx: &TraceContext,
    name: &str,
    work: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(TraceContext) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let (child, guard) = cx.open_subsegment(name);
    let result = work(child).await;
    guard.finish(result.is_err());
    result
}

/// Synchronous counterpart of [`capture`].
pub fn capture_sync<F, T, E>(cx: &TraceContext, name: &str, work: F) -> std::result::Result<T, E>
where
    F: FnOnce(&TraceContext) -> std::result::Result<T, E>,
{
    let (child, guard) = cx.open_subsegment(name);
    let result = work(&child);
    guard.finish(result.is_err());
    result
}

impl RootState {
    fn close(&self, status: Option<u16>, failed: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (error, fault) = match status {
            Some(s) => ((400..500).contains(&s), failed || s >= 500),
            None => (false, failed),
        };
        close_node(&self.segment, error, fault, status);

        let snapshot = self.snapshot();
        if self.sampled {
            self.sink.submit(snapshot);
        }
    }

    fn snapshot(&self) -> SegmentSnapshot {
        let node = lock_node(&self.segment);
        SegmentSnapshot {
            trace_id: self.trace_id.clone(),
            parent_id: self.upstream_parent.clone(),
            sampled: self.sampled,
            name: node.name.clone(),
            id: node.id.clone(),
            start_ts: node.start_ts,
            end_ts: node.end_ts,
            error: node.error,
            fault: node.fault,
            http: node.http.clone(),
            metadata: node.metadata.clone(),
            subsegments: snapshot_children(&node),
        }
    }
}

fn lock_node(node: &Arc<Mutex<Node>>) -> std::sync::MutexGuard<'_, Node> {
    node.lock().unwrap_or_else(PoisonError::into_inner)
}

fn close_node(node: &Arc<Mutex<Node>>, error: bool, fault: bool, status: Option<u16>) {
    let mut node = lock_node(node);
    if node.end_ts.is_some() {
        return;
    }
    node.end_ts = Some(Utc::now());
    node.error = node.error || error;
    node.fault = node.fault || fault;
    if let Some(status) = status {
        match node.http.as_mut() {
            Some(http) => http.status = Some(status),
            None => {
                node.http = Some(HttpInfo {
                    status: Some(status),
                    ..HttpInfo::default()
                });
            }
        }
    }
}

fn snapshot_children(node: &Node) -> Vec<SubsegmentSnapshot> {
    let mut entries: Vec<(DateTime<Utc>, u64, SubsegmentSnapshot)> = node
        .children
        .iter()
        .map(|child| {
            let child = lock_node(child);
            let snapshot = SubsegmentSnapshot {
                name: child.name.clone(),
                id: child.id.clone(),
                start_ts: child.start_ts,
                end_ts: child.end_ts,
                error: child.error,
                fault: child.fault,
                http: child.http.clone(),
                metadata: child.metadata.clone(),
                subsegments: snapshot_children(&child),
            };
            (child.start_ts, child.seq, snapshot)
        })
        .collect();

    entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    entries.into_iter().map(|(_, _, snapshot)| snapshot).collect()
}
