//! In-process doubles for the capability traits, used by unit and
//! integration tests and by shells that want to drive the core offline.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::http::{HttpError, HttpRequest, HttpResponse, HttpResult, HttpShell};
use super::kv::MemoryKv;
use super::realtime::{ClientFrame, RealtimeError, RealtimeTransport, ServerFrame, SocketId};
use super::time::Clock;
use super::Capabilities;

/// Replays queued responses in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    replies: RefCell<VecDeque<HttpResult>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: serde_json::Value) {
        self.replies
            .borrow_mut()
            .push_back(Ok(HttpResponse::json_reply(status, &body)));
    }

    pub fn fail(&self, error: HttpError) {
        self.replies.borrow_mut().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.borrow().last().cloned()
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.borrow().len()
    }
}

#[async_trait(?Send)]
impl HttpShell for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let host = request.url().host().to_string();
        self.requests.borrow_mut().push(request);
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(HttpError::ConnectionError {
                host,
                message: "no scripted reply".to_string(),
            }))
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

#[derive(Debug, Default)]
struct TransportState {
    connected: bool,
    connects: usize,
    next_socket: u32,
    incoming: VecDeque<Option<ServerFrame>>,
    sent: Vec<ClientFrame>,
    refuse_connect: bool,
}

/// Realtime transport fed by a [`TransportTap`]. `next_frame` is pending
/// while nothing is queued, like an idle socket.
#[derive(Debug)]
pub struct ScriptedTransport {
    state: Rc<RefCell<TransportState>>,
}

/// Test-side handle onto a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct TransportTap {
    state: Rc<RefCell<TransportState>>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, TransportTap) {
        let state = Rc::new(RefCell::new(TransportState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            TransportTap { state },
        )
    }
}

impl TransportTap {
    pub fn push(&self, frame: ServerFrame) {
        self.state.borrow_mut().incoming.push_back(Some(frame));
    }

    /// Queue a remote close after any frames already pushed.
    pub fn close_remote(&self) {
        self.state.borrow_mut().incoming.push_back(None);
    }

    pub fn refuse_connections(&self) {
        self.state.borrow_mut().refuse_connect = true;
    }

    pub fn accept_connections(&self) {
        self.state.borrow_mut().refuse_connect = false;
    }

    pub fn sent(&self) -> Vec<ClientFrame> {
        self.state.borrow().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Socket id the transport handed out on its latest connect.
    pub fn socket_id(&self) -> SocketId {
        SocketId::new(format!("{}.1", self.state.borrow().next_socket))
    }
}

#[async_trait(?Send)]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<SocketId, RealtimeError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_connect {
            return Err(RealtimeError::Connection {
                message: "connection refused".to_string(),
            });
        }
        state.connected = true;
        state.connects += 1;
        state.next_socket += 1;
        Ok(SocketId::new(format!("{}.1", state.next_socket)))
    }

    async fn send(&mut self, frame: ClientFrame) -> Result<(), RealtimeError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(RealtimeError::NotConnected);
        }
        state.sent.push(frame);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        let next = {
            let mut state = self.state.borrow_mut();
            if !state.connected {
                return None;
            }
            state.incoming.pop_front()
        };
        match next {
            Some(Some(frame)) => Some(Ok(frame)),
            Some(None) => {
                self.state.borrow_mut().connected = false;
                None
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

/// Capability set backed by doubles, with handles kept for assertions.
pub struct MockCapabilities {
    pub http: Rc<ScriptedHttp>,
    pub kv: Rc<MemoryKv>,
    pub clock: Rc<ManualClock>,
}

impl MockCapabilities {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            http: self.http.clone(),
            kv: self.kv.clone(),
            clock: self.clock.clone(),
        }
    }
}

pub fn mock_capabilities() -> MockCapabilities {
    MockCapabilities {
        http: Rc::new(ScriptedHttp::new()),
        kv: Rc::new(MemoryKv::new()),
        clock: Rc::new(ManualClock::default()),
    }
}
