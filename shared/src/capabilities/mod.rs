mod http;
mod kv;
mod realtime;
mod time;

#[cfg(not(target_arch = "wasm32"))]
mod pusher;

pub mod testing;

use std::rc::Rc;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpShell,
    ValidatedUrl, MAX_TIMEOUT_MS,
};
pub use self::kv::{load_json, store_json, KeyNamespace, KeyValueStore, KvError, KvKey, MemoryKv};
pub use self::realtime::{
    ChannelAuth, ChannelName, ClientFrame, RealtimeError, RealtimeTransport, ServerFrame,
    SocketId, PROTOCOL_VERSION,
};
pub use self::time::{Clock, SystemClock};

#[cfg(not(target_arch = "wasm32"))]
pub use self::http::ReqwestShell;
#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKv;
#[cfg(not(target_arch = "wasm32"))]
pub use self::pusher::PusherSocket;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

/// Effects the core performs on the outside world. The realtime transport is
/// owned by the channel subscriber instead, since only one component drives it.
#[derive(Clone)]
pub struct Capabilities {
    pub http: Rc<dyn HttpShell>,
    pub kv: Rc<dyn KeyValueStore>,
    pub clock: Rc<dyn Clock>,
}

impl Capabilities {
    /// Production capabilities: reqwest for HTTP and SQLite at `db_path`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn native(db_path: impl AsRef<std::path::Path>) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: Rc::new(ReqwestShell::new()?),
            kv: Rc::new(SqliteKv::open(db_path)?),
            clock: Rc::new(SystemClock),
        })
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
