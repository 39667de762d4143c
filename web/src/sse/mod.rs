//! SSE HTTP handler for the web layer.
//!
//! Connection bookkeeping lives in the `realtime` crate; this module only
//! adapts an admitted connection's outbox to an axum event stream.

pub(crate) mod handler;
