/*
 * Typed IPC client for an out-of-process file-search index service.
 *
 * The service owns the index and answers queries over a message-based IPC
 * channel; this crate owns the client side of that conversation: building a
 * query from typed parameters, delivering it over a transport, decoding the
 * binary reply into a typed result list, and exposing the whole flow behind
 * the `EverythingClient` facade. Everything except the concrete Windows
 * transport is platform-neutral and fully testable off-platform.
 */

pub mod client;
pub mod error;
pub mod query;
pub mod reply;
pub mod transport;
#[cfg(windows)]
pub mod transport_windows;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export the types making up the public surface, so `use
// everything_client::EverythingClient;` works without knowing the module
// layout.
pub use client::EverythingClient;
pub use error::{ClientError, ErrorCode, Result};
pub use query::{MAX_RESULTS_UNBOUNDED, QueryState, ReplyChannelId, RequestFlags, SortKey};
pub use reply::{
    ItemKind, ResultItem, ResultList, filetime_ticks_to_datetime, highlight_spans,
};
pub use transport::{
    CorrelationToken, Notification, ReplyBuffer, TransportOperations, WireLayout,
};
#[cfg(windows)]
pub use transport_windows::{CopyDataTransport, ServiceEndpoint, ServiceVersion};
