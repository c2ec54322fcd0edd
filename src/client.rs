/*
 * The public facade composing the query state, a transport, the reply
 * decoder and the current result list into one client session. A client
 * moves Idle to Queried on a successful query, back to Idle on reset, and
 * into the terminal Disposed state on dispose. State that in-process SDKs
 * for this kind of service traditionally keep process-global (the
 * last-error register, the current result buffer) is an instance field
 * here, so independent clients coexist without interference.
 *
 * Concurrency: a client has no internal locking and expects one logical
 * owner; mutating operations take `&mut self`, which makes that ownership a
 * compile-time property rather than a documentation note.
 */

use std::cell::Cell;

use crate::error::{ClientError, ErrorCode, Result};
use crate::query::{QueryState, ReplyChannelId, RequestFlags, SortKey};
use crate::reply::{ItemKind, ResultItem, ResultList, decode_reply};
use crate::transport::{CorrelationToken, Notification, TransportOperations};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientPhase {
    Idle,
    Queried,
    Disposed,
}

pub struct EverythingClient {
    transport: Box<dyn TransportOperations>,
    state: QueryState,
    results: Option<ResultList>,
    phase: ClientPhase,
    // A Cell so read-only accessors can still record usage errors.
    last_error: Cell<ErrorCode>,
}

impl EverythingClient {
    pub fn new(transport: Box<dyn TransportOperations>) -> EverythingClient {
        EverythingClient {
            transport,
            state: QueryState::new(),
            results: None,
            phase: ClientPhase::Idle,
            last_error: Cell::new(ErrorCode::Ok),
        }
    }

    /// Connects to the live index service over the WM_COPYDATA transport
    /// with the default endpoint.
    #[cfg(windows)]
    pub fn connect() -> EverythingClient {
        EverythingClient::connect_to(crate::transport_windows::ServiceEndpoint::default())
    }

    #[cfg(windows)]
    pub fn connect_to(
        endpoint: crate::transport_windows::ServiceEndpoint,
    ) -> EverythingClient {
        EverythingClient::new(Box::new(crate::transport_windows::CopyDataTransport::new(
            endpoint,
        )))
    }

    /// The most recent outcome of any operation on this client instance.
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub fn is_service_available(&self) -> bool {
        if self.phase == ClientPhase::Disposed {
            return false;
        }
        self.transport.is_service_available()
    }

    pub fn query_state(&self) -> &QueryState {
        &self.state
    }

    fn note<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error.set(ErrorCode::Ok),
            Err(err) => self.last_error.set(ErrorCode::from(err)),
        }
        result
    }

    fn ensure_live(&self) -> Result<()> {
        if self.phase == ClientPhase::Disposed {
            return Err(ClientError::InvalidCall);
        }
        Ok(())
    }

    // ---- Query parameter surface (delegates to QueryState) ----

    pub fn set_search(&mut self, pattern: &str) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_pattern(pattern);
        Ok(())
    }

    pub fn set_match_path(&mut self, enable: bool) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_match_path(enable);
        Ok(())
    }

    pub fn set_match_case(&mut self, enable: bool) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_match_case(enable);
        Ok(())
    }

    pub fn set_match_whole_word(&mut self, enable: bool) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_match_whole_word(enable);
        Ok(())
    }

    pub fn set_regex(&mut self, enable: bool) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_regex(enable);
        Ok(())
    }

    pub fn set_max(&mut self, max_results: u32) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_max(max_results);
        Ok(())
    }

    pub fn set_offset(&mut self, offset: u32) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_offset(offset);
        Ok(())
    }

    pub fn set_sort(&mut self, sort_key: SortKey) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_sort(sort_key);
        Ok(())
    }

    pub fn set_request_flags(&mut self, fields: RequestFlags) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_request_flags(fields);
        Ok(())
    }

    pub fn set_reply_channel(&mut self, channel: Option<ReplyChannelId>) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_reply_channel(channel);
        Ok(())
    }

    pub fn set_reply_correlation(&mut self, correlation: u32) -> Result<()> {
        let check = self.ensure_live();
        self.note(check)?;
        self.state.set_reply_correlation(correlation);
        Ok(())
    }

    // ---- Query execution ----

    /*
     * Executes the query built from the current parameters, blocking until
     * the service replies. On success the decoded result list atomically
     * replaces the previous generation and the client is Queried. On any
     * failure the previous results and the client phase are left untouched;
     * query parameters are never mutated either way.
     */
    pub fn query(&mut self) -> Result<()> {
        self.ensure_live().map_err(|e| {
            self.last_error.set(ErrorCode::from(&e));
            e
        })?;
        let outcome = self
            .transport
            .query_blocking(&self.state)
            .and_then(decode_reply)
            .map(|list| {
                self.results = Some(list);
                self.phase = ClientPhase::Queried;
            });
        self.note(outcome)
    }

    /*
     * Posts the query without blocking. Requires a registered reply channel
     * (`InvalidCall` otherwise) and a correlation distinct from every query
     * this client is still waiting on. The host later forwards the matching
     * notification to `try_take_reply`.
     */
    pub fn query_async(&mut self, correlation: u32) -> Result<CorrelationToken> {
        self.ensure_live().map_err(|e| {
            self.last_error.set(ErrorCode::from(&e));
            e
        })?;
        let outcome = self.transport.query_async(&self.state, correlation);
        self.note(outcome)
    }

    /*
     * Offers a host-delivered notification. Returns Ok(true) when it matched
     * an outstanding query and its decoded results were installed, Ok(false)
     * when the correlation did not match (the host dispatcher should fall
     * through to its other handlers). A matched-but-corrupt payload fails
     * with `CorruptReply` and leaves prior results intact.
     */
    pub fn try_take_reply(&mut self, notification: &mut Notification) -> Result<bool> {
        self.ensure_live().map_err(|e| {
            self.last_error.set(ErrorCode::from(&e));
            e
        })?;
        let Some(buffer) = self.transport.try_take_reply(notification) else {
            return Ok(false);
        };
        let outcome = decode_reply(buffer).map(|list| {
            self.results = Some(list);
            self.phase = ClientPhase::Queried;
            true
        });
        self.note(outcome)
    }

    // ---- Result access ----

    fn current_results(&self) -> Result<&ResultList> {
        self.ensure_live()?;
        if self.phase != ClientPhase::Queried {
            return Err(ClientError::InvalidCall);
        }
        self.results.as_ref().ok_or(ClientError::InvalidCall)
    }

    fn item(&self, index: u32) -> Result<&ResultItem> {
        let list = self.current_results()?;
        list.get(index).ok_or(ClientError::InvalidIndex)
    }

    /// Visible (paged) result count; the bound for every per-item accessor.
    pub fn visible_count(&self) -> Result<u32> {
        let r = self.current_results().map(ResultList::len);
        self.note(r)
    }

    pub fn visible_file_count(&self) -> Result<u32> {
        let r = self.current_results().map(ResultList::visible_file_count);
        self.note(r)
    }

    pub fn visible_folder_count(&self) -> Result<u32> {
        let r = self.current_results().map(ResultList::visible_folder_count);
        self.note(r)
    }

    /// Full match count irrespective of paging.
    pub fn total_count(&self) -> Result<u32> {
        // The decoder rejects headers whose combined total exceeds u32, so
        // this sum cannot wrap.
        let r = self
            .current_results()
            .map(|l| l.total_file_count() + l.total_folder_count());
        self.note(r)
    }

    pub fn total_file_count(&self) -> Result<u32> {
        let r = self.current_results().map(ResultList::total_file_count);
        self.note(r)
    }

    pub fn total_folder_count(&self) -> Result<u32> {
        let r = self.current_results().map(ResultList::total_folder_count);
        self.note(r)
    }

    /// The sort the service actually applied. Callers relying on a specific
    /// fast sort should check this rather than assume the request was
    /// honored; a mismatch is not an error.
    pub fn effective_sort(&self) -> Result<SortKey> {
        let r = self.current_results().map(ResultList::effective_sort);
        self.note(r)
    }

    /// The fields the service actually populated; may be a subset of the
    /// request.
    pub fn effective_fields(&self) -> Result<RequestFlags> {
        let r = self.current_results().map(ResultList::effective_fields);
        self.note(r)
    }

    pub fn kind_at(&self, index: u32) -> Result<ItemKind> {
        let r = self.item(index).map(|i| i.kind);
        self.note(r)
    }

    pub fn name_at(&self, index: u32) -> Result<&str> {
        let r = self
            .item(index)
            .and_then(|i| i.name.as_deref().ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn path_at(&self, index: u32) -> Result<&str> {
        let r = self
            .item(index)
            .and_then(|i| i.path.as_deref().ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    /*
     * The item's full path. Serves the stored full-path field when the reply
     * carried one; otherwise derived lazily by joining path and name when
     * both are present.
     */
    pub fn full_path_at(&self, index: u32) -> Result<String> {
        let r = self.item(index).and_then(|item| {
            if let Some(full) = &item.full_path {
                return Ok(full.clone());
            }
            match (&item.path, &item.name) {
                (Some(path), Some(name)) => Ok(join_full_path(path, name)),
                _ => Err(ClientError::InvalidRequest),
            }
        });
        self.note(r)
    }

    pub fn extension_at(&self, index: u32) -> Result<&str> {
        let r = self
            .item(index)
            .and_then(|i| i.extension.as_deref().ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn size_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.size.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn date_created_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.date_created.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn date_modified_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.date_modified.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn date_accessed_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.date_accessed.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn date_recently_changed_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.date_recently_changed.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn attributes_at(&self, index: u32) -> Result<u32> {
        let r = self
            .item(index)
            .and_then(|i| i.attributes.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn run_count_at(&self, index: u32) -> Result<u32> {
        let r = self
            .item(index)
            .and_then(|i| i.run_count.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    pub fn date_run_at(&self, index: u32) -> Result<u64> {
        let r = self
            .item(index)
            .and_then(|i| i.date_run.ok_or(ClientError::InvalidRequest));
        self.note(r)
    }

    /// Empty string when the item is not part of a file-list import.
    pub fn file_list_source_at(&self, index: u32) -> Result<&str> {
        let r = self.item(index).and_then(|i| {
            i.file_list_source
                .as_deref()
                .ok_or(ClientError::InvalidRequest)
        });
        self.note(r)
    }

    pub fn highlighted_name_at(&self, index: u32) -> Result<&str> {
        let r = self.item(index).and_then(|i| {
            i.highlighted_name
                .as_deref()
                .ok_or(ClientError::InvalidRequest)
        });
        self.note(r)
    }

    pub fn highlighted_path_at(&self, index: u32) -> Result<&str> {
        let r = self.item(index).and_then(|i| {
            i.highlighted_path
                .as_deref()
                .ok_or(ClientError::InvalidRequest)
        });
        self.note(r)
    }

    pub fn highlighted_full_path_at(&self, index: u32) -> Result<&str> {
        let r = self.item(index).and_then(|i| {
            i.highlighted_full_path
                .as_deref()
                .ok_or(ClientError::InvalidRequest)
        });
        self.note(r)
    }

    /*
     * Client-side fallback re-sort of the current results by (path, name),
     * for when the service cannot answer the desired key as a fast sort.
     * An O(n log n) pass over the visible items; intended for lists already
     * bounded by offset/max, not for unbounded result sets.
     */
    pub fn sort_results_by_path_inplace(&mut self) -> Result<()> {
        let check = self.current_results().map(|_| ());
        self.note(check)?;
        if let Some(list) = self.results.as_mut() {
            list.sort_by_path_inplace();
        }
        Ok(())
    }

    // ---- Lifecycle ----

    /// Restores every query parameter to its default and discards the
    /// current results. Idempotent.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_live().map_err(|e| {
            self.last_error.set(ErrorCode::from(&e));
            e
        })?;
        self.state.reset();
        self.results = None;
        self.phase = ClientPhase::Idle;
        self.last_error.set(ErrorCode::Ok);
        Ok(())
    }

    /// Releases the retained results and ends the session. Terminal: every
    /// later call on this client fails with `InvalidCall`.
    pub fn dispose(&mut self) -> Result<()> {
        self.ensure_live().map_err(|e| {
            self.last_error.set(ErrorCode::from(&e));
            e
        })?;
        self.results = None;
        self.phase = ClientPhase::Disposed;
        self.last_error.set(ErrorCode::Ok);
        Ok(())
    }
}

/// Joins a parent path and file name the way the service renders full
/// paths: a bare drive gets its separator back, and a trailing separator is
/// never doubled.
fn join_full_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return path.to_string();
    }
    if path.ends_with('\\') || path.ends_with('/') {
        format!("{path}{name}")
    } else {
        format!("{path}\\{name}")
    }
}
