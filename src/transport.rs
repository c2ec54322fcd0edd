/*
 * The transport seam between the client facade and the external index
 * service. `TransportOperations` abstracts the concrete delivery mechanism
 * (the Windows WM_COPYDATA transport in `transport_windows`, or a mock in
 * tests): it serializes a request built from `QueryState`, delivers it, and
 * hands back the undecoded reply payload. Both a blocking call and a
 * non-blocking post/poll pattern are supported; async replies are correlated
 * by an explicit token carried in the host-delivered notification.
 */

use crate::error::{ClientError, Result};
use crate::query::QueryState;

/// Search-flag bits of the request word, in the service's wire assignment.
pub const SEARCH_FLAG_REGEX: u32 = 0x0000_0001;
pub const SEARCH_FLAG_MATCH_CASE: u32 = 0x0000_0002;
pub const SEARCH_FLAG_MATCH_WHOLE_WORD: u32 = 0x0000_0004;
pub const SEARCH_FLAG_MATCH_PATH: u32 = 0x0000_0008;

/*
 * Which of the two reply wire layouts a buffer uses. The layout is resolved
 * once from the reply envelope when the notification is formed and travels
 * with the buffer; the decoder never infers it from what the caller asked
 * for, so "requested" and "effective" fields cannot be conflated.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireLayout {
    /// Header with counts and per-item name/path offsets only. Used when the
    /// request asked for the default field set.
    Fixed,
    /// Header additionally carrying the effective field mask and effective
    /// sort, with per-item data emitted per the mask.
    Flagged,
}

impl WireLayout {
    /// Envelope code for the layout (the `dwData` high word on Windows).
    pub fn to_wire(self) -> u32 {
        match self {
            WireLayout::Fixed => 1,
            WireLayout::Flagged => 2,
        }
    }

    pub fn from_wire(code: u32) -> Option<WireLayout> {
        match code {
            1 => Some(WireLayout::Fixed),
            2 => Some(WireLayout::Flagged),
            _ => None,
        }
    }
}

/*
 * A raw, undecoded reply. Exclusively owned: the transport gives it up on
 * return, the decoder consumes it, and the derived `ResultList` owns the
 * decoded data afterwards: at most one buffer generation is alive per
 * client at any time, enforced by move semantics rather than convention.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyBuffer {
    pub layout: WireLayout,
    pub bytes: Vec<u8>,
}

/*
 * A host-delivered reply notification with an opaque payload and the
 * correlation id the originating query carried. The host's event loop
 * receives these from its own mechanism (message loop, socket, poll) and
 * offers them to `try_take_reply`.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub correlation: u32,
    pub layout: WireLayout,
    pub payload: Vec<u8>,
}

/// Token identifying an in-flight asynchronous query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationToken(pub u32);

pub trait TransportOperations {
    /// Cheap probe for whether the index service is reachable at all.
    fn is_service_available(&self) -> bool;

    /*
     * Sends the query and blocks until the service replies or a
     * protocol-level failure occurs. There is no built-in timeout; a caller
     * needing bounded latency wraps the call with an external deadline. A
     * reply whose correlation does not match the request is discarded, which
     * also covers a late reply arriving after such a deadline fired.
     */
    fn query_blocking(&mut self, state: &QueryState) -> Result<ReplyBuffer>;

    /*
     * Sends the query and returns immediately. Requires a registered
     * persistent reply channel (`InvalidCall` otherwise); the correlation
     * must be distinct from every query the channel is still waiting on
     * (`InvalidRequest` for a duplicate).
     */
    fn query_async(&mut self, state: &QueryState, correlation: u32) -> Result<CorrelationToken>;

    /*
     * Offers a host-delivered notification. On a correlation match the
     * payload is drained out of the notification and returned; a mismatch
     * returns `None` (not an error) so the host dispatcher can fall through
     * to its other handlers.
     */
    fn try_take_reply(&mut self, notification: &mut Notification) -> Option<ReplyBuffer>;
}

/*
 * Serializes a request from the query state. Layout (little-endian):
 * reply channel (0 when none), correlation, search flags, offset, max
 * results, requested-field mask, sort code, then the UTF-8 pattern with a
 * terminating NUL.
 */
pub fn encode_request(state: &QueryState, correlation: u32) -> Vec<u8> {
    // The wire field is 32 bits; a handle outside that range cannot be
    // encoded as a valid reply address, so the request goes out without a
    // channel rather than with a truncated one.
    let channel_word = match state.reply_channel() {
        None => 0u32,
        Some(channel) => match u32::try_from(channel.0 as usize) {
            Ok(word) => word,
            Err(_) => {
                log::warn!(
                    "Transport: Reply channel handle {:#x} does not fit the 32-bit wire field; encoding no channel.",
                    channel.0
                );
                0
            }
        },
    };
    let mut search_flags = 0u32;
    if state.regex() {
        search_flags |= SEARCH_FLAG_REGEX;
    }
    if state.match_case() {
        search_flags |= SEARCH_FLAG_MATCH_CASE;
    }
    if state.match_whole_word() {
        search_flags |= SEARCH_FLAG_MATCH_WHOLE_WORD;
    }
    if state.match_path() {
        search_flags |= SEARCH_FLAG_MATCH_PATH;
    }

    let pattern = state.pattern().as_bytes();
    let mut out = Vec::with_capacity(7 * 4 + pattern.len() + 1);
    out.extend_from_slice(&channel_word.to_le_bytes());
    out.extend_from_slice(&correlation.to_le_bytes());
    out.extend_from_slice(&search_flags.to_le_bytes());
    out.extend_from_slice(&state.offset().to_le_bytes());
    out.extend_from_slice(&state.max().to_le_bytes());
    out.extend_from_slice(&state.request_flags().bits().to_le_bytes());
    out.extend_from_slice(&state.sort().to_wire().to_le_bytes());
    out.extend_from_slice(pattern);
    out.push(0);
    out
}

/*
 * Bookkeeping for correlations an async channel is still waiting on.
 * Shared by transport implementations so the distinctness and
 * mismatch-falls-through rules behave identically everywhere.
 */
#[derive(Debug, Default)]
pub struct PendingReplies {
    outstanding: Vec<u32>,
}

impl PendingReplies {
    pub fn new() -> Self {
        PendingReplies::default()
    }

    /// Registers a correlation. Fails with `InvalidRequest` if the channel
    /// is already waiting on the same value.
    pub fn register(&mut self, correlation: u32) -> Result<()> {
        if self.outstanding.contains(&correlation) {
            log::warn!(
                "PendingReplies: Correlation {correlation} is already outstanding on this channel."
            );
            return Err(ClientError::InvalidRequest);
        }
        self.outstanding.push(correlation);
        Ok(())
    }

    /// Consumes a matching correlation. Returns false (leaving the set
    /// untouched) when the value is not outstanding.
    pub fn take(&mut self, correlation: u32) -> bool {
        if let Some(pos) = self.outstanding.iter().position(|&c| c == correlation) {
            self.outstanding.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn is_waiting_on(&self, correlation: u32) -> bool {
        self.outstanding.contains(&correlation)
    }

    pub fn clear(&mut self) {
        self.outstanding.clear();
    }
}
