/*
 * Holds the mutable search parameters for a query: the pattern, the match
 * flags, paging, the requested sort, the requested result fields and the
 * reply routing for asynchronous queries. `QueryState` is pure data with
 * documented defaults; mutating it never invalidates a previously decoded
 * result list; parameters only take effect when the next query is sent.
 */

use std::ops::{BitOr, BitOrAssign};

/// Sentinel meaning "no limit" for `max_results`.
pub const MAX_RESULTS_UNBOUNDED: u32 = u32::MAX;

/*
 * The sort the service is asked to apply, as a (key, direction) pair. The
 * wire codes are the service's stable numbering; `from_wire` is used when
 * reading the effective sort back out of a reply header.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    NameAscending,
    NameDescending,
    PathAscending,
    PathDescending,
    SizeAscending,
    SizeDescending,
    ExtensionAscending,
    ExtensionDescending,
    TypeNameAscending,
    TypeNameDescending,
    DateCreatedAscending,
    DateCreatedDescending,
    DateModifiedAscending,
    DateModifiedDescending,
    AttributesAscending,
    AttributesDescending,
    FileListNameAscending,
    FileListNameDescending,
    RunCountAscending,
    RunCountDescending,
    DateRecentlyChangedAscending,
    DateRecentlyChangedDescending,
    DateAccessedAscending,
    DateAccessedDescending,
    DateRunAscending,
    DateRunDescending,
}

impl SortKey {
    pub fn to_wire(self) -> u32 {
        match self {
            SortKey::NameAscending => 1,
            SortKey::NameDescending => 2,
            SortKey::PathAscending => 3,
            SortKey::PathDescending => 4,
            SortKey::SizeAscending => 5,
            SortKey::SizeDescending => 6,
            SortKey::ExtensionAscending => 7,
            SortKey::ExtensionDescending => 8,
            SortKey::TypeNameAscending => 9,
            SortKey::TypeNameDescending => 10,
            SortKey::DateCreatedAscending => 11,
            SortKey::DateCreatedDescending => 12,
            SortKey::DateModifiedAscending => 13,
            SortKey::DateModifiedDescending => 14,
            SortKey::AttributesAscending => 15,
            SortKey::AttributesDescending => 16,
            SortKey::FileListNameAscending => 17,
            SortKey::FileListNameDescending => 18,
            SortKey::RunCountAscending => 19,
            SortKey::RunCountDescending => 20,
            SortKey::DateRecentlyChangedAscending => 21,
            SortKey::DateRecentlyChangedDescending => 22,
            SortKey::DateAccessedAscending => 23,
            SortKey::DateAccessedDescending => 24,
            SortKey::DateRunAscending => 25,
            SortKey::DateRunDescending => 26,
        }
    }

    pub fn from_wire(code: u32) -> Option<SortKey> {
        Some(match code {
            1 => SortKey::NameAscending,
            2 => SortKey::NameDescending,
            3 => SortKey::PathAscending,
            4 => SortKey::PathDescending,
            5 => SortKey::SizeAscending,
            6 => SortKey::SizeDescending,
            7 => SortKey::ExtensionAscending,
            8 => SortKey::ExtensionDescending,
            9 => SortKey::TypeNameAscending,
            10 => SortKey::TypeNameDescending,
            11 => SortKey::DateCreatedAscending,
            12 => SortKey::DateCreatedDescending,
            13 => SortKey::DateModifiedAscending,
            14 => SortKey::DateModifiedDescending,
            15 => SortKey::AttributesAscending,
            16 => SortKey::AttributesDescending,
            17 => SortKey::FileListNameAscending,
            18 => SortKey::FileListNameDescending,
            19 => SortKey::RunCountAscending,
            20 => SortKey::RunCountDescending,
            21 => SortKey::DateRecentlyChangedAscending,
            22 => SortKey::DateRecentlyChangedDescending,
            23 => SortKey::DateAccessedAscending,
            24 => SortKey::DateAccessedDescending,
            25 => SortKey::DateRunAscending,
            26 => SortKey::DateRunDescending,
            _ => return None,
        })
    }
}

/*
 * Bitset over the result fields a query asks the service to populate. The
 * bit assignment is the service's stable wire numbering and is shared with
 * the flagged reply layout's effective-fields word.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFlags(u32);

impl RequestFlags {
    pub const FILE_NAME: RequestFlags = RequestFlags(0x0000_0001);
    pub const PATH: RequestFlags = RequestFlags(0x0000_0002);
    pub const FULL_PATH: RequestFlags = RequestFlags(0x0000_0004);
    pub const EXTENSION: RequestFlags = RequestFlags(0x0000_0008);
    pub const SIZE: RequestFlags = RequestFlags(0x0000_0010);
    pub const DATE_CREATED: RequestFlags = RequestFlags(0x0000_0020);
    pub const DATE_MODIFIED: RequestFlags = RequestFlags(0x0000_0040);
    pub const DATE_ACCESSED: RequestFlags = RequestFlags(0x0000_0080);
    pub const ATTRIBUTES: RequestFlags = RequestFlags(0x0000_0100);
    pub const FILE_LIST_NAME: RequestFlags = RequestFlags(0x0000_0200);
    pub const RUN_COUNT: RequestFlags = RequestFlags(0x0000_0400);
    pub const DATE_RUN: RequestFlags = RequestFlags(0x0000_0800);
    pub const DATE_RECENTLY_CHANGED: RequestFlags = RequestFlags(0x0000_1000);
    pub const HIGHLIGHTED_FILE_NAME: RequestFlags = RequestFlags(0x0000_2000);
    pub const HIGHLIGHTED_PATH: RequestFlags = RequestFlags(0x0000_4000);
    pub const HIGHLIGHTED_FULL_PATH: RequestFlags = RequestFlags(0x0000_8000);

    const VALID_MASK: u32 = 0x0000_FFFF;

    pub const fn empty() -> RequestFlags {
        RequestFlags(0)
    }

    /// The default request: file name and path only. A query requesting
    /// exactly this set is answered with the fixed reply layout.
    pub const fn default_fields() -> RequestFlags {
        RequestFlags(Self::FILE_NAME.0 | Self::PATH.0)
    }

    pub const fn all() -> RequestFlags {
        RequestFlags(Self::VALID_MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a set from a wire word, dropping any bits outside the defined
    /// field range.
    pub const fn from_bits_truncate(bits: u32) -> RequestFlags {
        RequestFlags(bits & Self::VALID_MASK)
    }

    pub const fn contains(self, other: RequestFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for RequestFlags {
    fn default() -> Self {
        RequestFlags::default_fields()
    }
}

impl BitOr for RequestFlags {
    type Output = RequestFlags;

    fn bitor(self, rhs: RequestFlags) -> RequestFlags {
        RequestFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RequestFlags {
    fn bitor_assign(&mut self, rhs: RequestFlags) {
        self.0 |= rhs.0;
    }
}

/*
 * Opaque handle to the host's notification endpoint for asynchronous
 * replies. On Windows this wraps the HWND the host pumps messages for; the
 * core never interprets the value beyond equality and "is set".
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyChannelId(pub isize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    pattern: String,
    match_path: bool,
    match_case: bool,
    match_whole_word: bool,
    use_regex: bool,
    max_results: u32,
    offset: u32,
    sort_key: SortKey,
    requested_fields: RequestFlags,
    reply_channel: Option<ReplyChannelId>,
    reply_correlation: u32,
}

impl Default for QueryState {
    fn default() -> Self {
        QueryState {
            pattern: String::new(),
            match_path: false,
            match_case: false,
            match_whole_word: false,
            use_regex: false,
            max_results: MAX_RESULTS_UNBOUNDED,
            offset: 0,
            sort_key: SortKey::NameAscending,
            requested_fields: RequestFlags::default_fields(),
            reply_channel: None,
            reply_correlation: 0,
        }
    }
}

impl QueryState {
    pub fn new() -> Self {
        QueryState::default()
    }

    /// Restores every field to its documented default in one step.
    /// Calling this twice in a row is equivalent to calling it once.
    pub fn reset(&mut self) {
        *self = QueryState::default();
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.pattern = pattern.to_string();
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn set_match_path(&mut self, enable: bool) {
        self.match_path = enable;
    }

    pub fn match_path(&self) -> bool {
        self.match_path
    }

    pub fn set_match_case(&mut self, enable: bool) {
        self.match_case = enable;
    }

    pub fn match_case(&self) -> bool {
        self.match_case
    }

    pub fn set_match_whole_word(&mut self, enable: bool) {
        self.match_whole_word = enable;
    }

    pub fn match_whole_word(&self) -> bool {
        self.match_whole_word
    }

    pub fn set_regex(&mut self, enable: bool) {
        self.use_regex = enable;
    }

    pub fn regex(&self) -> bool {
        self.use_regex
    }

    pub fn set_max(&mut self, max_results: u32) {
        self.max_results = max_results;
    }

    pub fn max(&self) -> u32 {
        self.max_results
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.offset = offset;
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn set_sort(&mut self, sort_key: SortKey) {
        self.sort_key = sort_key;
    }

    pub fn sort(&self) -> SortKey {
        self.sort_key
    }

    pub fn set_request_flags(&mut self, fields: RequestFlags) {
        self.requested_fields = fields;
    }

    pub fn request_flags(&self) -> RequestFlags {
        self.requested_fields
    }

    pub fn set_reply_channel(&mut self, channel: Option<ReplyChannelId>) {
        self.reply_channel = channel;
    }

    pub fn reply_channel(&self) -> Option<ReplyChannelId> {
        self.reply_channel
    }

    pub fn set_reply_correlation(&mut self, correlation: u32) {
        self.reply_correlation = correlation;
    }

    pub fn reply_correlation(&self) -> u32 {
        self.reply_correlation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_defaults(state: &QueryState) {
        assert_eq!(state.pattern(), "");
        assert!(!state.match_path());
        assert!(!state.match_case());
        assert!(!state.match_whole_word());
        assert!(!state.regex());
        assert_eq!(state.max(), MAX_RESULTS_UNBOUNDED);
        assert_eq!(state.offset(), 0);
        assert_eq!(state.sort(), SortKey::NameAscending);
        assert_eq!(state.request_flags(), RequestFlags::default_fields());
        assert_eq!(state.reply_channel(), None);
        assert_eq!(state.reply_correlation(), 0);
    }

    #[test]
    fn test_new_state_has_documented_defaults() {
        assert_defaults(&QueryState::new());
    }

    #[test]
    fn test_reset_restores_every_default() {
        let mut state = QueryState::new();
        state.set_pattern("*.rs");
        state.set_match_path(true);
        state.set_match_case(true);
        state.set_match_whole_word(true);
        state.set_regex(true);
        state.set_max(50);
        state.set_offset(10);
        state.set_sort(SortKey::SizeDescending);
        state.set_request_flags(RequestFlags::all());
        state.set_reply_channel(Some(ReplyChannelId(42)));
        state.set_reply_correlation(7);

        state.reset();
        assert_defaults(&state);

        // Idempotence: a second reset leaves the state identical.
        let after_one = state.clone();
        state.reset();
        assert_eq!(state, after_one);
    }

    #[test]
    fn test_sort_key_wire_codes_round_trip() {
        for code in 1..=26u32 {
            let key = SortKey::from_wire(code)
                .unwrap_or_else(|| panic!("Wire code {code} must map to a sort key"));
            assert_eq!(key.to_wire(), code);
        }
        assert_eq!(SortKey::from_wire(0), None);
        assert_eq!(SortKey::from_wire(27), None);
    }

    #[test]
    fn test_request_flags_set_operations() {
        let flags = RequestFlags::FILE_NAME | RequestFlags::SIZE;
        assert!(flags.contains(RequestFlags::FILE_NAME));
        assert!(flags.contains(RequestFlags::SIZE));
        assert!(!flags.contains(RequestFlags::PATH));
        assert!(!flags.contains(RequestFlags::FILE_NAME | RequestFlags::PATH));

        assert_eq!(RequestFlags::default_fields().bits(), 0x3);
        assert!(RequestFlags::empty().is_empty());

        // Out-of-range bits are dropped, defined bits survive.
        let truncated = RequestFlags::from_bits_truncate(0xFFFF_0110);
        assert_eq!(truncated.bits(), 0x0110);
    }
}
