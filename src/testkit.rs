/*
 * Test-only helpers shared across the unit test modules: builders emitting
 * synthetic reply buffers in both wire layouts, and a scriptable transport
 * standing in for a live service. Compiled only for tests.
 */

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{ClientError, Result};
use crate::query::{QueryState, RequestFlags, SortKey};
use crate::transport::{
    CorrelationToken, Notification, PendingReplies, ReplyBuffer, TransportOperations, WireLayout,
    encode_request,
};

/// Installs a terminal logger once so failing tests can be rerun with
/// wire-level decoder logging visible.
pub(crate) fn init_test_logging() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

/*
 * Builds a fixed-layout reply. `items` are (item flags, name, path); visible
 * counts are derived from the item flags, totals are the visibles plus the
 * given extra amounts so paging scenarios can declare larger match sets.
 */
pub(crate) fn build_fixed_reply(
    extra_total_folders: u32,
    extra_total_files: u32,
    items: &[(u32, &str, &str)],
) -> ReplyBuffer {
    const FOLDER_MASK: u32 = 0x3; // folder or volume bit

    let visible_folders = items.iter().filter(|(f, _, _)| f & FOLDER_MASK != 0).count() as u32;
    let visible_files = items.len() as u32 - visible_folders;
    let total_folders = visible_folders + extra_total_folders;
    let total_files = visible_files + extra_total_files;

    let header_len = 16usize;
    let items_len = items.len() * 12;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&total_folders.to_le_bytes());
    bytes.extend_from_slice(&total_files.to_le_bytes());
    bytes.extend_from_slice(&visible_folders.to_le_bytes());
    bytes.extend_from_slice(&visible_files.to_le_bytes());

    let mut text = Vec::new();
    let mut headers = Vec::new();
    for (flags, name, path) in items {
        let name_offset = (header_len + items_len + text.len()) as u32;
        text.extend_from_slice(name.as_bytes());
        text.push(0);
        let path_offset = (header_len + items_len + text.len()) as u32;
        text.extend_from_slice(path.as_bytes());
        text.push(0);
        headers.push((*flags, name_offset, path_offset));
    }
    for (flags, name_offset, path_offset) in headers {
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&name_offset.to_le_bytes());
        bytes.extend_from_slice(&path_offset.to_le_bytes());
    }
    bytes.extend_from_slice(&text);

    ReplyBuffer {
        layout: WireLayout::Fixed,
        bytes,
    }
}

/*
 * One synthetic flagged-layout item. The builder emits only the fields the
 * reply's field mask declares, in the canonical order: kind marker, fixed-
 * size fields ascending by bit, then NUL-terminated text fields ascending
 * by bit.
 */
#[derive(Debug, Clone, Default)]
pub(crate) struct TestItem {
    pub kind_flags: u32,
    pub name: Option<String>,
    pub path: Option<String>,
    pub full_path: Option<String>,
    pub extension: Option<String>,
    pub size: Option<u64>,
    pub date_created: Option<u64>,
    pub date_modified: Option<u64>,
    pub date_accessed: Option<u64>,
    pub date_recently_changed: Option<u64>,
    pub attributes: Option<u32>,
    pub run_count: Option<u32>,
    pub date_run: Option<u64>,
    pub file_list_source: Option<String>,
    pub highlighted_name: Option<String>,
    pub highlighted_path: Option<String>,
    pub highlighted_full_path: Option<String>,
}

impl TestItem {
    pub fn file() -> TestItem {
        TestItem::default()
    }
}

pub(crate) fn build_flagged_reply(
    extra_total_folders: u32,
    extra_total_files: u32,
    fields: RequestFlags,
    sort: SortKey,
    items: &[TestItem],
) -> ReplyBuffer {
    const FOLDER_MASK: u32 = 0x3;

    let visible_folders = items
        .iter()
        .filter(|i| i.kind_flags & FOLDER_MASK != 0)
        .count() as u32;
    let visible_files = items.len() as u32 - visible_folders;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(visible_folders + extra_total_folders).to_le_bytes());
    bytes.extend_from_slice(&(visible_files + extra_total_files).to_le_bytes());
    bytes.extend_from_slice(&visible_folders.to_le_bytes());
    bytes.extend_from_slice(&visible_files.to_le_bytes());
    bytes.extend_from_slice(&fields.bits().to_le_bytes());
    bytes.extend_from_slice(&sort.to_wire().to_le_bytes());

    for item in items {
        bytes.extend_from_slice(&item.kind_flags.to_le_bytes());

        if fields.contains(RequestFlags::SIZE) {
            bytes.extend_from_slice(&item.size.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::DATE_CREATED) {
            bytes.extend_from_slice(&item.date_created.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::DATE_MODIFIED) {
            bytes.extend_from_slice(&item.date_modified.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::DATE_ACCESSED) {
            bytes.extend_from_slice(&item.date_accessed.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::ATTRIBUTES) {
            bytes.extend_from_slice(&item.attributes.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::RUN_COUNT) {
            bytes.extend_from_slice(&item.run_count.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::DATE_RUN) {
            bytes.extend_from_slice(&item.date_run.unwrap_or(0).to_le_bytes());
        }
        if fields.contains(RequestFlags::DATE_RECENTLY_CHANGED) {
            bytes.extend_from_slice(&item.date_recently_changed.unwrap_or(0).to_le_bytes());
        }

        let mut push_text = |value: &Option<String>| {
            bytes.extend_from_slice(value.as_deref().unwrap_or("").as_bytes());
            bytes.push(0);
        };
        if fields.contains(RequestFlags::FILE_NAME) {
            push_text(&item.name);
        }
        if fields.contains(RequestFlags::PATH) {
            push_text(&item.path);
        }
        if fields.contains(RequestFlags::FULL_PATH) {
            push_text(&item.full_path);
        }
        if fields.contains(RequestFlags::EXTENSION) {
            push_text(&item.extension);
        }
        if fields.contains(RequestFlags::FILE_LIST_NAME) {
            push_text(&item.file_list_source);
        }
        if fields.contains(RequestFlags::HIGHLIGHTED_FILE_NAME) {
            push_text(&item.highlighted_name);
        }
        if fields.contains(RequestFlags::HIGHLIGHTED_PATH) {
            push_text(&item.highlighted_path);
        }
        if fields.contains(RequestFlags::HIGHLIGHTED_FULL_PATH) {
            push_text(&item.highlighted_full_path);
        }
    }

    ReplyBuffer {
        layout: WireLayout::Flagged,
        bytes,
    }
}

/*
 * Scriptable transport for client tests. Each blocking query consumes the
 * next scripted outcome in order; async queries follow the real contract
 * via `PendingReplies`. Every serialized request is recorded behind a shared
 * handle, so a test can keep a clone of `sent_requests` and inspect the wire
 * bytes after the transport has been boxed into a client.
 */
pub(crate) struct MockTransport {
    pub available: bool,
    pub sent_requests: Rc<RefCell<Vec<Vec<u8>>>>,
    scripted: VecDeque<Result<ReplyBuffer>>,
    pending: PendingReplies,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport {
            available: true,
            sent_requests: Rc::new(RefCell::new(Vec::new())),
            scripted: VecDeque::new(),
            pending: PendingReplies::new(),
        }
    }

    pub fn with_reply(buffer: ReplyBuffer) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.push_reply(buffer);
        transport
    }

    pub fn push_reply(&mut self, buffer: ReplyBuffer) {
        self.scripted.push_back(Ok(buffer));
    }

    pub fn push_failure(&mut self, error: ClientError) {
        self.scripted.push_back(Err(error));
    }
}

impl TransportOperations for MockTransport {
    fn is_service_available(&self) -> bool {
        self.available
    }

    fn query_blocking(&mut self, state: &QueryState) -> Result<ReplyBuffer> {
        self.sent_requests
            .borrow_mut()
            .push(encode_request(state, state.reply_correlation()));
        self.scripted
            .pop_front()
            .unwrap_or(Err(ClientError::ServiceUnavailable))
    }

    fn query_async(&mut self, state: &QueryState, correlation: u32) -> Result<CorrelationToken> {
        if state.reply_channel().is_none() {
            return Err(ClientError::InvalidCall);
        }
        self.pending.register(correlation)?;
        self.sent_requests
            .borrow_mut()
            .push(encode_request(state, correlation));
        Ok(CorrelationToken(correlation))
    }

    fn try_take_reply(&mut self, notification: &mut Notification) -> Option<ReplyBuffer> {
        if !self.pending.take(notification.correlation) {
            return None;
        }
        Some(ReplyBuffer {
            layout: notification.layout,
            bytes: std::mem::take(&mut notification.payload),
        })
    }
}
