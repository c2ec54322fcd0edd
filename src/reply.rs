/*
 * Parses raw reply buffers into a typed, randomly-indexable result set.
 * Two wire layouts exist: the fixed layout (counts plus per-item name/path
 * offsets, used for the default field set) and the flagged layout (counts
 * plus the effective field mask and effective sort, with per-item data
 * emitted per the mask). The decoder consumes the buffer and copies all
 * string data out, so decoded items stay valid for as long as the owning
 * `ResultList` does. No pointers into the raw buffer survive decoding.
 */

use crate::error::{ClientError, Result};
use crate::query::{RequestFlags, SortKey};
use crate::transport::{ReplyBuffer, WireLayout};
use time::OffsetDateTime;

/// In-band character delimiting a highlighted span in highlighted text
/// fields. A doubled marker is an escaped literal occurrence.
pub const HIGHLIGHT_MARKER: char = '*';

const ITEM_FLAG_FOLDER: u32 = 0x0000_0001;
const ITEM_FLAG_VOLUME: u32 = 0x0000_0002;

const FIXED_HEADER_LEN: usize = 16;
const FIXED_ITEM_HEADER_LEN: usize = 12;
const FLAGGED_HEADER_LEN: usize = 24;

/// FILETIME-style ticks between 1601-01-01 and the Unix epoch.
const EPOCH_OFFSET_TICKS: i128 = 116_444_736_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
    Volume,
}

impl ItemKind {
    fn from_wire(flags: u32) -> ItemKind {
        if flags & ITEM_FLAG_VOLUME != 0 {
            ItemKind::Volume
        } else if flags & ITEM_FLAG_FOLDER != 0 {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }

    pub fn is_folder(self) -> bool {
        matches!(self, ItemKind::Folder | ItemKind::Volume)
    }
}

/*
 * One decoded result record. Every field beyond `kind` is `Some` exactly
 * when the owning reply's effective field mask contained it; the service may
 * honor only a subset of what was requested. Timestamps are raw 100 ns ticks
 * since 1601-01-01 UTC (see `filetime_ticks_to_datetime`). Highlighted
 * variants keep their in-band markers; `highlight_spans` separates them out.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultItem {
    pub kind: ItemKind,
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

impl ResultItem {
    fn new(kind: ItemKind) -> ResultItem {
        ResultItem {
            kind,
            name: None,
            path: None,
            full_path: None,
            extension: None,
            size: None,
            date_created: None,
            date_modified: None,
            date_accessed: None,
            date_recently_changed: None,
            attributes: None,
            run_count: None,
            date_run: None,
            file_list_source: None,
            highlighted_name: None,
            highlighted_path: None,
            highlighted_full_path: None,
        }
    }
}

/*
 * The immutable, indexable view over one reply's decoded results plus the
 * aggregate counts. Visible counts cover the paged subset materialized into
 * `items`; total counts cover the full match set irrespective of paging.
 * `visible_file_count + visible_folder_count == items.len()` always holds
 * (volumes tally as folders), and totals are never below the visibles; the
 * decoder rejects buffers violating either.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultList {
    items: Vec<ResultItem>,
    visible_file_count: u32,
    visible_folder_count: u32,
    total_file_count: u32,
    total_folder_count: u32,
    effective_sort: SortKey,
    effective_fields: RequestFlags,
}

impl ResultList {
    pub fn len(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&ResultItem> {
        self.items.get(index as usize)
    }

    pub fn visible_file_count(&self) -> u32 {
        self.visible_file_count
    }

    pub fn visible_folder_count(&self) -> u32 {
        self.visible_folder_count
    }

    pub fn total_file_count(&self) -> u32 {
        self.total_file_count
    }

    pub fn total_folder_count(&self) -> u32 {
        self.total_folder_count
    }

    /// The sort the service actually applied, read from the reply header.
    /// May differ from the requested sort.
    pub fn effective_sort(&self) -> SortKey {
        self.effective_sort
    }

    /// The fields the service actually populated, read from the reply
    /// header. May be a subset of the requested fields.
    pub fn effective_fields(&self) -> RequestFlags {
        self.effective_fields
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultItem> {
        self.items.iter()
    }

    /*
     * Re-sorts the decoded items by (path, name) on the client side. This is
     * the fallback for when the service cannot answer the desired sort as a
     * fast (precomputed) sort; it is an O(n log n) pass over the visible
     * items and is meant for lists that were already bounded by paging.
     */
    pub fn sort_by_path_inplace(&mut self) {
        self.items.sort_by(|a, b| {
            let a_key = (a.path.as_deref().unwrap_or(""), a.name.as_deref().unwrap_or(""));
            let b_key = (b.path.as_deref().unwrap_or(""), b.name.as_deref().unwrap_or(""));
            a_key.cmp(&b_key)
        });
    }
}

/// Converts FILETIME-style ticks (100 ns since 1601-01-01 UTC) to a
/// timestamp. Zero ticks means the service recorded no timestamp.
pub fn filetime_ticks_to_datetime(ticks: u64) -> Option<OffsetDateTime> {
    if ticks == 0 {
        return None;
    }
    let unix_nanos = (ticks as i128 - EPOCH_OFFSET_TICKS) * 100;
    OffsetDateTime::from_unix_timestamp_nanos(unix_nanos).ok()
}

/*
 * Strips the in-band highlight markers from a highlighted text field,
 * returning the plain text and the highlighted spans as (byte offset, byte
 * length) pairs over the plain text. A doubled marker becomes one literal
 * marker character; an unterminated span runs to the end of the text.
 */
pub fn highlight_spans(text: &str) -> (String, Vec<(usize, usize)>) {
    let mut plain = String::with_capacity(text.len());
    let mut spans = Vec::new();
    let mut span_start: Option<usize> = None;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != HIGHLIGHT_MARKER {
            plain.push(ch);
            continue;
        }
        if chars.peek() == Some(&HIGHLIGHT_MARKER) {
            chars.next();
            plain.push(HIGHLIGHT_MARKER);
        } else if let Some(start) = span_start.take() {
            spans.push((start, plain.len() - start));
        } else {
            span_start = Some(plain.len());
        }
    }
    if let Some(start) = span_start {
        spans.push((start, plain.len() - start));
    }
    (plain, spans)
}

/*
 * Bounds-checked little-endian reader over a reply buffer. Any attempt to
 * read past the end is a corrupt reply, never an out-of-bounds access.
 */
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Cursor<'a> {
        Cursor { bytes, pos: 0 }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let end = self.pos.checked_add(4).ok_or(ClientError::CorruptReply)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ClientError::CorruptReply)?;
        self.pos = end;
        Ok(u32::from_le_bytes(slice.try_into().map_err(|_| ClientError::CorruptReply)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let end = self.pos.checked_add(8).ok_or(ClientError::CorruptReply)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ClientError::CorruptReply)?;
        self.pos = end;
        Ok(u64::from_le_bytes(slice.try_into().map_err(|_| ClientError::CorruptReply)?))
    }

    /// Reads a NUL-terminated UTF-8 string starting at the cursor.
    fn read_cstr(&mut self) -> Result<String> {
        let rest = self.bytes.get(self.pos..).ok_or(ClientError::CorruptReply)?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ClientError::CorruptReply)?;
        let text = std::str::from_utf8(&rest[..nul]).map_err(|_| ClientError::CorruptReply)?;
        self.pos += nul + 1;
        Ok(text.to_string())
    }
}

/// Reads the NUL-terminated UTF-8 string at an absolute byte offset in the
/// trailing text region. Offset zero is the wire encoding of "empty".
fn read_cstr_at(bytes: &[u8], offset: u32) -> Result<String> {
    if offset == 0 {
        return Ok(String::new());
    }
    let start = offset as usize;
    if start >= bytes.len() {
        return Err(ClientError::CorruptReply);
    }
    let mut cursor = Cursor { bytes, pos: start };
    cursor.read_cstr()
}

/*
 * Decodes a raw reply into a `ResultList`, consuming the buffer. The wire
 * layout travels with the buffer (resolved from the reply envelope, never
 * from what the caller requested). A buffer whose declared counts would read
 * past its end is rejected as `CorruptReply` without producing any partial
 * result list.
 */
pub fn decode_reply(buffer: ReplyBuffer) -> Result<ResultList> {
    let list = match buffer.layout {
        WireLayout::Fixed => decode_fixed(&buffer.bytes),
        WireLayout::Flagged => decode_flagged(&buffer.bytes),
    }?;
    log::debug!(
        "ReplyDecoder: Decoded {} visible items ({} files, {} folders; totals {}/{}).",
        list.len(),
        list.visible_file_count,
        list.visible_folder_count,
        list.total_file_count,
        list.total_folder_count,
    );
    Ok(list)
}

struct Counts {
    total_folders: u32,
    total_files: u32,
    visible_folders: u32,
    visible_files: u32,
}

impl Counts {
    fn read(cursor: &mut Cursor<'_>) -> Result<Counts> {
        let counts = Counts {
            total_folders: cursor.read_u32()?,
            total_files: cursor.read_u32()?,
            visible_folders: cursor.read_u32()?,
            visible_files: cursor.read_u32()?,
        };
        // Totals cover the full match set; a header claiming fewer total
        // than visible results is malformed.
        if counts.total_folders < counts.visible_folders
            || counts.total_files < counts.visible_files
        {
            return Err(ClientError::CorruptReply);
        }
        // The combined total must itself be representable, so downstream
        // aggregate arithmetic can never overflow.
        if counts.total_folders.checked_add(counts.total_files).is_none() {
            return Err(ClientError::CorruptReply);
        }
        Ok(counts)
    }

    fn visible(&self) -> Result<u32> {
        self.visible_folders
            .checked_add(self.visible_files)
            .ok_or(ClientError::CorruptReply)
    }
}

fn decode_fixed(bytes: &[u8]) -> Result<ResultList> {
    if bytes.len() < FIXED_HEADER_LEN {
        return Err(ClientError::CorruptReply);
    }
    let mut cursor = Cursor::new(bytes);
    let counts = Counts::read(&mut cursor)?;
    let visible = counts.visible()?;

    let items_len = (visible as usize)
        .checked_mul(FIXED_ITEM_HEADER_LEN)
        .ok_or(ClientError::CorruptReply)?;
    if bytes.len() < FIXED_HEADER_LEN + items_len {
        return Err(ClientError::CorruptReply);
    }

    let mut items = Vec::with_capacity(visible as usize);
    for _ in 0..visible {
        let flags = cursor.read_u32()?;
        let name_offset = cursor.read_u32()?;
        let path_offset = cursor.read_u32()?;

        let mut item = ResultItem::new(ItemKind::from_wire(flags));
        item.name = Some(read_cstr_at(bytes, name_offset)?);
        item.path = Some(read_cstr_at(bytes, path_offset)?);
        items.push(item);
    }

    Ok(ResultList {
        items,
        visible_file_count: counts.visible_files,
        visible_folder_count: counts.visible_folders,
        total_file_count: counts.total_files,
        total_folder_count: counts.total_folders,
        // The fixed header carries no sort word; the layout implies the
        // service default rather than echoing the request.
        effective_sort: SortKey::NameAscending,
        effective_fields: RequestFlags::default_fields(),
    })
}

fn decode_flagged(bytes: &[u8]) -> Result<ResultList> {
    if bytes.len() < FLAGGED_HEADER_LEN {
        return Err(ClientError::CorruptReply);
    }
    let mut cursor = Cursor::new(bytes);
    let counts = Counts::read(&mut cursor)?;
    let fields = RequestFlags::from_bits_truncate(cursor.read_u32()?);
    let sort_code = cursor.read_u32()?;
    let effective_sort = SortKey::from_wire(sort_code).ok_or(ClientError::CorruptReply)?;
    let visible = counts.visible()?;

    // Every item carries at least its 4-byte kind word, so a count the
    // buffer cannot possibly hold is rejected before any allocation.
    let min_items_len = (visible as usize)
        .checked_mul(4)
        .ok_or(ClientError::CorruptReply)?;
    if bytes.len() - FLAGGED_HEADER_LEN < min_items_len {
        return Err(ClientError::CorruptReply);
    }

    let mut items = Vec::with_capacity(visible as usize);
    for _ in 0..visible {
        items.push(decode_flagged_item(&mut cursor, fields)?);
    }

    Ok(ResultList {
        items,
        visible_file_count: counts.visible_files,
        visible_folder_count: counts.visible_folders,
        total_file_count: counts.total_files,
        total_folder_count: counts.total_folders,
        effective_sort,
        effective_fields: fields,
    })
}

/*
 * One flagged-layout item: the kind marker, then the fixed-size fields the
 * mask declares in ascending bit order, then the variable-length text
 * fields in ascending bit order, each NUL-terminated. This ordering is the
 * canonical wire contract; the decoder reads strictly conditionally, so a
 * mask bit the service left out simply yields an absent field.
 */
fn decode_flagged_item(cursor: &mut Cursor<'_>, fields: RequestFlags) -> Result<ResultItem> {
    let kind_flags = cursor.read_u32()?;
    let mut item = ResultItem::new(ItemKind::from_wire(kind_flags));

    if fields.contains(RequestFlags::SIZE) {
        item.size = Some(cursor.read_u64()?);
    }
    if fields.contains(RequestFlags::DATE_CREATED) {
        item.date_created = Some(cursor.read_u64()?);
    }
    if fields.contains(RequestFlags::DATE_MODIFIED) {
        item.date_modified = Some(cursor.read_u64()?);
    }
    if fields.contains(RequestFlags::DATE_ACCESSED) {
        item.date_accessed = Some(cursor.read_u64()?);
    }
    if fields.contains(RequestFlags::ATTRIBUTES) {
        item.attributes = Some(cursor.read_u32()?);
    }
    if fields.contains(RequestFlags::RUN_COUNT) {
        item.run_count = Some(cursor.read_u32()?);
    }
    if fields.contains(RequestFlags::DATE_RUN) {
        item.date_run = Some(cursor.read_u64()?);
    }
    if fields.contains(RequestFlags::DATE_RECENTLY_CHANGED) {
        item.date_recently_changed = Some(cursor.read_u64()?);
    }

    if fields.contains(RequestFlags::FILE_NAME) {
        item.name = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::PATH) {
        item.path = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::FULL_PATH) {
        item.full_path = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::EXTENSION) {
        item.extension = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::FILE_LIST_NAME) {
        item.file_list_source = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::HIGHLIGHTED_FILE_NAME) {
        item.highlighted_name = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::HIGHLIGHTED_PATH) {
        item.highlighted_path = Some(cursor.read_cstr()?);
    }
    if fields.contains(RequestFlags::HIGHLIGHTED_FULL_PATH) {
        item.highlighted_full_path = Some(cursor.read_cstr()?);
    }

    Ok(item)
}
