/*
 * The concrete WM_COPYDATA transport to the live index service. The service
 * exposes a named notification window; requests travel to it as COPYDATA
 * payloads and replies come back the same way, addressed to a reply window
 * on our side. Blocking queries create a private message-only window per
 * call and pump until the correlated reply lands; asynchronous queries send
 * through a host-registered window and let the host's own message loop
 * forward the reply notifications.
 *
 * Per-call state reaches the window procedure through `lpCreateParams` and
 * `GWLP_USERDATA`, so there is no process-global routing table and multiple
 * transports coexist without interference.
 */

use std::ffi::c_void;

use windows::{
    Win32::{
        Foundation::{GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM},
        System::DataExchange::COPYDATASTRUCT,
        System::LibraryLoader::GetModuleHandleW,
        UI::WindowsAndMessaging::{
            CREATESTRUCTW, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
            FindWindowW, GWLP_USERDATA, GetClassInfoExW, GetMessageW, GetWindowLongPtrW,
            HWND_MESSAGE, IsWindow, MSG, PostMessageW, RegisterClassExW, SendMessageW,
            SetWindowLongPtrW, TranslateMessage, WINDOW_EX_STYLE, WINDOW_STYLE, WM_APP,
            WM_COPYDATA, WM_NCCREATE, WM_NCDESTROY, WM_USER, WNDCLASSEXW,
        },
    },
    core::{HSTRING, PCWSTR},
};

use crate::error::{ClientError, Result};
use crate::query::{QueryState, ReplyChannelId};
use crate::transport::{
    CorrelationToken, Notification, PendingReplies, ReplyBuffer, TransportOperations, WireLayout,
    encode_request,
};

/// Window class the service listens on; a named instance appends its name in
/// parentheses.
const SERVICE_WINDOW_CLASS: &str = "EVERYTHING_TASKBAR_NOTIFICATION";

/// Private class for the per-call blocking reply windows.
const REPLY_WINDOW_CLASS: &str = "EverythingClientReply";

/// `dwData` command code marking a COPYDATA payload as a query request.
const COPYDATA_QUERY: usize = 2;

/*
 * Posted by the reply window procedure to itself once a reply has been
 * captured. The service delivers replies with SendMessage, which is handled
 * inside GetMessageW's wait without returning from it; the posted wake-up
 * message is what actually unblocks the pump loop.
 */
const WM_REPLY_READY: u32 = WM_APP;

/// WM_USER command codes answered synchronously by the service window.
const IPC_GET_MAJOR_VERSION: usize = 0;
const IPC_GET_MINOR_VERSION: usize = 1;
const IPC_GET_REVISION: usize = 2;
const IPC_GET_BUILD_NUMBER: usize = 3;
const IPC_IS_DB_LOADED: usize = 401;

/// Which service window to talk to. The default endpoint is the unnamed
/// singleton instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Named-instance suffix, for hosts running several service instances
    /// side by side.
    pub instance: Option<String>,
}

impl ServiceEndpoint {
    fn window_class(&self) -> String {
        match &self.instance {
            Some(name) => format!("{SERVICE_WINDOW_CLASS}_({name})"),
            None => SERVICE_WINDOW_CLASS.to_string(),
        }
    }
}

/// Service build identification, from the synchronous version probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub build: u32,
}

pub struct CopyDataTransport {
    endpoint: ServiceEndpoint,
    pending: PendingReplies,
}

impl CopyDataTransport {
    pub fn new(endpoint: ServiceEndpoint) -> CopyDataTransport {
        CopyDataTransport {
            endpoint,
            pending: PendingReplies::new(),
        }
    }

    fn find_service_window(&self) -> Result<HWND> {
        let class_name = HSTRING::from(self.endpoint.window_class());
        match unsafe { FindWindowW(&class_name, PCWSTR::null()) } {
            Ok(hwnd) if !hwnd.is_invalid() => Ok(hwnd),
            _ => {
                log::warn!(
                    "CopyDataTransport: No window of class '{}' found; the index service is not running.",
                    self.endpoint.window_class()
                );
                Err(ClientError::ServiceUnavailable)
            }
        }
    }

    /// Service version, via the synchronous WM_USER probes.
    pub fn service_version(&self) -> Result<ServiceVersion> {
        let service = self.find_service_window()?;
        Ok(ServiceVersion {
            major: probe(service, IPC_GET_MAJOR_VERSION),
            minor: probe(service, IPC_GET_MINOR_VERSION),
            revision: probe(service, IPC_GET_REVISION),
            build: probe(service, IPC_GET_BUILD_NUMBER),
        })
    }

    /// Whether the service has finished loading its index. Queries sent
    /// before the index is up answer with empty result sets.
    pub fn is_index_loaded(&self) -> Result<bool> {
        let service = self.find_service_window()?;
        Ok(probe(service, IPC_IS_DB_LOADED) != 0)
    }
}

impl TransportOperations for CopyDataTransport {
    fn is_service_available(&self) -> bool {
        self.find_service_window().is_ok()
    }

    fn query_blocking(&mut self, state: &QueryState) -> Result<ReplyBuffer> {
        let service = self.find_service_window()?;
        let h_instance = module_instance()?;
        register_reply_window_class(h_instance)?;

        let correlation = state.reply_correlation();
        let slot = Box::into_raw(Box::new(ReplySlot {
            wanted: correlation,
            received: None,
            bad_envelope: false,
        }));
        // The guard destroys the window before releasing the slot, so the
        // window procedure can never observe a freed slot.
        let guard = ReplyChannelGuard::create(h_instance, slot)?;

        // Route the reply to the per-call window, whatever channel the
        // caller may have registered for async use.
        let mut routed = state.clone();
        routed.set_reply_channel(Some(ReplyChannelId(guard.hwnd.0 as isize)));
        send_query(service, guard.hwnd, &encode_request(&routed, correlation))?;

        let mut msg = MSG::default();
        loop {
            let pumped = unsafe { GetMessageW(&mut msg, Some(guard.hwnd), 0, 0) };
            if pumped.0 <= 0 {
                log::error!(
                    "CopyDataTransport: Reply message loop ended prematurely ({}). LastError: {:?}",
                    pumped.0,
                    unsafe { GetLastError() }
                );
                return Err(ClientError::ChannelCreationFailed);
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
            let slot_ref = unsafe { &mut *slot };
            if slot_ref.bad_envelope {
                return Err(ClientError::CorruptReply);
            }
            if let Some(buffer) = slot_ref.received.take() {
                return Ok(buffer);
            }
        }
    }

    fn query_async(&mut self, state: &QueryState, correlation: u32) -> Result<CorrelationToken> {
        let Some(channel) = state.reply_channel() else {
            log::warn!("CopyDataTransport: Asynchronous query without a registered reply channel.");
            return Err(ClientError::InvalidCall);
        };
        let channel_hwnd = HWND(channel.0 as *mut c_void);
        if !unsafe { IsWindow(Some(channel_hwnd)) }.as_bool() {
            log::warn!(
                "CopyDataTransport: Registered reply channel {:#x} is not a live window.",
                channel.0
            );
            return Err(ClientError::ChannelRegistrationFailed);
        }
        let service = self.find_service_window()?;
        self.pending.register(correlation)?;
        if let Err(err) = send_query(service, channel_hwnd, &encode_request(state, correlation)) {
            self.pending.take(correlation);
            return Err(err);
        }
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

/// Destination for the correlated reply of one blocking call, reached from
/// the window procedure via `GWLP_USERDATA`.
struct ReplySlot {
    wanted: u32,
    received: Option<ReplyBuffer>,
    bad_envelope: bool,
}

/// Owns the per-call reply window and its slot allocation.
struct ReplyChannelGuard {
    hwnd: HWND,
    slot: *mut ReplySlot,
}

impl ReplyChannelGuard {
    fn create(h_instance: HINSTANCE, slot: *mut ReplySlot) -> Result<ReplyChannelGuard> {
        let class_name = HSTRING::from(REPLY_WINDOW_CLASS);
        let created = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                &class_name,
                PCWSTR::null(),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                Some(HWND_MESSAGE), // message-only, never visible
                None,
                Some(h_instance),
                Some(slot as *mut c_void),
            )
        };
        match created {
            Ok(hwnd) => Ok(ReplyChannelGuard { hwnd, slot }),
            Err(err) => {
                log::error!("CopyDataTransport: CreateWindowExW for the reply window failed: {err:?}");
                // The window never existed, so the slot is reclaimed here.
                drop(unsafe { Box::from_raw(slot) });
                Err(ClientError::ChannelCreationFailed)
            }
        }
    }
}

impl Drop for ReplyChannelGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.hwnd);
            drop(Box::from_raw(self.slot));
        }
    }
}

fn module_instance() -> Result<HINSTANCE> {
    match unsafe { GetModuleHandleW(PCWSTR::null()) } {
        Ok(module) => Ok(HINSTANCE(module.0)),
        Err(err) => {
            log::error!("CopyDataTransport: GetModuleHandleW failed: {err:?}");
            Err(ClientError::ChannelCreationFailed)
        }
    }
}

/// Registers the reply window class once per process.
fn register_reply_window_class(h_instance: HINSTANCE) -> Result<()> {
    let class_name = HSTRING::from(REPLY_WINDOW_CLASS);
    unsafe {
        let mut existing = WNDCLASSEXW::default();
        if GetClassInfoExW(Some(h_instance), &class_name, &mut existing).is_ok() {
            return Ok(());
        }
        let wc = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            lpfnWndProc: Some(reply_wnd_proc),
            hInstance: h_instance,
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        if RegisterClassExW(&wc) == 0 {
            log::error!(
                "CopyDataTransport: RegisterClassExW failed. LastError: {:?}",
                GetLastError()
            );
            return Err(ClientError::ChannelCreationFailed);
        }
    }
    Ok(())
}

fn send_query(service: HWND, reply_channel: HWND, request: &[u8]) -> Result<()> {
    let data = COPYDATASTRUCT {
        dwData: COPYDATA_QUERY,
        cbData: request.len() as u32,
        lpData: request.as_ptr() as *mut c_void,
    };
    let accepted = unsafe {
        SendMessageW(
            service,
            WM_COPYDATA,
            Some(WPARAM(reply_channel.0 as usize)),
            Some(LPARAM(&data as *const COPYDATASTRUCT as isize)),
        )
    };
    if accepted.0 == 0 {
        log::warn!("CopyDataTransport: The service window rejected the query request.");
        return Err(ClientError::ServiceUnavailable);
    }
    Ok(())
}

fn probe(service: HWND, command: usize) -> u32 {
    unsafe { SendMessageW(service, WM_USER, Some(WPARAM(command)), Some(LPARAM(0))) }.0 as u32
}

/*
 * Window procedure for the per-call reply windows. The reply envelope packs
 * the wire-layout code into the high word of `dwData` and the correlation
 * into the low word; the payload is only valid for the duration of the
 * message call, so it is copied out before returning.
 */
unsafe extern "system" fn reply_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let slot_ptr = if msg == WM_NCCREATE {
        let create_struct = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
        let raw = create_struct.lpCreateParams as *mut ReplySlot;
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, raw as isize) };
        raw
    } else {
        unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut ReplySlot }
    };

    if msg == WM_NCDESTROY {
        // The slot outlives the window; only the pointer is cleared here.
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) };
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }

    if msg == WM_COPYDATA && !slot_ptr.is_null() {
        let slot = unsafe { &mut *slot_ptr };
        let data = unsafe { &*(lparam.0 as *const COPYDATASTRUCT) };
        let correlation = data.dwData as u32;
        let layout_code = ((data.dwData as u64) >> 32) as u32;

        if correlation != slot.wanted {
            // A late reply to an abandoned call; consumed without effect.
            log::debug!(
                "CopyDataTransport: Discarding reply with stale correlation {correlation} (waiting on {}).",
                slot.wanted
            );
            return LRESULT(1);
        }
        match WireLayout::from_wire(layout_code) {
            Some(layout) => {
                let bytes = if data.cbData == 0 {
                    Vec::new()
                } else {
                    unsafe {
                        std::slice::from_raw_parts(data.lpData as *const u8, data.cbData as usize)
                    }
                    .to_vec()
                };
                slot.received = Some(ReplyBuffer { layout, bytes });
            }
            None => {
                log::warn!(
                    "CopyDataTransport: Reply envelope carries unknown layout code {layout_code}."
                );
                slot.bad_envelope = true;
            }
        }
        // Wake the pump; the WM_COPYDATA itself was a sent message and
        // never surfaces from GetMessageW.
        let _ = unsafe { PostMessageW(Some(hwnd), WM_REPLY_READY, WPARAM(0), LPARAM(0)) };
        return LRESULT(1);
    }

    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}
