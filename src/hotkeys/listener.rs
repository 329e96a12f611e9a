//! OS-level hotkey registration.
//!
//! `RegisterHotKey` delivers `WM_HOTKEY` to the registering thread, so the
//! listener runs its own thread with a hidden message-only window and a
//! blocking message loop. Presses are forwarded through the action sink.

use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL, MOD_NOREPEAT,
    MOD_SHIFT, MOD_WIN,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    GetWindowLongPtrW, PostThreadMessageW, RegisterClassW, SetWindowLongPtrW, TranslateMessage,
    GWLP_USERDATA, HWND_MESSAGE, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_HOTKEY, WM_QUIT,
    WNDCLASSW,
};

use crate::error::{FrameGenError, FrameGenResult};
use crate::hotkeys::{HotkeyAction, HotkeyBinding, Modifiers};

const CLASS_NAME: &str = "FrameGenHotkeyWindow";

struct ListenerState {
    sender: Sender<HotkeyAction>,
}

/// Running hotkey listener. Dropping it stops the thread and unregisters
/// every shortcut.
pub struct HotkeyListener {
    thread: Option<JoinHandle<()>>,
    thread_id: u32,
}

impl HotkeyListener {
    /// Spawn the listener thread and register `bindings`.
    ///
    /// A binding that is already taken by another application is logged and
    /// skipped; the listener still starts as long as the message window could
    /// be created.
    pub fn spawn(
        bindings: Vec<HotkeyBinding>,
        sender: Sender<HotkeyAction>,
    ) -> FrameGenResult<Self> {
        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<u32, String>>(1);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || run_message_loop(bindings, sender, init_tx))?;

        match init_rx.recv() {
            Ok(Ok(thread_id)) => Ok(Self {
                thread: Some(thread),
                thread_id,
            }),
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(FrameGenError::Initialization(msg))
            }
            Err(_) => Err(FrameGenError::Initialization(
                "hotkey listener thread exited before initialising".to_string(),
            )),
        }
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_message_loop(
    bindings: Vec<HotkeyBinding>,
    sender: Sender<HotkeyAction>,
    init_tx: Sender<Result<u32, String>>,
) {
    let mut state = Box::new(ListenerState { sender });

    let hwnd = match unsafe { create_message_window() } {
        Ok(hwnd) => hwnd,
        Err(err) => {
            let _ = init_tx.send(Err(format!("failed to create hotkey window: {err}")));
            return;
        }
    };

    unsafe {
        SetWindowLongPtrW(hwnd, GWLP_USERDATA, &mut *state as *mut ListenerState as isize);
    }

    let mut registered = Vec::new();
    for binding in &bindings {
        match unsafe { register_binding(hwnd, binding) } {
            Ok(()) => {
                log::debug!("registered hotkey {} for {:?}", binding.display(), binding.action);
                registered.push(binding.action.id());
            }
            Err(err) => {
                log::error!(
                    "hotkey {} could not be registered (taken by another application?): {err}",
                    binding.display()
                );
            }
        }
    }

    let _ = init_tx.send(Ok(unsafe { GetCurrentThreadId() }));

    let mut msg = MSG::default();
    loop {
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        if result.0 <= 0 {
            break;
        }
        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    unsafe {
        for id in registered {
            let _ = UnregisterHotKey(hwnd, id);
        }
        let _ = DestroyWindow(hwnd);
    }
}

unsafe fn create_message_window() -> windows::core::Result<HWND> {
    let hinstance = GetModuleHandleW(None)?;
    let class_name: Vec<u16> = CLASS_NAME.encode_utf16().chain(std::iter::once(0)).collect();

    let wc = WNDCLASSW {
        lpfnWndProc: Some(hotkey_wnd_proc),
        hInstance: hinstance.into(),
        lpszClassName: PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };
    // Re-registering an existing class fails harmlessly; the window creation
    // below is the authoritative check.
    let _ = RegisterClassW(&wc);

    CreateWindowExW(
        WINDOW_EX_STYLE(0),
        PCWSTR(class_name.as_ptr()),
        PCWSTR::null(),
        WINDOW_STYLE(0),
        0,
        0,
        0,
        0,
        HWND_MESSAGE,
        None,
        hinstance,
        None,
    )
}

unsafe fn register_binding(hwnd: HWND, binding: &HotkeyBinding) -> windows::core::Result<()> {
    RegisterHotKey(
        hwnd,
        binding.action.id(),
        modifiers_to_win32(binding.modifiers),
        binding.virtual_key,
    )
}

fn modifiers_to_win32(modifiers: Modifiers) -> HOT_KEY_MODIFIERS {
    let mut result = MOD_NOREPEAT;
    if modifiers.alt {
        result |= MOD_ALT;
    }
    if modifiers.ctrl {
        result |= MOD_CONTROL;
    }
    if modifiers.shift {
        result |= MOD_SHIFT;
    }
    if modifiers.win {
        result |= MOD_WIN;
    }
    result
}

unsafe extern "system" fn hotkey_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_HOTKEY {
        let state_ptr = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut ListenerState;
        if !state_ptr.is_null() {
            let state = &*state_ptr;
            if let Some(action) = HotkeyAction::from_id(wparam.0 as i32) {
                if state.sender.try_send(action).is_err() {
                    log::warn!("hotkey action {action:?} dropped: sink full");
                }
            }
        }
        return LRESULT(0);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}
