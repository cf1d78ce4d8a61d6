use crate::error::{MonitorError, Result};
use crate::events::WindowHandle;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};
use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    GetMessageW, PostThreadMessageW, EVENT_OBJECT_NAMECHANGE, MSG, WINEVENT_OUTOFCONTEXT,
    WINEVENT_SKIPOWNPROCESS, WM_QUIT,
};

use super::super::r#trait::{NativeSubscription, TitleCallback, TitleHookBackend};

// WINEVENTPROC не принимает пользовательских данных, поэтому приёмник глобальный.
// Владеет им ровно одна установленная подписка.
static TITLE_SINK: Lazy<Mutex<Option<TitleCallback>>> = Lazy::new(|| Mutex::new(None));

const READY_TIMEOUT: Duration = Duration::from_secs(2);

unsafe extern "system" fn name_change_proc(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _id_thread: u32,
    _event_time: u32,
) {
    // Интересны только сами окна (OBJID_WINDOW, CHILDID_SELF), а не их дочерние объекты
    if event != EVENT_OBJECT_NAMECHANGE || id_object != 0 || id_child != 0 || hwnd.0.is_null() {
        return;
    }
    let sink = TITLE_SINK.lock().clone();
    if let Some(sink) = sink {
        if catch_unwind(AssertUnwindSafe(|| sink(WindowHandle(hwnd.0 as isize)))).is_err() {
            error!("Паника в обработчике смены заголовка подавлена");
        }
    }
}

/// Глобальный WinEvent-хук EVENT_OBJECT_NAMECHANGE на отдельном потоке с циклом сообщений
#[derive(Default)]
pub struct WinEventTitleHook;

impl WinEventTitleHook {
    pub fn new() -> Self {
        Self
    }
}

struct HookThread {
    thread_id: u32,
    join: Option<JoinHandle<()>>,
}

impl NativeSubscription for HookThread {
    fn release(mut self: Box<Self>) {
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Поток WinEvent-хука завершился паникой");
            }
        }
        *TITLE_SINK.lock() = None;
        info!("WinEvent-хук заголовков снят");
    }
}

impl TitleHookBackend for WinEventTitleHook {
    fn install(&self, callback: TitleCallback) -> Result<Box<dyn NativeSubscription>> {
        {
            let mut sink = TITLE_SINK.lock();
            if sink.is_some() {
                return Err(MonitorError::HookRegistration("хук заголовков уже установлен".to_string()));
            }
            *sink = Some(callback);
        }

        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<u32, String>>();
        let join = std::thread::Builder::new()
            .name("title-hook".to_string())
            .spawn(move || unsafe {
                let hook = SetWinEventHook(
                    EVENT_OBJECT_NAMECHANGE,
                    EVENT_OBJECT_NAMECHANGE,
                    HMODULE::default(),
                    Some(name_change_proc),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
                );
                if hook.is_invalid() {
                    let _ = ready_tx.send(Err("SetWinEventHook вернул пустой дескриптор".to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(GetCurrentThreadId()));

                // Out-of-context хук доставляет события через очередь сообщений этого потока
                let mut msg = MSG::default();
                while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {}

                let _ = UnhookWinEvent(hook);
                debug!("Цикл сообщений WinEvent-хука завершён");
            })
            .map_err(|e| {
                *TITLE_SINK.lock() = None;
                MonitorError::HookRegistration(format!("не удалось запустить поток хука: {}", e))
            })?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                info!("WinEvent-хук заголовков установлен (поток {})", thread_id);
                Ok(Box::new(HookThread {
                    thread_id,
                    join: Some(join),
                }))
            }
            Ok(Err(reason)) => {
                *TITLE_SINK.lock() = None;
                let _ = join.join();
                Err(MonitorError::HookRegistration(reason))
            }
            Err(_) => {
                *TITLE_SINK.lock() = None;
                Err(MonitorError::HookRegistration("поток хука не ответил вовремя".to_string()))
            }
        }
    }
}
