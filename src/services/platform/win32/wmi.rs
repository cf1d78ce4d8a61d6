use crate::error::{MonitorError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use windows::core::{w, Interface, IUnknown, BSTR, VARIANT};
use windows::Win32::Security::PSECURITY_DESCRIPTOR;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoInitializeSecurity, CoUninitialize, CLSCTX_INPROC_SERVER,
    COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_DEFAULT, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::Wmi::{
    IEnumWbemClassObject, IWbemClassObject, IWbemLocator, WbemLocator, WBEM_FLAG_FORWARD_ONLY,
    WBEM_FLAG_RETURN_IMMEDIATELY, WBEM_GENERIC_FLAG_TYPE,
};

use super::super::r#trait::{LifecycleBackend, LifecycleCallback, LifecycleNotice, NativeSubscription};

const CREATION_QUERY: &str =
    "SELECT * FROM __InstanceCreationEvent WITHIN 1 WHERE TargetInstance ISA 'Win32_Process'";
const DELETION_QUERY: &str =
    "SELECT * FROM __InstanceDeletionEvent WITHIN 1 WHERE TargetInstance ISA 'Win32_Process'";

// Таймаут одного Next(): столько максимум ждёт остановка
const NEXT_TIMEOUT_MS: i32 = 250;
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Уведомления о процессах через WMI на выделенном COM-потоке
#[derive(Default)]
pub struct WmiLifecycleWatcher;

impl WmiLifecycleWatcher {
    pub fn new() -> Self {
        Self
    }
}

struct WmiThread {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl NativeSubscription for WmiThread {
    fn release(mut self: Box<Self>) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("WMI-поток завершился паникой");
            }
        }
        info!("WMI-подписка на процессы снята");
    }
}

struct Queries {
    creation: IEnumWbemClassObject,
    deletion: IEnumWbemClassObject,
}

unsafe fn connect() -> windows::core::Result<Queries> {
    // Хост мог уже настроить безопасность COM; RPC_E_TOO_LATE здесь не ошибка
    let _ = CoInitializeSecurity(
        PSECURITY_DESCRIPTOR::default(),
        -1,
        None,
        None,
        RPC_C_AUTHN_LEVEL_DEFAULT,
        RPC_C_IMP_LEVEL_IMPERSONATE,
        None,
        EOAC_NONE,
        None,
    );

    let locator: IWbemLocator = CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)?;
    let services = locator.ConnectServer(
        &BSTR::from("ROOT\\CIMV2"),
        &BSTR::new(),
        &BSTR::new(),
        &BSTR::new(),
        0,
        &BSTR::new(),
        None,
    )?;

    let flags = WBEM_GENERIC_FLAG_TYPE(WBEM_FLAG_RETURN_IMMEDIATELY.0 | WBEM_FLAG_FORWARD_ONLY.0);
    let wql = BSTR::from("WQL");
    Ok(Queries {
        creation: services.ExecNotificationQuery(&wql, &BSTR::from(CREATION_QUERY), flags, None)?,
        deletion: services.ExecNotificationQuery(&wql, &BSTR::from(DELETION_QUERY), flags, None)?,
    })
}

unsafe fn target_instance(event: &IWbemClassObject) -> windows::core::Result<IWbemClassObject> {
    let mut value = VARIANT::default();
    event.Get(w!("TargetInstance"), 0, &mut value, None, None)?;
    IUnknown::try_from(&value)?.cast()
}

unsafe fn read_process(event: &IWbemClassObject) -> windows::core::Result<(u32, String)> {
    let instance = target_instance(event)?;

    let mut pid = VARIANT::default();
    instance.Get(w!("ProcessId"), 0, &mut pid, None, None)?;
    let pid = i32::try_from(&pid)? as u32;

    let mut name = VARIANT::default();
    instance.Get(w!("Name"), 0, &mut name, None, None)?;
    let name = BSTR::try_from(&name).map(|s| s.to_string()).unwrap_or_default();

    Ok((pid, name))
}

/// Забрать все готовые события из одного перечислителя
unsafe fn drain(query: &IEnumWbemClassObject, mut handle: impl FnMut(&IWbemClassObject)) {
    loop {
        let mut objects = [None; 1];
        let mut returned = 0u32;
        let _ = query.Next(NEXT_TIMEOUT_MS, &mut objects, &mut returned);
        if returned == 0 {
            return;
        }
        if let Some(event) = objects[0].take() {
            handle(&event);
        }
    }
}

fn run_thread(
    callback: LifecycleCallback,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<std::result::Result<(), String>>,
) {
    unsafe {
        if let Err(e) = CoInitializeEx(None, COINIT_MULTITHREADED).ok() {
            let _ = ready.send(Err(format!("CoInitializeEx: {}", e)));
            return;
        }

        let queries = match connect() {
            Ok(queries) => queries,
            Err(e) => {
                let _ = ready.send(Err(format!("WMI: {}", e)));
                CoUninitialize();
                return;
            }
        };
        let _ = ready.send(Ok(()));

        while !stop.load(Ordering::SeqCst) {
            drain(&queries.creation, |event| match read_process(event) {
                Ok((pid, name)) => callback(LifecycleNotice::Started { pid, name }),
                Err(e) => debug!("Не удалось прочитать событие создания процесса: {}", e),
            });
            drain(&queries.deletion, |event| match read_process(event) {
                Ok((pid, _)) => callback(LifecycleNotice::Exited { pid }),
                Err(e) => debug!("Не удалось прочитать событие завершения процесса: {}", e),
            });
        }

        drop(queries);
        CoUninitialize();
    }
}

impl LifecycleBackend for WmiLifecycleWatcher {
    fn subscribe(&self, callback: LifecycleCallback) -> Result<Box<dyn NativeSubscription>> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("wmi-lifecycle".to_string())
            .spawn(move || run_thread(callback, thread_stop, ready_tx))
            .map_err(|e| MonitorError::HookRegistration(format!("не удалось запустить WMI-поток: {}", e)))?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => {
                info!("WMI-подписка на создание и завершение процессов активна");
                Ok(Box::new(WmiThread {
                    stop,
                    join: Some(join),
                }))
            }
            Ok(Err(reason)) => {
                let _ = join.join();
                Err(MonitorError::HookRegistration(reason))
            }
            Err(_) => {
                warn!("WMI не ответил за {:?}, поток будет остановлен", READY_TIMEOUT);
                stop.store(true, Ordering::SeqCst);
                Err(MonitorError::HookRegistration("WMI не ответил вовремя".to_string()))
            }
        }
    }
}
