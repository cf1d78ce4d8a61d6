use serde::{Deserialize, Serialize};
use std::fmt;

/// Непрозрачный дескриптор окна верхнего уровня (HWND на Windows, XID на X11)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn new(raw: isize) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> isize {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Разбор дескриптора из строки: десятичный или `0x`-шестнадцатеричный
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let raw = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => isize::from_str_radix(hex, 16).ok()?,
            None => text.parse::<isize>().ok()?,
        };
        Some(Self(raw))
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Информация об окне процесса. Пересобирается при каждой энумерации.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowRecord {
    pub handle: WindowHandle,
    pub title: String,
    pub is_visible: bool,
    pub is_main_window: bool,
    pub process_id: u32,
}

impl WindowRecord {
    pub fn new(handle: WindowHandle, process_id: u32, title: impl Into<String>) -> Self {
        Self {
            handle,
            title: title.into(),
            is_visible: true,
            is_main_window: false,
            process_id,
        }
    }

    pub fn as_main(mut self) -> Self {
        self.is_main_window = true;
        self
    }
}

impl fmt::Display for WindowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" (pid {})", self.handle, self.title, self.process_id)
    }
}
