use crate::events::WindowHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Последний известный заголовок каждого окна.
///
/// Отсекает повторные уведомления хука с тем же заголовком.
/// Чтения дешёвые: заголовок хранится как `Arc<str>`.
#[derive(Default)]
pub struct TitleCache {
    titles: RwLock<HashMap<WindowHandle, Arc<str>>>,
}

impl TitleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: WindowHandle) -> Option<Arc<str>> {
        self.titles.read().get(&handle).cloned()
    }

    /// Записать заголовок. `true`, если он отличается от сохранённого (или окно новое).
    pub fn update(&self, handle: WindowHandle, title: &str) -> bool {
        if self.titles.read().get(&handle).is_some_and(|known| &**known == title) {
            return false;
        }
        let mut titles = self.titles.write();
        match titles.get(&handle) {
            Some(known) if &**known == title => false,
            _ => {
                titles.insert(handle, Arc::from(title));
                true
            }
        }
    }

    /// Запомнить заголовок без признака изменения (данные опроса)
    pub fn seed(&self, handle: WindowHandle, title: &str) {
        self.update(handle, title);
    }

    pub fn forget(&self, handle: WindowHandle) {
        self.titles.write().remove(&handle);
    }

    /// Оставить только окна, для которых `keep` вернул `true`
    pub fn retain(&self, mut keep: impl FnMut(&WindowHandle) -> bool) {
        self.titles.write().retain(|handle, _| keep(handle));
    }

    pub fn clear(&self) {
        self.titles.write().clear();
    }

    pub fn len(&self) -> usize {
        self.titles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.read().is_empty()
    }
}
