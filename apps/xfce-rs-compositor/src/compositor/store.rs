//! Registry of tracked windows in stacking order, plus the window-tree
//! searches used to classify them.

use tracing::trace;

use crate::compositor::backend::Backend;
use crate::compositor::window::{TrackedWindow, WindowId, WindowKey, WindowType};

/// Where a window goes in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPosition {
    Top,
    Bottom,
    /// Directly above the named sibling; bottom if it is not tracked.
    Above(WindowId),
}

impl StackPosition {
    /// Stack position for an X `above_sibling` value.
    pub fn from_sibling(above: Option<WindowId>) -> Self {
        match above {
            Some(sibling) => StackPosition::Above(sibling),
            None => StackPosition::Bottom,
        }
    }
}

/// Tracked windows, topmost first.
///
/// Tombstoned entries keep their place until they are purged, but are
/// invisible to lookups by X id.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: Vec<TrackedWindow>,
    next_key: u64,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn allocate_key(&mut self) -> WindowKey {
        self.next_key += 1;
        WindowKey(self.next_key)
    }

    /// Topmost first.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedWindow> {
        self.windows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedWindow> {
        self.windows.iter_mut()
    }

    pub fn insert(&mut self, window: TrackedWindow, position: StackPosition) {
        debug_assert!(self.find(window.id).is_none(), "window {:#x} tracked twice", window.id);
        let index = self.index_for(position);
        self.windows.insert(index, window);
    }

    pub fn find(&self, id: WindowId) -> Option<&TrackedWindow> {
        self.windows.iter().find(|w| w.id == id && w.is_live())
    }

    pub fn find_mut(&mut self, id: WindowId) -> Option<&mut TrackedWindow> {
        self.windows.iter_mut().find(|w| w.id == id && w.is_live())
    }

    pub fn get(&self, key: WindowKey) -> Option<&TrackedWindow> {
        self.windows.iter().find(|w| w.key == key)
    }

    pub fn get_mut(&mut self, key: WindowKey) -> Option<&mut TrackedWindow> {
        self.windows.iter_mut().find(|w| w.key == key)
    }

    /// Move a live window to `position`. Returns false if it is not tracked.
    pub fn restack(&mut self, id: WindowId, position: StackPosition) -> bool {
        let Some(index) = self.windows.iter().position(|w| w.id == id && w.is_live()) else {
            return false;
        };
        if position == StackPosition::Above(id) {
            return true;
        }
        let window = self.windows.remove(index);
        let target = self.index_for(position);
        self.windows.insert(target, window);
        true
    }

    /// Unlink an entry for good.
    pub fn remove(&mut self, key: WindowKey) -> Option<TrackedWindow> {
        let index = self.windows.iter().position(|w| w.key == key)?;
        Some(self.windows.remove(index))
    }

    pub fn pending_configures(&self) -> Vec<WindowKey> {
        self.windows
            .iter()
            .filter(|w| w.pending.is_some() && w.is_live())
            .map(|w| w.key)
            .collect()
    }

    /// The tracked window that is `window` or one of its ancestors.
    pub fn find_by_descendant<B: Backend>(&self, backend: &mut B, window: WindowId) -> Option<WindowKey> {
        let root = backend.root();
        let mut current = window;
        loop {
            if let Some(found) = self.find(current) {
                return Some(found.key);
            }
            let parent = backend.query_tree(current).ok()?.parent;
            if parent == root || parent == x11rb::NONE {
                return None;
            }
            current = parent;
        }
    }

    fn index_for(&self, position: StackPosition) -> usize {
        match position {
            StackPosition::Top => 0,
            StackPosition::Bottom => self.windows.len(),
            StackPosition::Above(sibling) => self
                .windows
                .iter()
                .position(|w| w.id == sibling && w.is_live())
                .unwrap_or(self.windows.len()),
        }
    }
}

/// Window type of `top`, searching its subtree depth first when the window
/// itself has no `_NET_WM_WINDOW_TYPE`. A top-level window with no typed
/// descendant is `Normal`.
pub fn classify_window<B: Backend>(backend: &mut B, top: WindowId) -> WindowType {
    let mut work = vec![top];
    while let Some(window) = work.pop() {
        if let Ok(Some(window_type)) = backend.window_type(window) {
            return window_type;
        }
        match backend.query_tree(window) {
            Ok(tree) => work.extend(tree.children.into_iter().rev()),
            Err(_) if window == top => {
                trace!("window {:#x} vanished during classification", top);
                return WindowType::Unknown;
            }
            Err(_) => {}
        }
    }
    WindowType::Normal
}

/// First window in `top`'s subtree (depth first) that carries `WM_STATE`.
pub fn find_client_window<B: Backend>(backend: &mut B, top: WindowId) -> Option<WindowId> {
    let mut work = vec![top];
    while let Some(window) = work.pop() {
        if backend.is_client_window(window) {
            return Some(window);
        }
        if let Ok(tree) = backend.query_tree(window) {
            work.extend(tree.children.into_iter().rev());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::testing::RecordingBackend;
    use crate::compositor::window::{Geometry, WindowAttributes};

    fn window(store: &mut WindowStore, id: WindowId) -> TrackedWindow {
        let key = store.allocate_key();
        let attributes = WindowAttributes {
            geometry: Geometry::new(0, 0, 10, 10),
            ..Default::default()
        };
        TrackedWindow::new(key, id, &attributes)
    }

    fn ids(store: &WindowStore) -> Vec<WindowId> {
        store.iter().map(|w| w.id).collect()
    }

    #[test]
    fn test_insert_positions() {
        let mut store = WindowStore::new();
        let a = window(&mut store, 1);
        store.insert(a, StackPosition::Top);
        let b = window(&mut store, 2);
        store.insert(b, StackPosition::Top);
        let c = window(&mut store, 3);
        store.insert(c, StackPosition::Above(1));
        let d = window(&mut store, 4);
        store.insert(d, StackPosition::Above(99));

        assert_eq!(ids(&store), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_restack() {
        let mut store = WindowStore::new();
        for id in [1, 2, 3] {
            let w = window(&mut store, id);
            store.insert(w, StackPosition::Top);
        }
        assert_eq!(ids(&store), vec![3, 2, 1]);

        assert!(store.restack(3, StackPosition::Above(1)));
        assert_eq!(ids(&store), vec![2, 3, 1]);

        assert!(store.restack(1, StackPosition::Top));
        assert_eq!(ids(&store), vec![1, 2, 3]);

        assert!(store.restack(1, StackPosition::from_sibling(None)));
        assert_eq!(ids(&store), vec![2, 3, 1]);

        assert!(!store.restack(42, StackPosition::Top));
    }

    #[test]
    fn test_tombstones_hidden_from_lookup() {
        let mut store = WindowStore::new();
        let w = window(&mut store, 7);
        let old_key = w.key;
        store.insert(w, StackPosition::Top);
        store.get_mut(old_key).expect("entry").destroyed = true;

        assert!(store.find(7).is_none());
        let fresh = window(&mut store, 7);
        let new_key = fresh.key;
        store.insert(fresh, StackPosition::Top);

        assert_eq!(store.len(), 2);
        assert_eq!(store.find(7).map(|w| w.key), Some(new_key));
        assert!(store.remove(old_key).is_some());
        assert_eq!(store.find(7).map(|w| w.key), Some(new_key));
    }

    #[test]
    fn test_restack_skips_tombstoned_sibling() {
        let mut store = WindowStore::new();
        for id in [1, 2, 3] {
            let w = window(&mut store, id);
            store.insert(w, StackPosition::Top);
        }
        store.iter_mut().find(|w| w.id == 1).expect("entry").destroyed = true;

        store.restack(3, StackPosition::Above(1));
        assert_eq!(ids(&store), vec![2, 1, 3]);
    }

    #[test]
    fn test_classification_searches_children() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.add_window(0x100, Geometry::new(0, 0, 100, 100), true);
        backend.add_child(0x100, 0x101);
        backend.add_child(0x101, 0x102);
        backend.window_mut(0x102).window_type = Some(WindowType::Dialog);

        assert_eq!(classify_window(&mut backend, 0x100), WindowType::Dialog);

        backend.window_mut(0x102).window_type = None;
        assert_eq!(classify_window(&mut backend, 0x100), WindowType::Normal);

        assert_eq!(classify_window(&mut backend, 0xdead), WindowType::Unknown);
    }

    #[test]
    fn test_client_window_and_descendant_lookup() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.add_window(0x200, Geometry::new(0, 0, 100, 100), true);
        backend.add_child(0x200, 0x201);
        backend.add_child(0x200, 0x202);
        backend.window_mut(0x202).wm_state = true;

        assert_eq!(find_client_window(&mut backend, 0x200), Some(0x202));

        let mut store = WindowStore::new();
        let frame = window(&mut store, 0x200);
        let key = frame.key;
        store.insert(frame, StackPosition::Top);

        assert_eq!(store.find_by_descendant(&mut backend, 0x202), Some(key));
        assert_eq!(store.find_by_descendant(&mut backend, 0x200), Some(key));
        assert_eq!(store.find_by_descendant(&mut backend, 0x999), None);
    }
}
