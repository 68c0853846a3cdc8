use x11rb::atom_manager;

use crate::compositor::window::WindowType;

atom_manager! {
    pub AtomCollection: AtomCollectionCookie {
        UTF8_STRING,
        WM_STATE,
        WM_NAME,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_HIDDEN,
        _NET_WM_STATE_FOCUSED,
        _NET_WM_WINDOW_OPACITY,
        _NET_FRAME_EXTENTS,
        _GTK_FRAME_EXTENTS,
        _XROOTPMAP_ID,
        _XSETROOT_ID,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_WINDOW_TYPE_TOOLBAR,
        _NET_WM_WINDOW_TYPE_MENU,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _NET_WM_WINDOW_TYPE_SPLASH,
        _NET_WM_WINDOW_TYPE_DIALOG,
        _NET_WM_WINDOW_TYPE_NORMAL,
        _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
        _NET_WM_WINDOW_TYPE_POPUP_MENU,
        _NET_WM_WINDOW_TYPE_TOOLTIP,
        _NET_WM_WINDOW_TYPE_NOTIFICATION,
        _NET_WM_WINDOW_TYPE_COMBO,
        _NET_WM_WINDOW_TYPE_DND,
    }
}

impl AtomCollection {
    /// Map a `_NET_WM_WINDOW_TYPE` atom to its window type.
    pub fn window_type(&self, atom: u32) -> Option<WindowType> {
        let table = [
            (self._NET_WM_WINDOW_TYPE_DESKTOP, WindowType::Desktop),
            (self._NET_WM_WINDOW_TYPE_DOCK, WindowType::Dock),
            (self._NET_WM_WINDOW_TYPE_TOOLBAR, WindowType::Toolbar),
            (self._NET_WM_WINDOW_TYPE_MENU, WindowType::Menu),
            (self._NET_WM_WINDOW_TYPE_UTILITY, WindowType::Utility),
            (self._NET_WM_WINDOW_TYPE_SPLASH, WindowType::Splash),
            (self._NET_WM_WINDOW_TYPE_DIALOG, WindowType::Dialog),
            (self._NET_WM_WINDOW_TYPE_NORMAL, WindowType::Normal),
            (self._NET_WM_WINDOW_TYPE_DROPDOWN_MENU, WindowType::DropdownMenu),
            (self._NET_WM_WINDOW_TYPE_POPUP_MENU, WindowType::PopupMenu),
            (self._NET_WM_WINDOW_TYPE_TOOLTIP, WindowType::Tooltip),
            (self._NET_WM_WINDOW_TYPE_NOTIFICATION, WindowType::Notification),
            (self._NET_WM_WINDOW_TYPE_COMBO, WindowType::Combo),
            (self._NET_WM_WINDOW_TYPE_DND, WindowType::Dnd),
        ];
        table.iter().find(|(a, _)| *a == atom).map(|(_, t)| *t)
    }

    pub fn is_root_background(&self, atom: u32) -> bool {
        atom == self._XROOTPMAP_ID || atom == self._XSETROOT_ID
    }
}
