use crate::compositor::region::Rect;
use crate::compositor::window::{Geometry, WindowId};

/// Which watched property changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// `_NET_WM_WINDOW_OPACITY`
    Opacity,
    /// `_NET_WM_STATE` on a client window
    WindowState,
    /// `_XROOTPMAP_ID` or `_XSETROOT_ID` on the root window
    RootBackground,
}

/// Protocol events the engine reacts to, already stripped of X specifics.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    Create {
        window: WindowId,
    },
    Configure {
        window: WindowId,
        geometry: Geometry,
        /// Sibling directly below the window, `None` if it is at the bottom.
        above: Option<WindowId>,
        override_redirect: bool,
    },
    RootResized {
        width: u32,
        height: u32,
    },
    Destroy {
        window: WindowId,
    },
    Map {
        window: WindowId,
    },
    Unmap {
        window: WindowId,
    },
    Reparent {
        window: WindowId,
        to_root: bool,
    },
    Circulate {
        window: WindowId,
        on_top: bool,
    },
    /// Part of the root window needs repainting; `count` more follow.
    Expose {
        rect: Rect,
        count: u16,
    },
    Property {
        window: WindowId,
        kind: PropertyKind,
    },
    /// Focus change, with pointer and virtual crossings already filtered.
    Focus {
        window: WindowId,
        focused: bool,
    },
    Damage {
        drawable: WindowId,
    },
    /// Another compositor took the `_NET_WM_CM_Sn` selection.
    OwnershipLost,
}
