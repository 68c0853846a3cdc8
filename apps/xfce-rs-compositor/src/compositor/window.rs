use serde::{Deserialize, Serialize};

use crate::compositor::backend::{Backend, DamageHandle, Surface};
use crate::compositor::region::{Rect, Region};
use crate::compositor::OPAQUE;

pub type WindowId = u32;

/// Identity of one store entry. Unlike the X id it is never reused, so a
/// tombstone and a new window with the same id can coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
}

impl Geometry {
    #[cfg(test)]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, border_width: 0 }
    }

    pub fn outer_width(&self) -> u32 {
        self.width + self.border_width * 2
    }

    pub fn outer_height(&self) -> u32 {
        self.height + self.border_width * 2
    }

    /// Screen area including the border.
    pub fn outer_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.outer_width(), self.outer_height())
    }

    /// Position plus content size, as used by the occlusion test.
    pub fn content_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn same_size(&self, other: &Geometry) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// `_NET_WM_WINDOW_TYPE` classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Unknown,
    Desktop,
    Dock,
    Toolbar,
    Menu,
    Utility,
    Splash,
    Dialog,
    Normal,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
}

impl WindowType {
    /// Every known type, `Unknown` excluded.
    pub const KNOWN: [WindowType; 14] = [
        WindowType::Desktop,
        WindowType::Dock,
        WindowType::Toolbar,
        WindowType::Menu,
        WindowType::Utility,
        WindowType::Splash,
        WindowType::Dialog,
        WindowType::Normal,
        WindowType::DropdownMenu,
        WindowType::PopupMenu,
        WindowType::Tooltip,
        WindowType::Notification,
        WindowType::Combo,
        WindowType::Dnd,
    ];

    pub fn is_known(self) -> bool {
        self != WindowType::Unknown
    }

    /// Windows that take part in inactive dimming.
    pub fn is_normal(self) -> bool {
        matches!(self, WindowType::Normal | WindowType::Utility)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Solid,
    Translucent,
    Argb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowDecision {
    Unknown,
    Yes,
    No,
}

/// Decoration widths from `_NET_FRAME_EXTENTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInsets {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Geometry received in a ConfigureNotify and not applied yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingConfigure {
    pub geometry: Geometry,
    pub override_redirect: bool,
    pub size_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSurface {
    pub surface: Surface,
    pub width: u32,
    pub height: u32,
}

/// Server-side handles and cached geometry owned by one window.
///
/// Every field is built lazily and released through exactly one
/// `invalidate_*` call, which frees the handle and clears the slot.
#[derive(Debug, Default)]
pub struct WindowResources {
    pub surface: Option<Surface>,
    pub alpha: Option<Surface>,
    pub border_alpha: Option<Surface>,
    pub shadow: Option<ShadowSurface>,
    pub border_size: Option<Region>,
    pub extents: Option<Rect>,
}

impl WindowResources {
    pub fn invalidate_surface<B: Backend>(&mut self, backend: &mut B) {
        if let Some(surface) = self.surface.take() {
            backend.free_surface(surface);
        }
    }

    pub fn invalidate_alpha<B: Backend>(&mut self, backend: &mut B) {
        if let Some(surface) = self.alpha.take() {
            backend.free_surface(surface);
        }
        if let Some(surface) = self.border_alpha.take() {
            backend.free_surface(surface);
        }
    }

    pub fn invalidate_shadow<B: Backend>(&mut self, backend: &mut B) {
        if let Some(shadow) = self.shadow.take() {
            backend.free_surface(shadow.surface);
        }
    }

    pub fn invalidate_regions(&mut self) {
        self.border_size = None;
        self.extents = None;
    }

    pub fn release_all<B: Backend>(&mut self, backend: &mut B) {
        self.invalidate_surface(backend);
        self.invalidate_alpha(backend);
        self.invalidate_shadow(backend);
        self.invalidate_regions();
    }
}

/// Attributes of a window as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowAttributes {
    pub geometry: Geometry,
    pub visual: u32,
    pub override_redirect: bool,
    pub input_only: bool,
    pub viewable: bool,
    pub has_alpha: bool,
}

/// A top-level window tracked by the compositor.
#[derive(Debug)]
pub struct TrackedWindow {
    pub key: WindowKey,
    pub id: WindowId,
    pub geometry: Geometry,
    pub visual: u32,
    pub override_redirect: bool,
    pub has_alpha: bool,
    pub mapped: bool,
    pub destroyed: bool,
    pub window_type: WindowType,
    pub opacity: u32,
    /// Value of `_NET_WM_WINDOW_OPACITY`, if the client set one.
    pub custom_opacity: Option<u32>,
    pub inactive: bool,
    pub frame: FrameInsets,
    pub client: Option<WindowId>,
    pub hidden: bool,
    pub mode: WindowMode,
    pub damage: Option<DamageHandle>,
    /// Set once the window has reported damage since it was mapped.
    pub damaged: bool,
    pub paint_needed: bool,
    pub shadow: ShadowDecision,
    pub pending: Option<PendingConfigure>,
    pub resources: WindowResources,
}

impl TrackedWindow {
    pub fn new(key: WindowKey, id: WindowId, attributes: &WindowAttributes) -> Self {
        Self {
            key,
            id,
            geometry: attributes.geometry,
            visual: attributes.visual,
            override_redirect: attributes.override_redirect,
            has_alpha: attributes.has_alpha && !attributes.input_only,
            mapped: false,
            destroyed: false,
            window_type: WindowType::Unknown,
            opacity: OPAQUE,
            custom_opacity: None,
            inactive: false,
            frame: FrameInsets::default(),
            client: None,
            hidden: false,
            mode: WindowMode::Solid,
            damage: None,
            damaged: false,
            paint_needed: true,
            shadow: ShadowDecision::Unknown,
            pending: None,
            resources: WindowResources::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.destroyed
    }

    pub fn opacity_fraction(&self) -> f64 {
        f64::from(self.opacity) / f64::from(OPAQUE)
    }

    /// Recompute the blend mode from the pixel format and opacity.
    pub fn derive_mode(&self) -> WindowMode {
        if self.has_alpha {
            WindowMode::Argb
        } else if self.opacity != OPAQUE {
            WindowMode::Translucent
        } else {
            WindowMode::Solid
        }
    }

    /// True if the window lies entirely outside a `width` x `height` screen.
    pub fn is_off_screen(&self, width: u32, height: u32) -> bool {
        let g = &self.geometry;
        g.x + (g.width as i32) < 1 || g.y + (g.height as i32) < 1 || g.x >= width as i32 || g.y >= height as i32
    }

    /// Whether this window may grow the occlusion rectangle. Anything with
    /// an alpha channel shows what is below, whatever its opacity property.
    pub fn is_occluder(&self) -> bool {
        self.mapped && !self.destroyed && !self.has_alpha && self.opacity == OPAQUE && !self.override_redirect
    }
}
