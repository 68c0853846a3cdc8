use crate::compositor::region::{Rect, Region};
use crate::compositor::shadow::ShadowImage;
use crate::compositor::window::{FrameInsets, WindowAttributes, WindowId, WindowType};
use crate::core::error::Result;

/// A render picture, optionally backed by a pixmap the compositor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    pub picture: u32,
    pub pixmap: Option<u32>,
}

impl Surface {
    pub fn picture(picture: u32) -> Self {
        Self { picture, pixmap: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DamageHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    Src,
    Over,
}

/// Event subscriptions the compositor keeps on a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowInput {
    None,
    /// Property and focus changes on a mapped top-level window.
    Tracked,
    /// Property changes on the client window inside a frame.
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowTree {
    pub parent: WindowId,
    pub children: Vec<WindowId>,
}

/// Everything the compositing engine needs from the display server.
///
/// Queries about a window fail with an error when the window is already
/// gone; the engine treats that as a normal race and drops the operation.
pub trait Backend {
    fn root(&self) -> WindowId;
    fn screen_size(&self) -> (u32, u32);

    fn window_attributes(&mut self, window: WindowId) -> Result<WindowAttributes>;
    fn query_tree(&mut self, window: WindowId) -> Result<WindowTree>;
    /// First known `_NET_WM_WINDOW_TYPE` entry, if any.
    fn window_type(&mut self, window: WindowId) -> Result<Option<WindowType>>;
    fn opacity_property(&mut self, window: WindowId) -> Result<Option<u32>>;
    fn frame_extents(&mut self, window: WindowId) -> Result<Option<FrameInsets>>;
    /// True if the window carries `WM_STATE`, i.e. it is a client window.
    fn is_client_window(&mut self, window: WindowId) -> bool;
    fn has_gtk_frame_extents(&mut self, window: WindowId) -> bool;
    fn is_hidden(&mut self, window: WindowId) -> bool;
    fn select_input(&mut self, window: WindowId, input: WindowInput);

    fn create_damage(&mut self, window: WindowId) -> Result<DamageHandle>;
    fn destroy_damage(&mut self, damage: DamageHandle);
    /// Clear the accumulated damage. With `collect`, return it in window
    /// coordinates; otherwise return an empty region.
    fn subtract_damage(&mut self, damage: DamageHandle, collect: bool) -> Result<Region>;
    /// Bounding shape in window coordinates (origin inside the border).
    fn bounding_region(&mut self, window: WindowId) -> Result<Region>;

    fn create_window_surface(&mut self, window: WindowId, visual: u32) -> Result<Surface>;
    /// 1x1 repeating black surface with the given alpha.
    fn create_solid_surface(&mut self, alpha: f64, argb: bool) -> Result<Surface>;
    fn create_shadow_surface(&mut self, image: &ShadowImage) -> Result<Surface>;
    fn create_buffer_surface(&mut self, width: u32, height: u32) -> Result<Surface>;
    fn create_root_tile(&mut self) -> Result<Surface>;
    fn free_surface(&mut self, surface: Surface);
    fn output_surface(&self) -> Surface;

    /// Restrict drawing on `target` to `clip`, or lift the restriction.
    fn set_clip(&mut self, target: Surface, clip: Option<&Region>);
    /// Blend `src` (through `mask`) onto `dst` at `dst_rect`. The mask is
    /// sampled at the same origin as the source.
    fn composite(
        &mut self,
        op: CompositeOp,
        src: Surface,
        mask: Option<Surface>,
        dst: Surface,
        src_origin: (i32, i32),
        dst_rect: Rect,
    );

    fn sync(&mut self) -> Result<()>;
}
