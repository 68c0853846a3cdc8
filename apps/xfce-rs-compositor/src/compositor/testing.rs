//! In-memory display server used by the engine tests.

use std::collections::{HashMap, HashSet};

use crate::compositor::backend::{Backend, CompositeOp, DamageHandle, Surface, WindowInput, WindowTree};
use crate::compositor::region::{Rect, Region};
use crate::compositor::shadow::ShadowImage;
use crate::compositor::window::{FrameInsets, Geometry, WindowAttributes, WindowId, WindowType};
use crate::core::error::{CompositorError, Result};

#[derive(Debug, Clone, Default)]
pub struct FakeWindow {
    pub attributes: WindowAttributes,
    pub parent: WindowId,
    pub children: Vec<WindowId>,
    pub window_type: Option<WindowType>,
    pub opacity: Option<u32>,
    pub frame: Option<FrameInsets>,
    pub wm_state: bool,
    pub gtk_frame: bool,
    pub hidden: bool,
    /// Bounding shape in window coordinates; the outer rectangle if unset.
    pub bounding: Option<Region>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceKind {
    Window(WindowId),
    Solid(f64),
    Shadow { width: u32, height: u32 },
    Buffer,
    RootTile,
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeCall {
    pub op: CompositeOp,
    pub src: Surface,
    pub mask: Option<Surface>,
    pub dst: Surface,
    pub src_origin: (i32, i32),
    pub dst_rect: Rect,
    pub clip: Option<Region>,
}

pub struct RecordingBackend {
    root: WindowId,
    size: (u32, u32),
    windows: HashMap<WindowId, FakeWindow>,
    next_id: u32,
    kinds: HashMap<u32, SurfaceKind>,
    live: HashSet<u32>,
    clips: HashMap<u32, Region>,
    damages: HashMap<u32, (WindowId, Region)>,
    output: Surface,
    pub inputs: HashMap<WindowId, WindowInput>,
    pub composites: Vec<CompositeCall>,
    pub syncs: usize,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let root = 0x1;
        let mut windows = HashMap::new();
        windows.insert(
            root,
            FakeWindow {
                attributes: WindowAttributes {
                    geometry: Geometry::new(0, 0, width, height),
                    viewable: true,
                    ..Default::default()
                },
                parent: x11rb::NONE,
                ..Default::default()
            },
        );
        let output = Surface::picture(0x2);
        let mut kinds = HashMap::new();
        kinds.insert(output.picture, SurfaceKind::Output);

        Self {
            root,
            size: (width, height),
            windows,
            next_id: 0x1000,
            kinds,
            live: HashSet::new(),
            clips: HashMap::new(),
            damages: HashMap::new(),
            output,
            inputs: HashMap::new(),
            composites: Vec::new(),
            syncs: 0,
        }
    }

    /// Add a top-level window above every existing one.
    pub fn add_window(&mut self, id: WindowId, geometry: Geometry, viewable: bool) {
        let root = self.root;
        self.windows.insert(
            id,
            FakeWindow {
                attributes: WindowAttributes { geometry, viewable, ..Default::default() },
                parent: root,
                ..Default::default()
            },
        );
        self.window_mut(root).children.push(id);
    }

    pub fn add_child(&mut self, parent: WindowId, child: WindowId) {
        self.windows.insert(child, FakeWindow { parent, ..Default::default() });
        self.window_mut(parent).children.push(child);
    }

    pub fn window_mut(&mut self, id: WindowId) -> &mut FakeWindow {
        self.windows.get_mut(&id).expect("unknown fake window")
    }

    /// Forget a window and its subtree, as the server does on destroy.
    pub fn remove_window(&mut self, id: WindowId) {
        let Some(window) = self.windows.remove(&id) else {
            return;
        };
        if let Some(parent) = self.windows.get_mut(&window.parent) {
            parent.children.retain(|&c| c != id);
        }
        for child in window.children {
            self.remove_window(child);
        }
    }

    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    /// Simulate the client drawing into `window` (window coordinates).
    pub fn push_damage(&mut self, window: WindowId, rect: Rect) {
        for (owner, region) in self.damages.values_mut() {
            if *owner == window {
                region.union_rect(&rect);
            }
        }
    }

    pub fn kind(&self, surface: Surface) -> Option<SurfaceKind> {
        self.kinds.get(&surface.picture).copied()
    }

    pub fn is_live(&self, surface: Surface) -> bool {
        self.live.contains(&surface.picture)
    }

    pub fn live_surfaces(&self) -> usize {
        self.live.len()
    }

    pub fn live_window_surfaces(&self, window: WindowId) -> usize {
        self.live
            .iter()
            .filter(|p| self.kinds.get(p) == Some(&SurfaceKind::Window(window)))
            .count()
    }

    pub fn live_damages(&self) -> usize {
        self.damages.len()
    }

    pub fn clear_log(&mut self) {
        self.composites.clear();
    }

    /// Windows whose contents were composited, in drawing order.
    pub fn painted_windows(&self) -> Vec<WindowId> {
        self.composites
            .iter()
            .filter_map(|call| match self.kinds.get(&call.src.picture) {
                Some(SurfaceKind::Window(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Alpha of the mask used when `window` was last blended, 1.0 for an
    /// unmasked copy.
    pub fn last_alpha(&self, window: WindowId) -> Option<f64> {
        self.composites
            .iter()
            .rev()
            .find(|call| self.kinds.get(&call.src.picture) == Some(&SurfaceKind::Window(window)))
            .map(|call| match call.mask.and_then(|m| self.kinds.get(&m.picture)) {
                Some(SurfaceKind::Solid(alpha)) => *alpha,
                _ => 1.0,
            })
    }

    fn allocate(&mut self, kind: SurfaceKind) -> Surface {
        self.next_id += 1;
        let surface = Surface::picture(self.next_id);
        self.kinds.insert(surface.picture, kind);
        self.live.insert(surface.picture);
        surface
    }

    fn window(&self, id: WindowId) -> Result<&FakeWindow> {
        self.windows.get(&id).ok_or(CompositorError::WindowGone(id))
    }
}

impl Backend for RecordingBackend {
    fn root(&self) -> WindowId {
        self.root
    }

    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn window_attributes(&mut self, window: WindowId) -> Result<WindowAttributes> {
        Ok(self.window(window)?.attributes)
    }

    fn query_tree(&mut self, window: WindowId) -> Result<WindowTree> {
        let fake = self.window(window)?;
        Ok(WindowTree {
            parent: fake.parent,
            children: fake.children.clone(),
        })
    }

    fn window_type(&mut self, window: WindowId) -> Result<Option<WindowType>> {
        Ok(self.window(window)?.window_type)
    }

    fn opacity_property(&mut self, window: WindowId) -> Result<Option<u32>> {
        Ok(self.window(window)?.opacity)
    }

    fn frame_extents(&mut self, window: WindowId) -> Result<Option<FrameInsets>> {
        Ok(self.window(window)?.frame)
    }

    fn is_client_window(&mut self, window: WindowId) -> bool {
        self.window(window).map(|w| w.wm_state).unwrap_or(false)
    }

    fn has_gtk_frame_extents(&mut self, window: WindowId) -> bool {
        self.window(window).map(|w| w.gtk_frame).unwrap_or(false)
    }

    fn is_hidden(&mut self, window: WindowId) -> bool {
        self.window(window).map(|w| w.hidden).unwrap_or(false)
    }

    fn select_input(&mut self, window: WindowId, input: WindowInput) {
        self.inputs.insert(window, input);
    }

    fn create_damage(&mut self, window: WindowId) -> Result<DamageHandle> {
        self.window(window)?;
        self.next_id += 1;
        self.damages.insert(self.next_id, (window, Region::new()));
        Ok(DamageHandle(self.next_id))
    }

    fn destroy_damage(&mut self, damage: DamageHandle) {
        assert!(self.damages.remove(&damage.0).is_some(), "damage {:#x} freed twice", damage.0);
    }

    fn subtract_damage(&mut self, damage: DamageHandle, collect: bool) -> Result<Region> {
        let (_, region) = self.damages.get_mut(&damage.0).ok_or(CompositorError::WindowGone(damage.0))?;
        let parts = std::mem::take(region);
        Ok(if collect { parts } else { Region::new() })
    }

    fn bounding_region(&mut self, window: WindowId) -> Result<Region> {
        let fake = self.window(window)?;
        let g = fake.attributes.geometry;
        let bw = g.border_width as i32;
        Ok(fake
            .bounding
            .clone()
            .unwrap_or_else(|| Region::from_rect(Rect::new(-bw, -bw, g.outer_width(), g.outer_height()))))
    }

    fn create_window_surface(&mut self, window: WindowId, _visual: u32) -> Result<Surface> {
        self.window(window)?;
        Ok(self.allocate(SurfaceKind::Window(window)))
    }

    fn create_solid_surface(&mut self, alpha: f64, _argb: bool) -> Result<Surface> {
        Ok(self.allocate(SurfaceKind::Solid(alpha)))
    }

    fn create_shadow_surface(&mut self, image: &ShadowImage) -> Result<Surface> {
        Ok(self.allocate(SurfaceKind::Shadow {
            width: image.width,
            height: image.height,
        }))
    }

    fn create_buffer_surface(&mut self, _width: u32, _height: u32) -> Result<Surface> {
        Ok(self.allocate(SurfaceKind::Buffer))
    }

    fn create_root_tile(&mut self) -> Result<Surface> {
        Ok(self.allocate(SurfaceKind::RootTile))
    }

    fn free_surface(&mut self, surface: Surface) {
        assert!(self.live.remove(&surface.picture), "surface {:#x} freed twice", surface.picture);
        self.clips.remove(&surface.picture);
    }

    fn output_surface(&self) -> Surface {
        self.output
    }

    fn set_clip(&mut self, target: Surface, clip: Option<&Region>) {
        match clip {
            Some(region) => {
                self.clips.insert(target.picture, region.clone());
            }
            None => {
                self.clips.remove(&target.picture);
            }
        }
    }

    fn composite(
        &mut self,
        op: CompositeOp,
        src: Surface,
        mask: Option<Surface>,
        dst: Surface,
        src_origin: (i32, i32),
        dst_rect: Rect,
    ) {
        for surface in std::iter::once(src).chain(mask).chain(std::iter::once(dst)) {
            assert!(
                surface == self.output || self.live.contains(&surface.picture),
                "composite uses freed surface {:#x}",
                surface.picture
            );
        }
        self.composites.push(CompositeCall {
            op,
            src,
            mask,
            dst,
            src_origin,
            dst_rect,
            clip: self.clips.get(&dst.picture).cloned(),
        });
    }

    fn sync(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }
}
