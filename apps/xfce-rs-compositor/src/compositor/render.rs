//! X11 implementation of the compositor backend over Composite, Damage,
//! XFixes and Render.

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::{debug, info, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::cookie::VoidCookie;
use x11rb::errors::ConnectionError;
use x11rb::protocol::composite::{ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{ConnectionExt as _, ReportLevel};
use x11rb::protocol::render::{
    ChangePictureAux, Color, ConnectionExt as _, CreatePictureAux, Directformat, PictOp, PictType, Pictformat,
    Pictforminfo, Repeat,
};
use x11rb::protocol::shape::{ConnectionExt as _, SK, SO};
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClipOrdering, ConnectionExt as _, CreateGCAux, EventMask, ExposeEvent,
    ImageFormat, MapState, NotifyDetail, NotifyMode, Place, Rectangle, SubwindowMode, Visualid, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::compositor::backend::{Backend, CompositeOp, DamageHandle, Surface, WindowInput, WindowTree};
use crate::compositor::event::{CompositorEvent, PropertyKind};
use crate::compositor::region::{Rect, Region};
use crate::compositor::shadow::ShadowImage;
use crate::compositor::window::{FrameInsets, Geometry, WindowAttributes, WindowId, WindowType};
use crate::core::context::Context;
use crate::core::error::{log_and_ignore, CompositorError, ErrorTracker, HealthStatus, Result};
use crate::core::sequence::SequenceGuard;
use crate::ewmh::selection::CmSelection;

/// Gray used when the root window has no background pixmap.
const DEFAULT_BACKGROUND: u16 = 0x8080;

/// The overlay hides the root, so screen exposures arrive on the overlay.
const OVERLAY_EVENTS: EventMask = EventMask::EXPOSURE;

/// Picture formats the compositor draws with.
#[derive(Debug, Clone)]
pub struct PictFormats {
    pub root: Pictformat,
    pub argb32: Pictformat,
    pub a8: Pictformat,
    visuals: HashMap<Visualid, Pictformat>,
    with_alpha: Vec<Pictformat>,
}

impl PictFormats {
    pub fn from_parts(
        formats: &[Pictforminfo],
        visuals: impl IntoIterator<Item = (Visualid, Pictformat)>,
        root_visual: Visualid,
    ) -> Result<Self> {
        let visuals: HashMap<Visualid, Pictformat> = visuals.into_iter().collect();
        let root = *visuals.get(&root_visual).ok_or(CompositorError::MissingFormat("root visual"))?;
        let argb32 = formats
            .iter()
            .find(|f| is_direct(f, 32) && is_standard_argb(&f.direct))
            .map(|f| f.id)
            .ok_or(CompositorError::MissingFormat("ARGB32"))?;
        let a8 = formats
            .iter()
            .find(|f| is_direct(f, 8) && f.direct.alpha_mask == 0xff && f.direct.red_mask == 0)
            .map(|f| f.id)
            .ok_or(CompositorError::MissingFormat("A8"))?;
        let with_alpha = formats
            .iter()
            .filter(|f| f.type_ == PictType::DIRECT && f.direct.alpha_mask != 0)
            .map(|f| f.id)
            .collect();

        Ok(Self {
            root,
            argb32,
            a8,
            visuals,
            with_alpha,
        })
    }

    fn query(conn: &RustConnection, root_visual: Visualid) -> Result<Self> {
        let reply = conn.render_query_pict_formats()?.reply()?;
        let visuals = reply
            .screens
            .iter()
            .flat_map(|screen| screen.depths.iter())
            .flat_map(|depth| depth.visuals.iter())
            .map(|v| (v.visual, v.format));
        Self::from_parts(&reply.formats, visuals, root_visual)
    }

    pub fn for_visual(&self, visual: Visualid) -> Pictformat {
        self.visuals.get(&visual).copied().unwrap_or(self.root)
    }

    pub fn visual_has_alpha(&self, visual: Visualid) -> bool {
        self.visuals
            .get(&visual)
            .is_some_and(|format| self.with_alpha.contains(format))
    }
}

fn is_direct(format: &Pictforminfo, depth: u8) -> bool {
    format.type_ == PictType::DIRECT && format.depth == depth
}

fn is_standard_argb(direct: &Directformat) -> bool {
    direct.alpha_mask == 0xff
        && direct.alpha_shift == 24
        && direct.red_mask == 0xff
        && direct.red_shift == 16
        && direct.green_mask == 0xff
        && direct.green_shift == 8
        && direct.blue_mask == 0xff
        && direct.blue_shift == 0
}

/// Remember the serial of a request that may fail because its window is
/// already gone.
fn expect_failure(
    guard: &mut SequenceGuard,
    sent: std::result::Result<VoidCookie<'_, RustConnection>, ConnectionError>,
    operation: &str,
) {
    match sent {
        Ok(cookie) => guard.record_expected_failure(cookie.sequence_number()),
        Err(e) => debug!("Ignoring error in {}: {}", operation, e),
    }
}

fn to_rectangle(rect: &Rect) -> Rectangle {
    let clamp = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
    Rectangle {
        x: clamp(rect.x1),
        y: clamp(rect.y1),
        width: rect.width().min(u32::from(u16::MAX)) as u16,
        height: rect.height().min(u32::from(u16::MAX)) as u16,
    }
}

fn from_rectangle(rect: &Rectangle) -> Rect {
    Rect::new(i32::from(rect.x), i32::from(rect.y), u32::from(rect.width), u32::from(rect.height))
}

fn screen_expose(e: &ExposeEvent, root: Window, overlay: Window) -> Option<CompositorEvent> {
    (e.window == root || e.window == overlay).then(|| CompositorEvent::Expose {
        rect: Rect::new(i32::from(e.x), i32::from(e.y), u32::from(e.width), u32::from(e.height)),
        count: e.count,
    })
}

/// Copy `image` into rows padded to the 32-bit scanline unit.
fn padded_rows(image: &ShadowImage) -> (usize, Vec<u8>) {
    let width = image.width as usize;
    let stride = (width + 3) & !3;
    let mut data = vec![0u8; stride * image.height as usize];
    for (row, chunk) in image.data.chunks(width.max(1)).enumerate().take(image.height as usize) {
        data[row * stride..row * stride + chunk.len()].copy_from_slice(chunk);
    }
    (stride, data)
}

pub struct RenderBackend {
    ctx: Context,
    formats: PictFormats,
    selection: CmSelection,
    overlay: Window,
    output: Surface,
    width: u32,
    height: u32,
    guard: SequenceGuard,
    errors: ErrorTracker,
    queued: VecDeque<CompositorEvent>,
}

impl RenderBackend {
    /// Redirect every top-level window and set up the overlay the
    /// composited image is drawn to.
    pub fn new(ctx: Context, selection: CmSelection) -> Result<Self> {
        let formats = PictFormats::query(&ctx.conn, ctx.root_visual)?;
        let root = ctx.root_window;

        if ctx
            .conn
            .composite_redirect_subwindows(root, Redirect::MANUAL)?
            .check()
            .is_err()
        {
            return Err(CompositorError::RedirectRefused);
        }

        let overlay = ctx.conn.composite_get_overlay_window(root)?.reply()?.overlay_win;
        ctx.conn
            .change_window_attributes(overlay, &ChangeWindowAttributesAux::new().event_mask(OVERLAY_EVENTS))?;
        // An empty input shape lets pointer events fall through.
        ctx.conn
            .shape_rectangles(SO::SET, SK::INPUT, ClipOrdering::UNSORTED, overlay, 0, 0, &[])?;

        let picture = ctx.conn.generate_id()?;
        ctx.conn.render_create_picture(
            picture,
            overlay,
            formats.root,
            &CreatePictureAux::new().subwindowmode(SubwindowMode::INCLUDE_INFERIORS),
        )?;

        let width = u32::from(ctx.screen_width);
        let height = u32::from(ctx.screen_height);
        info!("Compositing {}x{} on overlay {:#x}", width, height, overlay);

        Ok(Self {
            ctx,
            formats,
            selection,
            overlay,
            output: Surface::picture(picture),
            width,
            height,
            guard: SequenceGuard::new(),
            errors: ErrorTracker::new(),
            queued: VecDeque::new(),
        })
    }

    pub fn grab(&self) -> Result<()> {
        self.ctx.conn.grab_server()?;
        Ok(())
    }

    pub fn ungrab(&self) -> Result<()> {
        self.ctx.conn.ungrab_server()?;
        self.ctx.conn.flush()?;
        Ok(())
    }

    /// Children of the root window, bottom to top, minus the overlay.
    pub fn initial_windows(&self) -> Result<Vec<WindowId>> {
        let tree = self.ctx.conn.query_tree(self.ctx.root_window)?.reply()?;
        Ok(tree
            .children
            .into_iter()
            .filter(|&w| w != self.overlay && w != self.selection.owner)
            .collect())
    }

    pub fn connection_fd(&self) -> RawFd {
        self.ctx.conn.stream().as_raw_fd()
    }

    pub fn flush(&self) -> Result<()> {
        self.ctx.conn.flush()?;
        Ok(())
    }

    pub fn health_check(&self) -> HealthStatus {
        self.errors.health_check()
    }

    /// Next event the engine cares about, or `None` once the queue is empty.
    /// Protocol errors are filtered here and never returned.
    pub fn poll_event(&mut self) -> Result<Option<CompositorEvent>> {
        if let Some(event) = self.queued.pop_front() {
            return Ok(Some(event));
        }
        self.read_event()
    }

    /// True if an event is ready without touching the socket again.
    pub fn has_queued_events(&mut self) -> Result<bool> {
        if !self.queued.is_empty() {
            return Ok(true);
        }
        match self.read_event()? {
            Some(event) => {
                self.queued.push_back(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_event(&mut self) -> Result<Option<CompositorEvent>> {
        while let Some((event, serial)) = self.ctx.conn.poll_for_event_with_sequence()? {
            if let Event::Error(error) = event {
                if !self.guard.is_expected_failure(serial) {
                    self.errors.record(&error, serial);
                }
                continue;
            }
            self.guard.discard_older(serial);
            if let Some(event) = self.translate(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn translate(&mut self, event: Event) -> Option<CompositorEvent> {
        let root = self.ctx.root_window;
        let atoms = self.ctx.atoms;
        let (overlay, owner) = (self.overlay, self.selection.owner);
        let ours = |w: Window| w == overlay || w == owner;

        let event = match event {
            Event::CreateNotify(e) if e.parent == root && !ours(e.window) => {
                CompositorEvent::Create { window: e.window }
            }
            Event::ConfigureNotify(e) if e.window == root => {
                self.width = u32::from(e.width);
                self.height = u32::from(e.height);
                CompositorEvent::RootResized {
                    width: self.width,
                    height: self.height,
                }
            }
            Event::ConfigureNotify(e) if !ours(e.window) => CompositorEvent::Configure {
                window: e.window,
                geometry: Geometry {
                    x: i32::from(e.x),
                    y: i32::from(e.y),
                    width: u32::from(e.width),
                    height: u32::from(e.height),
                    border_width: u32::from(e.border_width),
                },
                above: (e.above_sibling != x11rb::NONE).then_some(e.above_sibling),
                override_redirect: e.override_redirect,
            },
            Event::DestroyNotify(e) => CompositorEvent::Destroy { window: e.window },
            Event::MapNotify(e) if !ours(e.window) => CompositorEvent::Map { window: e.window },
            Event::UnmapNotify(e) => CompositorEvent::Unmap { window: e.window },
            Event::ReparentNotify(e) => CompositorEvent::Reparent {
                window: e.window,
                to_root: e.parent == root,
            },
            Event::CirculateNotify(e) => CompositorEvent::Circulate {
                window: e.window,
                on_top: e.place == Place::ON_TOP,
            },
            Event::Expose(e) => return screen_expose(&e, root, overlay),
            Event::PropertyNotify(e) => {
                let kind = if e.atom == atoms._NET_WM_WINDOW_OPACITY {
                    PropertyKind::Opacity
                } else if e.atom == atoms._NET_WM_STATE {
                    PropertyKind::WindowState
                } else if e.window == root && atoms.is_root_background(e.atom) {
                    PropertyKind::RootBackground
                } else {
                    return None;
                };
                CompositorEvent::Property { window: e.window, kind }
            }
            Event::FocusIn(e) if e.detail != NotifyDetail::POINTER => CompositorEvent::Focus {
                window: e.event,
                focused: true,
            },
            Event::FocusOut(e) if e.mode == NotifyMode::GRAB || e.detail != NotifyDetail::VIRTUAL => {
                CompositorEvent::Focus {
                    window: e.event,
                    focused: false,
                }
            }
            Event::DamageNotify(e) => CompositorEvent::Damage { drawable: e.drawable },
            Event::SelectionClear(e) if e.selection == self.selection.atom => CompositorEvent::OwnershipLost,
            _ => return None,
        };
        Some(event)
    }

    fn property32(&self, window: Window, property: u32, kind: impl Into<u32>, length: u32) -> Result<Vec<u32>> {
        let reply = self
            .ctx
            .conn
            .get_property(false, window, property, kind.into(), 0, length)?
            .reply()?;
        Ok(reply.value32().map(|values| values.collect()).unwrap_or_default())
    }

    fn has_property(&self, window: Window, property: u32) -> bool {
        self.ctx
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, 0)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some_and(|reply| reply.type_ != x11rb::NONE)
    }

    /// Pixmap named by `_XROOTPMAP_ID` or `_XSETROOT_ID`, if it is usable.
    fn root_pixmap(&self) -> Option<u32> {
        let atoms = &self.ctx.atoms;
        [atoms._XROOTPMAP_ID, atoms._XSETROOT_ID].into_iter().find_map(|property| {
            let pixmap = *self
                .property32(self.ctx.root_window, property, AtomEnum::PIXMAP, 1)
                .ok()?
                .first()?;
            if pixmap == x11rb::NONE {
                return None;
            }
            let geometry = self.ctx.conn.get_geometry(pixmap).ok()?.reply().ok()?;
            (geometry.width > 0 && geometry.height > 0).then_some(pixmap)
        })
    }

    /// 1x1 repeating picture filled with `color`.
    fn solid_picture(&self, depth: u8, format: Pictformat, color: Color) -> Result<Surface> {
        let conn = &self.ctx.conn;
        let pixmap = conn.generate_id()?;
        conn.create_pixmap(depth, pixmap, self.ctx.root_window, 1, 1)?;
        let picture = conn.generate_id()?;
        conn.render_create_picture(picture, pixmap, format, &CreatePictureAux::new().repeat(Repeat::NORMAL))?;
        conn.render_fill_rectangles(
            PictOp::SRC,
            picture,
            color,
            &[Rectangle {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            }],
        )?;
        conn.free_pixmap(pixmap)?;
        Ok(Surface::picture(picture))
    }
}

impl Backend for RenderBackend {
    fn root(&self) -> WindowId {
        self.ctx.root_window
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn window_attributes(&mut self, window: WindowId) -> Result<WindowAttributes> {
        let attributes = self.ctx.conn.get_window_attributes(window)?;
        let geometry = self.ctx.conn.get_geometry(window)?;
        let attributes = attributes.reply().map_err(|e| CompositorError::from_window_reply(window, e))?;
        let geometry = geometry.reply().map_err(|e| CompositorError::from_window_reply(window, e))?;
        let input_only = attributes.class == WindowClass::INPUT_ONLY;

        Ok(WindowAttributes {
            geometry: Geometry {
                x: i32::from(geometry.x),
                y: i32::from(geometry.y),
                width: u32::from(geometry.width),
                height: u32::from(geometry.height),
                border_width: u32::from(geometry.border_width),
            },
            visual: attributes.visual,
            override_redirect: attributes.override_redirect,
            input_only,
            viewable: attributes.map_state == MapState::VIEWABLE,
            has_alpha: !input_only && self.formats.visual_has_alpha(attributes.visual),
        })
    }

    fn query_tree(&mut self, window: WindowId) -> Result<WindowTree> {
        let reply = self
            .ctx
            .conn
            .query_tree(window)?
            .reply()
            .map_err(|e| CompositorError::from_window_reply(window, e))?;
        Ok(WindowTree {
            parent: reply.parent,
            children: reply.children,
        })
    }

    fn window_type(&mut self, window: WindowId) -> Result<Option<WindowType>> {
        let atoms = self.property32(window, self.ctx.atoms._NET_WM_WINDOW_TYPE, AtomEnum::ATOM, 32)?;
        Ok(atoms.into_iter().find_map(|atom| self.ctx.atoms.window_type(atom)))
    }

    fn opacity_property(&mut self, window: WindowId) -> Result<Option<u32>> {
        let values = self.property32(window, self.ctx.atoms._NET_WM_WINDOW_OPACITY, AtomEnum::CARDINAL, 1)?;
        Ok(values.first().copied())
    }

    fn frame_extents(&mut self, window: WindowId) -> Result<Option<FrameInsets>> {
        let values = self.property32(window, self.ctx.atoms._NET_FRAME_EXTENTS, AtomEnum::CARDINAL, 4)?;
        Ok(match values[..] {
            [left, right, top, bottom, ..] => Some(FrameInsets { left, right, top, bottom }),
            _ => None,
        })
    }

    fn is_client_window(&mut self, window: WindowId) -> bool {
        self.has_property(window, self.ctx.atoms.WM_STATE)
    }

    fn has_gtk_frame_extents(&mut self, window: WindowId) -> bool {
        self.has_property(window, self.ctx.atoms._GTK_FRAME_EXTENTS)
    }

    fn is_hidden(&mut self, window: WindowId) -> bool {
        let atoms = &self.ctx.atoms;
        let Ok(state) = self.property32(window, atoms._NET_WM_STATE, AtomEnum::ATOM, 32) else {
            return false;
        };
        state.contains(&atoms._NET_WM_STATE_HIDDEN) && !state.contains(&atoms._NET_WM_STATE_FOCUSED)
    }

    fn select_input(&mut self, window: WindowId, input: WindowInput) {
        let mask = match input {
            WindowInput::None => EventMask::NO_EVENT,
            WindowInput::Tracked => EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE,
            WindowInput::Client => EventMask::PROPERTY_CHANGE,
        };
        let values = ChangeWindowAttributesAux::new().event_mask(mask);
        expect_failure(
            &mut self.guard,
            self.ctx.conn.change_window_attributes(window, &values),
            "select input",
        );
    }

    fn create_damage(&mut self, window: WindowId) -> Result<DamageHandle> {
        let damage = self.ctx.conn.generate_id()?;
        expect_failure(
            &mut self.guard,
            self.ctx.conn.damage_create(damage, window, ReportLevel::NON_EMPTY),
            "create damage",
        );
        Ok(DamageHandle(damage))
    }

    fn destroy_damage(&mut self, damage: DamageHandle) {
        expect_failure(&mut self.guard, self.ctx.conn.damage_destroy(damage.0), "destroy damage");
    }

    fn subtract_damage(&mut self, damage: DamageHandle, collect: bool) -> Result<Region> {
        if !collect {
            expect_failure(
                &mut self.guard,
                self.ctx.conn.damage_subtract(damage.0, x11rb::NONE, x11rb::NONE),
                "subtract damage",
            );
            return Ok(Region::new());
        }

        let parts = self.ctx.conn.generate_id()?;
        self.ctx.conn.xfixes_create_region(parts, &[])?;
        expect_failure(
            &mut self.guard,
            self.ctx.conn.damage_subtract(damage.0, x11rb::NONE, parts),
            "subtract damage",
        );
        let fetched = self.ctx.conn.xfixes_fetch_region(parts)?.reply();
        log_and_ignore(self.ctx.conn.xfixes_destroy_region(parts), "destroy region");
        let reply = fetched?;
        Ok(Region::from_rects(reply.rectangles.iter().map(from_rectangle)))
    }

    fn bounding_region(&mut self, window: WindowId) -> Result<Region> {
        let region = self.ctx.conn.generate_id()?;
        expect_failure(
            &mut self.guard,
            self.ctx.conn.xfixes_create_region_from_window(region, window, SK::BOUNDING),
            "region from window",
        );
        let fetched = self.ctx.conn.xfixes_fetch_region(region)?.reply();
        expect_failure(&mut self.guard, self.ctx.conn.xfixes_destroy_region(region), "destroy region");
        let reply = fetched?;
        Ok(Region::from_rects(reply.rectangles.iter().map(from_rectangle)))
    }

    fn create_window_surface(&mut self, window: WindowId, visual: u32) -> Result<Surface> {
        let pixmap = self.ctx.conn.generate_id()?;
        expect_failure(
            &mut self.guard,
            self.ctx.conn.composite_name_window_pixmap(window, pixmap),
            "name window pixmap",
        );
        let picture = self.ctx.conn.generate_id()?;
        let values = CreatePictureAux::new().subwindowmode(SubwindowMode::INCLUDE_INFERIORS);
        expect_failure(
            &mut self.guard,
            self.ctx
                .conn
                .render_create_picture(picture, pixmap, self.formats.for_visual(visual), &values),
            "create window picture",
        );
        trace!("picture {:#x} for window {:#x}", picture, window);
        Ok(Surface {
            picture,
            pixmap: Some(pixmap),
        })
    }

    fn create_solid_surface(&mut self, alpha: f64, argb: bool) -> Result<Surface> {
        let (depth, format) = if argb {
            (32, self.formats.argb32)
        } else {
            (8, self.formats.a8)
        };
        let color = Color {
            red: 0,
            green: 0,
            blue: 0,
            alpha: (alpha.clamp(0.0, 1.0) * f64::from(u16::MAX)) as u16,
        };
        self.solid_picture(depth, format, color)
    }

    fn create_shadow_surface(&mut self, image: &ShadowImage) -> Result<Surface> {
        let conn = &self.ctx.conn;
        let (width, height) = (image.width as u16, image.height as u16);
        let pixmap = conn.generate_id()?;
        conn.create_pixmap(8, pixmap, self.ctx.root_window, width, height)?;
        let gc = conn.generate_id()?;
        conn.create_gc(gc, pixmap, &CreateGCAux::new())?;

        let (stride, data) = padded_rows(image);
        // Stay under the maximum request size.
        let rows_per_request = ((conn.maximum_request_bytes().saturating_sub(64)) / stride.max(1)).max(1);
        for (i, rows) in data.chunks(stride.max(1) * rows_per_request).enumerate() {
            let y = (i * rows_per_request) as i16;
            let count = (rows.len() / stride.max(1)) as u16;
            conn.put_image(ImageFormat::Z_PIXMAP, pixmap, gc, width, count, 0, y, 0, 8, rows)?;
        }
        conn.free_gc(gc)?;

        let picture = conn.generate_id()?;
        conn.render_create_picture(picture, pixmap, self.formats.a8, &CreatePictureAux::new())?;
        conn.free_pixmap(pixmap)?;
        Ok(Surface::picture(picture))
    }

    fn create_buffer_surface(&mut self, width: u32, height: u32) -> Result<Surface> {
        let conn = &self.ctx.conn;
        let pixmap = conn.generate_id()?;
        conn.create_pixmap(
            self.ctx.root_depth,
            pixmap,
            self.ctx.root_window,
            width.min(u32::from(u16::MAX)) as u16,
            height.min(u32::from(u16::MAX)) as u16,
        )?;
        let picture = conn.generate_id()?;
        conn.render_create_picture(picture, pixmap, self.formats.root, &CreatePictureAux::new())?;
        conn.free_pixmap(pixmap)?;
        Ok(Surface::picture(picture))
    }

    fn create_root_tile(&mut self) -> Result<Surface> {
        if let Some(pixmap) = self.root_pixmap() {
            let picture = self.ctx.conn.generate_id()?;
            self.ctx.conn.render_create_picture(
                picture,
                pixmap,
                self.formats.root,
                &CreatePictureAux::new().repeat(Repeat::NORMAL),
            )?;
            debug!("Root background from pixmap {:#x}", pixmap);
            return Ok(Surface::picture(picture));
        }

        debug!("No root background pixmap, using gray");
        let gray = Color {
            red: DEFAULT_BACKGROUND,
            green: DEFAULT_BACKGROUND,
            blue: DEFAULT_BACKGROUND,
            alpha: u16::MAX,
        };
        self.solid_picture(self.ctx.root_depth, self.formats.root, gray)
    }

    fn free_surface(&mut self, surface: Surface) {
        expect_failure(&mut self.guard, self.ctx.conn.render_free_picture(surface.picture), "free picture");
        if let Some(pixmap) = surface.pixmap {
            expect_failure(&mut self.guard, self.ctx.conn.free_pixmap(pixmap), "free pixmap");
        }
    }

    fn output_surface(&self) -> Surface {
        self.output
    }

    fn set_clip(&mut self, target: Surface, clip: Option<&Region>) {
        match clip {
            Some(region) => {
                let rectangles: Vec<Rectangle> = region.rects().iter().map(to_rectangle).collect();
                log_and_ignore(
                    self.ctx
                        .conn
                        .render_set_picture_clip_rectangles(target.picture, 0, 0, &rectangles),
                    "set clip",
                );
            }
            None => log_and_ignore(
                self.ctx
                    .conn
                    .render_change_picture(target.picture, &ChangePictureAux::new().clipmask(x11rb::NONE)),
                "clear clip",
            ),
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
        let op = match op {
            CompositeOp::Src => PictOp::SRC,
            CompositeOp::Over => PictOp::OVER,
        };
        let (sx, sy) = (src_origin.0 as i16, src_origin.1 as i16);
        let area = to_rectangle(&dst_rect);
        log_and_ignore(
            self.ctx.conn.render_composite(
                op,
                src.picture,
                mask.map_or(x11rb::NONE, |m| m.picture),
                dst.picture,
                sx,
                sy,
                sx,
                sy,
                area.x,
                area.y,
                area.width,
                area.height,
            ),
            "composite",
        );
    }

    fn sync(&mut self) -> Result<()> {
        self.ctx.conn.get_input_focus()?.reply()?;
        Ok(())
    }
}

impl Drop for RenderBackend {
    fn drop(&mut self) {
        log_and_ignore(self.ctx.conn.render_free_picture(self.output.picture), "free output");
        log_and_ignore(self.ctx.conn.composite_release_overlay_window(self.ctx.root_window), "release overlay");
        if let Err(e) = self.ctx.conn.flush() {
            warn!("Cannot flush on shutdown: {}", e);
        }
    }
}
