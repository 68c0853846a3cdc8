//! Repaint scheduling and the composite pass.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::compositor::backend::{Backend, CompositeOp, Surface};
use crate::compositor::manager::Compositor;
use crate::compositor::region::{paint_needed, Rect, Region};
use crate::compositor::window::{ShadowDecision, ShadowSurface, WindowKey, WindowMode};
use crate::compositor::OPAQUE;
use crate::core::error::Result;

impl<B: Backend> Compositor<B> {
    /// Paint if anything is due.
    ///
    /// Queued geometry is applied and painted as soon as the first configure
    /// arrives, then again once the debounce delay has passed. Damage is
    /// painted on the next call regardless of the debounce.
    pub fn check_paint(&mut self, now: Instant) {
        if !self.configure_pending {
            if self.damage.is_pending() {
                self.paint_pending();
            }
            return;
        }

        match self.configure_deadline {
            None => {
                self.apply_configures();
                self.paint_pending();
                self.configure_deadline = Some(now + self.settings.configure_delay());
            }
            Some(deadline) if now < deadline => {
                if self.damage.is_pending() {
                    self.paint_pending();
                }
            }
            Some(_) => {
                self.configure_pending = false;
                self.configure_deadline = None;
                self.apply_configures();
                self.paint_pending();
            }
        }
    }

    /// How long the loop may block before `check_paint` or `run_fades`
    /// has work. `None` means wait for the next event.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        if self.damage.is_pending() {
            return Some(Duration::ZERO);
        }
        let configure = self.configure_deadline.filter(|_| self.configure_pending);
        let deadline = [self.fades.next_tick(), configure].into_iter().flatten().min()?;
        Some(deadline.saturating_duration_since(now))
    }

    fn paint_pending(&mut self) {
        let region = self.damage.flush();
        if let Err(e) = self.paint(region) {
            warn!("Paint failed: {}", e);
        }
        self.clip_changed = false;
        self.frames += 1;
    }

    /// Composite every visible window into the back buffer within `region`
    /// and copy the result to the screen.
    pub(super) fn paint(&mut self, mut region: Region) -> Result<()> {
        if self.shadows.ensure_table(self.settings.shadow_radius) {
            self.refresh_shadows();
            region.union(&self.damage.flush());
        }
        let (width, height) = self.screen;
        let screen = Rect::new(0, 0, width, height);
        let buffer = match self.buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = self.backend.create_buffer_surface(width, height)?;
                self.buffer = Some(buffer);
                buffer
            }
        };
        let output = self.backend.output_surface();
        self.backend.set_clip(output, Some(&region));

        let recompute = std::mem::take(&mut self.occlusion_dirty);
        let mut ignore = Rect::new(0, 0, 0, 0);
        // Windows left for the blending pass, topmost first, each with the
        // part of the damage still uncovered above it.
        let mut blended: Vec<(WindowKey, Region)> = Vec::new();

        let keys: Vec<WindowKey> = self.store.iter().map(|w| w.key).collect();
        for key in keys {
            let Some(window) = self.store.get_mut(key) else {
                continue;
            };
            if !window.damaged || window.hidden || window.is_off_screen(width, height) {
                continue;
            }
            if recompute {
                window.paint_needed = !window.is_occluder() || paint_needed(&mut ignore, &window.geometry.content_rect());
            }
            if !window.paint_needed {
                continue;
            }

            if window.resources.surface.is_none() {
                match self.backend.create_window_surface(window.id, window.visual) {
                    Ok(surface) => window.resources.surface = Some(surface),
                    Err(e) => {
                        trace!("no surface for {:#x}: {}", window.id, e);
                        continue;
                    }
                }
            }
            if self.clip_changed {
                window.resources.invalidate_regions();
            }
            if window.resources.border_size.is_none() {
                let g = window.geometry;
                let inset = g.border_width as i32;
                let border = match self.backend.bounding_region(window.id) {
                    Ok(mut shape) => {
                        shape.translate(g.x + inset, g.y + inset);
                        shape
                    }
                    Err(_) => Region::from_rect(g.outer_rect()),
                };
                window.resources.border_size = Some(border);
            }
            if window.resources.extents.is_none() {
                self.update_extents(key);
            }

            let Some(window) = self.store.get(key) else {
                continue;
            };
            if window.mode == WindowMode::Solid && !self.has_frame_opacity(window) {
                if let (Some(surface), Some(border)) = (window.resources.surface, &window.resources.border_size) {
                    let outer = window.geometry.outer_rect();
                    self.backend.set_clip(buffer, Some(&region));
                    region.subtract(border);
                    self.backend.composite(CompositeOp::Src, surface, None, buffer, (0, 0), outer);
                }
            }
            blended.push((key, region.clone()));
        }

        self.backend.set_clip(buffer, Some(&region));
        let tile = match self.root_tile {
            Some(tile) => tile,
            None => {
                let tile = self.backend.create_root_tile()?;
                self.root_tile = Some(tile);
                tile
            }
        };
        self.backend.composite(CompositeOp::Src, tile, None, buffer, (0, 0), screen);

        for (key, clip) in blended.iter().rev() {
            self.paint_blended(*key, clip, buffer);
        }

        self.backend.set_clip(buffer, None);
        self.backend.composite(CompositeOp::Src, buffer, None, output, (0, 0), screen);
        Ok(())
    }

    /// Shadow plus, for anything not fully opaque, the window itself.
    fn paint_blended(&mut self, key: WindowKey, clip: &Region, buffer: Surface) {
        self.backend.set_clip(buffer, Some(clip));

        if self.shadow_decision(key) == Some(ShadowDecision::Yes) {
            if let Some(shadow) = self.ensure_shadow(key) {
                if let Some(black) = self.black_surface() {
                    let Some(window) = self.store.get(key) else {
                        return;
                    };
                    let g = window.geometry;
                    let dst = Rect::new(
                        g.x + self.settings.shadow_offset_x,
                        g.y + self.settings.shadow_offset_y,
                        shadow.width,
                        shadow.height,
                    );
                    self.backend
                        .composite(CompositeOp::Over, black, Some(shadow.surface), buffer, (0, 0), dst);
                }
            }
        }

        let frame_opacity = match self.store.get(key) {
            Some(window) if self.has_frame_opacity(window) => self.settings.frame_opacity,
            Some(_) => None,
            None => return,
        };
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        if window.opacity != OPAQUE && window.resources.alpha.is_none() {
            let alpha = window.opacity_fraction();
            window.resources.alpha = self.backend.create_solid_surface(alpha, false).ok();
        }
        if let Some(frame_alpha) = frame_opacity {
            if window.resources.border_alpha.is_none() {
                window.resources.border_alpha = self.backend.create_solid_surface(frame_alpha, false).ok();
            }
        }
        if window.mode == WindowMode::Solid && frame_opacity.is_none() {
            return;
        }
        let Some(surface) = window.resources.surface else {
            return;
        };

        let mut clip = clip.clone();
        if let Some(border) = &window.resources.border_size {
            clip = clip.intersect(border);
        }
        self.backend.set_clip(buffer, Some(&clip));

        let g = window.geometry;
        let (x, y) = (g.x, g.y);
        let (wid, hei) = (g.outer_width(), g.outer_height());
        let alpha = window.resources.alpha;

        if frame_opacity.is_none() {
            self.backend
                .composite(CompositeOp::Over, surface, alpha, buffer, (0, 0), Rect::new(x, y, wid, hei));
            return;
        }

        let border_alpha = window.resources.border_alpha;
        let f = window.frame;
        let (t, l, b, r) = (f.top, f.left, f.bottom, f.right);
        let inner_w = wid.saturating_sub(l + r);
        let (ti, li, bi, ri) = (t as i32, l as i32, b as i32, r as i32);
        let (wi, hi) = (wid as i32, hei as i32);

        let parts = [
            // top
            ((0, 0), Rect::new(x, y, wid, t), border_alpha),
            // left
            ((0, ti), Rect::new(x, y + ti, l, hei.saturating_sub(t)), border_alpha),
            // bottom
            ((li, hi - bi), Rect::new(x + li, y + hi - bi, inner_w, b), border_alpha),
            // right
            ((wi - ri, ti), Rect::new(x + wi - ri, y + ti, r, hei.saturating_sub(t)), border_alpha),
            // body
            ((li, ti), Rect::new(x + li, y + ti, inner_w, hei.saturating_sub(t + b)), alpha),
        ];
        for (origin, dst, mask) in parts {
            if !dst.is_empty() {
                self.backend.composite(CompositeOp::Over, surface, mask, buffer, origin, dst);
            }
        }
    }

    /// Build the shadow mask if the window has none.
    fn ensure_shadow(&mut self, key: WindowKey) -> Option<ShadowSurface> {
        let window = self.store.get(key)?;
        if let Some(shadow) = window.resources.shadow {
            return Some(shadow);
        }

        let mut opacity = self.settings.shadow_opacity;
        if window.mode != WindowMode::Solid {
            opacity *= window.opacity_fraction();
        }
        if self.has_frame_opacity(window) {
            opacity *= self.settings.frame_opacity.unwrap_or(1.0);
        }
        let g = window.geometry;
        let image = self.shadows.render(opacity, g.outer_width(), g.outer_height())?;
        let surface = match self.backend.create_shadow_surface(&image) {
            Ok(surface) => surface,
            Err(e) => {
                warn!("Cannot upload shadow: {}", e);
                return None;
            }
        };

        let shadow = ShadowSurface {
            surface,
            width: image.width,
            height: image.height,
        };
        self.store.get_mut(key)?.resources.shadow = Some(shadow);
        Some(shadow)
    }

    fn black_surface(&mut self) -> Option<Surface> {
        if self.black.is_none() {
            self.black = self.backend.create_solid_surface(1.0, true).ok();
        }
        self.black
    }
}

#[cfg(test)]
mod tests {
    use crate::compositor::backend::{Backend, CompositeOp};
    use crate::compositor::event::{CompositorEvent, PropertyKind};
    use crate::compositor::manager::Compositor;
    use crate::compositor::region::Rect;
    use crate::compositor::settings::Settings;
    use crate::compositor::testing::{RecordingBackend, SurfaceKind};
    use crate::compositor::window::{Geometry, WindowType};
    use std::time::{Duration, Instant};

    fn mapped(geometry: Geometry) -> Compositor<RecordingBackend> {
        let now = Instant::now();
        let mut c = Compositor::new(RecordingBackend::new(800, 600), Settings::default());
        c.backend_mut().add_window(0x100, geometry, true);
        let _ = c.handle_event(CompositorEvent::Create { window: 0x100 }, now);
        let _ = c.handle_event(CompositorEvent::Damage { drawable: 0x100 }, now);
        c
    }

    #[test]
    fn test_frame_ends_with_full_copy_to_output() {
        let mut c = mapped(Geometry::new(10, 10, 100, 100));
        c.check_paint(Instant::now());

        let backend = c.backend();
        let last = backend.composites.last().expect("composites");
        assert_eq!(last.op, CompositeOp::Src);
        assert_eq!(backend.kind(last.dst), Some(SurfaceKind::Output));
        assert_eq!(backend.kind(last.src), Some(SurfaceKind::Buffer));
        assert_eq!(last.dst_rect, Rect::new(0, 0, 800, 600));
        // Only the damaged area reaches the screen.
        let clip = last.clip.as_ref().expect("output clip");
        assert_eq!(clip.extents(), Rect::new(10, 10, 100, 100));
    }

    #[test]
    fn test_background_clipped_to_uncovered_damage() {
        let mut c = mapped(Geometry::new(0, 0, 400, 600));
        c.expose(Rect::new(0, 0, 800, 600), 0);
        c.check_paint(Instant::now());

        let backend = c.backend();
        let tile = backend
            .composites
            .iter()
            .find(|call| backend.kind(call.src) == Some(SurfaceKind::RootTile))
            .expect("background");
        let clip = tile.clip.as_ref().expect("clip");
        assert_eq!(clip.extents(), Rect::new(400, 0, 400, 600));
    }

    #[test]
    fn test_undamaged_and_off_screen_windows_skipped() {
        let now = Instant::now();
        let mut c = mapped(Geometry::new(-500, 0, 100, 100));
        c.backend_mut().add_window(0x200, Geometry::new(0, 0, 100, 100), true);
        let _ = c.handle_event(CompositorEvent::Create { window: 0x200 }, now);
        c.check_paint(now);

        assert!(c.backend().painted_windows().is_empty());
    }

    #[test]
    fn test_no_paint_without_damage() {
        let now = Instant::now();
        let mut c = mapped(Geometry::new(0, 0, 100, 100));
        c.check_paint(now);
        let frames = c.frames();

        c.check_paint(now + Duration::from_millis(50));
        assert_eq!(c.frames(), frames);
        assert_eq!(c.next_timeout(now), None);
    }

    #[test]
    fn test_pending_damage_means_no_wait() {
        let c = mapped(Geometry::new(0, 0, 100, 100));
        assert_eq!(c.next_timeout(Instant::now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_shadow_radius_change_rebuilds_shadows() {
        let now = Instant::now();
        let settings = Settings {
            shadow_types: vec![WindowType::Normal],
            ..Default::default()
        };
        let mut c = Compositor::new(RecordingBackend::new(800, 600), settings);
        c.backend_mut().add_window(0x100, Geometry::new(100, 100, 200, 100), true);
        let _ = c.handle_event(CompositorEvent::Create { window: 0x100 }, now);
        let _ = c.handle_event(CompositorEvent::Damage { drawable: 0x100 }, now);
        c.check_paint(now);
        let old = c.store().find(0x100).and_then(|w| w.resources.shadow).expect("shadow");
        assert_eq!(old.width, 200 + c.shadows.margin());

        c.settings.shadow_radius = 4;
        c.damage.report_rect(Rect::new(0, 0, 1, 1));
        c.check_paint(now);

        assert_eq!(c.shadows.margin(), 12);
        assert!(!c.backend().is_live(old.surface));
        let new = c.store().find(0x100).and_then(|w| w.resources.shadow).expect("shadow");
        assert_eq!((new.width, new.height), (212, 112));
        let extents = c.store().find(0x100).and_then(|w| w.resources.extents).expect("extents");
        assert_eq!(extents, Rect::new(85, 85, 215, 115));
    }

    #[test]
    fn test_root_background_change_rebuilds_tile() {
        let now = Instant::now();
        let mut c = mapped(Geometry::new(0, 0, 100, 100));
        c.check_paint(now);
        let tile = c.root_tile.expect("tile");

        let root = c.backend().root();
        let _ = c.handle_event(CompositorEvent::Property { window: root, kind: PropertyKind::RootBackground }, now);
        assert!(!c.backend().is_live(tile));
        c.check_paint(now);
        assert!(c.root_tile.is_some_and(|t| t != tile));
    }
}
