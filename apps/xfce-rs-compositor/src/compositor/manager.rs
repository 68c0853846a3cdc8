use std::ops::ControlFlow;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::compositor::backend::{Backend, Surface, WindowInput};
use crate::compositor::damage::DamageTracker;
use crate::compositor::event::{CompositorEvent, PropertyKind};
use crate::compositor::fade::{FadeCompletion, FadeEngine, FadeRequest};
use crate::compositor::region::Rect;
use crate::compositor::settings::{to_opacity, Settings};
use crate::compositor::shadow::ShadowCache;
use crate::compositor::store::{classify_window, find_client_window, StackPosition, WindowStore};
use crate::compositor::window::{
    Geometry, PendingConfigure, ShadowDecision, TrackedWindow, WindowId, WindowKey, WindowType,
};
use crate::compositor::OPAQUE;

/// The compositing engine: every piece of mutable state the event loop owns.
pub struct Compositor<B: Backend> {
    pub(super) backend: B,
    pub(super) settings: Settings,
    pub(super) store: WindowStore,
    pub(super) fades: FadeEngine,
    pub(super) damage: DamageTracker,
    pub(super) shadows: ShadowCache,
    pub(super) screen: (u32, u32),
    pub(super) root_tile: Option<Surface>,
    pub(super) buffer: Option<Surface>,
    /// Opaque black source for shadows.
    pub(super) black: Option<Surface>,
    pub(super) occlusion_dirty: bool,
    pub(super) clip_changed: bool,
    pub(super) configure_pending: bool,
    pub(super) configure_deadline: Option<Instant>,
    pub(super) expose_rects: Vec<Rect>,
    pub(super) frames: u64,
}

impl<B: Backend> Compositor<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        let screen = backend.screen_size();
        let fades = FadeEngine::new(settings.fade_interval());
        let shadows = ShadowCache::new(settings.shadow_radius);
        Self {
            backend,
            settings,
            store: WindowStore::new(),
            fades,
            damage: DamageTracker::new(),
            shadows,
            screen,
            root_tile: None,
            buffer: None,
            black: None,
            occlusion_dirty: true,
            clip_changed: true,
            configure_pending: false,
            configure_deadline: None,
            expose_rects: Vec::new(),
            frames: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of paint passes so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Track the windows that already exist, given bottom to top, and
    /// schedule a full repaint.
    pub fn scan_windows(&mut self, windows: &[WindowId], now: Instant) {
        for &id in windows {
            self.add_window(id, StackPosition::Top, now);
        }
        info!("Tracking {} windows", self.store.len());
        self.damage_screen();
    }

    pub fn handle_event(&mut self, event: CompositorEvent, now: Instant) -> ControlFlow<()> {
        trace!("event {:?}", event);
        match event {
            CompositorEvent::Create { window } => self.add_window(window, StackPosition::Top, now),
            CompositorEvent::Configure {
                window,
                geometry,
                above,
                override_redirect,
            } => self.configure(window, geometry, above, override_redirect),
            CompositorEvent::RootResized { width, height } => self.resize_screen(width, height),
            CompositorEvent::Destroy { window } => self.destroy(window, now),
            CompositorEvent::Map { window } => self.map_window(window, now),
            CompositorEvent::Unmap { window } => self.unmap_window(window, now),
            CompositorEvent::Reparent { window, to_root: true } => {
                self.add_window(window, StackPosition::Top, now)
            }
            CompositorEvent::Reparent { window, to_root: false } => self.destroy(window, now),
            CompositorEvent::Circulate { window, on_top } => self.circulate(window, on_top),
            CompositorEvent::Expose { rect, count } => self.expose(rect, count),
            CompositorEvent::Property { window, kind } => match kind {
                PropertyKind::Opacity => self.opacity_changed(window, now),
                PropertyKind::WindowState => self.window_state_changed(window),
                PropertyKind::RootBackground => self.root_background_changed(),
            },
            CompositorEvent::Focus { window, focused } => self.focus(window, focused, now),
            CompositorEvent::Damage { drawable } => self.damage_window(drawable),
            CompositorEvent::OwnershipLost => {
                info!("Another composite manager took the selection, exiting");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Start tracking `id`. A window that vanished before we could query it
    /// is silently skipped.
    pub fn add_window(&mut self, id: WindowId, position: StackPosition, now: Instant) {
        if self.store.find(id).is_some() {
            return;
        }
        let attributes = match self.backend.window_attributes(id) {
            Ok(attributes) => attributes,
            Err(e) => {
                trace!("window {:#x} gone before it was tracked: {}", id, e);
                return;
            }
        };

        let key = self.store.allocate_key();
        let mut window = TrackedWindow::new(key, id, &attributes);
        if !attributes.input_only {
            match self.backend.create_damage(id) {
                Ok(handle) => window.damage = Some(handle),
                Err(e) => {
                    trace!("no damage for {:#x}: {}", id, e);
                    return;
                }
            }
        }
        window.client = find_client_window(&mut self.backend, id);
        if let Some(client) = window.client {
            window.frame = self.backend.frame_extents(client).ok().flatten().unwrap_or_default();
        }
        window.custom_opacity = self.backend.opacity_property(id).ok().flatten();
        // Only windows present at startup are viewable here; they start dimmed.
        window.inactive = attributes.viewable && self.settings.inactive_opacity.is_some();

        debug!("Tracking window {:#x} at {:?}", id, attributes.geometry);
        self.store.insert(window, position);

        if attributes.viewable {
            self.map_window(id, now);
        }
    }

    pub fn map_window(&mut self, id: WindowId, now: Instant) {
        let Some(key) = self.store.find(id).map(|w| w.key) else {
            return;
        };

        let window_type = classify_window(&mut self.backend, id);
        let client = find_client_window(&mut self.backend, id);
        let frame = client
            .and_then(|c| self.backend.frame_extents(c).ok().flatten())
            .unwrap_or_default();
        let hidden = client.is_some_and(|c| self.backend.is_hidden(c));

        // Subscribe before reading properties so no change is lost.
        self.backend.select_input(id, WindowInput::Tracked);
        if let Some(client) = client.filter(|&c| c != id) {
            self.backend.select_input(client, WindowInput::Client);
        }

        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        window.mapped = true;
        window.window_type = window_type;
        window.client = client;
        window.frame = frame;
        window.hidden = hidden;
        window.damaged = false;
        window.paint_needed = true;
        window.shadow = ShadowDecision::Unknown;
        let resting = resting_opacity(&self.settings, window);
        trace!("mapped {:#x} as {:?}", id, window_type);

        self.occlusion_dirty = true;
        if self.settings.fade_enabled(window_type) {
            let request = FadeRequest {
                from: 0.0,
                to: fraction(resting),
                step: self.settings.fade_in_step,
                on_complete: None,
                override_existing: true,
                run_previous: true,
            };
            self.start_fade(key, request, now);
        } else {
            self.apply_opacity(key, resting);
            self.update_mode(key);
        }
    }

    pub fn unmap_window(&mut self, id: WindowId, now: Instant) {
        let Some(window) = self.store.find_mut(id) else {
            return;
        };
        window.mapped = false;
        let key = window.key;
        let client = window.client.filter(|&c| c != id);
        let fade = window.resources.surface.is_some() && self.settings.fade_enabled(window.window_type);
        let from = window.opacity_fraction();

        self.backend.select_input(id, WindowInput::None);
        if let Some(client) = client {
            self.backend.select_input(client, WindowInput::None);
        }
        self.occlusion_dirty = true;

        if fade {
            let request = FadeRequest {
                from,
                to: 0.0,
                step: self.settings.fade_out_step,
                on_complete: Some(FadeCompletion::FinishUnmap),
                override_existing: true,
                run_previous: false,
            };
            self.start_fade(key, request, now);
        } else {
            self.finish_unmap(key);
        }
    }

    /// Release what an unmapped window no longer needs.
    pub(super) fn finish_unmap(&mut self, key: WindowKey) {
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        window.damaged = false;
        if let Some(extents) = window.resources.extents.take() {
            self.damage.report_rect(extents);
        }
        window.resources.invalidate_surface(&mut self.backend);
        window.resources.invalidate_shadow(&mut self.backend);
        window.resources.invalidate_regions();
        self.clip_changed = true;
    }

    /// Queue new geometry for the debounce deadline; restack right away.
    pub fn configure(&mut self, id: WindowId, geometry: Geometry, above: Option<WindowId>, override_redirect: bool) {
        let Some(window) = self.store.find_mut(id) else {
            return;
        };
        let size_changed =
            window.pending.is_some_and(|p| p.size_changed) || !window.geometry.same_size(&geometry);
        window.pending = Some(PendingConfigure {
            geometry,
            override_redirect,
            size_changed,
        });
        self.configure_pending = true;
        self.store.restack(id, StackPosition::from_sibling(above));
    }

    pub fn apply_pending_configure(&mut self, key: WindowKey) {
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        let Some(pending) = window.pending.take() else {
            return;
        };
        let old_extents = window.resources.extents;
        window.geometry = pending.geometry;
        window.override_redirect = pending.override_redirect;
        if pending.size_changed {
            window.resources.invalidate_surface(&mut self.backend);
            window.resources.invalidate_shadow(&mut self.backend);
            window.shadow = ShadowDecision::Unknown;
        }
        let mapped = window.mapped;

        if mapped {
            // Both the old and the new position need repainting.
            if let Some(old) = old_extents {
                self.damage.report_rect(old);
            }
            if let Some(new) = self.update_extents(key) {
                self.damage.report_rect(new);
            }
        }
        self.clip_changed = true;
        self.occlusion_dirty = true;
    }

    pub(super) fn apply_configures(&mut self) {
        for key in self.store.pending_configures() {
            self.apply_pending_configure(key);
        }
    }

    /// Tombstone a window. Its resources go once any fade-out finishes.
    pub fn destroy(&mut self, id: WindowId, now: Instant) {
        let Some(window) = self.store.find_mut(id) else {
            return;
        };
        window.destroyed = true;
        let key = window.key;
        let fade = window.resources.surface.is_some() && self.settings.fade_enabled(window.window_type);
        let from = window.opacity_fraction();
        self.occlusion_dirty = true;

        if fade {
            let request = FadeRequest {
                from,
                to: 0.0,
                step: self.settings.fade_out_step,
                on_complete: Some(FadeCompletion::FinishDestroy),
                override_existing: true,
                run_previous: false,
            };
            self.start_fade(key, request, now);
        } else {
            self.finish_destroy(key);
        }
    }

    pub(super) fn finish_destroy(&mut self, key: WindowKey) {
        self.finish_unmap(key);
        self.fades.cancel(key);
        let Some(mut window) = self.store.remove(key) else {
            return;
        };
        window.resources.release_all(&mut self.backend);
        if let Some(damage) = window.damage.take() {
            self.backend.destroy_damage(damage);
        }
        trace!("purged window {:#x}", window.id);
    }

    pub fn circulate(&mut self, id: WindowId, on_top: bool) {
        let position = if on_top { StackPosition::Top } else { StackPosition::Bottom };
        if self.store.restack(id, position) {
            self.clip_changed = true;
            self.occlusion_dirty = true;
        }
    }

    pub fn expose(&mut self, rect: Rect, count: u16) {
        self.expose_rects.push(rect);
        if count == 0 {
            for rect in std::mem::take(&mut self.expose_rects) {
                self.damage.report_rect(rect);
            }
        }
    }

    pub fn resize_screen(&mut self, width: u32, height: u32) {
        if let Some(buffer) = self.buffer.take() {
            self.backend.free_surface(buffer);
        }
        info!("Screen resized to {}x{}", width, height);
        self.screen = (width, height);
        self.occlusion_dirty = true;
        self.damage_screen();
    }

    pub fn root_background_changed(&mut self) {
        if let Some(tile) = self.root_tile.take() {
            self.backend.free_surface(tile);
            debug!("Root background changed");
            self.damage_screen();
        }
    }

    pub(super) fn damage_screen(&mut self) {
        let (width, height) = self.screen;
        self.damage.report_rect(Rect::new(0, 0, width, height));
    }

    fn opacity_changed(&mut self, id: WindowId, now: Instant) {
        let custom = self.backend.opacity_property(id).ok().flatten();
        let Some(window) = self.store.find_mut(id) else {
            return;
        };
        window.custom_opacity = custom;
        let key = window.key;
        let target = resting_opacity(&self.settings, window);
        self.set_opacity(key, target, now);
    }

    fn window_state_changed(&mut self, id: WindowId) {
        let Some(key) = self.store.find_by_descendant(&mut self.backend, id) else {
            return;
        };
        let hidden = self.backend.is_hidden(id);
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        if window.hidden == hidden {
            return;
        }
        window.hidden = hidden;
        let area = window.resources.extents.unwrap_or_else(|| window.geometry.outer_rect());
        debug!("window {:#x} hidden: {}", window.id, hidden);
        self.damage.report_rect(area);
        self.occlusion_dirty = true;
    }

    /// Dim unfocused normal windows when an inactive opacity is configured.
    fn focus(&mut self, id: WindowId, focused: bool, now: Instant) {
        if self.settings.inactive_opacity.is_none() {
            return;
        }
        let Some(window) = self.store.find_mut(id) else {
            return;
        };
        if !window.window_type.is_normal() {
            return;
        }
        window.inactive = !focused;
        if window.custom_opacity.is_some() {
            return;
        }
        let key = window.key;
        let target = resting_opacity(&self.settings, window);
        self.set_opacity(key, target, now);
    }

    fn damage_window(&mut self, drawable: WindowId) {
        let Some(window) = self.store.find(drawable) else {
            return;
        };
        let key = window.key;
        let extents = if window.damaged {
            window.geometry.outer_rect()
        } else {
            match self.update_extents(key) {
                Some(extents) => extents,
                None => return,
            }
        };
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        if let Err(e) = self.damage.drain_window_damage(&mut self.backend, window, extents) {
            trace!("damage for {:#x} lost: {}", drawable, e);
        }
    }

    pub fn set_opacity(&mut self, key: WindowKey, opacity: u32, now: Instant) {
        if self.settings.fade_opacity_changes {
            let Some(window) = self.store.get(key) else {
                return;
            };
            let request = FadeRequest {
                from: window.opacity_fraction(),
                to: fraction(opacity),
                step: self.settings.fade_out_step,
                on_complete: None,
                override_existing: false,
                run_previous: false,
            };
            self.start_fade(key, request, now);
        } else {
            self.apply_opacity(key, opacity);
            self.update_mode(key);
        }
        self.occlusion_dirty = true;
    }

    fn start_fade(&mut self, key: WindowKey, request: FadeRequest, now: Instant) {
        let Some(started) = self.fades.start_or_update(key, request, now) else {
            return;
        };
        if let Some(previous) = started.previous {
            self.complete(key, previous);
        }
        let Some(window) = self.store.get_mut(key) else {
            self.fades.cancel(key);
            return;
        };
        // A window fading in may already show its final contents and never
        // report damage again, so it has to be painted regardless.
        window.damaged = true;
        self.apply_opacity(key, to_opacity(started.current));
        self.update_mode(key);
    }

    /// Advance every running fade that is due.
    pub fn run_fades(&mut self, now: Instant) {
        for step in self.fades.tick(now) {
            self.apply_opacity(step.window, to_opacity(step.opacity));
            self.update_mode(step.window);
            if let Some(completion) = step.on_complete {
                self.complete(step.window, completion);
            }
        }
    }

    fn complete(&mut self, key: WindowKey, completion: FadeCompletion) {
        match completion {
            FadeCompletion::FinishUnmap => self.finish_unmap(key),
            FadeCompletion::FinishDestroy => self.finish_destroy(key),
        }
    }

    fn apply_opacity(&mut self, key: WindowKey, opacity: u32) {
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        if (window.opacity == OPAQUE) != (opacity == OPAQUE) {
            self.occlusion_dirty = true;
        }
        window.opacity = opacity;
    }

    /// Re-derive the blend mode after an opacity change, dropping the alpha
    /// masks and the shadow, and repaint the window.
    pub(super) fn update_mode(&mut self, key: WindowKey) {
        let Some(window) = self.store.get_mut(key) else {
            return;
        };
        window.resources.invalidate_alpha(&mut self.backend);
        window.resources.invalidate_shadow(&mut self.backend);
        window.mode = window.derive_mode();
        let extents = match window.resources.extents {
            Some(extents) => Some(extents),
            None => self.update_extents(key),
        };
        if let Some(extents) = extents {
            self.damage.report_rect(extents);
        }
    }

    /// Decide once per geometry epoch whether the window casts a shadow.
    pub(super) fn shadow_decision(&mut self, key: WindowKey) -> Option<ShadowDecision> {
        let window = self.store.get(key)?;
        if window.shadow != ShadowDecision::Unknown {
            return Some(window.shadow);
        }
        let id = window.id;
        let window_type = window.window_type;
        let override_normal = window.override_redirect && window_type == WindowType::Normal;

        let casts = window_type.is_known()
            && self.settings.shadow_enabled(window_type)
            && !override_normal
            && !self.backend.has_gtk_frame_extents(id);
        let decision = if casts { ShadowDecision::Yes } else { ShadowDecision::No };
        self.store.get_mut(key)?.shadow = decision;
        Some(decision)
    }

    /// Screen area covered by the window and its shadow.
    pub(super) fn update_extents(&mut self, key: WindowKey) -> Option<Rect> {
        let decision = self.shadow_decision(key)?;
        let margin = self.shadows.margin();
        let (dx, dy) = (self.settings.shadow_offset_x, self.settings.shadow_offset_y);
        let window = self.store.get_mut(key)?;
        let g = window.geometry;

        let mut extents = g.outer_rect();
        if decision == ShadowDecision::Yes {
            let shadow = Rect::new(g.x + dx, g.y + dy, g.outer_width() + margin, g.outer_height() + margin);
            extents = extents.bounding(&shadow);
        }
        window.resources.extents = Some(extents);
        Some(extents)
    }

    /// Drop every cached shadow after the kernel changed size and repaint
    /// what the old and new shadows cover.
    pub(super) fn refresh_shadows(&mut self) {
        for window in self.store.iter_mut() {
            window.resources.invalidate_shadow(&mut self.backend);
        }
        let keys: Vec<WindowKey> = self.store.iter().map(|w| w.key).collect();
        for key in keys {
            let Some(window) = self.store.get_mut(key) else {
                continue;
            };
            let old = window.resources.extents.take();
            if !window.mapped {
                continue;
            }
            if let Some(old) = old {
                self.damage.report_rect(old);
            }
            if let Some(new) = self.update_extents(key) {
                self.damage.report_rect(new);
            }
        }
        self.clip_changed = true;
    }

    pub(super) fn has_frame_opacity(&self, window: &TrackedWindow) -> bool {
        self.settings.frame_opacity.is_some() && window.frame.top > 0
    }
}

/// Opacity a window shows when nothing is animating it.
fn resting_opacity(settings: &Settings, window: &TrackedWindow) -> u32 {
    if let Some(custom) = window.custom_opacity {
        return custom;
    }
    if window.inactive && window.window_type.is_normal() {
        if let Some(inactive) = settings.inactive_opacity_value() {
            return inactive;
        }
    }
    settings.type_opacity(window.window_type)
}

fn fraction(opacity: u32) -> f64 {
    f64::from(opacity) / f64::from(OPAQUE)
}
