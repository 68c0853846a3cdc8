use tracing::trace;

use crate::compositor::backend::Backend;
use crate::compositor::region::{Rect, Region};
use crate::compositor::window::TrackedWindow;
use crate::core::error::Result;

/// Screen area that changed since the last paint.
#[derive(Debug, Default)]
pub struct DamageTracker {
    accumulated: Region,
    pending: bool,
}

impl DamageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn report(&mut self, region: &Region) {
        if self.pending {
            self.accumulated.union(region);
        } else {
            self.accumulated = region.clone();
            self.pending = true;
        }
    }

    pub fn report_rect(&mut self, rect: Rect) {
        self.report(&Region::from_rect(rect));
    }

    /// Hand the accumulated area to one paint pass and start over.
    pub fn flush(&mut self) -> Region {
        self.pending = false;
        std::mem::take(&mut self.accumulated)
    }

    /// Pull the damage a window's contents accumulated and report it in
    /// screen coordinates.
    ///
    /// The first report after mapping covers the whole `extents` (window and
    /// shadow) and marks the window as paintable.
    pub fn drain_window_damage<B: Backend>(
        &mut self,
        backend: &mut B,
        window: &mut TrackedWindow,
        extents: Rect,
    ) -> Result<()> {
        let Some(handle) = window.damage else {
            return Ok(());
        };

        if !window.damaged {
            backend.subtract_damage(handle, false)?;
            trace!("window {:#x} damaged for the first time", window.id);
            self.report_rect(extents);
        } else {
            let mut parts = backend.subtract_damage(handle, true)?;
            let g = window.geometry;
            let inset = g.border_width as i32;
            parts.translate(g.x + inset, g.y + inset);
            self.report(&parts);
        }
        window.damaged = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::testing::RecordingBackend;
    use crate::compositor::window::{Geometry, WindowAttributes, WindowKey};

    #[test]
    fn test_flush_covers_all_reports() {
        let mut tracker = DamageTracker::new();
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(100, 50, 20, 20);
        tracker.report_rect(a);
        tracker.report_rect(b);

        let flushed = tracker.flush();
        assert_eq!(flushed.extents(), a.bounding(&b));
        assert_eq!(flushed.area(), a.area() + b.area());
    }

    #[test]
    fn test_second_flush_is_empty() {
        let mut tracker = DamageTracker::new();
        tracker.report_rect(Rect::new(0, 0, 10, 10));
        assert!(tracker.is_pending());

        assert!(!tracker.flush().is_empty());
        assert!(!tracker.is_pending());
        assert!(tracker.flush().is_empty());
    }

    #[test]
    fn test_first_report_replaces_previous_contents() {
        let mut tracker = DamageTracker::new();
        tracker.report_rect(Rect::new(0, 0, 10, 10));
        tracker.flush();

        tracker.report_rect(Rect::new(50, 50, 5, 5));
        assert_eq!(tracker.flush().extents(), Rect::new(50, 50, 5, 5));
    }

    #[test]
    fn test_window_damage_translated_to_screen() {
        let mut backend = RecordingBackend::new(800, 600);
        let geometry = Geometry { x: 100, y: 200, width: 50, height: 50, border_width: 1 };
        backend.add_window(0x300, geometry, true);
        let damage = backend.create_damage(0x300).expect("damage");

        let attributes = WindowAttributes { geometry, viewable: true, ..Default::default() };
        let mut window = TrackedWindow::new(WindowKey(1), 0x300, &attributes);
        window.damage = Some(damage);

        let mut tracker = DamageTracker::new();
        let extents = geometry.outer_rect();
        tracker.drain_window_damage(&mut backend, &mut window, extents).expect("drain");
        assert!(window.damaged);
        assert_eq!(tracker.flush().extents(), extents);

        backend.push_damage(0x300, Rect::new(5, 5, 10, 10));
        tracker.drain_window_damage(&mut backend, &mut window, extents).expect("drain");
        assert_eq!(tracker.flush().extents(), Rect::new(106, 206, 10, 10));
    }
}
