//! Rectangle and region arithmetic used for damage and clipping, plus the
//! single-rectangle occlusion heuristic used to cull hidden windows.

/// Half-open rectangle: covers `x1..x2` by `y1..y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x.saturating_add(width as i32),
            y2: y.saturating_add(height as i32),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    #[cfg(test)]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        (!rect.is_empty()).then_some(rect)
    }

    /// Smallest rectangle covering both.
    pub fn bounding(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    // Pieces of `self` not covered by `cut`, at most four.
    fn subtract_into(&self, cut: &Rect, out: &mut Vec<Rect>) {
        let Some(inner) = self.intersection(cut) else {
            out.push(*self);
            return;
        };
        let pieces = [
            Rect { x1: self.x1, y1: self.y1, x2: self.x2, y2: inner.y1 },
            Rect { x1: self.x1, y1: inner.y2, x2: self.x2, y2: self.y2 },
            Rect { x1: self.x1, y1: inner.y1, x2: inner.x1, y2: inner.y2 },
            Rect { x1: inner.x2, y1: inner.y1, x2: self.x2, y2: inner.y2 },
        ];
        out.extend(pieces.into_iter().filter(|r| !r.is_empty()));
    }
}

/// Occlusion test for one opaque window against the best known occluder.
///
/// Returns false when `ignore` already covers `window` entirely. Otherwise
/// the window must be painted, and `ignore` is replaced by the largest of
/// itself, the window, and their intersection, so its area never shrinks.
/// This is a cheap single-rectangle approximation, not exact region culling.
pub fn paint_needed(ignore: &mut Rect, window: &Rect) -> bool {
    if ignore.contains(window) {
        return false;
    }

    let mut best = *ignore;
    if window.area() > best.area() {
        best = *window;
    }
    if let Some(inner) = ignore.intersection(window) {
        if inner.area() > best.area() {
            best = inner;
        }
    }
    *ignore = best;
    true
}

/// A set of pixels stored as pairwise disjoint, non-empty rectangles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.union_rect(&rect);
        region
    }

    pub fn from_rects<I: IntoIterator<Item = Rect>>(rects: I) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.union_rect(&rect);
        }
        region
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    #[cfg(test)]
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Bounding box, or an empty rectangle for an empty region.
    #[cfg(test)]
    pub fn extents(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, rect| acc.bounding(rect))
    }

    pub fn union_rect(&mut self, rect: &Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pending = vec![*rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pending.len());
            for piece in &pending {
                piece.subtract_into(existing, &mut next);
            }
            pending = next;
            if pending.is_empty() {
                return;
            }
        }
        self.rects.extend(pending);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(rect);
        }
    }

    pub fn subtract_rect(&mut self, cut: &Rect) {
        if cut.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.rects.len());
        for rect in &self.rects {
            rect.subtract_into(cut, &mut kept);
        }
        self.rects = kept;
    }

    pub fn subtract(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract_rect(rect);
        }
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let rects = self
            .rects
            .iter()
            .flat_map(|a| other.rects.iter().filter_map(move |b| a.intersection(b)))
            .collect();
        // Pieces of two disjoint sets intersected pairwise stay disjoint.
        Region { rects }
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for rect in &mut self.rects {
            *rect = rect.translated(dx, dy);
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contained_window_is_skipped() {
        let mut ignore = Rect::new(0, 0, 1000, 800);
        let window = Rect::new(100, 100, 200, 200);

        assert!(!paint_needed(&mut ignore, &window));
        assert_eq!(ignore, Rect::new(0, 0, 1000, 800));
    }

    #[test]
    fn test_disjoint_window_takes_over_when_larger() {
        let mut ignore = Rect::new(0, 0, 10, 10);
        let window = Rect::new(50, 50, 100, 100);

        assert!(paint_needed(&mut ignore, &window));
        assert_eq!(ignore, window);

        let small = Rect::new(500, 500, 5, 5);
        assert!(paint_needed(&mut ignore, &small));
        assert_eq!(ignore, window);
    }

    #[test]
    fn test_partial_overlap_uses_true_intersection() {
        // Neither input is larger than a big shared middle part would be,
        // so this only checks the far corners are computed correctly.
        let mut ignore = Rect::new(0, 0, 100, 100);
        let window = Rect::new(50, 50, 100, 100);
        assert_eq!(
            ignore.intersection(&window),
            Some(Rect { x1: 50, y1: 50, x2: 100, y2: 100 })
        );

        assert!(paint_needed(&mut ignore, &window));
        assert_eq!(ignore.area(), 10_000);
    }

    #[test]
    fn test_ignore_area_never_shrinks() {
        let windows = [
            Rect::new(10, 10, 300, 200),
            Rect::new(0, 0, 50, 50),
            Rect::new(200, 100, 400, 400),
            Rect::new(250, 150, 20, 20),
            Rect::new(-100, -100, 150, 150),
            Rect::new(700, 0, 10, 900),
        ];
        let mut ignore = Rect::default();
        let mut last_area = 0;
        for window in &windows {
            paint_needed(&mut ignore, window);
            assert!(ignore.area() >= last_area);
            last_area = ignore.area();
        }
    }

    #[test]
    fn test_union_keeps_rects_disjoint() {
        let mut region = Region::from_rect(Rect::new(0, 0, 100, 100));
        region.union_rect(&Rect::new(50, 50, 100, 100));

        assert_eq!(region.area(), 100 * 100 * 2 - 50 * 50);
        assert_eq!(region.extents(), Rect::new(0, 0, 150, 150));
        for (i, a) in region.rects().iter().enumerate() {
            for b in &region.rects()[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
    }

    #[test]
    fn test_subtract_punches_hole() {
        let mut region = Region::from_rect(Rect::new(0, 0, 100, 100));
        region.subtract_rect(&Rect::new(25, 25, 50, 50));

        assert_eq!(region.area(), 100 * 100 - 50 * 50);
        assert_eq!(region.extents(), Rect::new(0, 0, 100, 100));
        assert!(region
            .rects()
            .iter()
            .all(|r| r.intersection(&Rect::new(25, 25, 50, 50)).is_none()));
    }

    #[test]
    fn test_intersect_and_translate() {
        let a = Region::from_rects([Rect::new(0, 0, 10, 10), Rect::new(20, 0, 10, 10)]);
        let b = Region::from_rect(Rect::new(5, 5, 20, 20));

        let mut both = a.intersect(&b);
        assert_eq!(both.area(), 25 + 25);

        both.translate(100, 0);
        assert_eq!(both.extents(), Rect { x1: 105, y1: 5, x2: 125, y2: 10 });
    }

    #[test]
    fn test_empty_rects_are_ignored() {
        let mut region = Region::new();
        region.union_rect(&Rect::new(10, 10, 0, 5));
        assert!(region.is_empty());
        assert_eq!(region.extents(), Rect::default());
    }
}
