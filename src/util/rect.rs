//! Integer and normalized rectangles.

use glam::{IVec2, Vec2};

/// Pixel-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2i {
    /// Top-left corner.
    pub position: IVec2,
    /// Extent; a non-positive component means the rect has no area.
    pub size: IVec2,
}

impl Rect2i {
    /// Rect from corner coordinates and extent.
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            position: IVec2::new(x, y),
            size: IVec2::new(width, height),
        }
    }

    /// Rect at the origin covering `size`.
    #[must_use]
    pub const fn from_size(size: IVec2) -> Self {
        Self {
            position: IVec2::ZERO,
            size,
        }
    }

    /// Whether both extents are positive.
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.size.x > 0 && self.size.y > 0
    }

    /// Exclusive bottom-right corner.
    #[must_use]
    pub fn end(&self) -> IVec2 {
        self.position + self.size
    }

    /// Overlap of two rects, or an empty rect when they do not overlap.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let start = self.position.max(other.position);
        let end = self.end().min(other.end());
        if end.x <= start.x || end.y <= start.y {
            return Self::default();
        }
        Self {
            position: start,
            size: end - start,
        }
    }

    /// Rect scaled into `[0, 1]` by `extent`.
    #[must_use]
    pub fn normalized(&self, extent: IVec2) -> Rect2 {
        let extent = extent.max(IVec2::ONE).as_vec2();
        Rect2 {
            position: self.position.as_vec2() / extent,
            size: self.size.as_vec2() / extent,
        }
    }
}

/// Floating-point rectangle, usually in normalized texture space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    /// Top-left corner.
    pub position: Vec2,
    /// Extent.
    pub size: Vec2,
}

impl Rect2 {
    /// The unit rect `(0, 0, 1, 1)`.
    pub const UNIT: Self = Self {
        position: Vec2::ZERO,
        size: Vec2::ONE,
    };

    /// Rect from corner coordinates and extent.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    /// Exclusive bottom-right corner.
    #[must_use]
    pub fn end(&self) -> Vec2 {
        self.position + self.size
    }

    /// Whether the rects share any interior area.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let start = self.position.max(other.position);
        let end = self.end().min(other.end());
        end.x > start.x && end.y > start.y
    }

    /// Rect grown by `margin` on every side.
    #[must_use]
    pub fn grow(&self, margin: Vec2) -> Self {
        Self {
            position: self.position - margin,
            size: self.size + margin * 2.0,
        }
    }

    /// Packed `[x, y, w, h]` for uniform upload.
    #[must_use]
    pub fn to_array(&self) -> [f32; 4] {
        [self.position.x, self.position.y, self.size.x, self.size.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_clips_to_bounds() {
        let bounds = Rect2i::new(0, 0, 64, 64);
        let clipped = Rect2i::new(48, -8, 32, 32).intersection(&bounds);
        assert_eq!(clipped, Rect2i::new(48, 0, 16, 24));
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let a = Rect2i::new(0, 0, 10, 10);
        let b = Rect2i::new(20, 20, 5, 5);
        assert!(!a.intersection(&b).has_area());
    }

    #[test]
    fn normalized_divides_by_extent() {
        let r = Rect2i::new(16, 8, 32, 16).normalized(IVec2::new(64, 32));
        assert_eq!(r, Rect2::new(0.25, 0.25, 0.5, 0.5));
    }

    #[test]
    fn touching_rects_do_not_overlap() {
        let a = Rect2::new(0.0, 0.0, 0.5, 0.5);
        let b = Rect2::new(0.5, 0.0, 0.5, 0.5);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Rect2::new(0.25, 0.25, 0.5, 0.5)));
    }
}
