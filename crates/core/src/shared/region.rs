/// Axis-aligned rectangle in pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// The area of a frame that stays sharp.
///
/// Coordinates are in pixels and may extend past the frame edges after
/// expansion; rasterisation clips them. Regions are recomputed per frame
/// and never stored beyond the frame that produced them.
#[derive(Clone, Debug, PartialEq)]
pub enum Region {
    Rect(PixelRect),
    Polygon(Vec<(f64, f64)>),
}

impl Region {
    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Region::Rect(PixelRect {
            x,
            y,
            width,
            height,
        })
    }

    /// Even-odd containment test. Points on a rectangle's left/top edge are
    /// inside, points on its right/bottom edge are outside.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        match self {
            Region::Rect(r) => px >= r.x && px < r.right() && py >= r.y && py < r.bottom(),
            Region::Polygon(points) => polygon_contains(points, px, py),
        }
    }

    pub fn area(&self) -> f64 {
        match self {
            Region::Rect(r) => (r.width * r.height).abs(),
            Region::Polygon(points) => shoelace_area(points),
        }
    }

    /// Rectangle centre, or the vertex mean for polygons.
    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Region::Rect(r) => (r.x + r.width / 2.0, r.y + r.height / 2.0),
            Region::Polygon(points) => vertex_mean(points),
        }
    }

    pub fn bounds(&self) -> PixelRect {
        match self {
            Region::Rect(r) => *r,
            Region::Polygon(points) => {
                let mut min_x = f64::INFINITY;
                let mut min_y = f64::INFINITY;
                let mut max_x = f64::NEG_INFINITY;
                let mut max_y = f64::NEG_INFINITY;
                for &(x, y) in points {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
                if points.is_empty() {
                    return PixelRect {
                        x: 0.0,
                        y: 0.0,
                        width: 0.0,
                        height: 0.0,
                    };
                }
                PixelRect {
                    x: min_x,
                    y: min_y,
                    width: max_x - min_x,
                    height: max_y - min_y,
                }
            }
        }
    }
}

pub(crate) fn vertex_mean(points: &[(f64, f64)]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

fn shoelace_area(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % points.len()];
        twice += x0 * y1 - x1 * y0;
    }
    (twice / 2.0).abs()
}

fn polygon_contains(points: &[(f64, f64)], px: f64, py: f64) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
