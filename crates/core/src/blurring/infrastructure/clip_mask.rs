use crate::shared::region::Region;

/// Per-pixel coverage of a region, clipped to the frame.
///
/// A pixel is covered when its centre `(x + 0.5, y + 0.5)` lies inside the
/// region under the even-odd rule, so the mask agrees with
/// [`Region::contains`] sampled at pixel centres.
pub struct ClipMask {
    width: usize,
    covered: Vec<bool>,
}

impl ClipMask {
    pub fn rasterize(region: &Region, width: usize, height: usize) -> Self {
        let mut covered = vec![false; width * height];
        match region {
            Region::Rect(r) => {
                let (x0, x1) = span(r.x, r.right(), width);
                let (y0, y1) = span(r.y, r.bottom(), height);
                for y in y0..y1 {
                    covered[y * width + x0..y * width + x1].fill(true);
                }
            }
            Region::Polygon(points) if points.len() >= 3 => {
                let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
                for y in 0..height {
                    let py = y as f64 + 0.5;
                    crossings.clear();
                    let mut j = points.len() - 1;
                    for i in 0..points.len() {
                        let (xi, yi) = points[i];
                        let (xj, yj) = points[j];
                        if (yi > py) != (yj > py) {
                            crossings.push(xi + (py - yi) * (xj - xi) / (yj - yi));
                        }
                        j = i;
                    }
                    crossings.sort_by(|a, b| a.total_cmp(b));
                    for pair in crossings.chunks_exact(2) {
                        let (x0, x1) = span(pair[0], pair[1], width);
                        covered[y * width + x0..y * width + x1].fill(true);
                    }
                }
            }
            Region::Polygon(_) => {}
        }
        Self { width, covered }
    }

    #[cfg(test)]
    fn is_covered(&self, x: usize, y: usize) -> bool {
        self.covered[y * self.width + x]
    }

    #[cfg(test)]
    fn covered_count(&self) -> usize {
        self.covered.iter().filter(|&&c| c).count()
    }

    pub fn covers_everything(&self) -> bool {
        self.covered.iter().all(|&c| c)
    }

    /// Half-open `[start, end)` column runs of covered pixels in row `y`.
    pub fn runs(&self, y: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let row = &self.covered[y * self.width..(y + 1) * self.width];
        let mut x = 0;
        std::iter::from_fn(move || {
            let start = x + row[x..].iter().position(|&c| c)?;
            let end = start + row[start..].iter().position(|&c| !c).unwrap_or(row.len() - start);
            x = end;
            Some((start, end))
        })
    }
}

/// Pixel indices whose centres fall in `[start, end)`, clipped to `[0, len)`.
fn span(start: f64, end: f64, len: usize) -> (usize, usize) {
    if start.is_nan() || end.is_nan() {
        return (0, 0);
    }
    let first = (start - 0.5).ceil().max(0.0);
    let last = (end - 0.5).ceil().min(len as f64);
    if first >= last {
        return (0, 0);
    }
    (first as usize, last as usize)
}
