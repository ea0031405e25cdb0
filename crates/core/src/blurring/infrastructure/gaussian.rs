/// Precompute a normalized 1D Gaussian kernel for `sigma`.
///
/// The kernel spans `±ceil(3 * sigma)` taps. A non-positive sigma yields the
/// identity kernel `[1.0]`.
pub fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    if sigma.is_nan() || sigma <= 0.0 {
        return vec![1.0];
    }
    let sigma = sigma as f64;
    let half = (3.0 * sigma).ceil() as usize;
    let kernel_size = 2 * half + 1;
    let mut kernel_f64: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let x = i as f64 - half as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel_f64.iter().sum();
    for v in &mut kernel_f64 {
        *v /= sum;
    }
    kernel_f64.iter().map(|&v| v as f32).collect()
}

/// Integer downscale factor used before blurring with `sigma`.
///
/// Large blurs are computed on an area-averaged reduced image and upscaled
/// back; the reduced blur uses `sigma / factor`.
pub fn downscale_factor(sigma: f32) -> usize {
    if sigma < 8.0 {
        1
    } else {
        (sigma / 4.0).round() as usize
    }
}

/// Source index for every tap of every output position along an axis of
/// `len` samples, clamped to the edges. Row `i` starts at `i * taps`.
fn clamped_taps(len: usize, taps: usize) -> Vec<usize> {
    let half = (taps / 2) as isize;
    let last = len as isize - 1;
    (0..len as isize)
        .flat_map(|i| (0..taps as isize).map(move |k| (i + k - half).clamp(0, last) as usize))
        .collect()
}

/// Separable Gaussian blur of an interleaved image, in place. `temp` is
/// scratch space reused across calls.
pub fn separable_gaussian_blur_with_kernel(
    data: &mut [u8],
    width: usize,
    height: usize,
    channels: usize,
    kernel: &[f32],
    temp: &mut Vec<f32>,
) {
    let taps = kernel.len();
    if taps <= 1 || width == 0 || height == 0 {
        return;
    }
    let stride = width * channels;
    temp.clear();
    temp.resize(stride * height, 0.0);

    let cols = clamped_taps(width, taps);
    for (src_row, dst_row) in data.chunks_exact(stride).zip(temp.chunks_exact_mut(stride)) {
        for (x, sources) in cols.chunks_exact(taps).enumerate() {
            for c in 0..channels {
                dst_row[x * channels + c] = sources
                    .iter()
                    .zip(kernel)
                    .map(|(&sx, &w)| src_row[sx * channels + c] as f32 * w)
                    .sum();
            }
        }
    }

    let rows = clamped_taps(height, taps);
    for (y, sources) in rows.chunks_exact(taps).enumerate() {
        let dst_row = &mut data[y * stride..(y + 1) * stride];
        for (i, out) in dst_row.iter_mut().enumerate() {
            let sum: f32 = sources
                .iter()
                .zip(kernel)
                .map(|(&sy, &w)| temp[sy * stride + i] * w)
                .sum();
            *out = sum.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blurs a whole image in place. With `scale > 1` the blur runs on a
/// reduced copy with `small_kernel` and is scaled back up; images smaller
/// than two blocks per axis take the direct path.
#[allow(clippy::too_many_arguments)]
pub fn blur_in_place(
    data: &mut [u8],
    width: usize,
    height: usize,
    channels: usize,
    kernel: &[f32],
    small_kernel: &[f32],
    scale: usize,
    temp: &mut Vec<f32>,
) {
    if scale <= 1 || width < scale * 2 || height < scale * 2 {
        separable_gaussian_blur_with_kernel(data, width, height, channels, kernel, temp);
        return;
    }
    let (mut small, sw, sh) = downscale(data, width, height, channels, scale);
    separable_gaussian_blur_with_kernel(&mut small, sw, sh, channels, small_kernel, temp);
    let restored = upscale(&small, sw, sh, channels, width, height);
    data[..restored.len()].copy_from_slice(&restored);
}

/// Box-filter reduction by `scale`. Trailing rows and columns that do not
/// fill a whole block are dropped.
pub fn downscale(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    scale: usize,
) -> (Vec<u8>, usize, usize) {
    let (new_w, new_h) = (width / scale, height / scale);
    let block = (scale * scale) as u32;
    let stride = width * channels;
    let mut out = Vec::with_capacity(new_w * new_h * channels);
    let mut acc = vec![0u32; new_w * channels];

    for band in data.chunks_exact(stride * scale).take(new_h) {
        acc.fill(0);
        for row in band.chunks_exact(stride) {
            for (x, px) in row.chunks_exact(channels).take(new_w * scale).enumerate() {
                let base = (x / scale) * channels;
                for (c, &v) in px.iter().enumerate() {
                    acc[base + c] += v as u32;
                }
            }
        }
        out.extend(acc.iter().map(|&sum| (sum / block) as u8));
    }

    (out, new_w, new_h)
}

/// Lower sample, upper sample and blend weight for each target position
/// when stretching `src_len` samples over `dst_len`, corners aligned.
fn bilinear_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let ratio = (src_len as f32 - 1.0) / (dst_len as f32 - 1.0).max(1.0);
    (0..dst_len)
        .map(|i| {
            let pos = i as f32 * ratio;
            let lo = (pos.floor() as usize).min(src_len - 1);
            (lo, (lo + 1).min(src_len - 1), pos - lo as f32)
        })
        .collect()
}

/// Bilinear enlargement to `target_w × target_h`.
pub fn upscale(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    target_w: usize,
    target_h: usize,
) -> Vec<u8> {
    let xs = bilinear_taps(width, target_w);
    let ys = bilinear_taps(height, target_h);
    let at = |x: usize, y: usize, c: usize| data[(y * width + x) * channels + c] as f32;

    let mut out = Vec::with_capacity(target_w * target_h * channels);
    for &(y0, y1, fy) in &ys {
        for &(x0, x1, fx) in &xs {
            for c in 0..channels {
                let top = at(x0, y0, c) + (at(x1, y0, c) - at(x0, y0, c)) * fx;
                let bottom = at(x0, y1, c) + (at(x1, y1, c) - at(x0, y1, c)) * fx;
                out.push((top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blur(data: &mut [u8], width: usize, height: usize, channels: usize, sigma: f32) {
        let kernel = gaussian_kernel_1d(sigma);
        let mut temp = Vec::new();
        separable_gaussian_blur_with_kernel(data, width, height, channels, &kernel, &mut temp);
    }

    #[test]
    fn test_kernel_sums_to_one() {
        let k = gaussian_kernel_1d(2.0);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_kernel_spans_three_sigma() {
        assert_eq!(gaussian_kernel_1d(2.0).len(), 13);
        assert_eq!(gaussian_kernel_1d(12.0).len(), 73);
    }

    #[test]
    fn test_kernel_is_symmetric_with_largest_centre() {
        let k = gaussian_kernel_1d(1.5);
        let mid = k.len() / 2;
        for i in 0..mid {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-6);
            assert!(k[mid] >= k[i]);
        }
    }

    #[test]
    fn test_non_positive_sigma_is_identity() {
        assert_eq!(gaussian_kernel_1d(0.0), vec![1.0]);
        assert_eq!(gaussian_kernel_1d(-3.0), vec![1.0]);
        assert_eq!(gaussian_kernel_1d(f32::NAN), vec![1.0]);
    }

    #[test]
    fn test_downscale_factor() {
        assert_eq!(downscale_factor(2.0), 1);
        assert_eq!(downscale_factor(12.0), 3);
        assert_eq!(downscale_factor(20.0), 5);
    }

    #[test]
    fn test_blur_uniform_image_unchanged() {
        let mut data = vec![128u8; 10 * 10 * 3];
        blur(&mut data, 10, 10, 3, 1.0);
        assert!(data.iter().all(|&v| (v as i32 - 128).abs() <= 1));
    }

    #[test]
    fn test_blur_spreads_single_bright_pixel() {
        let mut data = vec![0u8; 10 * 10 * 3];
        let cx = 5 * 10 + 5;
        data[cx * 3] = 255;
        data[cx * 3 + 1] = 255;
        data[cx * 3 + 2] = 255;

        let original = data.clone();
        blur(&mut data, 10, 10, 3, 1.0);

        assert!(data[cx * 3] < 255);
        let neighbor = (5 * 10 + 6) * 3;
        assert!(data[neighbor] > 0);
        assert_ne!(data, original);
    }

    #[test]
    fn test_downscaled_blur_keeps_uniform_image() {
        let mut data = vec![90u8; 48 * 36 * 4];
        let kernel = gaussian_kernel_1d(12.0);
        let small = gaussian_kernel_1d(4.0);
        let mut temp = Vec::new();
        blur_in_place(&mut data, 48, 36, 4, &kernel, &small, 3, &mut temp);
        assert!(data.iter().all(|&v| (v as i32 - 90).abs() <= 1));
    }

    #[test]
    fn test_small_image_falls_back_to_direct_blur() {
        let mut data = vec![0u8; 4 * 4 * 3];
        data[0] = 255;
        let kernel = gaussian_kernel_1d(1.0);
        let small = gaussian_kernel_1d(0.5);
        let mut temp = Vec::new();
        blur_in_place(&mut data, 4, 4, 3, &kernel, &small, 3, &mut temp);
        assert!(data[0] < 255);
        assert!(data[3] > 0);
    }

    #[test]
    fn test_clamped_taps_repeat_edges() {
        assert_eq!(clamped_taps(3, 3), vec![0, 0, 1, 0, 1, 2, 1, 2, 2]);
    }

    #[test]
    fn test_downscale_averages_blocks() {
        // 4x2 single channel, two 2x2 blocks.
        let data = vec![0, 4, 10, 10, 8, 4, 20, 20];
        let (small, sw, sh) = downscale(&data, 4, 2, 1, 2);
        assert_eq!((sw, sh), (2, 1));
        assert_eq!(small, vec![4, 15]);
    }

    #[test]
    fn test_upscale_interpolates_between_corners() {
        let big = upscale(&[0, 90], 2, 1, 1, 4, 1);
        assert_eq!(big, vec![0, 30, 60, 90]);
    }

    #[test]
    fn test_downscale_upscale_roundtrip() {
        let data = vec![100u8; 8 * 8 * 3];
        let (small, sw, sh) = downscale(&data, 8, 8, 3, 2);
        assert_eq!((sw, sh), (4, 4));
        let big = upscale(&small, sw, sh, 3, 8, 8);
        assert!(big.iter().all(|&v| (v as i32 - 100).abs() <= 1));
    }
}
