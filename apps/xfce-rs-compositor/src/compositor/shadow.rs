//! Gaussian drop shadows.
//!
//! A shadow is an 8-bit alpha image the size of the window plus the kernel
//! size. Corner and edge samples are precomputed for every quantized opacity
//! level, so building a shadow for a large window is mostly memset work.

use tracing::{debug, warn};

/// Number of quantization steps for shadow opacity (levels 0..=25).
pub const OPACITY_STEPS: usize = 25;

/// Normalized square convolution kernel.
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    size: usize,
    data: Vec<f64>,
}

impl GaussianKernel {
    pub fn new(radius: f64) -> Self {
        let size = (((radius * 3.0).ceil() as i64 + 1) & !1).max(0) as usize;
        let center = (size / 2) as f64;
        let mut data = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                data.push(gaussian(radius, x as f64 - center, y as f64 - center));
            }
        }
        let total: f64 = data.iter().sum();
        if total > 0.0 {
            for value in &mut data {
                *value /= total;
            }
        }
        Self { size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Alpha at (`x`, `y`) of a `width` x `height` opaque box blurred by
    /// this kernel, scaled by `opacity`.
    pub fn sample(&self, opacity: f64, x: i64, y: i64, width: i64, height: i64) -> u8 {
        let size = self.size as i64;
        let center = size / 2;

        let fx_start = (center - x).max(0);
        let fx_end = (width + center - x).min(size);
        let fy_start = (center - y).max(0);
        let fy_end = (height + center - y).min(size);

        let mut value = 0.0;
        for fy in fy_start..fy_end {
            let row = (fy * size) as usize;
            for fx in fx_start..fx_end {
                value += self.data[row + fx as usize];
            }
        }
        (value.min(1.0) * opacity * 255.0) as u8
    }
}

fn gaussian(radius: f64, x: f64, y: f64) -> f64 {
    (1.0 / (2.0 * std::f64::consts::PI * radius).sqrt()) * (-(x * x + y * y) / (2.0 * radius * radius)).exp()
}

/// Presummed corner and edge samples for one kernel.
#[derive(Debug, Clone)]
pub struct ShadowTable {
    size: usize,
    corner: Vec<u8>,
    top: Vec<u8>,
}

impl ShadowTable {
    pub fn build(kernel: &GaussianKernel) -> Self {
        let size = kernel.size();
        let stride = size + 1;
        let plane = stride * stride;
        let center = (size / 2) as i64;
        let extent = (size * 2) as i64;
        let full = OPACITY_STEPS;

        let mut corner = vec![0u8; plane * (full + 1)];
        let mut top = vec![0u8; stride * (full + 1)];

        for x in 0..=size {
            let edge = kernel.sample(1.0, x as i64 - center, center, extent, extent);
            top[full * stride + x] = edge;
            for level in 0..full {
                top[level * stride + x] = scale(edge, level);
            }

            for y in 0..=x {
                let value = kernel.sample(1.0, x as i64 - center, y as i64 - center, extent, extent);
                corner[full * plane + y * stride + x] = value;
                corner[full * plane + x * stride + y] = value;
                for level in 0..full {
                    let scaled = scale(value, level);
                    corner[level * plane + y * stride + x] = scaled;
                    corner[level * plane + x * stride + y] = scaled;
                }
            }
        }

        Self { size, corner, top }
    }

    fn corner(&self, level: usize, x: usize, y: usize) -> u8 {
        let stride = self.size + 1;
        self.corner[level * stride * stride + y * stride + x]
    }

    fn edge(&self, level: usize, offset: usize) -> u8 {
        self.top[level * (self.size + 1) + offset]
    }
}

fn scale(value: u8, level: usize) -> u8 {
    (usize::from(value) * level / OPACITY_STEPS) as u8
}

/// Alpha bitmap ready to be uploaded as an A8 surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[cfg(test)]
impl ShadowImage {
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }
}

/// Kernel and presummed tables for the configured shadow radius.
#[derive(Debug)]
pub struct ShadowCache {
    radius: u32,
    kernel: GaussianKernel,
    table: ShadowTable,
}

impl ShadowCache {
    pub fn new(radius: u32) -> Self {
        let kernel = GaussianKernel::new(f64::from(radius));
        let table = ShadowTable::build(&kernel);
        Self { radius, kernel, table }
    }

    #[cfg(test)]
    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Extra width and height a shadow adds around its window.
    pub fn margin(&self) -> u32 {
        self.kernel.size() as u32
    }

    /// Rebuild the kernel and tables if `radius` differs from the cached one.
    pub fn ensure_table(&mut self, radius: u32) -> bool {
        if radius == self.radius {
            return false;
        }
        debug!("Rebuilding shadow tables for radius {}", radius);
        *self = Self::new(radius);
        true
    }

    /// Build the shadow for a `width` x `height` window.
    ///
    /// Returns `None` if the bitmap cannot be allocated; callers then paint
    /// the window without a shadow.
    pub fn render(&self, opacity: f64, width: u32, height: u32) -> Option<ShadowImage> {
        let opacity = opacity.clamp(0.0, 1.0);
        let gsize = self.kernel.size() as i64;
        let center = gsize / 2;
        let width = i64::from(width);
        let height = i64::from(height);
        let swidth = width + gsize;
        let sheight = height + gsize;
        let level = (opacity * OPACITY_STEPS as f64) as usize;
        let tabled = self.table.size == self.kernel.size();

        let len = usize::try_from(swidth * sheight).ok()?;
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            warn!("Cannot allocate {}x{} shadow, skipping it", swidth, sheight);
            return None;
        }

        let fill = if gsize > 0 && tabled {
            self.table.edge(level, gsize as usize)
        } else {
            self.kernel.sample(opacity, center, center, width, height)
        };
        data.resize(len, fill);

        let ylimit = if gsize > sheight / 2 { (sheight + 1) / 2 } else { gsize };
        let xlimit = if gsize > swidth / 2 { (swidth + 1) / 2 } else { gsize };
        let at = |x: i64, y: i64| (y * swidth + x) as usize;

        for y in 0..ylimit {
            for x in 0..xlimit {
                let value = if tabled && xlimit == gsize && ylimit == gsize {
                    self.table.corner(level, x as usize, y as usize)
                } else {
                    self.kernel.sample(opacity, x - center, y - center, width, height)
                };
                data[at(x, y)] = value;
                data[at(x, sheight - y - 1)] = value;
                data[at(swidth - x - 1, sheight - y - 1)] = value;
                data[at(swidth - x - 1, y)] = value;
            }
        }

        let x_diff = swidth - gsize * 2;
        if x_diff > 0 {
            for y in 0..ylimit {
                let value = if tabled && ylimit == gsize {
                    self.table.edge(level, y as usize)
                } else {
                    self.kernel.sample(opacity, center, y - center, width, height)
                };
                let top = at(gsize, y);
                let bottom = at(gsize, sheight - y - 1);
                data[top..top + x_diff as usize].fill(value);
                data[bottom..bottom + x_diff as usize].fill(value);
            }
        }

        for x in 0..xlimit {
            let value = if tabled && xlimit == gsize {
                self.table.edge(level, x as usize)
            } else {
                self.kernel.sample(opacity, x - center, center, width, height)
            };
            for y in gsize..sheight - gsize {
                data[at(x, y)] = value;
                data[at(swidth - x - 1, y)] = value;
            }
        }

        Some(ShadowImage {
            width: swidth as u32,
            height: sheight as u32,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_size_is_even_and_normalized() {
        let kernel = GaussianKernel::new(12.0);
        assert_eq!(kernel.size(), 36);

        let total: f64 = kernel.data.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(GaussianKernel::new(0.0).size(), 0);
    }

    #[test]
    fn test_shadow_dimensions_include_margin() {
        let cache = ShadowCache::new(12);
        let image = cache.render(0.75, 200, 100).expect("shadow");

        assert_eq!(cache.margin(), 36);
        assert_eq!(image.width, 236);
        assert_eq!(image.height, 136);
        assert_eq!(image.data.len(), 236 * 136);
    }

    #[test]
    fn test_shadow_is_symmetric() {
        let cache = ShadowCache::new(6);
        let image = cache.render(1.0, 80, 50).expect("shadow");

        for y in 0..image.height {
            for x in 0..image.width {
                let mirrored_x = image.pixel(image.width - x - 1, y);
                let mirrored_y = image.pixel(x, image.height - y - 1);
                assert_eq!(image.pixel(x, y), mirrored_x, "at {x},{y}");
                assert_eq!(image.pixel(x, y), mirrored_y, "at {x},{y}");
            }
        }
    }

    #[test]
    fn test_shadow_darkest_in_the_middle() {
        let cache = ShadowCache::new(6);
        let image = cache.render(1.0, 80, 50).expect("shadow");
        let middle = image.pixel(image.width / 2, image.height / 2);

        assert!(middle > 0);
        assert!(image.pixel(0, 0) < middle);
        assert!(image.pixel(image.width / 2, 0) < middle);
        assert!(image.data.iter().all(|&v| v <= middle));
    }

    #[test]
    fn test_small_window_falls_back_to_direct_sums() {
        let cache = ShadowCache::new(12);
        let image = cache.render(1.0, 4, 4).expect("shadow");

        assert_eq!(image.width, 40);
        assert_eq!(image.pixel(0, 0), image.pixel(39, 39));
        assert!(image.pixel(20, 20) > image.pixel(0, 0));
    }

    #[test]
    fn test_zero_opacity_is_transparent() {
        let cache = ShadowCache::new(4);
        let image = cache.render(0.0, 30, 30).expect("shadow");
        assert!(image.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_ensure_table_only_rebuilds_on_change() {
        let mut cache = ShadowCache::new(12);
        assert!(!cache.ensure_table(12));
        assert!(cache.ensure_table(4));
        assert_eq!(cache.radius(), 4);
        assert_eq!(cache.margin(), 12);
    }
}
