//! Binary mask operations used to turn a luminance difference into boxes.

use image::GrayImage;

/// Axis-aligned box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelBox {
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    fn contains(&self, other: &PixelBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    /// Pixels strictly brighter than `threshold` are set.
    pub fn from_threshold(image: &GrayImage, threshold: u8) -> Self {
        let (width, height) = image.dimensions();
        let data = image.pixels().map(|p| p.0[0] > threshold).collect();
        Self {
            width,
            height,
            data,
        }
    }

    fn get(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize]
    }

    pub fn count_set(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// 3x3 dilation; pixels outside the image are ignored.
    pub fn dilate(&self) -> Self {
        self.morph(|any, _all| any)
    }

    /// 3x3 erosion; pixels outside the image are ignored.
    pub fn erode(&self) -> Self {
        self.morph(|_any, all| all)
    }

    fn morph(&self, pick: impl Fn(bool, bool) -> bool) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..self.height {
            for x in 0..self.width {
                let mut any = false;
                let mut all = true;
                for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                        let v = self.get(nx, ny);
                        any |= v;
                        all &= v;
                    }
                }
                data.push(pick(any, all));
            }
        }
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Bounding boxes of 8-connected components, leaving out boxes that sit
    /// entirely inside another one.
    pub fn component_boxes(&self) -> Vec<PixelBox> {
        let mut seen = vec![false; self.data.len()];
        let mut boxes = Vec::new();
        let mut stack = Vec::new();

        for start in 0..self.data.len() {
            if !self.data[start] || seen[start] {
                continue;
            }

            let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
            let (mut max_x, mut max_y) = (0u32, 0u32);
            seen[start] = true;
            stack.push(start);

            while let Some(idx) = stack.pop() {
                let x = idx as u32 % self.width;
                let y = idx as u32 / self.width;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                        let n = (ny * self.width + nx) as usize;
                        if self.data[n] && !seen[n] {
                            seen[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            boxes.push(PixelBox {
                x: min_x,
                y: min_y,
                w: max_x - min_x + 1,
                h: max_y - min_y + 1,
            });
        }

        drop_nested(boxes)
    }
}

/// Only outermost boxes are kept, the way an external-contour search reports them.
fn drop_nested(boxes: Vec<PixelBox>) -> Vec<PixelBox> {
    boxes
        .iter()
        .enumerate()
        .filter(|(i, b)| {
            !boxes
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && other != *b && other.contains(b))
        })
        .map(|(_, b)| *b)
        .collect()
}

/// Per-pixel absolute luminance difference of two same-sized images.
pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (width, height) = a.dimensions();
    let data = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&pa, &pb)| pa.abs_diff(pb))
        .collect();
    // Buffer length always matches width * height here
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}
