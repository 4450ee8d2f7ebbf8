//! Region extraction
//!
//! Turns a foreground mask into line-level bounding boxes: a horizontal
//! dilation bridges the gaps between glyphs, the outer contours of the
//! dilated mask give word boxes, and boxes sharing a text line are merged.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::morphology::{grayscale_dilate, Mask};
use tracing::debug;

use super::geometry::Rect;
use crate::config::ExtractOptions;

/// Largest kernel extent accepted by `Mask::from_image`
const MAX_KERNEL_WIDTH: u32 = 511;

/// Width of the horizontal dilation kernel for a mask with `rows` rows.
///
/// The character height is estimated as `max(12, rows / divisor)`; half of
/// it (at least 8px) closes intra-word gaps without reaching the next line.
pub fn dilation_kernel_width(rows: u32, divisor: u32) -> u32 {
    let approx_char_height = (rows / divisor.max(1)).max(12);
    (approx_char_height / 2).max(8)
}

/// Morphological dilation with a `width x 1` rectangle
pub fn dilate_horizontal(mask: &GrayImage, width: u32) -> GrayImage {
    let width = width.clamp(1, MAX_KERNEL_WIDTH);
    if width == 1 {
        return mask.clone();
    }
    let kernel = GrayImage::from_pixel(width, 1, Luma([255]));
    let center = (width / 2).min(u8::MAX as u32) as u8;
    grayscale_dilate(mask, &Mask::from_image(&kernel, center, 0))
}

/// Bounding box of a contour, inclusive of its edge pixels
fn contour_bounds(contour: &Contour<i32>) -> Option<Rect> {
    let first = contour.points.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Some(Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

/// Area and aspect-ratio filter. All bounds are inclusive.
pub fn passes_filters(rect: &Rect, image_area: f64, opts: &ExtractOptions) -> bool {
    let area = rect.area() as f64;
    if area < opts.min_area || area > opts.max_area_ratio * image_area {
        return false;
    }
    let aspect = rect.aspect_ratio();
    aspect >= opts.min_aspect_ratio && aspect <= opts.max_aspect_ratio
}

/// Sort top to bottom; boxes whose tops are within `row_tolerance` of the
/// first box of their row are ordered left to right.
pub fn sort_boxes(boxes: &mut Vec<Rect>, row_tolerance: i32) {
    boxes.sort_by_key(|r| (r.y, r.x));

    let mut sorted = Vec::with_capacity(boxes.len());
    let mut row: Vec<Rect> = Vec::new();
    for rect in boxes.drain(..) {
        if let Some(first) = row.first() {
            if (rect.y - first.y).abs() >= row_tolerance {
                row.sort_by_key(|r| r.x);
                sorted.append(&mut row);
            }
        }
        row.push(rect);
    }
    row.sort_by_key(|r| r.x);
    sorted.append(&mut row);

    *boxes = sorted;
}

/// Merge boxes that lie on one text line.
///
/// Boxes are visited top to bottom. A box joins the current line when its
/// vertical overlap with the line's first box, divided by the smaller
/// height, reaches `y_overlap_threshold`. Within a line, boxes sorted by x
/// are merged while the gap to the next box is at most
/// `x_gap_factor * min(height)`.
///
/// A merged box is taller than its parts and may reach a neighbour the parts
/// could not, so passes repeat until nothing merges. The result is a fixed
/// point: merging it again returns it unchanged.
pub fn merge_by_line(boxes: &[Rect], y_overlap_threshold: f64, x_gap_factor: f64) -> Vec<Rect> {
    let mut merged = merge_pass(boxes, y_overlap_threshold, x_gap_factor);
    loop {
        let next = merge_pass(&merged, y_overlap_threshold, x_gap_factor);
        if next.len() == merged.len() {
            return next;
        }
        merged = next;
    }
}

/// One grouping and merging pass. The output depends only on the set of
/// input boxes, not on their order.
fn merge_pass(boxes: &[Rect], y_overlap_threshold: f64, x_gap_factor: f64) -> Vec<Rect> {
    let mut sorted = boxes.to_vec();
    sorted.sort_by_key(|r| (r.y, r.x, r.width, r.height));

    let mut merged = Vec::new();
    let mut line: Vec<Rect> = Vec::new();

    for rect in sorted {
        if let Some(reference) = line.first() {
            if reference.vertical_overlap_ratio(&rect) < y_overlap_threshold {
                flush_line(&mut line, x_gap_factor, &mut merged);
            }
        }
        line.push(rect);
    }
    flush_line(&mut line, x_gap_factor, &mut merged);

    merged
}

fn flush_line(line: &mut Vec<Rect>, x_gap_factor: f64, out: &mut Vec<Rect>) {
    if line.is_empty() {
        return;
    }
    line.sort_by_key(|r| r.x);

    let mut current = line[0];
    for next in &line[1..] {
        let gap = next.x - current.right();
        let height = current.height.min(next.height);
        if gap as f64 <= height as f64 * x_gap_factor {
            current = current.union(next);
        } else {
            out.push(current);
            current = *next;
        }
    }
    out.push(current);
    line.clear();
}

/// Extract line-level regions from a mask.
///
/// `image_area` is the area of the image the mask was computed from; the
/// upper area bound is relative to it. The result is clipped to the mask.
pub fn extract_regions(mask: &GrayImage, image_area: f64, opts: &ExtractOptions) -> Vec<Rect> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return vec![];
    }

    let kernel_width = dilation_kernel_width(height, opts.char_height_divisor);
    let dilated = dilate_horizontal(mask, kernel_width);

    let contours: Vec<Contour<i32>> = find_contours(&dilated);
    let mut boxes: Vec<Rect> = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| c.points.len() >= 3)
        .filter_map(contour_bounds)
        .filter(|r| passes_filters(r, image_area, opts))
        .collect();

    sort_boxes(&mut boxes, opts.row_tolerance);
    let merged = merge_by_line(&boxes, opts.y_overlap_threshold, opts.x_gap_factor);

    debug!(
        "Extracted {} contours -> {} boxes -> {} lines (kernel {}px)",
        contours.len(),
        boxes.len(),
        merged.len(),
        kernel_width
    );

    merged
        .into_iter()
        .map(|r| r.clip(width, height))
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as DrawRect;

    fn opts() -> ExtractOptions {
        ExtractOptions::full_frame()
    }

    #[test]
    fn test_kernel_width() {
        assert_eq!(dilation_kernel_width(150, 60), 8);
        assert_eq!(dilation_kernel_width(1200, 60), 10);
        assert_eq!(dilation_kernel_width(600, 20), 15);
    }

    #[test]
    fn test_dilate_horizontal_spreads_only_sideways() {
        let mut mask = GrayImage::new(20, 5);
        mask.put_pixel(10, 2, Luma([255]));
        let dilated = dilate_horizontal(&mask, 5);
        assert_eq!(dilated.get_pixel(8, 2)[0], 255);
        assert_eq!(dilated.get_pixel(12, 2)[0], 255);
        assert_eq!(dilated.get_pixel(10, 1)[0], 0);
        assert_eq!(dilated.get_pixel(10, 3)[0], 0);
    }

    #[test]
    fn test_area_filter_boundaries() {
        let o = ExtractOptions { min_area: 100.0, ..opts() };
        // Exactly min_area passes, one pixel less fails
        assert!(passes_filters(&Rect::new(0, 0, 10, 10), 10_000.0, &o));
        assert!(!passes_filters(&Rect::new(0, 0, 11, 9), 10_000.0, &o));

        let o = ExtractOptions { max_area_ratio: 0.5, min_area: 0.0, ..opts() };
        assert!(passes_filters(&Rect::new(0, 0, 50, 10), 1000.0, &o));
        assert!(!passes_filters(&Rect::new(0, 0, 51, 10), 1000.0, &o));
    }

    #[test]
    fn test_aspect_filter_boundaries() {
        let o = ExtractOptions {
            min_area: 0.0,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 20.0,
            ..opts()
        };
        assert!(passes_filters(&Rect::new(0, 0, 200, 10), 1e9, &o));
        assert!(!passes_filters(&Rect::new(0, 0, 201, 10), 1e9, &o));
        assert!(passes_filters(&Rect::new(0, 0, 1, 10), 1e9, &o));
        assert!(!passes_filters(&Rect::new(0, 0, 1, 11), 1e9, &o));
    }

    #[test]
    fn test_merge_by_gap_threshold() {
        // Height 20, factor 0.5 => boxes merge when the gap is at most 10
        let a = Rect::new(10, 10, 30, 20);
        let near = Rect::new(a.right() + 9, 10, 30, 20);
        let merged = merge_by_line(&[a, near], 0.5, 0.5);
        assert_eq!(merged, vec![Rect::new(10, 10, 69, 20)]);

        let far = Rect::new(a.right() + 11, 10, 30, 20);
        let merged = merge_by_line(&[a, far], 0.5, 0.5);
        assert_eq!(merged, vec![a, far]);
    }

    #[test]
    fn test_merge_keeps_separate_lines() {
        let top = Rect::new(10, 10, 40, 20);
        let bottom = Rect::new(12, 45, 40, 20);
        let merged = merge_by_line(&[bottom, top], 0.5, 0.6);
        assert_eq!(merged, vec![top, bottom]);
    }

    #[test]
    fn test_containment_threshold_is_stricter() {
        let a = Rect::new(0, 10, 30, 20);
        // Overlaps 15 of 20 rows: same line at 0.5, not at 1.0
        let b = Rect::new(32, 15, 30, 20);
        assert_eq!(merge_by_line(&[a, b], 0.5, 0.5).len(), 1);
        assert_eq!(merge_by_line(&[a, b], 1.0, 0.5).len(), 2);

        // Vertically contained box joins at 1.0
        let c = Rect::new(32, 14, 20, 10);
        assert_eq!(merge_by_line(&[a, c], 1.0, 0.5).len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let boxes = vec![
            Rect::new(10, 10, 20, 18),
            Rect::new(34, 11, 22, 18),
            Rect::new(90, 10, 25, 19),
            Rect::new(12, 60, 30, 20),
            Rect::new(45, 62, 30, 18),
        ];
        let once = merge_by_line(&boxes, 0.5, 0.6);
        let twice = merge_by_line(&once, 0.5, 0.6);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_merge_reaches_fixed_point_when_union_grows_taller() {
        // The short middle box first joins its right neighbour; the taller
        // union then sits within reach of the left box.
        let boxes = vec![
            Rect::new(0, 0, 10, 30),
            Rect::new(22, 0, 10, 10),
            Rect::new(33, 0, 10, 30),
        ];
        let once = merge_by_line(&boxes, 0.5, 0.5);
        assert_eq!(once, vec![Rect::new(0, 0, 43, 30)]);
        assert_eq!(merge_by_line(&once, 0.5, 0.5), once);
    }

    #[test]
    fn test_merge_ignores_input_order() {
        let boxes = vec![
            Rect::new(90, 10, 25, 19),
            Rect::new(12, 60, 30, 20),
            Rect::new(10, 10, 20, 18),
            Rect::new(45, 62, 30, 18),
            Rect::new(34, 11, 22, 18),
        ];
        let mut reversed = boxes.clone();
        reversed.reverse();
        assert_eq!(merge_by_line(&boxes, 0.5, 0.6), merge_by_line(&reversed, 0.5, 0.6));
    }

    #[test]
    fn test_sort_boxes_rows() {
        let mut boxes = vec![
            Rect::new(50, 12, 10, 10),
            Rect::new(10, 15, 10, 10),
            Rect::new(5, 40, 10, 10),
        ];
        sort_boxes(&mut boxes, 10);
        assert_eq!(
            boxes,
            vec![
                Rect::new(10, 15, 10, 10),
                Rect::new(50, 12, 10, 10),
                Rect::new(5, 40, 10, 10),
            ]
        );
    }

    #[test]
    fn test_extract_merges_word_glyphs() {
        let mut mask = GrayImage::new(300, 150);
        // Three glyphs 4px apart make one word
        for i in 0..3 {
            draw_filled_rect_mut(&mut mask, DrawRect::at(100 + i * 16, 60).of_size(12, 20), Luma([255]));
        }
        let regions = extract_regions(&mask, 300.0 * 150.0, &opts());
        assert_eq!(regions.len(), 1);

        let r = regions[0];
        assert!(r.y == 60 && r.height == 20, "unexpected region {r}");
        assert!(r.x <= 100 && r.x >= 95, "unexpected region {r}");
        assert!(r.right() >= 144 && r.right() <= 149, "unexpected region {r}");
    }

    #[test]
    fn test_extract_rejects_small_and_huge() {
        let mut mask = GrayImage::new(200, 100);
        // 3x3 speck is below min_area even after dilation (10x3 = 30)
        draw_filled_rect_mut(&mut mask, DrawRect::at(20, 20).of_size(3, 3), Luma([255]));
        assert!(extract_regions(&mask, 20_000.0, &opts()).is_empty());

        let full = GrayImage::from_pixel(200, 100, Luma([255]));
        assert!(extract_regions(&full, 20_000.0, &opts()).is_empty());
    }

    #[test]
    fn test_extract_regions_within_bounds() {
        let mut mask = GrayImage::new(120, 60);
        draw_filled_rect_mut(&mut mask, DrawRect::at(0, 0).of_size(20, 15), Luma([255]));
        draw_filled_rect_mut(&mut mask, DrawRect::at(105, 45).of_size(15, 15), Luma([255]));
        let regions = extract_regions(&mask, 7200.0, &opts());
        assert!(!regions.is_empty());
        for r in regions {
            assert!(r.x >= 0 && r.y >= 0);
            assert!(r.right() <= 120 && r.bottom() <= 60);
        }
    }

    #[test]
    fn test_extract_empty_mask() {
        let mask = GrayImage::new(50, 50);
        assert!(extract_regions(&mask, 2500.0, &opts()).is_empty());
    }
}
