//! Snap-point analysis over rendered sections
//!
//! Scans a rendered raster for "clean" bands - runs of rows where every
//! pixel has the same RGBA value - and derives candidate cut positions
//! from them. Big bands get points inset from both edges (the area between
//! could be hidden entirely); small bands get a single midpoint.

use serde::{Deserialize, Serialize};

use crate::surface::RasterSurface;

/// Default cutoff for [`nearest_snap_point`]: a snap point whose distance
/// to the pointer exceeds this fraction of the page is too far to snap to.
pub const DEFAULT_SNAP_DISTANCE_RATIO: f32 = 0.03;

/// Tuning knobs for the detector. All sizes are fractions of the full
/// page; the values are empirically tuned UI constants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SnapOptions {
    /// Bands smaller than this produce no region at all.
    #[serde(default = "default_min_region_size")]
    pub min_region_size: f32,
    /// Inset of the edge points of a big band.
    #[serde(default = "default_big_region_padding")]
    pub big_region_padding: f32,
    /// Bands larger than this get edge points instead of a midpoint.
    #[serde(default = "default_big_region_min_size")]
    pub big_region_min_size: f32,
}

fn default_min_region_size() -> f32 {
    0.01
}

fn default_big_region_padding() -> f32 {
    0.02
}

fn default_big_region_min_size() -> f32 {
    0.07
}

impl Default for SnapOptions {
    fn default() -> Self {
        Self {
            min_region_size: default_min_region_size(),
            big_region_padding: default_big_region_padding(),
            big_region_min_size: default_big_region_min_size(),
        }
    }
}

/// A contiguous clean band of a section, with zero or more candidate cut
/// positions. Coordinates are relative to the section, so a region
/// `[0, 1)` of a section `[0, 0.5)` spans `[0, 0.5)` in page coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapRegion {
    pub start: f32,
    pub end: f32,
    pub snap_points: Vec<f32>,
}

/// Determine where a cut would be good.
///
/// If `is_main` the surface holds the whole page and only the
/// `[start, end)` sub-rectangle is scanned; otherwise the surface is the
/// already-cropped section. Pure and total: any well-formed raster yields
/// a (possibly empty) region list.
#[must_use]
pub fn determine_optimal_cut_positions(
    surface: &RasterSurface,
    start: f32,
    end: f32,
    is_main: bool,
    options: &SnapOptions,
) -> Vec<SnapRegion> {
    let mut regions = Vec::new();

    let (scan_y, scan_height) = if is_main {
        (
            (surface.height() as f32 * start) as u32,
            (surface.height() as f32 * (end - start)) as u32,
        )
    } else {
        (0, surface.height())
    };
    if scan_height == 0 || surface.width() == 0 {
        return regions;
    }

    let mut run_start: Option<f32> = None;
    for y in 0..scan_height {
        if row_is_clean(surface, scan_y + y) {
            if run_start.is_none() {
                run_start = Some(y as f32 / scan_height as f32);
            }
        } else if let Some(a) = run_start.take() {
            close_run(&mut regions, a, y as f32 / scan_height as f32, false, start, end, options);
        }
    }
    // a clean run reaching the bottom row closes at 1 and is the last run
    if let Some(a) = run_start {
        close_run(&mut regions, a, 1.0, true, start, end, options);
    }

    regions
}

/// Every pixel of the row equals the row's first pixel.
fn row_is_clean(surface: &RasterSurface, y: u32) -> bool {
    let row = surface.row(y);
    let first = &row[..crate::surface::PIXEL_BYTES];
    row.chunks_exact(crate::surface::PIXEL_BYTES)
        .all(|px| px == first)
}

/// Close the clean run `[a, b)` and emit its region and snap points.
fn close_run(
    regions: &mut Vec<SnapRegion>,
    a: f32,
    b: f32,
    is_last: bool,
    start: f32,
    end: f32,
    options: &SnapOptions,
) {
    // band size in full-page units
    let size = (b - a) * (end - start);
    if size <= options.min_region_size {
        return;
    }

    let mut snap_points = Vec::new();
    let at_bottom_edge = is_last && end == 1.0;
    if a != 0.0 {
        if size > options.big_region_min_size {
            snap_points.push(a + options.big_region_padding / (end - start));
            if !at_bottom_edge {
                snap_points.push(b - options.big_region_padding / (end - start));
            }
        } else if !is_last {
            snap_points.push((a + b) / 2.0);
        }
        // the page's physical bottom is always an eligible cut line when
        // the last row is clean
        if at_bottom_edge {
            snap_points.push(1.0);
        }
    } else {
        // a run touching the top of the scan has nothing above it to
        // separate: no leading point, no midpoint
        if size > options.big_region_min_size && !at_bottom_edge {
            snap_points.push(b - options.big_region_padding / (end - start));
        }
    }

    regions.push(SnapRegion {
        start: a,
        end: b,
        snap_points,
    });
}

/// Pick the snap point nearest to `position` (section-relative), or `None`
/// when the nearest one is too far away relative to the section's share of
/// the page, in which case the caller falls back to the raw position.
#[must_use]
pub fn nearest_snap_point(
    regions: &[SnapRegion],
    position: f32,
    start: f32,
    end: f32,
    max_distance_ratio: f32,
) -> Option<f32> {
    let (best, distance) = regions
        .iter()
        .flat_map(|region| region.snap_points.iter().copied())
        .fold((0.0_f32, f32::INFINITY), |(best, best_distance), point| {
            let distance = (point - position).abs();
            if distance < best_distance {
                (point, distance)
            } else {
                (best, best_distance)
            }
        });
    if distance * (end - start) > max_distance_ratio {
        None
    } else {
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    /// Build a `width x height` surface where the rows in `noisy` get a
    /// non-uniform pixel pattern and all other rows are solid white.
    fn surface_with_noise(width: u32, height: u32, noisy: &[std::ops::Range<u32>]) -> RasterSurface {
        let mut surface = RasterSurface::new(width, height);
        surface.fill(WHITE);
        for range in noisy {
            for y in range.clone() {
                for x in 0..width {
                    surface.put_pixel(x, y, [(x * 37 % 256) as u8, 0, 0, 255]);
                }
            }
        }
        surface
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn clean_and_noisy_bands_split_into_two_regions() {
        // rows 0-39 white, 40-59 noisy, 60-99 white
        let surface = surface_with_noise(10, 100, &[40..60]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 1.0, false, &SnapOptions::default());

        assert_eq!(regions.len(), 2);

        // top band touches the scan top: no leading point, one trailing
        // inset point near 0.4 - 0.02
        assert!(approx(regions[0].start, 0.0));
        assert!(approx(regions[0].end, 0.4));
        assert_eq!(regions[0].snap_points.len(), 1);
        assert!(approx(regions[0].snap_points[0], 0.38));

        // bottom band is the last run and the section ends at the page
        // bottom: leading inset plus the implicit point at exactly 1
        assert!(approx(regions[1].start, 0.6));
        assert!(approx(regions[1].end, 1.0));
        assert_eq!(regions[1].snap_points.len(), 2);
        assert!(approx(regions[1].snap_points[0], 0.62));
        assert!(approx(regions[1].snap_points[1], 1.0));
    }

    #[test]
    fn small_band_gets_a_midpoint() {
        // clean band [0.5, 0.52), noisy everywhere else
        let surface = surface_with_noise(10, 100, &[0..50, 52..100]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 1.0, false, &SnapOptions::default());

        assert_eq!(regions.len(), 1);
        assert!(approx(regions[0].start, 0.5));
        assert!(approx(regions[0].end, 0.52));
        assert_eq!(regions[0].snap_points.len(), 1);
        assert!(approx(regions[0].snap_points[0], 0.51));
    }

    #[test]
    fn trailing_small_band_is_not_actionable() {
        // clean band [0.95, 1.0) at the end of a section that does not
        // reach the page bottom
        let surface = surface_with_noise(10, 100, &[0..95]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 0.5, false, &SnapOptions::default());

        assert_eq!(regions.len(), 1);
        assert!(regions[0].snap_points.is_empty());
    }

    #[test]
    fn tiny_bands_are_discarded() {
        // band [0.5, 0.505) has page size 0.005 <= 0.01
        let surface = surface_with_noise(10, 200, &[0..100, 101..200]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 1.0, false, &SnapOptions::default());
        assert!(regions.is_empty());
    }

    #[test]
    fn section_scaling_shrinks_band_sizes() {
        // same pixels, but the section covers only [0, 0.1) of the page:
        // a half-height band is 0.05 * 0.1 = 0.005 in page units
        let surface = surface_with_noise(10, 100, &[0..45, 55..100]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 0.1, false, &SnapOptions::default());
        assert!(regions.is_empty());
    }

    #[test]
    fn main_surface_scans_only_the_section_rectangle() {
        // full page: rows 0-49 noisy, 50-100 clean; section [0.5, 1.0)
        // sees only clean rows
        let surface = surface_with_noise(10, 100, &[0..50]);
        let regions =
            determine_optimal_cut_positions(&surface, 0.5, 1.0, true, &SnapOptions::default());

        assert_eq!(regions.len(), 1);
        assert!(approx(regions[0].start, 0.0));
        assert!(approx(regions[0].end, 1.0));
        // whole-scan run touches the top: no points at all, even at the
        // page bottom
        assert!(regions[0].snap_points.is_empty());
    }

    #[test]
    fn empty_raster_yields_no_regions() {
        let empty = RasterSurface::empty();
        assert!(
            determine_optimal_cut_positions(&empty, 0.0, 1.0, false, &SnapOptions::default())
                .is_empty()
        );

        let zero_width = RasterSurface::new(0, 50);
        assert!(
            determine_optimal_cut_positions(&zero_width, 0.0, 1.0, false, &SnapOptions::default())
                .is_empty()
        );
    }

    #[test]
    fn uniform_non_white_rows_are_clean() {
        // cleanliness is per-row uniformity, not whiteness
        let mut surface = RasterSurface::new(4, 100);
        surface.fill([3, 7, 11, 255]);
        for x in 0..4 {
            surface.put_pixel(x, 50, [x as u8, 0, 0, 255]);
        }
        let regions =
            determine_optimal_cut_positions(&surface, 0.0, 1.0, false, &SnapOptions::default());
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn nearest_point_snaps_within_the_cutoff() {
        let regions = vec![SnapRegion {
            start: 0.3,
            end: 0.5,
            snap_points: vec![0.32, 0.48],
        }];

        assert_eq!(
            nearest_snap_point(&regions, 0.33, 0.0, 1.0, DEFAULT_SNAP_DISTANCE_RATIO),
            Some(0.32)
        );
        assert_eq!(
            nearest_snap_point(&regions, 0.47, 0.0, 1.0, DEFAULT_SNAP_DISTANCE_RATIO),
            Some(0.48)
        );
        // too far from any point
        assert_eq!(
            nearest_snap_point(&regions, 0.9, 0.0, 1.0, DEFAULT_SNAP_DISTANCE_RATIO),
            None
        );
        // no candidates at all
        assert_eq!(
            nearest_snap_point(&[], 0.5, 0.0, 1.0, DEFAULT_SNAP_DISTANCE_RATIO),
            None
        );
    }

    #[test]
    fn nearest_point_cutoff_scales_with_section_size() {
        let regions = vec![SnapRegion {
            start: 0.0,
            end: 0.1,
            snap_points: vec![0.5],
        }];
        // distance 0.2 on a small section (end - start = 0.1) is within
        // the 0.03 page-relative cutoff
        assert_eq!(
            nearest_snap_point(&regions, 0.7, 0.0, 0.1, DEFAULT_SNAP_DISTANCE_RATIO),
            Some(0.5)
        );
        assert_eq!(
            nearest_snap_point(&regions, 0.7, 0.0, 1.0, DEFAULT_SNAP_DISTANCE_RATIO),
            None
        );
    }
}
