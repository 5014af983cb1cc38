//! Default tile-geometry enumerator: a uniform grid derived from the
//! server's `tile_size`/`width`/`height`.
//!
//! Grounded on the teacher's `prefetch.rs::PrefetchCalculator::tiles_in_rect`
//! (floor/ceil over a per-level tile edge to find the covering column/row
//! range).

use crate::region::RegionRequest;
use crate::server::{ClipShape, ImageServer, TileGeometry};

/// Uniform-grid tile geometry: tiles are `tile_size * downsample` wide/tall
/// in level-0 coordinates, laid out from the origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TileGrid;

impl<T> TileGeometry<T> for TileGrid {
    fn tiles_covering(
        &self,
        server: &dyn ImageServer<T>,
        clip: ClipShape,
        downsample: f64,
        z: i32,
        t: u32,
        mut existing: Vec<RegionRequest>,
    ) -> Vec<RegionRequest> {
        if downsample <= 0.0 || !downsample.is_finite() {
            return existing;
        }

        let level_tile = server.tile_size() as f64 * downsample;
        if level_tile <= 0.0 {
            return existing;
        }

        let max_x = server.width() as f64;
        let max_y = server.height() as f64;

        let col_start = (clip.x / level_tile).floor().max(0.0) as i64;
        let col_end = (((clip.x + clip.width) / level_tile).ceil())
            .min((max_x / level_tile).ceil())
            .max(col_start as f64) as i64;
        let row_start = (clip.y / level_tile).floor().max(0.0) as i64;
        let row_end = (((clip.y + clip.height) / level_tile).ceil())
            .min((max_y / level_tile).ceil())
            .max(row_start as f64) as i64;

        existing.reserve(((col_end - col_start).max(0) * (row_end - row_start).max(0)) as usize);

        for row in row_start..row_end {
            for col in col_start..col_end {
                let x = (col as f64 * level_tile) as i64;
                let y = (row as f64 * level_tile) as i64;
                let w = level_tile.min(max_x - x as f64).max(1.0) as u32;
                let h = level_tile.min(max_y - y as f64).max(1.0) as u32;
                existing.push(RegionRequest::new(
                    server.path(),
                    downsample,
                    x,
                    y,
                    w,
                    h,
                    z,
                    t,
                ));
            }
        }

        existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingImageServer;

    #[test]
    fn covers_clip_with_tile_aligned_requests() {
        let server = CountingImageServer::new("s", 1000, 1000, 256, vec![1.0, 4.0]);
        let grid = TileGrid;
        let clip = ClipShape::new(0.0, 0.0, 600.0, 600.0);
        let tiles = grid.tiles_covering(&server, clip, 1.0, 0, 0, Vec::new());

        // 1000 / 256 = ceil(3.9..) = 4 columns total; clip 600px covers
        // columns 0..ceil(600/256)=3.
        assert!(tiles.iter().all(|t| t.downsample == 1.0 && t.z == 0 && t.t == 0));
        assert_eq!(tiles.len(), 3 * 3);
    }

    #[test]
    fn clamps_to_server_bounds() {
        let server = CountingImageServer::new("s", 300, 300, 256, vec![1.0]);
        let grid = TileGrid;
        let clip = ClipShape::new(0.0, 0.0, 1000.0, 1000.0);
        let tiles = grid.tiles_covering(&server, clip, 1.0, 0, 0, Vec::new());
        // 300px wide at 256px tiles = 2 columns (0..256, 256..300)
        assert_eq!(tiles.len(), 4);
    }

    #[test]
    fn invalid_downsample_yields_nothing() {
        let server = CountingImageServer::new("s", 300, 300, 256, vec![1.0]);
        let grid = TileGrid;
        let clip = ClipShape::new(0.0, 0.0, 100.0, 100.0);
        assert!(grid
            .tiles_covering(&server, clip, 0.0, 0, 0, Vec::new())
            .is_empty());
        assert!(grid
            .tiles_covering(&server, clip, f64::NAN, 0, 0, Vec::new())
            .is_empty());
    }
}
