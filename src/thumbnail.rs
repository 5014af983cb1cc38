//! Thumbnail downsample policy (§4.8): the single canonical
//! `RegionRequest` representing "the whole image, small enough to show as a
//! thumbnail" for a given server/z/t.
//!
//! Grounded on the teacher's `level_for_scale` clamp idiom (pick the
//! coarsest level that still keeps every dimension within a target size,
//! never going below native resolution).

use crate::region::RegionRequest;
use crate::server::ImageServer;

/// Builds the thumbnail `RegionRequest` for `server` at `(z, t)`.
///
/// Single-resolution servers always get `downsample = 1`; pyramidal
/// servers get the smallest downsample (i.e. highest useful resolution)
/// that keeps the image within `[min_thumbnail_size, max_thumbnail_size]`
/// on both axes, never below native resolution.
pub fn thumbnail_request<T>(
    server: &dyn ImageServer<T>,
    z: i32,
    t: u32,
    max_thumbnail_size: u32,
    min_thumbnail_size: u32,
) -> RegionRequest {
    let width = server.width();
    let height = server.height();

    let downsample = if server.n_resolutions() > 1 {
        let max_dim = width.max(height) as f64;
        let min_dim = width.min(height) as f64;
        let by_max_dim = max_dim / max_thumbnail_size as f64;
        let by_min_dim = min_dim / min_thumbnail_size as f64;
        by_max_dim.min(by_min_dim).max(1.0)
    } else {
        1.0
    };

    RegionRequest::new(server.path(), downsample, 0, 0, width, height, z, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingImageServer;

    #[test]
    fn single_level_server_uses_native_resolution() {
        let server = CountingImageServer::new("s", 2000, 2000, 256, vec![1.0]);
        let request = thumbnail_request(&server, 0, 0, 1024, 16);
        assert_eq!(request.downsample, 1.0);
        assert_eq!(request.width, 2000);
        assert_eq!(request.height, 2000);
    }

    #[test]
    fn pyramidal_server_downsamples_to_fit_bounds() {
        let server = CountingImageServer::new("s", 10000, 8000, 256, vec![1.0, 4.0, 16.0]);
        let request = thumbnail_request(&server, 0, 0, 1024, 16);
        // by_max = 10000/1024 ~= 9.77, by_min = 8000/16 = 500; min(..) ~= 9.77
        assert!(request.downsample > 1.0);
        assert!((request.downsample - (10000.0_f64 / 1024.0)).abs() < 1e-9);
    }

    #[test]
    fn downsample_never_drops_below_one() {
        let server = CountingImageServer::new("s", 100, 100, 256, vec![1.0, 2.0]);
        let request = thumbnail_request(&server, 0, 0, 1024, 16);
        assert_eq!(request.downsample, 1.0);
    }
}
