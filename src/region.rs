//! Immutable region-request keys identifying one server-region-resolution-plane pair.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies one tile-aligned (or arbitrary) region of a server at a given
/// resolution, focal plane and time point.
///
/// Two requests are equal iff every field is equal; `downsample` participates
/// in equality/hash via its bit pattern so the type can derive `Eq`/`Hash`
/// without losing precision to a rounding step.
#[derive(Debug, Clone)]
pub struct RegionRequest {
    pub server_path: Arc<str>,
    pub downsample: f64,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub z: i32,
    pub t: u32,
}

impl RegionRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_path: impl Into<Arc<str>>,
        downsample: f64,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        z: i32,
        t: u32,
    ) -> Self {
        Self {
            server_path: server_path.into(),
            downsample,
            x,
            y,
            width,
            height,
            z,
            t,
        }
    }

    /// Whether `self` and `other` address the same server/plane and their
    /// rectangles (in level-0 pixel units) overlap. Does not require equal
    /// `downsample` — a coarse prefetch request and a fine visible request
    /// for the same area overlap even though their resolutions differ.
    pub fn overlaps_request(&self, other: &RegionRequest) -> bool {
        if self.server_path != other.server_path || self.z != other.z || self.t != other.t {
            return false;
        }
        let (ax0, ay0) = (self.x, self.y);
        let (ax1, ay1) = (self.x + self.width as i64, self.y + self.height as i64);
        let (bx0, by0) = (other.x, other.y);
        let (bx1, by1) = (other.x + other.width as i64, other.y + other.height as i64);
        ax0 < bx1 && bx0 < ax1 && ay0 < by1 && by0 < ay1
    }
}

impl PartialEq for RegionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.server_path == other.server_path
            && self.downsample.to_bits() == other.downsample.to_bits()
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.z == other.z
            && self.t == other.t
    }
}

impl Eq for RegionRequest {}

impl Hash for RegionRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_path.hash(state);
        self.downsample.to_bits().hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.width.hash(state);
        self.height.hash(state);
        self.z.hash(state);
        self.t.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(x: i64, y: i64, w: u32, h: u32) -> RegionRequest {
        RegionRequest::new("slideA", 1.0, x, y, w, h, 0, 0)
    }

    #[test]
    fn equal_fields_are_equal() {
        assert_eq!(req(0, 0, 256, 256), req(0, 0, 256, 256));
    }

    #[test]
    fn different_downsample_not_equal() {
        let a = RegionRequest::new("slideA", 1.0, 0, 0, 256, 256, 0, 0);
        let b = RegionRequest::new("slideA", 2.0, 0, 0, 256, 256, 0, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn overlap_ignores_downsample() {
        let fine = RegionRequest::new("slideA", 1.0, 0, 0, 256, 256, 0, 0);
        let coarse = RegionRequest::new("slideA", 4.0, 128, 128, 512, 512, 0, 0);
        assert!(fine.overlaps_request(&coarse));
    }

    #[test]
    fn overlap_requires_same_server_and_plane() {
        let a = req(0, 0, 256, 256);
        let mut b = req(0, 0, 256, 256);
        b.server_path = Arc::from("slideB");
        assert!(!a.overlaps_request(&b));

        let mut c = req(0, 0, 256, 256);
        c.z = 1;
        assert!(!a.overlaps_request(&c));
    }

    #[test]
    fn disjoint_rectangles_do_not_overlap() {
        let a = req(0, 0, 100, 100);
        let b = req(200, 200, 100, 100);
        assert!(!a.overlaps_request(&b));
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = req(0, 0, 100, 100);
        let b = req(100, 0, 100, 100);
        assert!(!a.overlaps_request(&b));
    }

    #[test]
    fn can_be_used_as_hash_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(req(0, 0, 1, 1), "tile");
        assert_eq!(map.get(&req(0, 0, 1, 1)), Some(&"tile"));
    }
}
