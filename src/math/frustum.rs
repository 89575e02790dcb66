use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use super::Aabb;

/// One clip plane, `normal · p + d >= 0` on the inside.
#[derive(Clone, Copy, Debug)]
struct Plane {
    normal: Vec3,
    d: f32,
}

impl Plane {
    fn from_vec4(v: Vec4) -> Self {
        let normal = v.xyz();
        let len = normal.length().max(1e-8);
        Self {
            normal: normal / len,
            d: v.w / len,
        }
    }
}

/// Camera frustum as six planes extracted from a view-projection matrix
/// (Gribb/Hartmann). Used for conservative box culling: a box overlapping
/// any part of the frustum is accepted, so false positives cost wasted draws
/// but nothing visible is ever dropped.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    pub fn from_view_proj(vp: Mat4) -> Self {
        let rows = [
            vp.row(3) + vp.row(0), // left
            vp.row(3) - vp.row(0), // right
            vp.row(3) + vp.row(1), // bottom
            vp.row(3) - vp.row(1), // top
            vp.row(2),             // near (wgpu depth range [0, 1])
            vp.row(3) - vp.row(2), // far
        ];
        Self {
            planes: rows.map(Plane::from_vec4),
        }
    }

    /// Conservative box-vs-frustum test. Rejects only when the box is fully
    /// outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();
        for plane in &self.planes {
            let radius = half.dot(plane.normal.abs());
            if plane.normal.dot(center) + plane.d < -radius {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_proj(proj * view)
    }

    #[test]
    fn box_at_focus_is_inside() {
        let f = test_frustum();
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert!(f.intersects_aabb(&aabb));
    }

    #[test]
    fn box_behind_camera_is_outside() {
        let f = test_frustum();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, 19.0), Vec3::new(1.0, 1.0, 21.0));
        assert!(!f.intersects_aabb(&aabb));
    }

    #[test]
    fn box_beyond_far_plane_is_outside() {
        let f = test_frustum();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -201.0), Vec3::new(1.0, 1.0, -150.0));
        assert!(!f.intersects_aabb(&aabb));
    }

    #[test]
    fn partially_overlapping_box_is_accepted() {
        let f = test_frustum();
        // Straddles the left plane: must be kept (conservative accept).
        let aabb = Aabb::new(Vec3::new(-50.0, -1.0, -6.0), Vec3::new(0.0, 1.0, -4.0));
        assert!(f.intersects_aabb(&aabb));
    }
}
