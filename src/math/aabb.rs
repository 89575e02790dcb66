use glam::{Mat4, Vec3};

/// Axis-aligned bounding box in whatever space its owner says it is in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const ZERO: Self = Self {
        min: Vec3::ZERO,
        max: Vec3::ZERO,
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`. Empty input yields `ZERO`.
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(first) = points.first() else {
            return Self::ZERO;
        };
        let mut min = *first;
        let mut max = *first;
        for p in &points[1..] {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// World box of this (local) box under `matrix`: the tight AABB of the
    /// eight transformed corners.
    pub fn transform(&self, matrix: Mat4) -> Self {
        let corners = self.corners();
        let mut min = matrix.transform_point3(corners[0]);
        let mut max = min;
        for corner in &corners[1..] {
            let p = matrix.transform_point3(*corner);
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn from_points_is_tight() {
        let aabb = Aabb::from_points(&[
            Vec3::new(-1.0, 2.0, 0.5),
            Vec3::new(3.0, -2.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
        ]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 2.0, 4.0));
    }

    #[test]
    fn transform_contains_all_transformed_corners() {
        let local = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 3.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(5.0, -1.0, 2.0),
        );
        let world = local.transform(m);
        for corner in local.corners() {
            let p = m.transform_point3(corner);
            assert!(
                world.contains_point(p + Vec3::splat(1e-5))
                    || world.contains_point(p - Vec3::splat(1e-5))
                    || world.contains_point(p),
                "corner {p:?} escaped {world:?}"
            );
        }
    }

    #[test]
    fn identity_transform_is_noop() {
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 3.0, 4.0));
        let same = aabb.transform(Mat4::IDENTITY);
        assert!(same.min.abs_diff_eq(aabb.min, 1e-6));
        assert!(same.max.abs_diff_eq(aabb.max, 1e-6));
    }
}
