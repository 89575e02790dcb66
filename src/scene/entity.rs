use glam::{Mat4, Vec3};

use crate::asset::{Handle, Texture};
use crate::scene::Node;

/// Kind ordinal matching the packed light uniform: `Point = 0`, `Spot = 1`,
/// `Directional = 2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LightKind {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

impl LightKind {
    pub fn ordinal(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Debug)]
pub struct LightPayload {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// Falloff radius for point/spot lights, shadow far plane for all kinds.
    pub max_distance: f32,
    /// Half-angle of the spot cone, radians.
    pub cone_angle: f32,
    pub cone_exponent: f32,
    /// Ortho half-coverage of a directional shadow camera, world units.
    pub area_size: f32,
    pub cast_shadow: bool,
    pub shadow_bias: f32,
}

impl Default for LightPayload {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            max_distance: 100.0,
            cone_angle: 45f32.to_radians(),
            cone_exponent: 8.0,
            area_size: 1000.0,
            cast_shadow: false,
            shadow_bias: 0.001,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DecalPayload {
    pub texture: Handle<Texture>,
}

#[derive(Clone, Debug, Default)]
pub struct ReflectionProbePayload;

#[derive(Clone, Debug)]
pub enum EntityKind {
    Geometry(Node),
    Light(LightPayload),
    ReflectionProbe(ReflectionProbePayload),
    Decal(DecalPayload),
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub name: String,
    pub transform: Mat4,
    pub visible: bool,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            visible: true,
            kind,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    /// Forward axis of the entity frame (-Z rotated by the model matrix).
    /// Lights shine along this.
    pub fn forward(&self) -> Vec3 {
        self.transform
            .transform_vector3(Vec3::NEG_Z)
            .normalize_or_zero()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub entities: Vec<Entity>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn forward_follows_rotation() {
        let entity = Entity::new("light", EntityKind::Light(LightPayload::default()))
            .with_transform(Mat4::from_quat(Quat::from_rotation_y(
                std::f32::consts::FRAC_PI_2,
            )));
        // Quarter turn around Y sends -Z to -X.
        assert!(entity.forward().abs_diff_eq(Vec3::NEG_X, 1e-6));
    }

    #[test]
    fn position_is_translation_column() {
        let entity = Entity::new("probe", EntityKind::ReflectionProbe(Default::default()))
            .with_transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(entity.position(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn light_kind_ordinals_are_stable() {
        assert_eq!(LightKind::Point.ordinal(), 0);
        assert_eq!(LightKind::Spot.ordinal(), 1);
        assert_eq!(LightKind::Directional.ordinal(), 2);
    }
}
