mod camera;
mod entity;
mod node;

pub use camera::Camera;
pub use entity::{
    DecalPayload, Entity, EntityKind, LightKind, LightPayload, ReflectionProbePayload, Scene,
};
pub use node::Node;
