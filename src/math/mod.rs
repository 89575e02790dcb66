mod aabb;
mod frustum;
mod sh;

pub use aabb::Aabb;
pub use frustum::Frustum;
pub(crate) use sh::face_direction;
pub use sh::{CubeFaceImage, Sh9};
