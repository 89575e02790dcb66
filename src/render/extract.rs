use std::cmp::Reverse;

use glam::{Mat4, Vec3};

use crate::asset::{Assets, Handle, Material, Mesh, Texture};
use crate::math::{Aabb, Frustum};
use crate::scene::{EntityKind, LightKind, Node, Scene};

/// One mesh+material draw produced by the scene walk. Rebuilt from scratch
/// every frame; nothing here survives across frames.
#[derive(Clone, Copy, Debug)]
pub struct RenderCall {
    pub model: Mat4,
    pub mesh: Handle<Mesh>,
    pub material: Handle<Material>,
    /// World-space box: `mesh.local_bounds().transform(model)`.
    pub bounds: Aabb,
    /// Euclidean distance, node origin to camera eye.
    pub distance: f32,
    pub blended: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameLight {
    pub entity_index: usize,
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub max_distance: f32,
    pub cone_angle: f32,
    pub cone_exponent: f32,
    pub area_size: f32,
    pub cast_shadow: bool,
    pub shadow_bias: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameDecal {
    pub model: Mat4,
    pub texture: Handle<Texture>,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameProbe {
    pub entity_index: usize,
    pub position: Vec3,
}

#[derive(Default)]
pub struct FrameLists {
    pub calls: Vec<RenderCall>,
    pub lights: Vec<FrameLight>,
    pub decals: Vec<FrameDecal>,
    pub probes: Vec<FrameProbe>,
    pub culled: u32,
}

pub struct ExtractParams<'a> {
    pub eye: Vec3,
    pub frustum: Option<&'a Frustum>,
    /// Sort calls for submission. Honored by `extract` only, after blend
    /// flags resolve; `extract_with_bounds` has no material access and
    /// cannot partition the list.
    pub order_calls: bool,
    pub sort_lights: bool,
}

pub fn extract(scene: &Scene, assets: &Assets, params: &ExtractParams) -> FrameLists {
    let mut lists = extract_with_bounds(
        scene,
        |mesh| assets.meshes.get(mesh).map(|m| m.local_bounds()),
        params,
    );
    resolve_blend_flags(&mut lists.calls, assets);
    if params.order_calls {
        sort_calls(&mut lists.calls);
    }
    lists
}

/// Walks the scene with an explicit mesh-bounds lookup so the list building
/// logic is testable without a GPU.
pub fn extract_with_bounds(
    scene: &Scene,
    bounds_of: impl Fn(Handle<Mesh>) -> Option<Aabb>,
    params: &ExtractParams,
) -> FrameLists {
    let mut lists = FrameLists::default();

    for (entity_index, entity) in scene.entities.iter().enumerate() {
        if !entity.visible {
            continue;
        }
        match &entity.kind {
            EntityKind::Geometry(root) => {
                walk_node(entity.transform, root, &bounds_of, params, &mut lists);
            }
            EntityKind::Light(light) => lists.lights.push(FrameLight {
                entity_index,
                kind: light.kind,
                position: entity.position(),
                direction: entity.forward(),
                color: light.color,
                intensity: light.intensity,
                max_distance: light.max_distance,
                cone_angle: light.cone_angle,
                cone_exponent: light.cone_exponent,
                area_size: light.area_size,
                cast_shadow: light.cast_shadow,
                shadow_bias: light.shadow_bias,
            }),
            EntityKind::Decal(decal) => lists.decals.push(FrameDecal {
                model: entity.transform,
                texture: decal.texture,
            }),
            EntityKind::ReflectionProbe(_) => lists.probes.push(FrameProbe {
                entity_index,
                position: entity.position(),
            }),
        }
    }

    if params.sort_lights {
        sort_lights(&mut lists.lights);
    }

    lists
}

fn walk_node(
    parent: Mat4,
    node: &Node,
    bounds_of: &impl Fn(Handle<Mesh>) -> Option<Aabb>,
    params: &ExtractParams,
    lists: &mut FrameLists,
) {
    if !node.visible {
        return;
    }
    let world = parent * node.transform;

    if let (Some(mesh), Some(material)) = (node.mesh, node.material) {
        if let Some(local_bounds) = bounds_of(mesh) {
            let bounds = local_bounds.transform(world);
            let visible = params
                .frustum
                .map_or(true, |frustum| frustum.intersects_aabb(&bounds));
            if visible {
                let origin = world.w_axis.truncate();
                lists.calls.push(RenderCall {
                    model: world,
                    mesh,
                    material,
                    bounds,
                    distance: origin.distance(params.eye),
                    // Filled in by the caller once material data is in reach.
                    blended: false,
                });
            } else {
                lists.culled += 1;
            }
        }
    }

    for child in &node.children {
        walk_node(world, child, bounds_of, params, lists);
    }
}

/// Opaque calls strictly before blended ones; opaque near-to-far, blended
/// far-to-near. Total over distance so the ordering is a strict weak order
/// even with equal distances.
pub fn sort_calls(calls: &mut [RenderCall]) {
    calls.sort_by(|a, b| {
        a.blended.cmp(&b.blended).then_with(|| {
            if a.blended {
                b.distance.total_cmp(&a.distance)
            } else {
                a.distance.total_cmp(&b.distance)
            }
        })
    });
}

/// Pinned ordering: shadow-casters first, then descending kind ordinal
/// (directional before spot before point) within each group. Stable, so
/// submission order breaks remaining ties.
pub fn sort_lights(lights: &mut [FrameLight]) {
    lights.sort_by_key(|l| (Reverse(l.cast_shadow), Reverse(l.kind.ordinal())));
}

/// Resolves the blended flag per call from its material. Kept separate from
/// the walk so the walk needs no material access.
pub fn resolve_blend_flags(calls: &mut [RenderCall], assets: &Assets) {
    for call in calls.iter_mut() {
        call.blended = assets
            .materials
            .get(call.material)
            .map_or(false, |m| m.is_blend());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Entity, LightPayload};

    fn call(distance: f32, blended: bool) -> RenderCall {
        RenderCall {
            model: Mat4::IDENTITY,
            mesh: Handle::new(0),
            material: Handle::new(0),
            bounds: Aabb::ZERO,
            distance,
            blended,
        }
    }

    fn light(kind: LightKind, cast_shadow: bool) -> FrameLight {
        FrameLight {
            entity_index: 0,
            kind,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            intensity: 1.0,
            max_distance: 10.0,
            cone_angle: 0.5,
            cone_exponent: 8.0,
            area_size: 100.0,
            cast_shadow,
            shadow_bias: 0.001,
        }
    }

    #[test]
    fn opaque_sorts_before_blended() {
        let mut calls = vec![call(1.0, true), call(5.0, false), call(2.0, true)];
        sort_calls(&mut calls);
        assert!(!calls[0].blended);
        assert!(calls[1].blended && calls[2].blended);
    }

    #[test]
    fn opaque_sorts_near_to_far_blended_far_to_near() {
        let mut calls = vec![
            call(3.0, false),
            call(1.0, false),
            call(2.0, true),
            call(9.0, true),
        ];
        sort_calls(&mut calls);
        assert_eq!(calls[0].distance, 1.0);
        assert_eq!(calls[1].distance, 3.0);
        assert_eq!(calls[2].distance, 9.0);
        assert_eq!(calls[3].distance, 2.0);
    }

    #[test]
    fn ordering_uses_blend_flags_resolved_from_materials() {
        let mut assets = Assets::new();
        let opaque = assets.materials.insert(Material::white());
        let blend = assets
            .materials
            .insert(Material::white().with_alpha_mode(crate::asset::AlphaMode::Blend));

        // Fresh from the walk every call claims opaque; the near blended one
        // must still end up behind the far opaque one after resolution.
        let mut calls = vec![
            RenderCall {
                material: blend,
                ..call(1.0, false)
            },
            RenderCall {
                material: opaque,
                ..call(5.0, false)
            },
        ];
        resolve_blend_flags(&mut calls, &assets);
        sort_calls(&mut calls);

        assert_eq!(calls[0].material, opaque);
        assert!(!calls[0].blended);
        assert_eq!(calls[1].material, blend);
        assert!(calls[1].blended);
    }

    #[test]
    fn equal_distances_do_not_break_ordering() {
        let mut calls = vec![call(1.0, false); 8];
        calls.push(call(1.0, true));
        sort_calls(&mut calls);
        assert!(calls.windows(2).all(|w| !w[0].blended || w[1].blended));
    }

    #[test]
    fn shadow_casters_sort_first_then_descending_kind() {
        let mut lights = vec![
            light(LightKind::Point, false),
            light(LightKind::Spot, true),
            light(LightKind::Directional, false),
            light(LightKind::Directional, true),
        ];
        sort_lights(&mut lights);
        assert_eq!(lights[0].kind, LightKind::Directional);
        assert!(lights[0].cast_shadow);
        assert_eq!(lights[1].kind, LightKind::Spot);
        assert!(lights[1].cast_shadow);
        assert_eq!(lights[2].kind, LightKind::Directional);
        assert!(!lights[2].cast_shadow);
        assert_eq!(lights[3].kind, LightKind::Point);
    }

    #[test]
    fn invisible_entities_and_subtrees_are_skipped() {
        let mut root = Node::empty();
        root.add_child(Node::with_mesh(Handle::new(0), Handle::new(0)));
        let mut hidden = Node::with_mesh(Handle::new(0), Handle::new(0));
        hidden.visible = false;
        hidden.add_child(Node::with_mesh(Handle::new(0), Handle::new(0)));
        root.add_child(hidden);

        let mut scene = Scene::new();
        scene.add(Entity::new("root", EntityKind::Geometry(root)));
        let mut off = Entity::new(
            "off",
            EntityKind::Geometry(Node::with_mesh(Handle::new(0), Handle::new(0))),
        );
        off.visible = false;
        scene.add(off);

        let params = ExtractParams {
            eye: Vec3::ZERO,
            frustum: None,
            order_calls: false,
            sort_lights: false,
        };
        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let lists = extract_with_bounds(&scene, |_| Some(unit), &params);
        // Only the first child draws: the hidden subtree and entity drop out.
        assert_eq!(lists.calls.len(), 1);
    }

    #[test]
    fn transforms_compose_parent_to_child() {
        let mut root = Node::empty().with_transform(Mat4::from_translation(Vec3::X * 2.0));
        root.add_child(
            Node::with_mesh(Handle::new(0), Handle::new(0))
                .with_transform(Mat4::from_translation(Vec3::Y * 3.0)),
        );
        let mut scene = Scene::new();
        scene.add(
            Entity::new("g", EntityKind::Geometry(root))
                .with_transform(Mat4::from_translation(Vec3::Z * 1.0)),
        );

        let params = ExtractParams {
            eye: Vec3::ZERO,
            frustum: None,
            order_calls: false,
            sort_lights: false,
        };
        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let lists = extract_with_bounds(&scene, |_| Some(unit), &params);
        assert_eq!(lists.calls.len(), 1);
        let origin = lists.calls[0].model.w_axis.truncate();
        assert!(origin.abs_diff_eq(Vec3::new(2.0, 3.0, 1.0), 1e-6));
        assert!((lists.calls[0].distance - origin.length()).abs() < 1e-5);
    }

    #[test]
    fn world_bounds_match_transformed_local_bounds() {
        let mut scene = Scene::new();
        scene.add(
            Entity::new(
                "g",
                EntityKind::Geometry(Node::with_mesh(Handle::new(0), Handle::new(0))),
            )
            .with_transform(Mat4::from_scale(Vec3::splat(4.0))),
        );
        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let params = ExtractParams {
            eye: Vec3::ZERO,
            frustum: None,
            order_calls: false,
            sort_lights: false,
        };
        let lists = extract_with_bounds(&scene, |_| Some(unit), &params);
        let expected = unit.transform(lists.calls[0].model);
        assert_eq!(lists.calls[0].bounds, expected);
    }

    #[test]
    fn out_of_frustum_calls_are_counted_not_drawn() {
        let cam = crate::scene::Camera::default();
        let frustum = cam.frustum(1.0);

        let mut scene = Scene::new();
        scene.add(Entity::new(
            "in",
            EntityKind::Geometry(Node::with_mesh(Handle::new(0), Handle::new(0))),
        ));
        scene.add(
            Entity::new(
                "out",
                EntityKind::Geometry(Node::with_mesh(Handle::new(0), Handle::new(0))),
            )
            .with_transform(Mat4::from_translation(cam.eye + Vec3::Z * 100.0)),
        );

        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let params = ExtractParams {
            eye: cam.eye,
            frustum: Some(&frustum),
            order_calls: false,
            sort_lights: false,
        };
        let lists = extract_with_bounds(&scene, |_| Some(unit), &params);
        assert_eq!(lists.calls.len(), 1);
        assert_eq!(lists.culled, 1);
    }

    #[test]
    fn lights_decals_probes_are_collected() {
        let mut scene = Scene::new();
        scene.add(Entity::new(
            "l",
            EntityKind::Light(LightPayload::default()),
        ));
        scene.add(Entity::new(
            "d",
            EntityKind::Decal(crate::scene::DecalPayload {
                texture: Handle::new(0),
            }),
        ));
        scene.add(Entity::new(
            "p",
            EntityKind::ReflectionProbe(Default::default()),
        ));

        let params = ExtractParams {
            eye: Vec3::ZERO,
            frustum: None,
            order_calls: false,
            sort_lights: false,
        };
        let lists = extract_with_bounds(&scene, |_| None, &params);
        assert_eq!(lists.lights.len(), 1);
        assert_eq!(lists.decals.len(), 1);
        assert_eq!(lists.probes.len(), 1);
        assert_eq!(lists.probes[0].entity_index, 2);
    }
}
