//! End-to-end frames on a real adapter. Ignored by default; run with
//! `cargo test -- --ignored` on a machine with a GPU (or a software
//! rasterizer like lavapipe).

use glam::{Mat4, Vec3, Vec4};

use probelight::asset::{Material, Mesh, MeshData};
use probelight::render::IrradianceGrid;
use probelight::scene::{Camera, Entity, EntityKind, LightKind, LightPayload, Node, Scene};
use probelight::settings::{PipelineMode, RenderSettings, Resolution};
use probelight::Renderer;

fn small_settings(pipeline: PipelineMode) -> RenderSettings {
    let _ = env_logger::builder().is_test(true).try_init();
    RenderSettings {
        pipeline,
        resolution: Resolution {
            width: 256,
            height: 256,
        },
        shadow_atlas_size: 1024,
        ..RenderSettings::default()
    }
}

/// Ground plane, a floating cube and one shadow-casting directional light.
fn build_scene(renderer: &mut Renderer) -> Scene {
    let plane = renderer
        .assets
        .meshes
        .insert(Mesh::from_data(renderer.device(), &MeshData::plane(20.0)));
    let cube = renderer
        .assets
        .meshes
        .insert(Mesh::from_data(renderer.device(), &MeshData::cube()));
    let gray = renderer
        .assets
        .materials
        .insert(Material::new(Vec4::new(0.7, 0.7, 0.7, 1.0)));
    let red = renderer
        .assets
        .materials
        .insert(Material::new(Vec4::new(0.8, 0.2, 0.2, 1.0)));

    let mut scene = Scene::new();
    scene.add(Entity::new(
        "ground",
        EntityKind::Geometry(Node::with_mesh(plane, gray)),
    ));
    scene.add(
        Entity::new("cube", EntityKind::Geometry(Node::with_mesh(cube, red)))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 1.5, 0.0))),
    );
    scene.add(
        Entity::new(
            "sun",
            EntityKind::Light(LightPayload {
                kind: LightKind::Directional,
                intensity: 2.0,
                cast_shadow: true,
                area_size: 30.0,
                ..LightPayload::default()
            }),
        )
        .with_transform(
            Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0))
                * Mat4::look_to_rh(Vec3::ZERO, Vec3::new(0.0, -1.0, 0.1), Vec3::Y).inverse(),
        ),
    );
    scene
}

fn overhead_camera() -> Camera {
    Camera {
        eye: Vec3::new(0.0, 8.0, 6.0),
        target: Vec3::ZERO,
        ..Camera::default()
    }
}

fn average_brightness(pixels: &[u8]) -> f64 {
    let sum: u64 = pixels
        .chunks_exact(4)
        .map(|p| p[0] as u64 + p[1] as u64 + p[2] as u64)
        .sum();
    sum as f64 / (pixels.len() / 4 * 3) as f64
}

#[test]
#[ignore]
fn forward_frame_renders_and_reads_back() {
    let mut renderer = Renderer::new(small_settings(PipelineMode::Forward)).unwrap();
    let scene = build_scene(&mut renderer);

    let stats = renderer.render_scene(&scene, &overhead_camera());
    assert_eq!(stats.drawn, 2);
    assert_eq!(stats.lights, 1);
    assert_eq!(stats.lights_dropped, 0);
    assert_eq!(stats.shadow_dropped, 0);

    let pixels = renderer.read_output().unwrap();
    assert_eq!(pixels.len(), 256 * 256 * 4);
    assert!(average_brightness(&pixels) > 1.0, "frame is all black");
}

#[test]
#[ignore]
fn deferred_frame_renders_and_reads_back() {
    let mut renderer = Renderer::new(small_settings(PipelineMode::Deferred)).unwrap();
    let scene = build_scene(&mut renderer);

    let stats = renderer.render_scene(&scene, &overhead_camera());
    assert_eq!(stats.drawn, 2);

    let pixels = renderer.read_output().unwrap();
    assert_eq!(pixels.len(), 256 * 256 * 4);
    assert!(average_brightness(&pixels) > 1.0, "frame is all black");
}

#[test]
#[ignore]
fn shadows_darken_the_frame() {
    let mut renderer = Renderer::new(small_settings(PipelineMode::Forward)).unwrap();
    let mut scene = build_scene(&mut renderer);
    let camera = overhead_camera();

    renderer.render_scene(&scene, &camera);
    let shadowed = average_brightness(&renderer.read_output().unwrap());

    for entity in &mut scene.entities {
        if let EntityKind::Light(light) = &mut entity.kind {
            light.cast_shadow = false;
        }
    }
    renderer.render_scene(&scene, &camera);
    let unshadowed = average_brightness(&renderer.read_output().unwrap());

    assert!(
        shadowed < unshadowed,
        "shadowed {shadowed} should be darker than unshadowed {unshadowed}"
    );
}

#[test]
#[ignore]
fn probe_bakes_then_deferred_frame_still_renders() {
    let mut renderer = Renderer::new(small_settings(PipelineMode::Deferred)).unwrap();
    let mut scene = build_scene(&mut renderer);
    scene.add(
        Entity::new("probe", EntityKind::ReflectionProbe(Default::default()))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0))),
    );
    scene.add(
        Entity::new("probe_far", EntityKind::ReflectionProbe(Default::default()))
            .with_transform(Mat4::from_translation(Vec3::new(6.0, 2.0, -6.0))),
    );

    renderer.update_reflection_probes(&scene);
    renderer
        .calculate_irradiance_probes(
            &scene,
            IrradianceGrid {
                min: Vec3::new(-4.0, 0.5, -4.0),
                max: Vec3::new(4.0, 4.0, 4.0),
                dims: glam::UVec3::new(2, 2, 2),
            },
        )
        .unwrap();

    let stats = renderer.render_scene(&scene, &overhead_camera());
    assert_eq!(stats.drawn, 2);
    let pixels = renderer.read_output().unwrap();
    assert!(average_brightness(&pixels) > 1.0, "frame is all black");
}
