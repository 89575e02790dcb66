//! CPU replica of the forward lighting shader, used to pin down the pass
//! composition rules:
//! - Single-pass mode sums every light in one evaluation.
//! - Multi-pass mode adds one light per pass, ambient and emissive only on
//!   the first, and the additive blend must reproduce the single-pass result.
//!
//! Conventions: right-handed world space, lights shine along their direction
//! vector, kind ordinals are point = 0, spot = 1, directional = 2.

use glam::{Mat4, Vec3, Vec4};

use probelight::render::shadow_atlas::{assign_tiles, spot_view_proj, TILE_TABLE};
use probelight::render::FrameLight;
use probelight::scene::LightKind;

const KIND_POINT: f32 = 0.0;
const KIND_SPOT: f32 = 1.0;
const KIND_DIRECTIONAL: f32 = 2.0;

/// Mirror of the packed light uniform, shadow fields omitted.
#[derive(Clone, Copy)]
struct Light {
    position_falloff: Vec4,
    color_intensity: Vec4,
    direction_kind: Vec4,
    cone: [f32; 2],
}

impl Light {
    fn point(position: Vec3, falloff: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            position_falloff: position.extend(falloff),
            color_intensity: color.extend(intensity),
            direction_kind: Vec3::NEG_Y.extend(KIND_POINT),
            cone: [0.0, 0.0],
        }
    }

    fn spot(position: Vec3, direction: Vec3, cone_angle: f32, exponent: f32) -> Self {
        Self {
            position_falloff: position.extend(20.0),
            color_intensity: Vec3::ONE.extend(1.0),
            direction_kind: direction.normalize().extend(KIND_SPOT),
            cone: [cone_angle.cos(), exponent],
        }
    }

    fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position_falloff: Vec4::ZERO,
            color_intensity: color.extend(intensity),
            direction_kind: direction.normalize().extend(KIND_DIRECTIONAL),
            cone: [0.0, 0.0],
        }
    }
}

#[derive(Clone, Copy)]
struct Surface {
    world_pos: Vec3,
    normal: Vec3,
    albedo: Vec3,
    metallic: f32,
    roughness: f32,
}

fn shade_light(light: Light, surface: Surface, camera: Vec3) -> Vec3 {
    let kind = light.direction_kind.w;
    let n = surface.normal.normalize();
    let v = (camera - surface.world_pos).normalize();

    let l;
    let mut attenuation = 1.0f32;
    if kind == KIND_DIRECTIONAL {
        l = -light.direction_kind.truncate().normalize();
    } else {
        let to_light = light.position_falloff.truncate() - surface.world_pos;
        let dist = to_light.length();
        l = to_light / dist.max(1e-4);
        let falloff = light.position_falloff.w.max(1e-4);
        let a = (1.0 - dist / falloff).clamp(0.0, 1.0);
        attenuation = a * a;

        if kind == KIND_SPOT {
            let cone_cos = (-l).dot(light.direction_kind.truncate().normalize());
            if cone_cos < light.cone[0] {
                return Vec3::ZERO;
            }
            attenuation *= cone_cos.max(0.0).powf(light.cone[1]);
        }
    }

    let n_dot_l = n.dot(l).max(0.0);
    if n_dot_l <= 0.0 || attenuation <= 0.0 {
        return Vec3::ZERO;
    }

    let h = (l + v).normalize();
    let shininess = 256.0 + (4.0 - 256.0) * surface.roughness;
    let spec_strength =
        (0.04 + (1.0 - 0.04) * surface.metallic) * (1.0 - surface.roughness);
    let specular = n.dot(h).max(0.0).powf(shininess) * spec_strength;

    let radiance = light.color_intensity.truncate() * light.color_intensity.w;
    (surface.albedo * n_dot_l + Vec3::splat(specular)) * radiance * attenuation
}

fn shade_single_pass(lights: &[Light], surface: Surface, camera: Vec3, ambient: Vec3) -> Vec3 {
    let mut color = surface.albedo * ambient;
    for light in lights {
        color += shade_light(*light, surface, camera);
    }
    color
}

/// One additive framebuffer pass per light, ambient only on the first.
fn shade_multi_pass(lights: &[Light], surface: Surface, camera: Vec3, ambient: Vec3) -> Vec3 {
    let mut framebuffer = Vec3::ZERO;
    for (index, light) in lights.iter().enumerate() {
        let mut pass = shade_light(*light, surface, camera);
        if index == 0 {
            pass += surface.albedo * ambient;
        }
        framebuffer += pass;
    }
    framebuffer
}

fn test_surface() -> Surface {
    Surface {
        world_pos: Vec3::ZERO,
        normal: Vec3::Y,
        albedo: Vec3::new(0.8, 0.6, 0.4),
        metallic: 0.2,
        roughness: 0.5,
    }
}

const CAMERA: Vec3 = Vec3::new(0.0, 3.0, 5.0);
const AMBIENT: Vec3 = Vec3::splat(0.1);

#[test]
fn multi_pass_accumulation_matches_single_pass() {
    let lights = [
        Light::point(Vec3::new(2.0, 4.0, 1.0), 20.0, Vec3::ONE, 2.0),
        Light::directional(Vec3::new(-0.3, -1.0, -0.2), Vec3::new(1.0, 0.9, 0.8), 1.5),
        Light::spot(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, 0.6, 8.0),
        Light::point(Vec3::new(-3.0, 2.0, 2.0), 10.0, Vec3::new(0.2, 0.4, 1.0), 3.0),
    ];
    let surface = test_surface();

    let single = shade_single_pass(&lights, surface, CAMERA, AMBIENT);
    let multi = shade_multi_pass(&lights, surface, CAMERA, AMBIENT);
    assert!(
        single.abs_diff_eq(multi, 1e-5),
        "single {single:?} != multi {multi:?}"
    );
}

#[test]
fn no_lights_leaves_only_ambient() {
    let surface = test_surface();
    let single = shade_single_pass(&[], surface, CAMERA, AMBIENT);
    assert!(single.abs_diff_eq(surface.albedo * AMBIENT, 1e-6));
}

#[test]
fn point_falloff_is_squared_and_reaches_zero() {
    let surface = test_surface();
    let near = Light::point(Vec3::new(0.0, 1.0, 0.0), 10.0, Vec3::ONE, 1.0);
    let mid = Light::point(Vec3::new(0.0, 5.0, 0.0), 10.0, Vec3::ONE, 1.0);
    let beyond = Light::point(Vec3::new(0.0, 15.0, 0.0), 10.0, Vec3::ONE, 1.0);

    let near_c = shade_light(near, surface, CAMERA);
    let mid_c = shade_light(mid, surface, CAMERA);
    let beyond_c = shade_light(beyond, surface, CAMERA);

    assert!(near_c.x > mid_c.x);
    // (1 - 5/10)^2 = 0.25 of the full-strength attenuation.
    assert!(mid_c.x > 0.0);
    assert_eq!(beyond_c, Vec3::ZERO);
}

#[test]
fn spot_cone_cuts_off_hard_at_the_edge() {
    let surface = test_surface();
    let spot = Light::spot(Vec3::new(0.0, 4.0, 0.0), Vec3::NEG_Y, 0.4, 8.0);

    // Directly under the light: inside the cone.
    assert!(shade_light(spot, surface, CAMERA).x > 0.0);

    // Same light aimed away misses the surface point entirely.
    let averted = Light::spot(Vec3::new(0.0, 4.0, 0.0), Vec3::X, 0.4, 8.0);
    assert_eq!(shade_light(averted, surface, CAMERA), Vec3::ZERO);
}

#[test]
fn directional_lights_ignore_distance() {
    let surface = test_surface();
    let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0);

    let near = shade_light(light, surface, CAMERA);
    let far_surface = Surface {
        world_pos: Vec3::new(500.0, 0.0, 500.0),
        ..surface
    };
    let far = shade_light(light, far_surface, Vec3::new(500.0, 3.0, 505.0));
    assert!(near.abs_diff_eq(far, 1e-5));
}

#[test]
fn backfacing_surfaces_receive_nothing() {
    let mut surface = test_surface();
    surface.normal = Vec3::NEG_Y;
    let light = Light::point(Vec3::new(0.0, 5.0, 0.0), 20.0, Vec3::ONE, 1.0);
    assert_eq!(shade_light(light, surface, CAMERA), Vec3::ZERO);
}

#[test]
fn rough_metal_reflects_less_specular_than_polished() {
    let light = Light::directional(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0);
    let polished = Surface {
        metallic: 1.0,
        roughness: 0.04,
        albedo: Vec3::ZERO,
        ..test_surface()
    };
    let rough = Surface {
        roughness: 0.9,
        ..polished
    };
    // Camera placed near the mirror direction of the light.
    let camera = Vec3::new(0.0, 3.0, 3.0);
    let sharp = shade_light(light, polished, camera);
    let dull = shade_light(light, rough, camera);
    assert!(sharp.x > dull.x);
}

// Shadow lookup: world position -> light clip -> tile UV -> atlas UV, using
// the rect the atlas actually assigned.

fn atlas_uv(view_proj: Mat4, uv_rect: [f32; 4], world_pos: Vec3) -> Option<[f32; 2]> {
    let clip = view_proj * world_pos.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !(0.0..=1.0).contains(&ndc.z) {
        return None;
    }
    let tile_u = ndc.x * 0.5 + 0.5;
    let tile_v = ndc.y * -0.5 + 0.5;
    Some([
        uv_rect[0] + tile_u * uv_rect[2],
        uv_rect[1] + tile_v * uv_rect[3],
    ])
}

fn spot_caster(position: Vec3, direction: Vec3) -> FrameLight {
    FrameLight {
        entity_index: 0,
        kind: LightKind::Spot,
        position,
        direction: direction.normalize(),
        color: Vec3::ONE,
        intensity: 1.0,
        max_distance: 50.0,
        cone_angle: 0.7,
        cone_exponent: 8.0,
        area_size: 100.0,
        cast_shadow: true,
        shadow_bias: 0.001,
    }
}

#[test]
fn shadow_lookup_lands_inside_the_assigned_tile() {
    let lights = [
        spot_caster(Vec3::new(0.0, 8.0, 0.0), Vec3::NEG_Y),
        spot_caster(Vec3::new(5.0, 8.0, 5.0), Vec3::NEG_Y),
    ];
    let (slots, dropped) = assign_tiles(&lights, 4096);
    assert_eq!(dropped, 0);
    assert_eq!(slots.len(), 2);

    for slot in &slots {
        let light = &lights[slot.light_index];
        // A point straight down the beam must land inside this light's tile.
        let sample = light.position + light.direction * 4.0;
        let uv = atlas_uv(slot.view_proj, slot.uv_rect, sample)
            .expect("beam center projects into the shadow camera");
        let rect = TILE_TABLE[slot.tile];
        assert!(uv[0] >= rect.x && uv[0] <= rect.x + rect.size, "{uv:?}");
        assert!(uv[1] >= rect.y && uv[1] <= rect.y + rect.size, "{uv:?}");
    }
}

#[test]
fn points_behind_the_shadow_camera_are_rejected() {
    let light = spot_caster(Vec3::new(0.0, 8.0, 0.0), Vec3::NEG_Y);
    let vp = spot_view_proj(&light);
    assert!(atlas_uv(vp, [0.0, 0.0, 0.5, 0.5], Vec3::new(0.0, 20.0, 0.0)).is_none());
}

// Reinhard tone map replica.

fn reinhard(hdr: Vec3, scale: f32, average_lum: f32, lum_white2: f32) -> Vec3 {
    let lum = hdr.dot(Vec3::new(0.2126, 0.7152, 0.0722));
    if lum <= 0.0 {
        return Vec3::ZERO;
    }
    let scaled = scale / average_lum * lum;
    let mapped = scaled * (1.0 + scaled / lum_white2) / (1.0 + scaled);
    hdr * (mapped / lum)
}

#[test]
fn tonemap_black_stays_black_and_white_point_maps_to_one() {
    assert_eq!(reinhard(Vec3::ZERO, 1.0, 1.0, 4.0), Vec3::ZERO);

    // Luminance equal to the white point maps exactly to 1.
    let lum_white2 = 4.0f32;
    let white = Vec3::splat(lum_white2.sqrt());
    let mapped = reinhard(white, 1.0, 1.0, lum_white2);
    let lum = mapped.dot(Vec3::new(0.2126, 0.7152, 0.0722));
    assert!((lum - 1.0).abs() < 1e-5, "white point mapped to {lum}");
}

#[test]
fn tonemap_is_monotonic_in_luminance() {
    let mut previous = -1.0f32;
    for step in 0..50 {
        let hdr = Vec3::splat(0.1 + step as f32 * 0.2);
        let mapped = reinhard(hdr, 1.0, 1.0, 4.0);
        assert!(mapped.x > previous);
        previous = mapped.x;
    }
}
