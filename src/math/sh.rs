use glam::Vec3;

/// HDR pixels for one cubemap face, row-major, `size * size` entries.
#[derive(Clone, Debug)]
pub struct CubeFaceImage {
    pub size: u32,
    pub pixels: Vec<Vec3>,
}

impl CubeFaceImage {
    pub fn solid(size: u32, color: Vec3) -> Self {
        Self {
            size,
            pixels: vec![color; (size * size) as usize],
        }
    }

    /// Reverses the row order in place. Face captures come out of the camera
    /// with row 0 at screen top, which is the vertical mirror of cube-face
    /// addressing; flipping restores the order `face_direction` assumes.
    pub fn flip_rows(&mut self) {
        let size = self.size as usize;
        for row in 0..size / 2 {
            let (a, b) = (row * size, (size - 1 - row) * size);
            for col in 0..size {
                self.pixels.swap(a + col, b + col);
            }
        }
    }
}

/// 3rd-order spherical harmonics: 9 coefficients per color channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sh9 {
    pub coeffs: [Vec3; 9],
}

// Real SH basis constants up to band 2.
const Y0: f32 = 0.282095;
const Y1: f32 = 0.488603;
const Y2_XY: f32 = 1.092548;
const Y2_Z2: f32 = 0.315392;
const Y2_X2Y2: f32 = 0.546274;

fn basis(dir: Vec3) -> [f32; 9] {
    let Vec3 { x, y, z } = dir;
    [
        Y0,
        Y1 * y,
        Y1 * z,
        Y1 * x,
        Y2_XY * x * y,
        Y2_XY * y * z,
        Y2_Z2 * (3.0 * z * z - 1.0),
        Y2_XY * x * z,
        Y2_X2Y2 * (x * x - y * y),
    ]
}

/// Direction through texel center `(x, y)` of face `face`, +X/-X/+Y/-Y/+Z/-Z
/// cubemap face order and standard cube addressing (v grows toward the
/// bottom edge of each face).
pub(crate) fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
    .normalize()
}

impl Sh9 {
    /// Projects six cubemap faces onto the SH basis with per-texel solid-angle
    /// weighting. The result approximates the radiance integral over the
    /// sphere, so uniform input radiance lands almost entirely in `coeffs[0]`.
    pub fn project_cubemap(faces: &[CubeFaceImage; 6]) -> Self {
        let mut coeffs = [Vec3::ZERO; 9];

        for (face_index, face) in faces.iter().enumerate() {
            let size = face.size.max(1);
            let texel = 2.0 / size as f32;
            for y in 0..size {
                for x in 0..size {
                    let u = (x as f32 + 0.5) * texel - 1.0;
                    let v = (y as f32 + 0.5) * texel - 1.0;
                    // Solid angle of a texel on the unit cube face projected
                    // onto the sphere.
                    let r2 = 1.0 + u * u + v * v;
                    let weight = texel * texel / (r2 * r2.sqrt());

                    let radiance = face.pixels[(y * size + x) as usize];
                    let dir = face_direction(face_index, u, v);
                    for (coeff, b) in coeffs.iter_mut().zip(basis(dir)) {
                        *coeff += radiance * (b * weight);
                    }
                }
            }
        }

        Self { coeffs }
    }

    /// Reconstructed radiance in direction `dir` (unit vector).
    pub fn eval(&self, dir: Vec3) -> Vec3 {
        self.coeffs
            .iter()
            .zip(basis(dir))
            .map(|(c, b)| *c * b)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn uniform_radiance_projects_to_dc_term() {
        let faces: [CubeFaceImage; 6] =
            std::array::from_fn(|_| CubeFaceImage::solid(16, Vec3::splat(2.0)));
        let sh = Sh9::project_cubemap(&faces);

        // DC coefficient of uniform radiance L over the sphere is L * Y0 * 4pi.
        let expected = 2.0 * Y0 * 4.0 * PI;
        assert!(
            (sh.coeffs[0].x - expected).abs() / expected < 0.02,
            "dc = {:?}, expected ~{expected}",
            sh.coeffs[0]
        );
        for coeff in &sh.coeffs[1..] {
            assert!(
                coeff.length() < expected * 0.01,
                "higher band leaked: {coeff:?}"
            );
        }
    }

    #[test]
    fn single_bright_face_reconstructs_directionally() {
        let mut faces: [CubeFaceImage; 6] =
            std::array::from_fn(|_| CubeFaceImage::solid(16, Vec3::ZERO));
        faces[2] = CubeFaceImage::solid(16, Vec3::ONE); // +Y
        let sh = Sh9::project_cubemap(&faces);

        let up = sh.eval(Vec3::Y).x;
        let down = sh.eval(Vec3::NEG_Y).x;
        assert!(up > 0.0);
        assert!(up > down, "up {up} should dominate down {down}");
    }

    #[test]
    fn flip_rows_mirrors_vertically() {
        let mut image = CubeFaceImage::solid(4, Vec3::ZERO);
        for (index, pixel) in image.pixels.iter_mut().enumerate() {
            pixel.x = (index / 4) as f32;
        }
        image.flip_rows();
        for (index, pixel) in image.pixels.iter().enumerate() {
            assert_eq!(pixel.x, (3 - index / 4) as f32);
        }
    }

    #[test]
    fn face_directions_cover_axes() {
        assert!(face_direction(0, 0.0, 0.0).abs_diff_eq(Vec3::X, 1e-6));
        assert!(face_direction(1, 0.0, 0.0).abs_diff_eq(Vec3::NEG_X, 1e-6));
        assert!(face_direction(2, 0.0, 0.0).abs_diff_eq(Vec3::Y, 1e-6));
        assert!(face_direction(3, 0.0, 0.0).abs_diff_eq(Vec3::NEG_Y, 1e-6));
        assert!(face_direction(4, 0.0, 0.0).abs_diff_eq(Vec3::Z, 1e-6));
        assert!(face_direction(5, 0.0, 0.0).abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }
}
