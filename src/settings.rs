use glam::Vec3;
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Forward,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightMode {
    /// All lights in one draw, capped at the packed-uniform capacity.
    SinglePass,
    /// One additive draw per light.
    MultiPass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_pipeline")]
    pub pipeline: PipelineMode,
    #[serde(default = "RenderSettings::default_light_mode")]
    pub light_mode: LightMode,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "RenderSettings::default_shadow_atlas_size")]
    pub shadow_atlas_size: u32,
    #[serde(default = "RenderSettings::default_ambient")]
    pub ambient: [f32; 3],
    #[serde(default = "RenderSettings::default_true")]
    pub order_calls: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub ssao: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub ssao_blur: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub irradiance: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub reflections: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub tonemap: bool,
    #[serde(default)]
    pub volumetric: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub decals: bool,
    /// Deferred lighting with proxy spheres instead of full-screen passes.
    #[serde(default)]
    pub light_volumes: bool,
    #[serde(default)]
    pub show_gbuffers: bool,
    #[serde(default)]
    pub show_atlas: bool,
    #[serde(default)]
    pub tonemap_params: TonemapParams,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            pipeline: Self::default_pipeline(),
            light_mode: Self::default_light_mode(),
            resolution: Resolution::default(),
            shadow_atlas_size: Self::default_shadow_atlas_size(),
            ambient: Self::default_ambient(),
            order_calls: true,
            ssao: true,
            ssao_blur: true,
            irradiance: true,
            reflections: true,
            tonemap: true,
            volumetric: false,
            decals: true,
            light_volumes: false,
            show_gbuffers: false,
            show_atlas: false,
            tonemap_params: TonemapParams::default(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.shadow_atlas_size == 0 || !self.shadow_atlas_size.is_power_of_two() {
            warn!(
                "Shadow atlas size {} must be a nonzero power of two. Using default value.",
                self.shadow_atlas_size
            );
            self.shadow_atlas_size = Self::default_shadow_atlas_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if self.tonemap_params.scale <= 0.0
            || self.tonemap_params.average_lum <= 0.0
            || self.tonemap_params.lum_white2 <= 0.0
        {
            warn!("Tone mapper parameters must be positive. Using defaults.");
            self.tonemap_params = TonemapParams::default();
        }

        self
    }

    pub fn ambient_color(&self) -> Vec3 {
        Vec3::from(self.ambient)
    }

    const fn default_pipeline() -> PipelineMode {
        PipelineMode::Forward
    }

    const fn default_light_mode() -> LightMode {
        LightMode::SinglePass
    }

    const fn default_shadow_atlas_size() -> u32 {
        4096
    }

    const fn default_ambient() -> [f32; 3] {
        [0.1, 0.1, 0.1]
    }

    const fn default_true() -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Reinhard tone mapper constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TonemapParams {
    pub scale: f32,
    pub average_lum: f32,
    pub lum_white2: f32,
}

impl Default for TonemapParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            average_lum: 1.0,
            lum_white2: 4.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            shadow_atlas_size: 1000,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            tonemap_params: TonemapParams {
                scale: -1.0,
                average_lum: 0.0,
                lum_white2: 0.0,
            },
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();

        assert_eq!(
            validated.shadow_atlas_size,
            RenderSettings::default().shadow_atlas_size
        );
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(
            validated.tonemap_params.scale,
            TonemapParams::default().scale
        );
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            pipeline: PipelineMode::Deferred,
            shadow_atlas_size: 2048,
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.pipeline, PipelineMode::Deferred);
        assert_eq!(validated.shadow_atlas_size, 2048);
        assert_eq!(validated.resolution.width, 1920);
    }

    #[test]
    fn missing_fields_fill_from_defaults() {
        let settings: RenderSettings =
            serde_json::from_str(r#"{ "pipeline": "deferred" }"#).unwrap();
        assert_eq!(settings.pipeline, PipelineMode::Deferred);
        assert_eq!(settings.light_mode, LightMode::SinglePass);
        assert!(settings.order_calls);
        assert_eq!(settings.shadow_atlas_size, 4096);
    }
}
