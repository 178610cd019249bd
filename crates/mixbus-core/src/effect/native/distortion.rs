//! Distortion effect - arctangent waveshaper with dry/wet blend

use std::f32::consts::FRAC_2_PI;

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, ParamValue};
use crate::types::StereoBuffer;

/// Parameter indices for [`Effect::set_param`]
pub const PARAM_DRIVE: usize = 0;
pub const PARAM_RANGE: usize = 1;
pub const PARAM_BLEND: usize = 2;
pub const PARAM_VOLUME: usize = 3;

/// Arctangent soft-clipping distortion
///
/// Parameters:
/// - Drive: input gain into the shaper (0-10, default 1)
/// - Range: second gain stage multiplied with drive (0-10, default 1)
/// - Blend: shaped/clean mix (0 = clean, 1 = fully shaped)
/// - Volume: output gain (0-2, default 1)
///
/// The shaped and clean signals are summed then halved, so a fully blended
/// signal peaks at 0.5 before output gain.
pub struct DistortionEffect {
    base: EffectBase,
}

impl DistortionEffect {
    pub fn new() -> Self {
        let info = EffectInfo::new("Distortion", "Distortion")
            .with_param(ParamInfo::new("Drive", 0.1).with_range(0.0, 10.0).with_unit("×"))
            .with_param(ParamInfo::new("Range", 0.1).with_range(0.0, 10.0).with_unit("×"))
            .with_param(ParamInfo::new("Blend", 1.0).with_unit("%"))
            .with_param(ParamInfo::new("Volume", 0.5).with_range(0.0, 2.0).with_unit("×"));

        Self {
            base: EffectBase::new(info),
        }
    }

    #[inline]
    fn shape(x: f32, gain: f32, blend: f32, volume: f32) -> f32 {
        let shaped = FRAC_2_PI * (x * gain).atan();
        (shaped * blend + x * (1.0 - blend)) * 0.5 * volume
    }
}

impl Default for DistortionEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for DistortionEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if self.base.is_bypassed() {
            return;
        }

        let gain = self.base.param_actual(PARAM_DRIVE) * self.base.param_actual(PARAM_RANGE);
        let blend = self.base.param_actual(PARAM_BLEND);
        let volume = self.base.param_actual(PARAM_VOLUME);

        for sample in buffer.as_interleaved_mut() {
            *sample = Self::shape(*sample, gain, blend, volume);
        }
    }

    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn get_params(&self) -> &[ParamValue] {
        self.base.get_params()
    }

    fn set_param(&mut self, index: usize, value: f32) {
        self.base.set_param(index, value);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base.set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base.is_bypassed()
    }

    fn reset(&mut self) {
        // Stateless
    }
}
