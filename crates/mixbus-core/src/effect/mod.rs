//! Effect system - trait, parameter metadata and per-source chains
//!
//! Effects run on the render thread, in place, on the stereo scratch buffer
//! of one source after decode and before the buffer is summed into the mix.
//! Parameters are normalized (0.0-1.0) and mapped to an actual range through
//! [`ParamInfo`].

pub mod native;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use basedrop::{Owned, Shared};

use crate::types::StereoBuffer;

/// Information about an effect parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    /// Default value (normalized 0.0-1.0)
    pub default: f32,
    /// Actual value at normalized 0.0
    pub min: f32,
    /// Actual value at normalized 1.0
    pub max: f32,
    /// Unit label (e.g. "dB", "%")
    pub unit: String,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            default: 0.5,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Current value of a parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamValue {
    /// Normalized value (0.0-1.0)
    pub normalized: f32,
    /// Value after range mapping
    pub actual: f32,
}

impl ParamValue {
    /// Clamp `normalized` to 0.0-1.0 and map it through `info`'s range
    pub fn from_normalized(normalized: f32, info: &ParamInfo) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        let actual = info.min + normalized * (info.max - info.min);
        Self { normalized, actual }
    }
}

/// Information about an effect
#[derive(Debug, Clone)]
pub struct EffectInfo {
    pub name: String,
    /// Category (e.g. "Distortion", "Utility")
    pub category: String,
    pub params: Vec<ParamInfo>,
}

impl EffectInfo {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// An in-place stereo processor
///
/// `process` runs on the render thread and must not allocate, block or log.
pub trait Effect: Send {
    /// Process the buffer in place
    fn process(&mut self, buffer: &mut StereoBuffer);

    /// Name, category and parameter layout
    fn info(&self) -> &EffectInfo;

    fn get_params(&self) -> &[ParamValue];

    /// Set a parameter by index (normalized 0.0-1.0)
    fn set_param(&mut self, index: usize, value: f32);

    fn set_bypass(&mut self, bypass: bool);

    fn is_bypassed(&self) -> bool;

    /// Clear any internal state
    fn reset(&mut self);
}

/// Shared bypass and parameter storage for effect implementations
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    params: Vec<ParamValue>,
    bypassed: bool,
}

impl EffectBase {
    pub fn new(info: EffectInfo) -> Self {
        let params = info
            .params
            .iter()
            .map(|p| ParamValue::from_normalized(p.default, p))
            .collect();
        Self {
            info,
            params,
            bypassed: false,
        }
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn get_params(&self) -> &[ParamValue] {
        &self.params
    }

    /// Out-of-range indices are ignored
    pub fn set_param(&mut self, index: usize, value: f32) {
        if let (Some(slot), Some(info)) = (self.params.get_mut(index), self.info.params.get(index)) {
            *slot = ParamValue::from_normalized(value, info);
        }
    }

    pub fn param_actual(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.actual).unwrap_or(0.0)
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }
}

/// Identity of an effect instance inside a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Effect held by the render thread; dropped on the collector thread
pub type OwnedEffect = Owned<Box<dyn Effect>>;

/// Parameters beyond this index cannot be changed through [`EffectControls`]
pub const MAX_CONTROLLED_PARAMS: usize = 63;

const BYPASS_DIRTY: u64 = 1 << 63;

/// Lock-free parameter and bypass mailbox for one effect in a chain
///
/// The control thread writes values and marks them dirty; the render thread
/// applies whatever is dirty right before the effect runs. Only the latest
/// value of each parameter survives, so any number of updates made while
/// the output is paused costs nothing.
#[derive(Debug)]
pub struct EffectControls {
    /// Normalized values as `f32` bits
    params: Vec<AtomicU32>,
    bypass: AtomicBool,
    /// Bit `i` = param `i` changed, top bit = bypass changed
    dirty: AtomicU64,
}

impl EffectControls {
    pub fn new(param_count: usize) -> Self {
        let params = (0..param_count.min(MAX_CONTROLLED_PARAMS))
            .map(|_| AtomicU32::new(0))
            .collect();
        Self {
            params,
            bypass: AtomicBool::new(false),
            dirty: AtomicU64::new(0),
        }
    }

    /// Controls sized for `effect`'s parameter list
    pub fn for_effect(effect: &dyn Effect) -> Self {
        Self::new(effect.info().param_count())
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Queue a normalized value; `false` when `index` is out of range
    pub fn set_param(&self, index: usize, value: f32) -> bool {
        let Some(slot) = self.params.get(index) else {
            return false;
        };
        slot.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.dirty.fetch_or(1 << index, Ordering::Release);
        true
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
        self.dirty.fetch_or(BYPASS_DIRTY, Ordering::Release);
    }

    /// Whether anything is waiting to be applied
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire) != 0
    }

    /// Apply pending changes to `effect` (render thread)
    pub fn apply(&self, effect: &mut dyn Effect) {
        let mut dirty = self.dirty.swap(0, Ordering::Acquire);
        if dirty == 0 {
            return;
        }
        if dirty & BYPASS_DIRTY != 0 {
            effect.set_bypass(self.bypass.load(Ordering::Relaxed));
            dirty &= !BYPASS_DIRTY;
        }
        while dirty != 0 {
            let index = dirty.trailing_zeros() as usize;
            let value = f32::from_bits(self.params[index].load(Ordering::Relaxed));
            effect.set_param(index, value);
            dirty &= dirty - 1;
        }
    }
}

/// Controls shared by the control and render threads
pub type SharedControls = Shared<EffectControls>;

/// Ordered, bypassable chain of effects for one source
///
/// Capacity is fixed at construction so that adding an effect on the render
/// thread never reallocates.
pub struct EffectChain {
    effects: Vec<ChainEntry>,
    capacity: usize,
}

struct ChainEntry {
    id: EffectId,
    effect: OwnedEffect,
    controls: SharedControls,
}

impl EffectChain {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            effects: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.effects.len() >= self.capacity
    }

    /// Append an effect with its controls; hands the effect back when full
    pub fn push(
        &mut self,
        id: EffectId,
        effect: OwnedEffect,
        controls: SharedControls,
    ) -> Result<(), OwnedEffect> {
        if self.is_full() {
            return Err(effect);
        }
        self.effects.push(ChainEntry {
            id,
            effect,
            controls,
        });
        Ok(())
    }

    /// Detach an effect, preserving the order of the rest
    pub fn remove(&mut self, id: EffectId) -> Option<OwnedEffect> {
        let index = self.effects.iter().position(|entry| entry.id == id)?;
        Some(self.effects.remove(index).effect)
    }

    pub fn get(&self, id: EffectId) -> Option<&dyn Effect> {
        self.effects
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &**entry.effect as &dyn Effect)
    }

    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut (dyn Effect + 'static)> {
        self.effects
            .iter_mut()
            .find(|entry| entry.id == id)
            .map(|entry| &mut **entry.effect)
    }

    /// Apply pending control changes, then run every non-bypassed effect in
    /// registration order
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        for entry in self.effects.iter_mut() {
            entry.controls.apply(&mut **entry.effect);
            if !entry.effect.is_bypassed() {
                entry.effect.process(buffer);
            }
        }
    }

    pub fn reset(&mut self) {
        for entry in self.effects.iter_mut() {
            entry.effect.reset();
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = EffectId> + '_ {
        self.effects.iter().map(|entry| entry.id)
    }
}
