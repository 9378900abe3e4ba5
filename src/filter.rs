// filter.rs — Filter definitions, the built-in registry, and CPU references.
//
// A filter is data, not code: kernel source text, the entry point to
// resolve, how many arguments the kernel declares, and what range its
// output is promised to lie in. The dispatch lifecycle is written once in
// gpu::dispatch and driven by whichever `FilterDef` it is handed.
//
// Built-in kernels live in src/shaders/*.wgsl and are embedded with
// `include_str!`, so they are immutable `&'static str`s resolved at compile
// time. There is nothing global to synchronise.
//
// Every built-in also carries a CPU reference: a plain elementwise loop over
// the same `(data, width, height)` shape. It is the fallback when no device
// is available and the ground truth the GPU output is checked against.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::DispatchError;
use crate::image::{ImageViewMut, CHANNELS};

/// Arguments every kernel takes, in order: buffer, width, height.
pub const KERNEL_ARITY: usize = 3;

/// Host-side implementation of a filter over interleaved RGBA data.
pub type CpuFilter = fn(data: &mut [f32], width: usize, height: usize);

// ---------------------------------------------------------------------------
// OutputClamp
// ---------------------------------------------------------------------------

/// Range guarantee a filter makes about its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClamp {
    /// R, G and B end up in `[0, 1]`. Alpha is not touched.
    UnitColor,
    /// No guarantee.
    Unclamped,
}

impl OutputClamp {
    /// Enforce the guarantee on host data.
    pub fn apply(self, data: &mut [f32]) {
        if self == OutputClamp::UnitColor {
            for px in data.chunks_exact_mut(CHANNELS) {
                for c in &mut px[..3] {
                    *c = c.clamp(0.0, 1.0);
                }
            }
        }
    }

    /// Whether `data` satisfies the guarantee.
    pub fn holds_for(self, data: &[f32]) -> bool {
        match self {
            OutputClamp::UnitColor => data
                .chunks_exact(CHANNELS)
                .all(|px| px[..3].iter().all(|c| (0.0..=1.0).contains(c))),
            OutputClamp::Unclamped => true,
        }
    }
}

// ---------------------------------------------------------------------------
// FilterDef
// ---------------------------------------------------------------------------

/// Everything the engine needs to run one filter.
#[derive(Clone)]
pub struct FilterDef {
    pub name: Cow<'static, str>,
    /// WGSL source.
    pub source: Cow<'static, str>,
    /// Compute entry point inside `source`.
    pub entry: Cow<'static, str>,
    /// Number of arguments the kernel declares. Must be [`KERNEL_ARITY`].
    pub arity: usize,
    pub clamp: OutputClamp,
    pub cpu: Option<CpuFilter>,
}

impl FilterDef {
    /// A filter with the standard three-argument signature, no range
    /// guarantee and no CPU reference.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        source: impl Into<Cow<'static, str>>,
        entry: impl Into<Cow<'static, str>>,
    ) -> Self {
        FilterDef {
            name: name.into(),
            source: source.into(),
            entry: entry.into(),
            arity: KERNEL_ARITY,
            clamp: OutputClamp::Unclamped,
            cpu: None,
        }
    }

    pub fn with_clamp(mut self, clamp: OutputClamp) -> Self {
        self.clamp = clamp;
        self
    }

    pub fn with_cpu(mut self, cpu: CpuFilter) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    /// Run the CPU reference on `image`, then enforce the clamp policy.
    ///
    /// Returns `false` (leaving the image untouched) when the filter has no
    /// CPU implementation.
    pub fn apply_cpu(&self, image: &mut ImageViewMut<'_>) -> bool {
        let Some(cpu) = self.cpu else {
            return false;
        };
        let (w, h) = (image.width(), image.height());
        let data = image.as_mut_slice();
        cpu(data, w, h);
        self.clamp.apply(data);
        true
    }
}

impl fmt::Debug for FilterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDef")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("arity", &self.arity)
            .field("clamp", &self.clamp)
            .field("source_len", &self.source.len())
            .field("has_cpu", &self.cpu.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

pub const SEPIA_WGSL: &str = include_str!("shaders/sepia.wgsl");
pub const NEGATIVE_WGSL: &str = include_str!("shaders/negative.wgsl");
pub const GRAYSCALE_WGSL: &str = include_str!("shaders/grayscale.wgsl");
pub const HALVE_WGSL: &str = include_str!("shaders/halve.wgsl");

/// Rows are output channels (R', G', B'), columns input channels (R, G, B).
pub const SEPIA_MATRIX: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Luminosity weights for R, G, B.
pub const LUMINOSITY: [f32; 3] = [0.21, 0.72, 0.07];

pub fn sepia() -> FilterDef {
    FilterDef::new("sepia", SEPIA_WGSL, "sepia")
        .with_clamp(OutputClamp::UnitColor)
        .with_cpu(sepia_cpu)
}

pub fn negative() -> FilterDef {
    FilterDef::new("negative", NEGATIVE_WGSL, "negative")
        .with_clamp(OutputClamp::UnitColor)
        .with_cpu(negative_cpu)
}

pub fn grayscale() -> FilterDef {
    FilterDef::new("grayscale", GRAYSCALE_WGSL, "grayscale")
        .with_clamp(OutputClamp::UnitColor)
        .with_cpu(grayscale_cpu)
}

pub fn halve() -> FilterDef {
    FilterDef::new("halve", HALVE_WGSL, "halve").with_cpu(halve_cpu)
}

// ---------------------------------------------------------------------------
// CPU references
// ---------------------------------------------------------------------------
// Same arithmetic, same order of operations as the WGSL, so GPU and CPU
// agree to within f32 rounding.

pub fn sepia_cpu(data: &mut [f32], width: usize, height: usize) {
    debug_assert_eq!(data.len(), width * height * CHANNELS);
    let m = SEPIA_MATRIX;
    for px in data.chunks_exact_mut(CHANNELS) {
        let (r, g, b) = (px[0], px[1], px[2]);
        px[0] = (m[0][0] * r + m[0][1] * g + m[0][2] * b).clamp(0.0, 1.0);
        px[1] = (m[1][0] * r + m[1][1] * g + m[1][2] * b).clamp(0.0, 1.0);
        px[2] = (m[2][0] * r + m[2][1] * g + m[2][2] * b).clamp(0.0, 1.0);
    }
}

pub fn negative_cpu(data: &mut [f32], width: usize, height: usize) {
    debug_assert_eq!(data.len(), width * height * CHANNELS);
    for px in data.chunks_exact_mut(CHANNELS) {
        for c in &mut px[..3] {
            *c = (1.0 - *c).clamp(0.0, 1.0);
        }
    }
}

pub fn grayscale_cpu(data: &mut [f32], width: usize, height: usize) {
    debug_assert_eq!(data.len(), width * height * CHANNELS);
    let [wr, wg, wb] = LUMINOSITY;
    for px in data.chunks_exact_mut(CHANNELS) {
        let l = (wr * px[0] + wg * px[1] + wb * px[2]).clamp(0.0, 1.0);
        px[..3].fill(l);
    }
}

pub fn halve_cpu(data: &mut [f32], width: usize, height: usize) {
    debug_assert_eq!(data.len(), width * height * CHANNELS);
    for v in data.iter_mut() {
        *v *= 0.5;
    }
}

// ---------------------------------------------------------------------------
// FilterRegistry
// ---------------------------------------------------------------------------

/// Filter id → definition.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<String, FilterDef>,
}

impl FilterRegistry {
    pub fn empty() -> Self {
        FilterRegistry { filters: BTreeMap::new() }
    }

    /// Registry holding `sepia`, `negative`, `grayscale` and `halve`.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        for def in [sepia(), negative(), grayscale(), halve()] {
            reg.register(def);
        }
        reg
    }

    /// Add or replace a filter, returning the one it replaced.
    pub fn register(&mut self, def: FilterDef) -> Option<FilterDef> {
        self.filters.insert(def.name.to_string(), def)
    }

    pub fn get(&self, name: &str) -> Result<&FilterDef, DispatchError> {
        self.filters
            .get(name)
            .ok_or_else(|| DispatchError::UnknownFilter(name.to_string()))
    }

    /// Registered ids in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
