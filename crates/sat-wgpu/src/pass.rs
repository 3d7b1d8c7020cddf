//! Pass nodes, technique identities, and the technique registry
//!
//! A pass is one GPU unit of work: either a full-screen draw or a compute
//! dispatch, configured with ordered named texture bindings and named
//! scalar/vector parameters. Passes reference buffers by arena index and
//! techniques by identity; binding both to concrete backend resources is the
//! executor's job.

use crate::error::SatError;
use crate::levels::Axis;
use crate::pipeline::BufferId;
use std::fmt;

/// The four shader techniques the pipelines are assembled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TechniqueKind {
    /// One level of the four-way reduction tree (draw)
    UpSweep,
    /// One level of partial-sum redistribution (draw)
    DownSweep,
    /// Tile-local inclusive prefix sum plus tile total (dispatch)
    InBlockScan,
    /// Carry addition from a coarser level into a finer one (dispatch)
    AddSum,
}

impl TechniqueKind {
    /// All technique kinds, in registry order
    pub const ALL: [TechniqueKind; 4] = [TechniqueKind::UpSweep, TechniqueKind::DownSweep, TechniqueKind::InBlockScan, TechniqueKind::AddSum];

    /// Stable name used in labels and error messages
    pub fn name(&self) -> &'static str {
        match self {
            TechniqueKind::UpSweep => "up-sweep",
            TechniqueKind::DownSweep => "down-sweep",
            TechniqueKind::InBlockScan => "in-block-scan",
            TechniqueKind::AddSum => "add-sum",
        }
    }

    fn index(&self) -> usize {
        match self {
            TechniqueKind::UpSweep => 0,
            TechniqueKind::DownSweep => 1,
            TechniqueKind::InBlockScan => 2,
            TechniqueKind::AddSum => 3,
        }
    }
}

/// A technique instantiated for one axis
///
/// Every kind exists once per axis; the X and Y variants of a technique
/// perform the same arithmetic with the roles of the two texture coordinates
/// exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TechniqueId {
    pub kind: TechniqueKind,
    pub axis: Axis,
}

impl TechniqueId {
    pub const fn new(kind: TechniqueKind, axis: Axis) -> Self {
        Self { kind, axis }
    }

    /// Iterates all eight technique identities, in registry order
    pub fn all() -> impl Iterator<Item = TechniqueId> {
        TechniqueKind::ALL.into_iter().flat_map(|kind| [Axis::X, Axis::Y].into_iter().map(move |axis| TechniqueId::new(kind, axis)))
    }

    fn index(&self) -> usize {
        let axis = match self.axis {
            Axis::X => 0,
            Axis::Y => 1,
        };
        self.kind.index() * 2 + axis
    }
}

impl fmt::Display for TechniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.name(), self.axis)
    }
}

/// All eight technique handles, resolved once at startup
///
/// A constructed registry is total: every technique identity maps to a
/// handle, so a missing technique surfaces as [`SatError::TechniqueNotFound`]
/// during resolution and can never be hit at execution time.
#[derive(Debug)]
pub struct TechniqueRegistry<T> {
    handles: Vec<T>,
}

impl<T> TechniqueRegistry<T> {
    /// Resolves every technique identity through `load`
    ///
    /// # Arguments
    /// * `load` - Lookup into a technique library; `None` means the library
    ///   does not provide that technique
    ///
    /// # Returns
    /// The total registry, or the first missing technique identity
    pub fn resolve(mut load: impl FnMut(TechniqueId) -> Option<T>) -> Result<Self, SatError> {
        let mut handles = Vec::with_capacity(8);
        for id in TechniqueId::all() {
            handles.push(load(id).ok_or(SatError::TechniqueNotFound(id))?);
        }
        Ok(Self { handles })
    }

    /// The handle for a technique identity
    pub fn get(&self, id: TechniqueId) -> &T {
        &self.handles[id.index()]
    }
}

/// Execution payload distinguishing the two pass kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Full-screen draw over the first output binding as render target
    Draw,
    /// Compute dispatch over a 2D thread-group grid
    Dispatch {
        /// Thread-group counts along x, y, z
        groups: [u32; 3],
    },
}

/// One named texture binding of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBinding {
    pub name: &'static str,
    pub buffer: BufferId,
}

/// A named scalar or vector parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    Float3([f32; 3]),
}

/// One named parameter of a pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassParam {
    pub name: &'static str,
    pub value: ParamValue,
}

/// One GPU unit of work in a pipeline
///
/// Immutable once appended to a plan; the builders fill in every field and
/// the executors only read them.
#[derive(Debug, Clone, PartialEq)]
pub struct PassNode {
    /// Human-readable name for labels and debugging
    pub label: String,
    /// The technique this pass runs
    pub technique: TechniqueId,
    /// Draw or dispatch payload
    pub kind: PassKind,
    /// Ordered named input bindings
    pub inputs: Vec<PassBinding>,
    /// Ordered named output bindings
    pub outputs: Vec<PassBinding>,
    /// Ordered named parameters
    pub params: Vec<PassParam>,
}

impl PassNode {
    /// Looks up an input binding by name
    pub fn input(&self, name: &str) -> Option<BufferId> {
        self.inputs.iter().find(|binding| binding.name == name).map(|binding| binding.buffer)
    }

    /// Looks up an output binding by name
    pub fn output(&self, name: &str) -> Option<BufferId> {
        self.outputs.iter().find(|binding| binding.name == name).map(|binding| binding.buffer)
    }

    fn param(&self, name: &str) -> Option<ParamValue> {
        self.params.iter().find(|param| param.name == name).map(|param| param.value)
    }

    /// Looks up an integer parameter by name
    pub fn param_int(&self, name: &str) -> Option<i32> {
        match self.param(name) {
            Some(ParamValue::Int(value)) => Some(value),
            _ => None,
        }
    }

    /// Looks up a scalar float parameter by name
    pub fn param_float(&self, name: &str) -> Option<f32> {
        match self.param(name) {
            Some(ParamValue::Float(value)) => Some(value),
            _ => None,
        }
    }

    /// Looks up a three-component vector parameter by name
    pub fn param_float3(&self, name: &str) -> Option<[f32; 3]> {
        match self.param(name) {
            Some(ParamValue::Float3(value)) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A registry resolves all eight identities and preserves the mapping
    #[test]
    fn test_registry_is_total() {
        let registry = TechniqueRegistry::resolve(|id| Some(id.to_string())).unwrap();
        assert_eq!(registry.get(TechniqueId::new(TechniqueKind::UpSweep, Axis::X)), "up-sweep/x");
        assert_eq!(registry.get(TechniqueId::new(TechniqueKind::AddSum, Axis::Y)), "add-sum/y");
        for id in TechniqueId::all() {
            assert_eq!(registry.get(id), &id.to_string());
        }
    }

    /// A missing technique fails resolution with its identity
    #[test]
    fn test_registry_reports_missing_technique() {
        let missing = TechniqueId::new(TechniqueKind::InBlockScan, Axis::Y);
        let result = TechniqueRegistry::resolve(|id| if id == missing { None } else { Some(()) });
        match result {
            Err(SatError::TechniqueNotFound(id)) => assert_eq!(id, missing),
            other => panic!("expected TechniqueNotFound, got {other:?}"),
        }
    }

    /// Parameter lookups are by name and typed
    #[test]
    fn test_param_lookup() {
        let pass = PassNode {
            label: "probe".to_string(),
            technique: TechniqueId::new(TechniqueKind::UpSweep, Axis::X),
            kind: PassKind::Draw,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: vec![
                PassParam { name: "length", value: ParamValue::Int(8) },
                PassParam { name: "scale", value: ParamValue::Float(1.0) },
                PassParam { name: "addr_offset", value: ParamValue::Float3([0.0625, 0.1875, 0.0]) },
            ],
        };

        assert_eq!(pass.param_int("length"), Some(8));
        assert_eq!(pass.param_float("scale"), Some(1.0));
        assert_eq!(pass.param_float3("addr_offset"), Some([0.0625, 0.1875, 0.0]));
        assert_eq!(pass.param_float("length"), None, "type mismatch must not coerce");
        assert_eq!(pass.param_int("missing"), None);
    }
}
