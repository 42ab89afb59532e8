//! Articulation: turning joint values into per-assembly transforms.
//!
//! Each assembly's local transform is
//! `T(key) · Rz · Ry · Rx · T(-key) · T(offset)`; a child's world transform
//! is its parent's world transform followed by its own. Values outside the
//! declared limits are rejected, never clamped.

use std::collections::HashMap;

use rtserver_math::{Point3, Transform, Vec3};
use serde::{Deserialize, Serialize};

use crate::assembly::{Assembly, AssemblySet, TranslationLimit};
use crate::error::{Result, ServerError};

/// A coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis.
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
}

impl Axis {
    /// All three axes.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Array index of the axis.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    fn rotate_key(self) -> &'static str {
        ["xrotate", "yrotate", "zrotate"][self.index()]
    }

    fn translate_key(self) -> &'static str {
        ["xtranslate", "ytranslate", "ztranslate"][self.index()]
    }
}

/// Requested joint values for one assembly. Unset axes take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointValues {
    /// Rotation angles in degrees.
    pub rotate: [Option<f64>; 3],
    /// Translation offsets.
    pub translate: [Option<f64>; 3],
}

/// Joint values keyed by assembly name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticulationParams {
    joints: HashMap<String, JointValues>,
}

impl ArticulationParams {
    /// No values: every joint at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a rotation angle in degrees.
    pub fn rotate(mut self, assembly: &str, axis: Axis, degrees: f64) -> Self {
        self.joints.entry(assembly.to_string()).or_default().rotate[axis.index()] = Some(degrees);
        self
    }

    /// Set a translation offset.
    pub fn translate(mut self, assembly: &str, axis: Axis, offset: f64) -> Self {
        self.joints.entry(assembly.to_string()).or_default().translate[axis.index()] = Some(offset);
        self
    }

    /// Values given for an assembly.
    pub fn get(&self, assembly: &str) -> Option<&JointValues> {
        self.joints.get(assembly)
    }

    /// Whether no values are set.
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

/// An assembly with its composed world transform.
#[derive(Debug, Clone)]
pub struct ResolvedAssembly {
    /// Assembly name.
    pub name: String,
    /// Database objects to instance.
    pub members: Vec<String>,
    /// World transform.
    pub transform: Transform,
    /// Whether this is the top assembly.
    pub is_top: bool,
}

fn out_of_range(asm: &Assembly, param: &'static str, value: f64, min: f64, max: f64) -> ServerError {
    ServerError::OutOfRangeParam {
        assembly: asm.name.clone(),
        param,
        value,
        min,
        max,
    }
}

fn local_transform(asm: &Assembly, values: Option<&JointValues>) -> Result<Transform> {
    let mut angles = [0.0; 3];
    let mut offset = Vec3::zeros();

    for axis in Axis::ALL {
        let i = axis.index();
        let requested = values.and_then(|v| v.rotate[i]);
        angles[i] = match (asm.rotate[i], requested) {
            (Some(limit), Some(deg)) => {
                if !deg.is_finite() || deg < limit.min || deg > limit.max {
                    return Err(out_of_range(asm, axis.rotate_key(), deg, limit.min, limit.max));
                }
                deg
            }
            (Some(limit), None) => limit.initial,
            (None, Some(deg)) if deg != 0.0 => {
                return Err(out_of_range(asm, axis.rotate_key(), deg, 0.0, 0.0));
            }
            (None, _) => 0.0,
        };

        let requested = values.and_then(|v| v.translate[i]);
        offset[i] = match (asm.translate[i], requested) {
            (TranslationLimit::Range { min, max }, Some(d)) if !d.is_finite() || d < min || d > max => {
                return Err(out_of_range(asm, axis.translate_key(), d, min, max));
            }
            (TranslationLimit::Unlimited, Some(d)) if !d.is_finite() => {
                let (min, max) = (f64::NEG_INFINITY, f64::INFINITY);
                return Err(out_of_range(asm, axis.translate_key(), d, min, max));
            }
            (_, Some(d)) => d,
            (limit, None) => limit.default_offset(),
        };
    }

    if angles == [0.0; 3] && offset == Vec3::zeros() {
        return Ok(Transform::Identity);
    }
    let key = asm.key_point.unwrap_or_else(Point3::origin).coords;
    let [x, y, z] = angles.map(f64::to_radians);
    Ok(Transform::translation_vec(&key)
        .then(&Transform::rotation_z(z))
        .then(&Transform::rotation_y(y))
        .then(&Transform::rotation_x(x))
        .then(&Transform::translation_vec(&-key))
        .then(&Transform::translation_vec(&offset)))
}

/// Compose world transforms for every assembly.
///
/// Fails with `UnknownAssembly` if `params` names an undeclared assembly and
/// with `OutOfRangeParam` if any value lies outside its limits. Output keeps
/// declaration order.
pub fn resolve(set: &AssemblySet, params: &ArticulationParams) -> Result<Vec<ResolvedAssembly>> {
    if let Some(name) = params.joints.keys().find(|n| set.get(n).is_none()) {
        return Err(ServerError::UnknownAssembly(name.clone()));
    }

    let locals = set
        .iter()
        .map(|asm| local_transform(asm, params.get(&asm.name)))
        .collect::<Result<Vec<_>>>()?;

    let mut world: Vec<Option<Transform>> = vec![None; set.len()];
    for idx in 0..set.len() {
        compose(set, &locals, &mut world, idx);
    }

    Ok(set
        .iter()
        .zip(world)
        .map(|(asm, xform)| ResolvedAssembly {
            name: asm.name.clone(),
            members: asm.members.clone(),
            transform: xform.unwrap_or_default(),
            is_top: asm.is_top(),
        })
        .collect())
}

fn compose(
    set: &AssemblySet,
    locals: &[Transform],
    world: &mut [Option<Transform>],
    idx: usize,
) -> Transform {
    if let Some(t) = &world[idx] {
        return t.clone();
    }
    let t = match set.parent_of(idx) {
        Some(p) => compose(set, locals, world, p).then(&locals[idx]),
        None => locals[idx].clone(),
    };
    world[idx] = Some(t.clone());
    t
}
