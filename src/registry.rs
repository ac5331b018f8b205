//! Static lookup table of stage shapes, keyed by stage type.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Which contract a stage implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Single entry point.
    Simple,
    /// Entry point wrapping a separately declared body.
    Full,
}

/// Dispatch facts about a stage type, computed once and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageShape {
    /// Type name of the stage.
    pub name: &'static str,
    /// Simple or full.
    pub kind: StageKind,
    /// The entry point returns nothing.
    pub void_invoke: bool,
    /// The body returns nothing (always equal to `void_invoke` for simple stages).
    pub void_body: bool,
    /// The wrapper can accept what the body returns without conversion.
    pub return_compatible: bool,
    /// The body's value can be handed straight back to a typed caller.
    pub fast_path: bool,
}

impl StageShape {
    pub(crate) fn simple<S: 'static, O: 'static>() -> Self {
        let void = is_unit::<O>();
        Self {
            name: type_name::<S>(),
            kind: StageKind::Simple,
            void_invoke: void,
            void_body: void,
            return_compatible: true,
            fast_path: true,
        }
    }

    pub(crate) fn full<S: 'static, B: 'static, O: 'static>() -> Self {
        let void_invoke = is_unit::<O>();
        let void_body = is_unit::<B>();
        let same = TypeId::of::<B>() == TypeId::of::<O>();
        Self {
            name: type_name::<S>(),
            kind: StageKind::Full,
            void_invoke,
            void_body,
            return_compatible: void_invoke || void_body || same,
            fast_path: same,
        }
    }
}

fn is_unit<T: 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<()>()
}

fn table() -> &'static RwLock<HashMap<TypeId, StageShape>> {
    static SHAPES: OnceLock<RwLock<HashMap<TypeId, StageShape>>> = OnceLock::new();
    SHAPES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Look up the shape of `S`, computing and caching it on first use.
pub(crate) fn shape_of<S: 'static>(compute: impl FnOnce() -> StageShape) -> StageShape {
    let key = TypeId::of::<S>();
    if let Some(shape) = table().read().get(&key) {
        return *shape;
    }
    *table().write().entry(key).or_insert_with(compute)
}

/// Cached shape of a stage type, if it has been dispatched at least once.
pub fn registered<S: 'static>() -> Option<StageShape> {
    table().read().get(&TypeId::of::<S>()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RetRet;
    struct VoidRet;
    struct RetVoid;
    struct Mixed;

    #[test]
    fn full_shapes_follow_the_compatibility_rule() {
        let shape = StageShape::full::<RetRet, String, String>();
        assert!(shape.return_compatible && shape.fast_path);

        let shape = StageShape::full::<VoidRet, String, ()>();
        assert!(shape.void_invoke && shape.return_compatible && !shape.fast_path);

        let shape = StageShape::full::<RetVoid, (), String>();
        assert!(shape.void_body && shape.return_compatible && !shape.fast_path);

        let shape = StageShape::full::<Mixed, u32, String>();
        assert!(!shape.return_compatible && !shape.fast_path);
    }

    #[test]
    fn shapes_are_cached_per_type() {
        struct Cached;
        assert!(registered::<Cached>().is_none());
        let first = shape_of::<Cached>(StageShape::simple::<Cached, ()>);
        let second = shape_of::<Cached>(|| panic!("shape recomputed"));
        assert_eq!(first, second);
        assert_eq!(registered::<Cached>(), Some(first));
    }
}
