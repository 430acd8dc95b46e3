//! Node type definitions for the alpha-beta search.

/// Non-PV node: searched with a zero-width window. Whether it is expected
/// to fail high (Cut) or low (All) is carried at runtime alongside.
pub struct NonPV;

/// PV node: part of the principal variation, full-width window.
pub struct PV;

/// The root node of one aspiration iteration.
pub struct Root;

/// Trait for compile-time node type specialization.
pub trait NodeType {
    /// Whether this is a PV node (true for PV and Root nodes).
    const PV_NODE: bool;
    /// Whether this is the root node.
    const ROOT_NODE: bool;
}

impl NodeType for NonPV {
    const PV_NODE: bool = false;
    const ROOT_NODE: bool = false;
}

impl NodeType for PV {
    const PV_NODE: bool = true;
    const ROOT_NODE: bool = false;
}

impl NodeType for Root {
    const PV_NODE: bool = true;
    const ROOT_NODE: bool = true;
}
