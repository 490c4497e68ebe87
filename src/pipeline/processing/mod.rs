// Pipeline processing: normalization and rule-driven validation

pub mod normalize;
pub mod validation;
