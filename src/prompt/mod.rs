//! Parameter mapping: node overrides merged onto templates, and the named
//! parameter tables that produce them.
pub mod overrides;
pub mod params;

pub use overrides::{apply, validate, NodeOverrides};
pub use params::{GenerateParams, ParameterTable};
