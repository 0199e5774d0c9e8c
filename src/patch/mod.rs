//! In-place patching of the worker configuration document.
//!
//! Fields are addressed with [`FieldPath`] expressions and rewritten by
//! [`ConfigPatcher`], which replaces only the bytes of the targeted scalar.

mod path;
mod patcher;

pub use path::{FieldPath, Segment};
pub use patcher::{parse_scalar, ConfigPatcher, EditOperation, PatchOutcome};
