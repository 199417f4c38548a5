//! # Output recovery
//!
//! Extracts a JSON object from a model completion that may carry fences,
//! preamble, trailing prose or small syntax errors, without calling the
//! model again.
//!
//! | Step | Function |
//! |------|----------|
//! | Locate the outer object | [`normalize`] |
//! | Fix delimiters | [`repair_json`] |
//! | Parse, with balanced-brace fallback | [`recover_json`] |

pub mod error;
pub mod extract;
pub mod json;
pub mod repair;

pub use error::ParseError;
pub use extract::{normalize, strip_code_fences, NormalizeOptions, Normalized, PREAMBLE_PHRASES};
pub use json::{longest_balanced_object, recover_json, Recovered, RecoveryTrace};
pub use repair::repair_json;
