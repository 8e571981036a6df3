pub mod builtin;
pub mod errors;
pub mod metadata;
pub mod traits;
