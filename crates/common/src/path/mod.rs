pub mod method;

pub use method::{join_segments, normalize_method_path, MethodPathError};
