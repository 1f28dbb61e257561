pub mod line;

pub use line::{LineChannel, LineConfig};
