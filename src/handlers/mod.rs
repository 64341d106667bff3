// Handler modules
pub mod synthesize;

pub use synthesize::{SynthesizeArgs, handle_synthesize};
