pub mod segmenter;
pub mod traits;

pub use segmenter::*;
pub use traits::*;
