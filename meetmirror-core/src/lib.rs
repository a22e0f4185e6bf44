pub mod feedback;
pub mod transcript;
pub mod types;

// Keep the public surface small and intentional.
pub use feedback::*;
pub use transcript::*;
pub use types::*;
