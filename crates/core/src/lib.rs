//! Domain core for the inpainting service.
//!
//! Pure building blocks with no HTTP or storage-backend knowledge: image
//! fetching and normalisation, difference-based mask synthesis, output
//! naming strategies, and subprocess execution.

pub mod error;
pub mod image_io;
pub mod mask;
pub mod naming;
pub mod scripting;
pub mod types;
