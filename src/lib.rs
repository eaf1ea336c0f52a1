//! GPU image rotation: device selection, kernel compilation and a
//! compute dispatch that rotates a TGA image around its centre.

pub mod logger;

pub mod cli;
pub mod error;
pub mod gpu;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod rotate;

pub use error::{DeviceFault, RotateError};
pub use pipeline::Pipeline;
pub use raster::Image;
