mod bitmap256;
mod error;
mod fatal;

pub use bitmap256::{Bitmap256, DoubleBitmap256};
pub use error::{err, Error, Result};
pub use fatal::{Fatal, ShutdownSignal};
