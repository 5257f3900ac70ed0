pub mod evaluation;
pub mod profile;
pub mod notification;
pub mod offer;

pub use evaluation::*;
pub use profile::*;
pub use notification::*;
pub use offer::*;
