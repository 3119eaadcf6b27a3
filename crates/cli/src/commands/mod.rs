pub mod inspect;
pub mod runs;
pub mod translate;
pub mod util;

pub use inspect::*;
pub use runs::*;
pub use translate::*;
pub use util::*;
