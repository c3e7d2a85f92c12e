pub mod auth;
pub mod caption;
pub mod file;
pub mod generation;
pub mod upload;

pub use auth::*;
pub use caption::*;
pub use file::*;
pub use generation::*;
pub use upload::*;
