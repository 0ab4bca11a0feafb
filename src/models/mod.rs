mod attendance;
mod course;
mod session;
mod user;

pub use attendance::*;
pub use course::*;
pub use session::*;
pub use user::*;
