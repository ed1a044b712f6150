pub mod follow;
pub mod unfollow;
pub mod subscriber;
pub mod info;
pub mod popular_digest;

pub use follow::*;
pub use unfollow::*;
pub use subscriber::*;
pub use info::*;
pub use popular_digest::*;
