pub mod types;
pub mod query;
pub mod item;
pub mod watch;
pub mod settings;

pub use types::*;
pub use query::*;
pub use item::*;
pub use watch::*;
pub use settings::*;
