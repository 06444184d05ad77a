mod builder;
mod clause;
mod dialect;
mod state;
mod value;

pub use builder::*;
pub use clause::*;
pub use dialect::*;
pub use state::*;
pub use value::*;
