mod base;
mod emissions;
mod power;
mod record;

pub use base::*;
pub use emissions::*;
pub use power::*;
pub use record::*;
