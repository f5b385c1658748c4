pub mod errors;
pub mod id;
pub mod time;

pub use errors::{AdapterError, CommandError};
pub use id::{new_id, new_room_token};
pub use time::now_millis;

pub type Result<T> = std::result::Result<T, errors::CommandError>;
