pub mod order;
pub mod user;

pub use order::Order;
pub use user::{Caste, NewUser, ScoreRecord, User, UserFlags};
