//! MongoDB persistence.

mod mongo;
mod record;
mod store;

pub use mongo::Database;
pub use record::Record;
pub use store::{MongoStore, TOKEN_FIELD};
