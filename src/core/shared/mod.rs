pub mod schema;
pub mod state;
pub mod test_utils;
pub mod utils;

pub use utils::{create_conn, run_migrations, DbPool};
