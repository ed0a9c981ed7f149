mod init;
mod records;

pub use init::execute_init;
pub use records::{
    execute_columns, execute_delete, execute_dump, execute_get, execute_hydrate, execute_set,
    open_cache,
};
