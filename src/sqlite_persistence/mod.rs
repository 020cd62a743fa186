mod versioned_schema;

pub use versioned_schema::{
    create_in_memory, open_versioned, Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
};
