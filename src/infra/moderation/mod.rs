mod sqlite_mod_store;

pub use sqlite_mod_store::SqliteModStore;
