pub mod schema;
pub mod store;

use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_pool<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    {
        let conn = pool.get()?;
        schema::apply_pragmas(&conn)?;
        schema::apply_schema(&conn)?;
    }
    Ok(pool)
}
