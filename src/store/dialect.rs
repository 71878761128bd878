//! Per-database SQL for "the first N rows" queries.
//!
//! The store runs on SQLite, but the row limiting syntax is kept behind
//! this enum so the query text stays portable to the other databases
//! deployments use.

use serde::{Deserialize, Serialize};

//------------ Dialect -------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Db2,
    Mssql,
    Mysql,
    Oracle,
    Postgresql,
    #[default]
    Sqlite,
}

impl Dialect {
    /// Builds a `SELECT` returning at most `rows` rows. `core` is
    /// everything between `SELECT` and `ORDER BY`, ending in its `WHERE`
    /// clause; Oracle needs that because the limit is attached there as
    /// an extra `ROWNUM` condition.
    pub fn fetch_first(self, core: &str, rows: u32, order_by: Option<&str>) -> String {
        let mut sql = match self {
            Dialect::Mssql => format!("SELECT TOP {rows} {core}"),
            Dialect::Oracle => format!("SELECT {core} AND ROWNUM <= {rows}"),
            _ => format!("SELECT {core}"),
        };
        if let Some(order_by) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        match self {
            Dialect::Db2 | Dialect::Postgresql => {
                sql.push_str(&format!(" FETCH FIRST {rows} ROWS ONLY"))
            }
            Dialect::Mysql | Dialect::Sqlite => {
                sql.push_str(&format!(" LIMIT {rows}"))
            }
            Dialect::Mssql | Dialect::Oracle => {}
        }
        sql
    }
}

//============ Tests =========================================================
