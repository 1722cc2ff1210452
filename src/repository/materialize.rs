//! Per-resource table materialization.
//!
//! Table and column names come from user-controlled input (the URL and the
//! CSV header), and DDL cannot take bound parameters, so every identifier
//! goes through `quote_ident`. Values always go through bound parameters.

use std::collections::BTreeMap;

use rusqlite::params_from_iter;

use super::{Db, Result};
use crate::analysis::{CellValue, ColumnType};

/// Identifiers that would collide with engine-reserved column names. A CSV
/// header matching one of these (case-insensitively) is renamed by suffixing
/// `__hydra_renamed`.
const RESERVED_COLUMN_NAMES: &[&str] = &[
    "xmin", "xmax", "cmin", "cmax", "ctid", "tableoid", "oid", "__id",
];

/// Double-quote an identifier, doubling any embedded quotes. The result is
/// safe to splice into DDL: SQL metacharacters land inside the quoted name.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column name as it appears in the materialized table.
pub fn safe_column_name(name: &str) -> String {
    if RESERVED_COLUMN_NAMES.contains(&name.to_lowercase().as_str()) {
        format!("{name}__hydra_renamed")
    } else {
        name.to_string()
    }
}

/// One column of a table to materialize.
#[derive(Debug, Clone)]
pub struct TableColumn {
    /// Header string, verbatim from the CSV.
    pub name: String,
    pub kind: ColumnType,
}

/// Writes parsed CSV rows into a per-resource table.
#[derive(Debug, Clone)]
pub struct TableMaterializer {
    db: Db,
}

impl TableMaterializer {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Drop-and-recreate `table_name` with the given columns and rows, in a
    /// single transaction so readers never observe a partial table. Rows are
    /// bulk-inserted through a prepared statement; a synthetic `__id` primary
    /// key numbers them from 1.
    pub fn replace_table(
        &self,
        table_name: &str,
        columns: &[TableColumn],
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let quoted_table = quote_ident(table_name);
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {quoted_table}"))?;

        let mut column_defs = vec!["\"__id\" INTEGER PRIMARY KEY".to_string()];
        for column in columns {
            column_defs.push(format!(
                "{} {}",
                quote_ident(&safe_column_name(&column.name)),
                column.kind.sql_type()
            ));
        }
        tx.execute_batch(&format!(
            "CREATE TABLE {quoted_table} ({})",
            column_defs.join(", ")
        ))?;

        {
            let placeholders: Vec<String> =
                (1..=columns.len() + 1).map(|i| format!("?{i}")).collect();
            let column_names: Vec<String> = std::iter::once("\"__id\"".to_string())
                .chain(
                    columns
                        .iter()
                        .map(|c| quote_ident(&safe_column_name(&c.name))),
                )
                .collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {quoted_table} ({}) VALUES ({})",
                column_names.join(", "),
                placeholders.join(", ")
            ))?;
            for (index, row) in rows.iter().enumerate() {
                let id = CellValue::Int(index as i64 + 1);
                stmt.execute(params_from_iter(
                    std::iter::once(&id).chain(row.iter()),
                ))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Create the indexes requested by a resource exception entry. Kinds are
    /// `"unique"` or `"index"`; anything else is ignored.
    pub fn create_exception_indexes(
        &self,
        table_name: &str,
        indexes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        for (column, kind) in indexes {
            let unique = match kind.as_str() {
                "unique" => "UNIQUE ",
                "index" => "",
                other => {
                    tracing::warn!(column, kind = other, "unknown index kind, skipping");
                    continue;
                }
            };
            let index_name = quote_ident(&format!("idx_{table_name}_{column}"));
            conn.execute_batch(&format!(
                "CREATE {unique}INDEX IF NOT EXISTS {index_name} ON {} ({})",
                quote_ident(table_name),
                quote_ident(&safe_column_name(column)),
            ))?;
        }
        Ok(())
    }

    /// Number of rows in a materialized table.
    pub fn count_rows(&self, table_name: &str) -> Result<i64> {
        let conn = self.db.connect()?;
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table_name)),
            [],
            |r| r.get(0),
        )?)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}
