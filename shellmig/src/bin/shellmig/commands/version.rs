use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Table};
use serde::Serialize;
use shellmig::{AnyDriver, Driver, VersionRecord};

use crate::examples::ExampleGroup;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Inspect",
    commands: &[
        "shellmig --url 'shell-memory:///app' version",
        "shellmig --url \"$SHELLMIG_URL\" --output json version   # Machine-readable",
    ],
}];

#[derive(Args, Debug)]
pub struct VersionArgs {}

/// Current state of one target.
#[derive(Debug, Serialize)]
pub struct VersionReport {
    pub backend: &'static str,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub version: Option<i64>,
    pub dirty: bool,
}

impl VersionReport {
    pub fn new(driver: &AnyDriver, record: VersionRecord) -> Self {
        let config = driver.config();
        Self {
            backend: driver.kind().name(),
            database: config.database_name.clone(),
            schema: config.schema_name.clone(),
            table: config.migrations_table.clone(),
            version: (!record.is_nil()).then_some(record.version),
            dirty: record.dirty,
        }
    }

    fn version_label(&self) -> String {
        self.version.map_or_else(|| "none".to_string(), |v| v.to_string())
    }
}

impl TableDisplay for VersionReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        let rows = [
            ("Backend", self.backend.to_string()),
            ("Database", self.database.clone()),
            ("Schema", self.schema.clone()),
            ("Table", self.table.clone()),
            ("Version", self.version_label()),
            ("Dirty", self.dirty.to_string()),
        ];
        for (key, value) in rows {
            table.add_row(vec![output.key_cell(key), Cell::new(value)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        if self.dirty {
            format!("{} (dirty)", self.version_label())
        } else {
            self.version_label()
        }
    }
}

pub async fn handle_version(url: &str, _args: VersionArgs, output: &OutputManager) -> Result<()> {
    let mut driver = super::connect(url, output).await?;
    let record = driver.version().await;
    let report = record.map(|record| VersionReport::new(&driver, record));
    let report = super::finish(driver, report.map_err(Into::into), output).await?;

    if report.dirty {
        output.warning("target is dirty; fix it manually and then run `shellmig force`");
    }
    output.display(&report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(version: Option<i64>, dirty: bool) -> VersionReport {
        VersionReport {
            backend: "memory",
            database: "app".to_string(),
            schema: "migrate".to_string(),
            table: "schema_migrations".to_string(),
            version,
            dirty,
        }
    }

    #[test]
    fn compact_form_marks_dirty_targets() {
        assert_eq!(report(Some(3), false).to_compact(), "3");
        assert_eq!(report(Some(3), true).to_compact(), "3 (dirty)");
        assert_eq!(report(None, false).to_compact(), "none");
    }

    #[test]
    fn json_uses_null_for_nil_version() {
        let json = serde_json::to_value(report(None, true)).unwrap();
        assert!(json["version"].is_null());
        assert_eq!(json["dirty"], true);
    }
}
