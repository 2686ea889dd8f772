//! Schema management commands

use kestrel_core::Result;
use kestrel_executor::{Command, CommandContext};
use kestrel_storage::{StoreError, SCHEMA_VERSION};
use tracing::info;

use super::config::SchemaStrategy;

/// When a schema command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaPhase {
    Build,
    Close,
}

/// Apply a [`SchemaStrategy`] at build or close; returns the schema version
/// left in place
#[derive(Debug, Clone, Copy)]
pub(crate) struct SchemaOperation {
    pub strategy: SchemaStrategy,
    pub phase: SchemaPhase,
}

impl Command for SchemaOperation {
    type Output = Option<String>;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Option<String>> {
        let store = ctx.store();
        match (self.phase, self.strategy) {
            (SchemaPhase::Build, SchemaStrategy::Validate) => match store.schema_version() {
                None => return Err(StoreError::SchemaMissing.into()),
                Some(found) if found != SCHEMA_VERSION => {
                    return Err(StoreError::SchemaVersionMismatch {
                        found,
                        expected: SCHEMA_VERSION.to_string(),
                    }
                    .into())
                }
                Some(_) => {}
            },
            (SchemaPhase::Build, SchemaStrategy::Update | SchemaStrategy::CreateDrop) => {
                store.create_schema(SCHEMA_VERSION)?;
            }
            (SchemaPhase::Build, SchemaStrategy::DropCreate) => {
                store.drop_schema()?;
                store.create_schema(SCHEMA_VERSION)?;
                info!(target: "kestrel::schema", version = SCHEMA_VERSION, "Schema recreated");
            }
            (SchemaPhase::Close, SchemaStrategy::CreateDrop) => {
                store.drop_schema()?;
                info!(target: "kestrel::schema", "Schema dropped");
            }
            (SchemaPhase::Close, _) => {}
        }
        Ok(store.schema_version())
    }
}
