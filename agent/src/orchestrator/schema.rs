//! Deployment definition validation

use jsonschema::Validator;
use serde_json::Value;
use tracing::info;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;

const BUILTIN_CREATE_SCHEMA: &str = include_str!("../../schemas/create_deployment_schema.json");
const BUILTIN_UPDATE_SCHEMA: &str = include_str!("../../schemas/update_deployment_schema.json");

fn compile(schema: &Value, name: &str) -> Result<Validator, AgentError> {
    jsonschema::validator_for(schema)
        .map_err(|e| AgentError::ConfigError(format!("Invalid {} schema: {}", name, e)))
}

async fn load_schema(file: &File, builtin: &str, name: &str) -> Result<Validator, AgentError> {
    let schema: Value = if file.exists().await {
        info!("Loading {} schema from {}", name, file.path().display());
        file.read_json().await?
    } else {
        info!("Using built-in {} schema", name);
        serde_json::from_str(builtin)?
    };
    compile(&schema, name)
}

fn first_error(validator: &Validator, instance: &Value) -> Option<String> {
    validator.iter_errors(instance).next().map(|e| e.to_string())
}

/// Compiled create and update schemas
pub struct DeploymentSchemas {
    create: Validator,
    update: Validator,
}

impl DeploymentSchemas {
    /// Schemas from the home directory, falling back to the built-in ones
    pub async fn load(layout: &StorageLayout) -> Result<Self, AgentError> {
        Ok(Self {
            create: load_schema(&layout.create_schema_file(), BUILTIN_CREATE_SCHEMA, "create deployment").await?,
            update: load_schema(&layout.update_schema_file(), BUILTIN_UPDATE_SCHEMA, "update deployment").await?,
        })
    }

    pub fn builtin() -> Result<Self, AgentError> {
        Ok(Self {
            create: compile(&serde_json::from_str(BUILTIN_CREATE_SCHEMA)?, "create deployment")?,
            update: compile(&serde_json::from_str(BUILTIN_UPDATE_SCHEMA)?, "update deployment")?,
        })
    }

    pub fn validate_create(&self, definition: &Value) -> Result<(), AgentError> {
        match first_error(&self.create, definition) {
            Some(msg) => Err(AgentError::ValidationError(format!(
                "create deployment validation has failed, {}",
                msg
            ))),
            None => Ok(()),
        }
    }

    pub fn validate_update(&self, definition: &Value) -> Result<(), AgentError> {
        match first_error(&self.update, definition) {
            Some(msg) => Err(AgentError::ValidationError(format!(
                "update deployment validation has failed, {}",
                msg
            ))),
            None => Ok(()),
        }
    }
}
