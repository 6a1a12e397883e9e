use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use despatch_sscc::{
    default_state_path, sequence_block, validate_arp_id, CounterStore, JsonFileBackend, StateBackend,
    StoreAllocator,
};
use serde::Deserialize;

use crate::audit::JsonlAuditFile;
use crate::error::DespatchError;
use crate::fallback::DEFAULT_PLACEHOLDER_PREFIX;
use crate::schema::TableSchema;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DespatchConfig {
    #[serde(default)]
    pub sscc: SsccConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub packing: PackingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub headers: HeaderConfig,
}

// ---------------------------------------------------------------------------
// SSCC
// ---------------------------------------------------------------------------

/// Identifier allocation settings.
///
/// `arp_id` and `year_prefix`, when set, take precedence over the values
/// stored in the counter state file.
#[derive(Debug, Clone, Deserialize)]
pub struct SsccConfig {
    #[serde(default)]
    pub arp_id: Option<String>,
    #[serde(default)]
    pub year_prefix: Option<String>,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for SsccConfig {
    fn default() -> Self {
        Self {
            arp_id: None,
            year_prefix: None,
            state_path: None,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SsccConfig {
    pub fn state_path(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(default_state_path)
    }
}

// ---------------------------------------------------------------------------
// Audit, warehouse, packing, fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file. In-memory only when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Case-insensitive substrings identifying outbound-sale document types.
    #[serde(default = "default_sale_movement_types")]
    pub sale_movement_types: Vec<String>,
}

fn default_sale_movement_types() -> Vec<String> {
    vec!["sale dispatch note".into(), "venta".into()]
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            sale_movement_types: default_sale_movement_types(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackingConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,
}

fn default_placeholder_prefix() -> String {
    DEFAULT_PLACEHOLDER_PREFIX.to_string()
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            placeholder_prefix: default_placeholder_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// Header variants
// ---------------------------------------------------------------------------

/// Extra accepted header spellings per canonical field, appended after the
/// built-in variants.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeaderConfig {
    #[serde(default)]
    pub po: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub mapping: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub warehouse: BTreeMap<String, Vec<String>>,
}

/// The three input schemas with configured variants applied.
#[derive(Debug, Clone)]
pub struct Schemas {
    pub po: TableSchema,
    pub mapping: TableSchema,
    pub warehouse: TableSchema,
}

fn extend_schema(
    mut schema: TableSchema,
    extra: &BTreeMap<String, Vec<String>>,
) -> Result<TableSchema, DespatchError> {
    for (field, variants) in extra {
        if !schema.add_variants(field, variants) {
            return Err(DespatchError::ConfigValidation(format!(
                "headers.{}: unknown field '{field}'",
                schema.table
            )));
        }
    }
    Ok(schema)
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl DespatchConfig {
    pub fn from_toml(input: &str) -> Result<Self, DespatchError> {
        let config: DespatchConfig =
            toml::from_str(input).map_err(|e| DespatchError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DespatchError> {
        if let Some(ref arp_id) = self.sscc.arp_id {
            validate_arp_id(arp_id)
                .map_err(|e| DespatchError::ConfigValidation(format!("sscc.arp_id: {e}")))?;
        }
        if let Some(ref prefix) = self.sscc.year_prefix {
            sequence_block(prefix, 0)
                .map_err(|e| DespatchError::ConfigValidation(format!("sscc.year_prefix: {e}")))?;
        }

        // Empty patterns would drop every warehouse row
        if self.warehouse.sale_movement_types.iter().all(|p| p.trim().is_empty()) {
            return Err(DespatchError::ConfigValidation(
                "warehouse.sale_movement_types must contain at least one pattern".into(),
            ));
        }

        self.schemas()?;
        Ok(())
    }

    pub fn schemas(&self) -> Result<Schemas, DespatchError> {
        Ok(Schemas {
            po: extend_schema(TableSchema::purchase_orders(), &self.headers.po)?,
            mapping: extend_schema(TableSchema::mapping(), &self.headers.mapping)?,
            warehouse: extend_schema(TableSchema::warehouse(), &self.headers.warehouse)?,
        })
    }

    /// Counter store over the configured state file.
    pub fn open_store(&self) -> CounterStore<JsonFileBackend> {
        let backend = JsonFileBackend::new(self.sscc.state_path())
            .with_lock_timeout(Duration::from_millis(self.sscc.lock_timeout_ms));
        CounterStore::new(backend)
    }

    /// Allocator over `store` with the configured prefix overrides.
    pub fn allocator<'s, B: StateBackend>(
        &self,
        store: &'s CounterStore<B>,
    ) -> Result<StoreAllocator<'s, B>, DespatchError> {
        let mut allocator = StoreAllocator::new(store);
        if let Some(ref arp_id) = self.sscc.arp_id {
            allocator = allocator
                .with_arp_id(arp_id.as_str())
                .map_err(|e| DespatchError::ConfigValidation(e.to_string()))?;
        }
        if let Some(ref prefix) = self.sscc.year_prefix {
            allocator = allocator
                .with_year_prefix(prefix.as_str())
                .map_err(|e| DespatchError::ConfigValidation(e.to_string()))?;
        }
        Ok(allocator)
    }

    /// Audit file, when one is configured.
    pub fn open_audit_file(&self) -> Result<Option<JsonlAuditFile>, DespatchError> {
        self.audit.path.as_ref().map(|p| JsonlAuditFile::open(p.clone())).transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
