//! Providers, templates and data sources declared in configuration.
//!
//! Admin screens for these records are outside this service; instead the
//! catalog is upserted by name at startup.

use crate::error::Result;
use crate::model::{NewDataSource, NewProvider, NewTemplate};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub providers: Vec<NewProvider>,
    #[serde(default)]
    pub templates: Vec<NewTemplate>,
    #[serde(default)]
    pub data_sources: Vec<NewDataSource>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.templates.is_empty() && self.data_sources.is_empty()
    }

    /// Upsert every entry, providers first so templates can refer to them.
    pub async fn apply(&self, store: &Store) -> Result<()> {
        for provider in &self.providers {
            store.upsert_provider(provider).await?;
        }

        for template in &self.templates {
            let provider_kind = self
                .providers
                .iter()
                .find(|p| p.name == template.provider)
                .map(|p| p.kind);
            if let Some(kind) = provider_kind.filter(|kind| *kind != template.kind) {
                // Machines from this template will fail at dispatch.
                warn!(
                    template = %template.name,
                    provider = %template.provider,
                    "template kind {} does not match provider kind {}",
                    template.kind,
                    kind
                );
            }
            store.upsert_template(template).await?;
        }

        for source in &self.data_sources {
            store.upsert_data_source(source).await?;
        }

        info!(
            providers = self.providers.len(),
            templates = self.templates.len(),
            data_sources = self.data_sources.len(),
            "catalog applied"
        );
        Ok(())
    }
}
