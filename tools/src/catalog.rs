//! Built-in Tool Catalog
//!
//! Wires the default tool set into a registry: data summarization,
//! demo-mode email, the read-only database query, and the CRM pair
//! sharing one directory.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use runbook_core::registry::ToolRegistry;

use crate::crm::{CreateCrmContactTool, CrmDirectory, LookupCrmContactTool};
use crate::data::SummarizeDataTool;
use crate::database::QueryDatabaseTool;
use crate::email::SendEmailTool;

/// Registry holding every built-in tool, backed by demo data.
pub fn default_registry() -> Result<ToolRegistry> {
    let directory = Arc::new(CrmDirectory::with_demo_data());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SummarizeDataTool));
    registry.register(Arc::new(SendEmailTool::from_env()));
    registry.register(Arc::new(QueryDatabaseTool::demo()?));
    registry.register(Arc::new(CreateCrmContactTool::new(Arc::clone(&directory))));
    registry.register(Arc::new(LookupCrmContactTool::new(directory)));

    info!("Registered {} built-in tools", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_core::registry::ToolCategory;

    #[test]
    fn test_default_registry_contents() {
        let registry = default_registry().unwrap();
        let ids: Vec<String> = registry
            .specs()
            .into_iter()
            .map(|spec| spec.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "create_crm_contact",
                "lookup_crm_contact",
                "query_database",
                "send_email",
                "summarize_data",
            ]
        );
    }

    #[test]
    fn test_capability_flags() {
        let registry = default_registry().unwrap();
        let specs = registry.specs();

        let email = specs.iter().find(|spec| spec.id == "send_email").unwrap();
        assert!(email.requires_auth);
        assert!(!email.reversible);

        let create = specs
            .iter()
            .find(|spec| spec.id == "create_crm_contact")
            .unwrap();
        assert!(create.reversible);
        assert!(!create.requires_auth);

        let crm = registry.specs_in_category(ToolCategory::Crm);
        assert_eq!(crm.len(), 2);
    }
}
