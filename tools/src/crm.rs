//! CRM Tools
//!
//! An in-process contact directory standing in for an external CRM,
//! with a reversible create tool and a lookup tool over it. Contact
//! creation is the one built-in effect rollback can actually undo.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use runbook_core::context::ExecutionContext;
use runbook_core::registry::{ResolvedInputs, Tool, ToolCategory, ToolError};
use runbook_core::run::StepResult;

const DEFAULT_LOOKUP_LIMIT: u64 = 10;

/// One CRM record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmContact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Shared in-memory contact directory
#[derive(Default)]
pub struct CrmDirectory {
    contacts: RwLock<HashMap<String, CrmContact>>,
}

impl CrmDirectory {
    pub fn new() -> Self {
        CrmDirectory::default()
    }

    /// Directory pre-loaded with a couple of demo contacts.
    pub fn with_demo_data() -> Self {
        let mut contacts = HashMap::new();
        for (name, email, company) in [
            ("Avery Chen", "avery@northwind.example", "Northwind Traders"),
            ("Sam Okafor", "sam@contoso.example", "Contoso"),
        ] {
            let contact = CrmContact {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                email: email.to_string(),
                company: Some(company.to_string()),
                created_at: Utc::now(),
            };
            contacts.insert(contact.id.clone(), contact);
        }
        CrmDirectory {
            contacts: RwLock::new(contacts),
        }
    }

    pub async fn insert(&self, contact: CrmContact) {
        self.contacts.write().await.insert(contact.id.clone(), contact);
    }

    pub async fn remove(&self, id: &str) -> Option<CrmContact> {
        self.contacts.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<CrmContact> {
        self.contacts.read().await.get(id).cloned()
    }

    /// Case-insensitive substring match over name, email, and company.
    /// An empty term matches everything. Results are sorted by name.
    pub async fn search(&self, term: &str) -> Vec<CrmContact> {
        let term = term.to_lowercase();
        let contacts = self.contacts.read().await;
        let mut matches: Vec<CrmContact> = contacts
            .values()
            .filter(|contact| {
                term.is_empty()
                    || contact.name.to_lowercase().contains(&term)
                    || contact.email.to_lowercase().contains(&term)
                    || contact
                        .company
                        .as_deref()
                        .is_some_and(|company| company.to_lowercase().contains(&term))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contacts.read().await.is_empty()
    }
}

/// Creates a contact in the directory; reversible
pub struct CreateCrmContactTool {
    directory: Arc<CrmDirectory>,
}

impl CreateCrmContactTool {
    pub fn new(directory: Arc<CrmDirectory>) -> Self {
        CreateCrmContactTool { directory }
    }
}

#[async_trait]
impl Tool for CreateCrmContactTool {
    fn id(&self) -> &str {
        "create_crm_contact"
    }

    fn description(&self) -> &str {
        "Create a contact in the CRM directory"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Crm
    }

    fn reversible(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        let contact = CrmContact {
            id: Uuid::new_v4().to_string(),
            name: inputs.require_str("name")?.to_string(),
            email: inputs.require_str("email")?.to_string(),
            company: inputs.get_str("company").map(str::to_string),
            created_at: Utc::now(),
        };
        self.directory.insert(contact.clone()).await;
        info!("create_crm_contact: created {} ({})", contact.name, contact.id);

        Ok(json!({
            "id": contact.id,
            "name": contact.name,
            "email": contact.email,
            "company": contact.company,
            "created": true,
        }))
    }

    /// Removes the contact recorded in the result. A contact that is
    /// already gone counts as undone.
    async fn undo(&self, result: &StepResult) -> Result<(), ToolError> {
        let id = result
            .data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::Failed("recorded output carries no contact id".to_string())
            })?;
        match self.directory.remove(id).await {
            Some(contact) => info!("create_crm_contact: removed {} ({id})", contact.name),
            None => debug!("create_crm_contact: contact {id} already absent"),
        }
        Ok(())
    }
}

/// Searches the directory
pub struct LookupCrmContactTool {
    directory: Arc<CrmDirectory>,
}

impl LookupCrmContactTool {
    pub fn new(directory: Arc<CrmDirectory>) -> Self {
        LookupCrmContactTool { directory }
    }
}

#[async_trait]
impl Tool for LookupCrmContactTool {
    fn id(&self) -> &str {
        "lookup_crm_contact"
    }

    fn description(&self) -> &str {
        "Search CRM contacts by name, email, or company"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Crm
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        let search = inputs.get_str("search").unwrap_or("");
        let limit = inputs
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LOOKUP_LIMIT) as usize;

        let matches = self.directory.search(search).await;
        let total = matches.len();
        let data: Vec<Value> = matches
            .into_iter()
            .take(limit)
            .map(|contact| {
                json!({
                    "id": contact.id,
                    "name": contact.name,
                    "email": contact.email,
                    "company": contact.company,
                    "created_at": contact.created_at.to_rfc3339(),
                })
            })
            .collect();

        Ok(json!({"status": "success", "data": data, "total": total}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(entries: Vec<(&str, Value)>) -> ResolvedInputs {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    #[tokio::test]
    async fn test_create_inserts_and_reports() {
        let directory = Arc::new(CrmDirectory::new());
        let tool = CreateCrmContactTool::new(Arc::clone(&directory));

        let out = tool
            .invoke(
                &inputs(vec![
                    ("name", json!("Riley Park")),
                    ("email", json!("riley@fabrikam.example")),
                    ("company", json!("Fabrikam")),
                ]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(out["created"], json!(true));
        assert_eq!(out["name"], json!("Riley Park"));
        let id = out["id"].as_str().unwrap();
        let stored = directory.get(id).await.unwrap();
        assert_eq!(stored.email, "riley@fabrikam.example");
        assert_eq!(stored.company.as_deref(), Some("Fabrikam"));
    }

    #[tokio::test]
    async fn test_create_requires_name_and_email() {
        let tool = CreateCrmContactTool::new(Arc::new(CrmDirectory::new()));
        let err = tool
            .invoke(
                &inputs(vec![("email", json!("riley@fabrikam.example"))]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingInput { name } if name == "name"));
    }

    #[tokio::test]
    async fn test_undo_removes_created_contact() {
        let directory = Arc::new(CrmDirectory::new());
        let tool = CreateCrmContactTool::new(Arc::clone(&directory));

        let out = tool
            .invoke(
                &inputs(vec![
                    ("name", json!("Riley Park")),
                    ("email", json!("riley@fabrikam.example")),
                ]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(directory.len().await, 1);

        let result = StepResult::success(0, "create_crm_contact", out);
        tool.undo(&result).await.unwrap();
        assert!(directory.is_empty().await);

        // Second undo finds nothing and still succeeds
        tool.undo(&result).await.unwrap();
    }

    #[tokio::test]
    async fn test_undo_without_recorded_id_fails() {
        let tool = CreateCrmContactTool::new(Arc::new(CrmDirectory::new()));
        let result = StepResult::success(0, "create_crm_contact", json!({"created": true}));
        let err = tool.undo(&result).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(message) if message.contains("no contact id")));
    }

    #[tokio::test]
    async fn test_lookup_matches_and_sorts() {
        let directory = Arc::new(CrmDirectory::with_demo_data());
        let tool = LookupCrmContactTool::new(Arc::clone(&directory));

        let all = tool
            .invoke(&ResolvedInputs::new(), &ExecutionContext::new())
            .await
            .unwrap();
        assert_eq!(all["total"], json!(2));
        assert_eq!(all["data"][0]["name"], json!("Avery Chen"));
        assert_eq!(all["data"][1]["name"], json!("Sam Okafor"));

        let contoso = tool
            .invoke(
                &inputs(vec![("search", json!("contoso"))]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(contoso["total"], json!(1));
        assert_eq!(contoso["data"][0]["email"], json!("sam@contoso.example"));
    }

    #[tokio::test]
    async fn test_lookup_limit_keeps_total() {
        let directory = Arc::new(CrmDirectory::with_demo_data());
        let tool = LookupCrmContactTool::new(directory);

        let out = tool
            .invoke(
                &inputs(vec![("limit", json!(1))]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(out["total"], json!(2));
        assert_eq!(out["data"].as_array().unwrap().len(), 1);
    }
}
