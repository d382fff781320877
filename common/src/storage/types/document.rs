use crate::{error::AppError, stored_object, utils::embedding::EmbeddingType};
use serde_json::Value;

/// Access gate for a document. Evaluated in a fixed order by the access resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Passcode,
    Registered,
    OwnerRestricted,
    OwnerAdminOnly,
}

impl AccessLevel {
    fn requires_owner(self) -> bool {
        matches!(self, AccessLevel::OwnerRestricted | AccessLevel::OwnerAdminOnly)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DownloadLink {
    pub url: String,
    pub title: String,
}

stored_object!(Document, "documents", {
    title: String,
    subtitle: Option<String>,
    owner_id: Option<String>,
    access_level: AccessLevel,
    passcode: Option<String>,
    chunk_limit_override: Option<i64>,
    forced_model: Option<String>,
    embedding_type: EmbeddingType,
    active: bool,
    metadata: Value,
    downloads: Vec<DownloadLink>
});

impl Document {
    /// `slug` is used directly as the record id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slug: String,
        title: String,
        owner_id: Option<String>,
        access_level: AccessLevel,
        embedding_type: EmbeddingType,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let doc = Self {
            id: slug,
            created_at: now,
            updated_at: now,
            title,
            subtitle: None,
            owner_id,
            access_level,
            passcode: None,
            chunk_limit_override: None,
            forced_model: None,
            embedding_type,
            active: true,
            metadata: Value::Null,
            downloads: Vec::new(),
        };
        doc.validate()?;
        Ok(doc)
    }

    /// `owner_restricted` and `owner_admin_only` require a non-null owner.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.access_level.requires_owner() && self.owner_id.is_none() {
            return Err(AppError::Validation(format!(
                "access_level {:?} requires a non-null owner",
                self.access_level
            )));
        }
        if let Some(limit) = self.chunk_limit_override {
            if !(1..=200).contains(&limit) {
                return Err(AppError::Validation(
                    "chunk_limit_override must be within [1, 200]".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn slug(&self) -> &str {
        &self.id
    }
}
