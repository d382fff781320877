use crate::stored_object;

stored_object!(Owner, "owners", {
    name: String,
    custom_domain: Option<String>,
    default_chunk_limit: i64,
    forced_model: Option<String>
});

impl Owner {
    pub fn new(slug: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: slug,
            created_at: now,
            updated_at: now,
            name,
            custom_domain: None,
            default_chunk_limit: 50,
            forced_model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_owner_defaults_chunk_limit_to_system_default() {
        let owner = Owner::new("acme".to_string(), "Acme Corp".to_string());
        assert_eq!(owner.default_chunk_limit, 50);
        assert!(owner.forced_model.is_none());
        assert!(owner.custom_domain.is_none());
    }
}
