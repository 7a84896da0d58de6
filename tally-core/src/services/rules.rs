//! Category rule service - user-managed categorization rules

use std::sync::Arc;

use chrono::Utc;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{CategoryRule, MatchField, MatchType};
use crate::ports::{CategoryRegistry, RuleRepository};

/// Input for a new rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub category_id: String,
    pub field: MatchField,
    pub match_type: MatchType,
    pub pattern: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update; unset fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub category_id: Option<String>,
    pub field: Option<MatchField>,
    pub match_type: Option<MatchType>,
    pub pattern: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none()
            && self.field.is_none()
            && self.match_type.is_none()
            && self.pattern.is_none()
            && self.priority.is_none()
            && self.is_active.is_none()
    }
}

pub struct CategoryRuleService {
    rules: Arc<dyn RuleRepository>,
    categories: Arc<dyn CategoryRegistry>,
}

impl CategoryRuleService {
    pub fn new(rules: Arc<dyn RuleRepository>, categories: Arc<dyn CategoryRegistry>) -> Self {
        Self { rules, categories }
    }

    pub async fn create(&self, user_id: &str, input: NewRule) -> Result<CategoryRule> {
        self.ensure_category(&input.category_id).await?;
        validate_pattern(input.match_type, &input.pattern)?;

        let mut rule = CategoryRule::new(
            user_id,
            &input.category_id,
            input.field,
            input.match_type,
            &input.pattern,
            input.priority,
        );
        rule.is_active = input.is_active;
        self.rules.insert_rule(&rule).await?;

        tracing::info!(rule_id = %rule.id, category = %rule.category_id, "rule created");
        Ok(rule)
    }

    /// Rules of a user in evaluation order: highest priority first, ties by
    /// id ascending
    pub async fn list(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        let mut rules = self.rules.list_rules(user_id).await?;
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rules)
    }

    pub async fn get(&self, id: Uuid) -> Result<CategoryRule> {
        self.rules
            .get_rule(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Rule not found: {}", id)))
    }

    pub async fn update(&self, id: Uuid, update: RuleUpdate) -> Result<CategoryRule> {
        let mut rule = self.get(id).await?;
        if update.is_empty() {
            return Ok(rule);
        }

        if let Some(category_id) = update.category_id {
            self.ensure_category(&category_id).await?;
            rule.category_id = category_id;
        }
        if let Some(field) = update.field {
            rule.field = field;
        }
        if let Some(match_type) = update.match_type {
            rule.match_type = match_type;
        }
        if let Some(pattern) = update.pattern {
            rule.pattern = pattern;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(is_active) = update.is_active {
            rule.is_active = is_active;
        }
        validate_pattern(rule.match_type, &rule.pattern)?;

        rule.updated_at = Utc::now();
        self.rules.update_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.rules.delete_rule(id).await? {
            return Err(Error::not_found(format!("Rule not found: {}", id)));
        }
        tracing::info!(rule_id = %id, "rule deleted");
        Ok(())
    }

    async fn ensure_category(&self, category_id: &str) -> Result<()> {
        match self.categories.get_category(category_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::CategoryNotFound(category_id.to_string())),
        }
    }
}

fn validate_pattern(match_type: MatchType, pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::validation("Rule pattern cannot be empty"));
    }
    if match_type == MatchType::Regex {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::validation(format!("Invalid regex '{}': {}", pattern, e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRepository;

    fn service() -> CategoryRuleService {
        let store = Arc::new(InMemoryRepository::new());
        CategoryRuleService::new(store.clone(), store)
    }

    fn new_rule(category: &str, match_type: MatchType, pattern: &str, priority: i32) -> NewRule {
        NewRule {
            category_id: category.to_string(),
            field: MatchField::Description,
            match_type,
            pattern: pattern.to_string(),
            priority,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_category() {
        let err = service()
            .create("local", new_rule("no_such_category", MatchType::Contains, "x", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CategoryNotFound(ref c) if c == "no_such_category"));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_patterns() {
        let svc = service();
        let err = svc
            .create("local", new_rule("dining_cafe", MatchType::Regex, "([", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = svc
            .create("local", new_rule("dining_cafe", MatchType::Exact, "  ", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_priority() {
        let svc = service();
        svc.create("local", new_rule("dining_cafe", MatchType::Contains, "coffee", 1))
            .await
            .unwrap();
        svc.create("local", new_rule("transport_taxi", MatchType::Contains, "uber", 9))
            .await
            .unwrap();
        svc.create("other", new_rule("transport_taxi", MatchType::Contains, "lyft", 50))
            .await
            .unwrap();

        let rules = svc.list("local").await.unwrap();
        let priorities: Vec<i32> = rules.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![9, 1]);
    }

    #[tokio::test]
    async fn test_list_breaks_priority_ties_by_id() {
        let svc = service();
        for pattern in ["a", "b", "c", "d"] {
            svc.create("local", new_rule("dining_cafe", MatchType::Contains, pattern, 3))
                .await
                .unwrap();
        }

        let ids: Vec<Uuid> = svc.list("local").await.unwrap().iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let svc = service();
        let rule = svc
            .create("local", new_rule("dining_cafe", MatchType::Contains, "coffee", 1))
            .await
            .unwrap();

        let updated = svc
            .update(
                rule.id,
                RuleUpdate {
                    priority: Some(20),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.priority, 20);
        assert!(!updated.is_active);
        assert_eq!(svc.get(rule.id).await.unwrap().priority, 20);

        let err = svc
            .update(
                rule.id,
                RuleUpdate {
                    match_type: Some(MatchType::Regex),
                    pattern: Some("(".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        svc.delete(rule.id).await.unwrap();
        assert!(matches!(svc.delete(rule.id).await, Err(Error::NotFound(_))));
    }
}
