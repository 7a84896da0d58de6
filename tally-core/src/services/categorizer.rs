//! Category rule engine - assigns categories to normalized transactions

use regex::{Regex, RegexBuilder};

use crate::domain::{CategoryRule, MatchField, MatchType, NormalizedTransaction};

/// Built-in keyword table consulted after user rules miss, when enabled.
/// Keywords match whole words, merchant before description.
const KEYWORD_TABLE: &[(&str, &[&str])] = &[
    ("dining_cafe", &["starbucks", "tim hortons", "coffee", "espresso", "latte", "cafe", "café"]),
    ("dining_takeout", &["doordash", "ubereats", "uber eats", "grubhub", "skipthedishes", "postmates", "takeout"]),
    ("dining_restaurant", &["restaurant", "diner", "grill", "steakhouse", "pizzeria", "sushi", "bistro", "eatery"]),
    ("shopping_grocery", &["grocery", "supermarket", "walmart", "costco", "safeway", "kroger", "sobeys", "loblaws", "aldi", "trader joe", "whole foods", "food basics"]),
    ("shopping_clothes", &["clothing", "apparel", "shoes", "footwear", "nike", "adidas", "zara", "old navy", "nordstrom"]),
    ("shopping_digital", &["best buy", "apple store", "electronics"]),
    ("transport_fuel", &["gas station", "fuel", "petrol", "shell", "esso", "petro canada", "exxon", "mobil", "chevron"]),
    ("transport_parking", &["parking", "impark", "green p"]),
    ("transport_public", &["transit", "subway", "metro", "presto", "ttc", "via rail", "amtrak"]),
    ("transport_taxi", &["uber", "lyft", "taxi", "cab"]),
    ("housing_rent", &["rent", "lease"]),
    ("housing_mortgage", &["mortgage"]),
    ("housing_utilities", &["hydro", "electric", "utility", "utilities", "enbridge", "internet", "rogers", "bell canada", "telus"]),
    ("healthcare_medical", &["pharmacy", "shoppers drug mart", "medical", "dental", "clinic"]),
    ("healthcare_insurance", &["insurance"]),
    ("entertainment_movie", &["cineplex", "netflix", "cinema"]),
    ("entertainment_sports", &["gym", "fitness", "goodlife"]),
    ("income_salary", &["payroll", "salary", "direct deposit", "wages"]),
    ("income_investment", &["dividend", "interest", "capital gain"]),
];

enum Matcher {
    Exact(String),
    /// Lowercased pattern
    Contains(String),
    Regex(Regex),
    /// Pattern failed to compile; never matches
    Invalid,
}

impl Matcher {
    fn compile(rule: &CategoryRule) -> Result<Self, regex::Error> {
        Ok(match rule.match_type {
            MatchType::Exact => Self::Exact(rule.pattern.clone()),
            MatchType::Contains => Self::Contains(rule.pattern.to_lowercase()),
            MatchType::Regex => Self::Regex(
                RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()?,
            ),
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Exact(pattern) => text == pattern,
            Self::Contains(pattern) => text.to_lowercase().contains(pattern.as_str()),
            Self::Regex(re) => re.is_match(text),
            Self::Invalid => false,
        }
    }
}

/// Whether `field_text` satisfies `rule`
///
/// Exact is case-sensitive equality, contains is a case-insensitive
/// substring test, regex searches case-insensitively. An invalid regex never
/// matches.
pub fn rule_matches(field_text: &str, rule: &CategoryRule) -> bool {
    Matcher::compile(rule)
        .map(|m| m.is_match(field_text))
        .unwrap_or(false)
}

struct CompiledRule {
    rule: CategoryRule,
    matcher: Matcher,
}

/// Snapshot of a user's active rules, ordered and compiled once
pub struct CategoryRuleEngine {
    rules: Vec<CompiledRule>,
    default_category: String,
    keyword_fallback: bool,
    warnings: Vec<String>,
}

impl CategoryRuleEngine {
    /// Build an engine from a rule set. Inactive rules are dropped; the rest
    /// are ordered by priority descending, ties by id ascending.
    pub fn new(rules: Vec<CategoryRule>, default_category: &str) -> Self {
        let mut rules: Vec<CategoryRule> = rules.into_iter().filter(|r| r.is_active).collect();
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut warnings = Vec::new();
        let rules = rules
            .into_iter()
            .map(|rule| {
                let matcher = Matcher::compile(&rule).unwrap_or_else(|e| {
                    tracing::warn!(rule_id = %rule.id, pattern = %rule.pattern, error = %e, "skipping rule with invalid regex");
                    warnings.push(format!(
                        "Rule {} has an invalid regex '{}' and was skipped: {}",
                        rule.id, rule.pattern, e
                    ));
                    Matcher::Invalid
                });
                CompiledRule { rule, matcher }
            })
            .collect();

        Self {
            rules,
            default_category: default_category.to_string(),
            keyword_fallback: false,
            warnings,
        }
    }

    pub fn with_keyword_fallback(mut self, enabled: bool) -> Self {
        self.keyword_fallback = enabled;
        self
    }

    /// Non-fatal problems found while compiling the rule set
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// First rule, in evaluation order, that matches the transaction
    pub fn matching_rule(&self, tx: &NormalizedTransaction) -> Option<&CategoryRule> {
        self.rules
            .iter()
            .find(|compiled| {
                let text = match compiled.rule.field {
                    MatchField::Description => Some(tx.description.as_str()),
                    MatchField::Merchant => tx.merchant.as_deref(),
                };
                text.map_or(false, |t| compiled.matcher.is_match(t))
            })
            .map(|compiled| &compiled.rule)
    }

    /// Category for the transaction: first matching rule, then the keyword
    /// table when enabled, then the default category
    pub fn categorize(&self, tx: &NormalizedTransaction) -> String {
        if let Some(rule) = self.matching_rule(tx) {
            return rule.category_id.clone();
        }
        if self.keyword_fallback {
            if let Some(category) = keyword_category(tx) {
                return category.to_string();
            }
        }
        self.default_category.clone()
    }
}

fn keyword_category(tx: &NormalizedTransaction) -> Option<&'static str> {
    let fields = [tx.merchant.as_deref(), Some(tx.description.as_str())];
    fields.into_iter().flatten().find_map(|text| {
        let words = word_padded(text);
        KEYWORD_TABLE.iter().find_map(|(category, keywords)| {
            keywords
                .iter()
                .any(|k| words.contains(&format!(" {} ", k)))
                .then_some(*category)
        })
    })
}

/// Lowercase, punctuation replaced by spaces, padded for whole-word search
fn word_padded(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}
