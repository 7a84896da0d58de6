//! Category rule domain entities

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};

/// Category assigned when no rule matches
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Which transaction field a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Description,
    Merchant,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Merchant => "merchant",
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "description" => Ok(Self::Description),
            "merchant" => Ok(Self::Merchant),
            other => Err(Error::validation(format!(
                "Unknown match field '{}', expected description or merchant",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Case-sensitive full-string equality
    Exact,
    /// Case-insensitive substring
    Contains,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            other => Err(Error::validation(format!(
                "Unknown match type '{}', expected exact, contains or regex",
                other
            ))),
        }
    }
}

/// A user-defined categorization rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: Uuid,
    pub user_id: String,
    pub category_id: String,
    pub field: MatchField,
    pub match_type: MatchType,
    pub pattern: String,
    pub is_active: bool,
    /// Higher runs first
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CategoryRule {
    pub fn new(
        user_id: &str,
        category_id: &str,
        field: MatchField,
        match_type: MatchType,
        pattern: &str,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            category_id: category_id.to_string(),
            field,
            match_type,
            pattern: pattern.to_string(),
            is_active: true,
            priority,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A category from the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_system: bool,
}

impl Category {
    pub fn system(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_system: true,
        }
    }
}

/// Built-in categories seeded into every registry (id, display name)
pub const SYSTEM_CATEGORIES: &[(&str, &str)] = &[
    ("income", "Income"),
    ("income_salary", "Salary"),
    ("income_bonus", "Bonus"),
    ("income_investment", "Investment Income"),
    ("income_refund", "Refunds"),
    ("income_other", "Other Income"),
    ("transport", "Transport"),
    ("transport_fuel", "Fuel"),
    ("transport_parking", "Parking"),
    ("transport_public", "Public Transit"),
    ("transport_taxi", "Taxi & Rideshare"),
    ("transport_maintenance", "Vehicle Maintenance"),
    ("dining", "Dining"),
    ("dining_restaurant", "Restaurants"),
    ("dining_takeout", "Takeout & Delivery"),
    ("dining_cafe", "Cafes"),
    ("shopping", "Shopping"),
    ("shopping_grocery", "Groceries"),
    ("shopping_clothes", "Clothing"),
    ("shopping_digital", "Electronics"),
    ("shopping_furniture", "Home & Furniture"),
    ("housing", "Housing"),
    ("housing_rent", "Rent"),
    ("housing_mortgage", "Mortgage"),
    ("housing_utilities", "Utilities"),
    ("housing_property", "Property Fees"),
    ("entertainment", "Entertainment"),
    ("entertainment_movie", "Movies & Streaming"),
    ("entertainment_game", "Games"),
    ("entertainment_sports", "Sports & Fitness"),
    ("healthcare", "Healthcare"),
    ("healthcare_medical", "Medical"),
    ("healthcare_insurance", "Insurance"),
    ("education", "Education"),
    ("education_tuition", "Tuition"),
    ("education_books", "Books"),
    ("education_course", "Courses"),
    ("transfer", "Transfer"),
    ("transfer_in", "Transfer In"),
    ("transfer_out", "Transfer Out"),
    ("refund", "Refund"),
    ("other", "Other"),
    ("uncategorized", "Uncategorized"),
];
