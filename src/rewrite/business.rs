//! Fixed business vocabulary of the consolidated sales table.

use crate::ident::ensure_bracketed;
use crate::rewrite::level_rules::{LevelRules, STANDARD_LEVEL_RULES};

pub const DEFAULT_TABLE: &str = "[dbo].[ConsolidateData_PBI]";

/// A column paired with the output alias used when it is projected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aliased {
    pub column: String,
    pub alias: String,
}

impl Aliased {
    pub fn new(column: &str, alias: &str) -> Self {
        Self { column: ensure_bracketed(column), alias: ensure_bracketed(alias) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRules {
    pub table: String,
    /// Grouping-identity columns that must never be blank or 'N/A'.
    pub not_blank_columns: Vec<String>,
    /// Roll-up entities, most granular first.
    pub entities: Vec<Aliased>,
    pub metric: Aliased,
    pub levels: LevelRules,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            not_blank_columns: vec!["[Company_Name]".to_string(), "[Region_Name]".to_string()],
            entities: vec![
                Aliased::new("Profitcenter_Name", "Store Name"),
                Aliased::new("Company_Name", "Company Name"),
                Aliased::new("Region_Name", "Region Name"),
            ],
            metric: Aliased::new("Sales", "Sales"),
            levels: STANDARD_LEVEL_RULES.clone(),
        }
    }
}

impl BusinessRules {
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.trim().to_string();
        self
    }

    pub fn with_levels(mut self, levels: LevelRules) -> Self {
        self.levels = levels;
        self
    }
}
