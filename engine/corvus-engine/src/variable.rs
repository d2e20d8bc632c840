//! Query variables and their column bindings.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Index of a column in an operator's result table.
pub type ColumnIndex = usize;

/// A SPARQL variable, stored without the leading `?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Variable(String);

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug_assert!(
            !name.starts_with('?') && !name.is_empty(),
            "variable names are stored without the question mark"
        );
        Variable(name)
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// Which column of a result holds which variable.
pub type VariableColumnMap = HashMap<Variable, ColumnIndex>;
