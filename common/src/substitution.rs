// Job variable substitution for `${NAME}` placeholders
// Job-level variables take precedence over global variables

use crate::errors::SubstitutionError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::instrument;

/// VariableSubstitutor expands `${VAR_NAME}` placeholders in job scripts
pub struct VariableSubstitutor {
    placeholder_regex: Regex,
}

impl VariableSubstitutor {
    pub fn new() -> Result<Self, SubstitutionError> {
        let placeholder_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| SubstitutionError::RegexError(e.to_string()))?;

        Ok(Self { placeholder_regex })
    }

    /// Substitute variables in a template string
    ///
    /// # Errors
    /// Returns `SubstitutionError::UndefinedVariable` listing every name that
    /// has no value, rather than stopping at the first one.
    #[instrument(skip(self, variables), fields(template_len = template.len(), var_count = variables.len()))]
    pub fn substitute(
        &self,
        template: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, SubstitutionError> {
        let mut undefined_vars = Vec::new();

        let result = self
            .placeholder_regex
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match variables.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        if !undefined_vars.iter().any(|v| v == name) {
                            undefined_vars.push(name.to_string());
                        }
                        String::new()
                    }
                }
            })
            .into_owned();

        if !undefined_vars.is_empty() {
            return Err(SubstitutionError::UndefinedVariable {
                variables: undefined_vars,
                template: template.to_string(),
            });
        }

        Ok(result)
    }

    /// Variable names referenced by a template, in first-use order
    pub fn extract_variables(&self, template: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.placeholder_regex
            .captures_iter(template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}

/// Merge global and job-specific variables; job-specific wins
pub fn merge_variables(
    global_vars: &HashMap<String, String>,
    job_vars: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = global_vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(job_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Parse a `NAME=VALUE` assignment as given on the command line
pub fn parse_assignment(assignment: &str) -> Option<(String, String)> {
    let (name, value) = assignment.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}
