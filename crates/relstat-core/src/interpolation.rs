use crate::{Error, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

// `${{ expr }}` or `$(NAME)`
static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}|\$\(([A-Za-z_][A-Za-z0-9_.]*)\)")
        .expect("expression pattern is valid")
});

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline, job and input variables
    pub variables: HashMap<String, String>,
    /// Secret inputs; resolvable like variables
    pub secrets: HashMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate variables in a string.
    ///
    /// Unknown `${{ }}` expressions become empty; unknown `$(NAME)` macros are
    /// left as written so shell command substitution survives.
    ///
    /// Supports:
    /// - `$(NAME)` - variable or secret
    /// - `${{ NAME }}` - variable or secret
    /// - `${{ env.VAR }}` - variable, falling back to the process environment
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &Captures| {
                match self.resolve_expression(expression(caps)) {
                    Some(value) => value,
                    None if caps.get(2).is_some() => caps[0].to_string(),
                    None => String::new(),
                }
            })
            .into_owned()
    }

    /// Like [`interpolate`](Self::interpolate) but fails on the first
    /// unknown name.
    pub fn interpolate_strict(&self, input: &str) -> Result<String> {
        let mut missing = None;
        let output = EXPRESSION.replace_all(input, |caps: &Captures| {
            let expr = expression(caps);
            match self.resolve_expression(expr) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| expr.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(Error::MissingVariable(name)),
            None => Ok(output.into_owned()),
        }
    }

    /// Names referenced by `input`, in order of appearance.
    pub fn references(input: &str) -> Vec<String> {
        EXPRESSION
            .captures_iter(input)
            .map(|caps| expression(&caps).to_string())
            .collect()
    }

    fn resolve_expression(&self, expr: &str) -> Option<String> {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .lookup(var_name)
                .or_else(|| std::env::var(var_name).ok());
        }
        self.lookup(expr)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.secrets
            .get(name)
            .or_else(|| self.variables.get(name))
            .cloned()
    }
}

fn expression<'a>(caps: &Captures<'a>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str())
        .trim()
}
