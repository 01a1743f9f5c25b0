//! Declaration tracking for the parser.
//!
//! A [`Scope`] is pushed for every function (and for `catch` clauses, which
//! bind one name but forward `var` declarations outward). When a scope is
//! popped its free variables flow into the parent, which is how the
//! captured-variable set of a unit is computed without an AST walk.

use std::fmt;

use rustc_hash::FxHashSet;

use crate::token::Identifier;

/// Bitmask of facts about a unit that affect how it may be compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, serde::Serialize)]
pub struct CodeFeatures(u16);

impl CodeFeatures {
    pub const NONE: Self = Self(0);
    pub const USES_THIS: Self = Self(1 << 0);
    pub const USES_EVAL: Self = Self(1 << 1);
    pub const USES_WITH: Self = Self(1 << 2);
    pub const USES_CATCH: Self = Self(1 << 3);
    pub const USES_ARGUMENTS: Self = Self(1 << 4);
    pub const STRICT: Self = Self(1 << 5);
    pub const SHADOWS_ARGUMENTS: Self = Self(1 << 6);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_strict(self) -> bool {
        self.contains(Self::STRICT)
    }
}

impl fmt::Display for CodeFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CodeFeatures, &str); 7] = [
            (CodeFeatures::USES_THIS, "this"),
            (CodeFeatures::USES_EVAL, "eval"),
            (CodeFeatures::USES_WITH, "with"),
            (CodeFeatures::USES_CATCH, "catch"),
            (CodeFeatures::USES_ARGUMENTS, "arguments"),
            (CodeFeatures::STRICT, "strict"),
            (CodeFeatures::SHADOWS_ARGUMENTS, "shadows-arguments"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Label {
    name: Identifier,
    is_loop: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    uses_eval: bool,
    needs_full_activation: bool,
    allows_new_declarations: bool,
    strict: bool,
    is_function: bool,
    is_function_boundary: bool,
    is_valid_strict_mode: bool,
    shadows_arguments: bool,
    loop_depth: u32,
    switch_depth: u32,
    labels: Vec<Label>,
    features: CodeFeatures,
    declared_variables: FxHashSet<Identifier>,
    used_variables: FxHashSet<Identifier>,
    closed_variables: FxHashSet<Identifier>,
    written_variables: FxHashSet<Identifier>,
}

impl Scope {
    pub fn new(strict: bool, is_function: bool) -> Self {
        Self {
            allows_new_declarations: true,
            strict,
            is_function,
            is_function_boundary: is_function,
            is_valid_strict_mode: true,
            ..Self::default()
        }
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn set_strict(&mut self) {
        self.strict = true;
    }

    pub fn is_function(&self) -> bool {
        self.is_function
    }

    pub fn is_function_boundary(&self) -> bool {
        self.is_function_boundary
    }

    /// False once a name that strict mode forbids has been declared here.
    pub fn is_valid_strict_mode(&self) -> bool {
        self.is_valid_strict_mode
    }

    pub fn allows_new_declarations(&self) -> bool {
        self.allows_new_declarations
    }

    /// `catch` scopes bind only their parameter.
    pub fn prevent_new_declarations(&mut self) {
        self.allows_new_declarations = false;
    }

    pub fn uses_eval(&self) -> bool {
        self.uses_eval
    }

    pub fn set_uses_eval(&mut self) {
        self.uses_eval = true;
        self.features.insert(CodeFeatures::USES_EVAL);
    }

    pub fn set_needs_full_activation(&mut self) {
        self.needs_full_activation = true;
    }

    pub fn needs_full_activation(&self) -> bool {
        self.needs_full_activation
    }

    pub fn shadows_arguments(&self) -> bool {
        self.shadows_arguments
    }

    pub fn features(&self) -> CodeFeatures {
        let mut features = self.features;
        if self.strict {
            features.insert(CodeFeatures::STRICT);
        }
        if self.shadows_arguments {
            features.insert(CodeFeatures::SHADOWS_ARGUMENTS);
        }
        features
    }

    pub fn add_feature(&mut self, feature: CodeFeatures) {
        self.features.insert(feature);
    }

    /// Returns false when the name is not allowed as a strict-mode binding.
    pub fn declare_variable(&mut self, name: &Identifier) -> bool {
        let valid = !is_eval_or_arguments(name);
        self.is_valid_strict_mode = self.is_valid_strict_mode && valid;
        if name.as_ref() == "arguments" {
            self.shadows_arguments = true;
        }
        self.declared_variables.insert(name.clone());
        valid
    }

    /// Returns false for `eval`, `arguments`, or a repeated parameter.
    pub fn declare_parameter(&mut self, name: &Identifier) -> bool {
        let is_arguments = name.as_ref() == "arguments";
        let fresh = self.declared_variables.insert(name.clone());
        let valid = fresh && name.as_ref() != "eval" && !is_arguments;
        self.is_valid_strict_mode = self.is_valid_strict_mode && valid;
        if is_arguments {
            self.shadows_arguments = true;
        }
        valid
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared_variables.contains(name)
    }

    pub fn use_variable(&mut self, name: &Identifier, is_eval: bool) {
        if is_eval {
            self.set_uses_eval();
        }
        if name.as_ref() == "arguments" {
            self.features.insert(CodeFeatures::USES_ARGUMENTS);
        }
        self.used_variables.insert(name.clone());
    }

    pub fn write_variable(&mut self, name: &Identifier) {
        self.written_variables.insert(name.clone());
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_add(1);
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    pub fn enter_switch(&mut self) {
        self.switch_depth = self.switch_depth.saturating_add(1);
    }

    pub fn exit_switch(&mut self) {
        self.switch_depth = self.switch_depth.saturating_sub(1);
    }

    pub fn break_is_valid(&self) -> bool {
        self.loop_depth > 0 || self.switch_depth > 0
    }

    pub fn continue_is_valid(&self) -> bool {
        self.loop_depth > 0
    }

    pub fn push_label(&mut self, name: Identifier, is_loop: bool) {
        self.labels.push(Label { name, is_loop });
    }

    pub fn pop_label(&mut self) {
        self.labels.pop();
    }

    /// `Some(is_loop)` when a label of that name is active in this scope.
    pub fn label(&self, name: &str) -> Option<bool> {
        self.labels
            .iter()
            .rev()
            .find(|label| label.name.as_ref() == name)
            .map(|label| label.is_loop)
    }

    /// Merge a popped child's free variables into this scope.
    pub fn collect_free_variables(&mut self, nested: &Scope, track_closed_variables: bool) {
        if nested.uses_eval {
            self.uses_eval = true;
        }
        for name in &nested.used_variables {
            if nested.declared_variables.contains(name) {
                continue;
            }
            self.used_variables.insert(name.clone());
            if track_closed_variables {
                self.closed_variables.insert(name.clone());
            }
        }
        for name in &nested.written_variables {
            if nested.declared_variables.contains(name) {
                continue;
            }
            self.written_variables.insert(name.clone());
        }
        if !nested.is_function {
            self.features.insert(nested.features);
            self.needs_full_activation |= nested.needs_full_activation;
        }
    }

    /// Declared names that nested code can observe.
    pub fn captured_variables(&self) -> Vec<Identifier> {
        let mut captured: Vec<Identifier> = if self.needs_full_activation || self.uses_eval {
            self.declared_variables.iter().cloned().collect()
        } else {
            self.declared_variables
                .intersection(&self.closed_variables)
                .cloned()
                .collect()
        };
        captured.sort();
        captured
    }

    /// Snapshot of the names a function body uses, for the function cache.
    pub fn summary(&self) -> FunctionSummary {
        let mut used_variables: Vec<Identifier> = self
            .used_variables
            .iter()
            .filter(|name| !self.declared_variables.contains(*name))
            .cloned()
            .collect();
        used_variables.sort();
        let mut written_variables: Vec<Identifier> = self
            .written_variables
            .iter()
            .filter(|name| !self.declared_variables.contains(*name))
            .cloned()
            .collect();
        written_variables.sort();
        FunctionSummary {
            strict: self.strict,
            uses_eval: self.uses_eval,
            features: self.features(),
            used_variables,
            written_variables,
        }
    }

    /// Replay a cached summary into a freshly pushed function scope.
    pub fn restore_summary(&mut self, summary: &FunctionSummary) {
        self.strict = summary.strict;
        if summary.uses_eval {
            self.set_uses_eval();
        }
        self.features.insert(summary.features);
        self.features.remove(CodeFeatures::STRICT);
        self.features.remove(CodeFeatures::SHADOWS_ARGUMENTS);
        self.used_variables.extend(summary.used_variables.iter().cloned());
        self.written_variables
            .extend(summary.written_variables.iter().cloned());
    }
}

/// Free-variable summary of a parsed function body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionSummary {
    pub strict: bool,
    pub uses_eval: bool,
    pub features: CodeFeatures,
    /// Sorted names read but not declared by the body.
    pub used_variables: Vec<Identifier>,
    /// Sorted names assigned but not declared by the body.
    pub written_variables: Vec<Identifier>,
}

pub fn is_eval_or_arguments(name: &str) -> bool {
    name == "eval" || name == "arguments"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ident(name: &str) -> Identifier {
        Arc::from(name)
    }

    #[test]
    fn test_declare_parameter_rejects_duplicates() {
        let mut scope = Scope::new(false, true);
        assert!(scope.declare_parameter(&ident("a")));
        assert!(!scope.declare_parameter(&ident("a")));
        assert!(!scope.is_valid_strict_mode());
    }

    #[test]
    fn test_declare_eval_invalidates_strict() {
        let mut scope = Scope::new(false, true);
        assert!(!scope.declare_variable(&ident("eval")));
        assert!(!scope.is_valid_strict_mode());
        let mut scope = Scope::new(false, true);
        assert!(!scope.declare_parameter(&ident("arguments")));
        assert!(scope.shadows_arguments());
    }

    #[test]
    fn test_free_variables_propagate_as_closed() {
        let mut outer = Scope::new(false, true);
        outer.declare_variable(&ident("x"));
        outer.declare_variable(&ident("y"));

        let mut inner = Scope::new(false, true);
        inner.declare_variable(&ident("local"));
        inner.use_variable(&ident("x"), false);
        inner.use_variable(&ident("local"), false);

        outer.collect_free_variables(&inner, true);
        assert_eq!(outer.captured_variables(), vec![ident("x")]);
    }

    #[test]
    fn test_eval_captures_everything() {
        let mut outer = Scope::new(false, true);
        outer.declare_variable(&ident("b"));
        outer.declare_variable(&ident("a"));
        let mut inner = Scope::new(false, true);
        inner.set_uses_eval();
        outer.collect_free_variables(&inner, true);
        assert!(outer.uses_eval());
        assert_eq!(outer.captured_variables(), vec![ident("a"), ident("b")]);
    }

    #[test]
    fn test_labels_and_loop_depth() {
        let mut scope = Scope::new(false, true);
        assert!(!scope.break_is_valid());
        scope.push_label(ident("outer"), true);
        scope.enter_loop();
        assert!(scope.continue_is_valid());
        assert_eq!(scope.label("outer"), Some(true));
        scope.exit_loop();
        scope.pop_label();
        assert_eq!(scope.label("outer"), None);
    }

    #[test]
    fn test_features_display() {
        let mut features = CodeFeatures::USES_EVAL;
        features.insert(CodeFeatures::STRICT);
        assert_eq!(features.to_string(), "eval|strict");
        assert_eq!(CodeFeatures::NONE.to_string(), "none");
    }
}
