//! Applying matching rules to a compiler invocation
//!
//! A rule matches when its pattern fully matches the basename of the
//! program (`argv[0]`). The rewritten command is
//! `[replace_command] + (argv[1..] - remove_arguments) + add_arguments`.

use crate::error::{InterceptError, Result};
use crate::settings::{InterceptSettings, MatchingRule};
use regex::Regex;
use std::path::Path;

/// A matching rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pattern: Regex,
    rule: MatchingRule,
}

impl CompiledRule {
    /// Compile a rule; the pattern is anchored on both ends
    pub fn new(rule: MatchingRule) -> Result<Self> {
        let anchored = format!("^(?:{})$", rule.match_pattern);
        let pattern = Regex::new(&anchored).map_err(|source| InterceptError::InvalidPattern {
            pattern: rule.match_pattern.clone(),
            source,
        })?;
        Ok(Self { pattern, rule })
    }

    pub fn rule(&self) -> &MatchingRule {
        &self.rule
    }

    pub fn matches(&self, program: &str) -> bool {
        self.pattern.is_match(&program_name(program))
    }

    /// Rewrite `argv`; does not check whether the rule matches
    pub fn apply(&self, argv: &[String]) -> Vec<String> {
        let program = match (self.rule.replace_command.is_empty(), argv.first()) {
            (false, _) => self.rule.replace_command.clone(),
            (true, Some(original)) => original.clone(),
            (true, None) => String::new(),
        };

        let mut rewritten = Vec::with_capacity(argv.len() + self.rule.add_arguments.len());
        rewritten.push(program);
        rewritten.extend(
            argv.iter()
                .skip(1)
                .filter(|arg| !self.rule.remove_arguments.contains(arg))
                .cloned(),
        );
        rewritten.extend(self.rule.add_arguments.iter().cloned());
        rewritten
    }
}

/// Ordered set of compiled rules; the first matching rule wins
#[derive(Debug, Clone)]
pub struct Rewriter {
    rules: Vec<CompiledRule>,
}

impl Rewriter {
    /// Compile all rules of `settings`
    ///
    /// # Errors
    /// Returns [`InterceptError::InvalidPattern`] for the first pattern
    /// that is not a valid regex.
    pub fn new(settings: &InterceptSettings) -> Result<Self> {
        let rules = settings
            .matching_rules
            .iter()
            .cloned()
            .map(CompiledRule::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn matching_rule(&self, program: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(program))
    }

    /// Rewrite `argv` with the first matching rule, `None` when nothing matches
    pub fn rewrite(&self, argv: &[String]) -> Option<Vec<String>> {
        let program = argv.first()?;
        self.matching_rule(program).map(|rule| rule.apply(argv))
    }
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
