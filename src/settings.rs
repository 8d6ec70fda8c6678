//! Settings resolution: layered configuration to matching rules
//!
//! Resolution is a pure function. Layers are applied in a fixed order:
//!
//! 1. base defaults (match patterns, shipped or `CC`/`CXX` compilers)
//! 2. fuzzer profile (replaces compilers and argument lists)
//! 3. sanitizer profile (appends flags, requests environment changes)
//! 4. explicit command line overrides
//!
//! Environment changes are returned as [`EnvChange`] values instead of
//! being applied, so the caller decides when the process environment of
//! the build is touched.

use crate::config::{BaseDefaults, FuzzerDefaults, FuzzerProfile, ProfileTable, SanitizerProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Regex-based rewrite instruction for one compiler family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
    /// Pattern the program basename must fully match
    pub match_pattern: String,
    /// Program to run instead; empty keeps the original program
    pub replace_command: String,
    /// Appended after the surviving original arguments
    #[serde(default)]
    pub add_arguments: Vec<String>,
    /// Dropped from the original arguments wherever they occur
    #[serde(default)]
    pub remove_arguments: Vec<String>,
}

/// Ordered rules handed to every intercepted compiler; first match wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptSettings {
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

/// Compiler families, in the order their rules are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cxx,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::C, Language::Cxx];
}

/// Explicit values given on the command line; `None` means "not given"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub match_cc: Option<String>,
    pub match_cxx: Option<String>,
    pub replace_cc: Option<String>,
    pub replace_cxx: Option<String>,
}

/// Requested change to the build's environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    Set(String),
    Unset(String),
}

/// Configuration lookup that failed without aborting resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    UnknownFuzzer(String),
    UnknownSanitizer { fuzzer: String, sanitizer: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::UnknownFuzzer(name) => write!(f, "Ignoring unknown fuzzer {:?}", name),
            ResolveWarning::UnknownSanitizer { fuzzer, sanitizer } => write!(
                f,
                "Ignoring unknown sanitizer {:?} for fuzzer {:?}",
                sanitizer, fuzzer
            ),
        }
    }
}

/// Outcome of one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub settings: InterceptSettings,
    pub env_changes: Vec<EnvChange>,
    pub warnings: Vec<ResolveWarning>,
}

/// Intermediate state threaded through the layer merges
#[derive(Debug, Clone, PartialEq, Eq)]
struct Draft {
    match_cc: String,
    match_cxx: String,
    replace_cc: String,
    replace_cxx: String,
    add_arguments: Vec<String>,
    remove_arguments: Vec<String>,
}

impl Draft {
    fn from_base(base: &BaseDefaults) -> Self {
        Self {
            match_cc: base.match_cc.clone(),
            match_cxx: base.match_cxx.clone(),
            replace_cc: base.replace_cc.clone(),
            replace_cxx: base.replace_cxx.clone(),
            add_arguments: Vec::new(),
            remove_arguments: Vec::new(),
        }
    }

    fn rule(&self, language: Language) -> MatchingRule {
        let (match_pattern, replace_command) = match language {
            Language::C => (&self.match_cc, &self.replace_cc),
            Language::Cxx => (&self.match_cxx, &self.replace_cxx),
        };
        MatchingRule {
            match_pattern: match_pattern.clone(),
            replace_command: replace_command.clone(),
            add_arguments: self.add_arguments.clone(),
            remove_arguments: self.remove_arguments.clone(),
        }
    }
}

/// Fuzzer layer: profile lists first, then the fuzzer-wide defaults
/// unless the config file fixed that list
fn apply_fuzzer(draft: &mut Draft, profile: &FuzzerProfile, defaults: &FuzzerDefaults) {
    draft.replace_cc.clone_from(&profile.replace_cc);
    draft.replace_cxx.clone_from(&profile.replace_cxx);
    draft.add_arguments = merged(
        &profile.add_arguments,
        &defaults.add_arguments,
        profile.inherit_defaults.add_arguments,
    );
    draft.remove_arguments = merged(
        &profile.remove_arguments,
        &defaults.remove_arguments,
        profile.inherit_defaults.remove_arguments,
    );
}

fn merged(own: &[String], defaults: &[String], inherit: bool) -> Vec<String> {
    let defaults = if inherit { defaults } else { &[] };
    own.iter().chain(defaults).cloned().collect()
}

/// Sanitizer layer: additive flags plus environment toggles
fn apply_sanitizer(draft: &mut Draft, sanitizer: &SanitizerProfile) -> Vec<EnvChange> {
    draft.add_arguments.extend(sanitizer.flags.iter().cloned());
    sanitizer
        .set_env
        .iter()
        .map(|name| EnvChange::Set(name.clone()))
        .chain(
            sanitizer
                .unset_env
                .iter()
                .map(|name| EnvChange::Unset(name.clone())),
        )
        .collect()
}

fn apply_overrides(draft: &mut Draft, overrides: &CliOverrides) {
    let slots = [
        (&mut draft.match_cc, &overrides.match_cc),
        (&mut draft.match_cxx, &overrides.match_cxx),
        (&mut draft.replace_cc, &overrides.replace_cc),
        (&mut draft.replace_cxx, &overrides.replace_cxx),
    ];
    for (slot, value) in slots {
        if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
            slot.clone_from(value);
        }
    }
}

/// Resolves intercept settings from the loaded configuration layers
#[derive(Debug, Clone)]
pub struct Resolver {
    base: BaseDefaults,
    profiles: ProfileTable,
}

impl Resolver {
    pub fn new(base: BaseDefaults, profiles: ProfileTable) -> Self {
        Self { base, profiles }
    }

    /// Compute the matching rules for one build
    ///
    /// Unknown fuzzer or sanitizer names are reported as warnings and
    /// leave the lower layers in effect.
    pub fn resolve(
        &self,
        overrides: &CliOverrides,
        fuzzer: Option<&str>,
        sanitizer: Option<&str>,
    ) -> Resolution {
        let mut draft = Draft::from_base(&self.base);
        let mut env_changes = Vec::new();
        let mut warnings = Vec::new();

        if let Some(fuzzer_name) = fuzzer.filter(|name| !name.is_empty()) {
            match self.profiles.get(fuzzer_name) {
                Some(profile) => {
                    debug!("Applying fuzzer profile {:?}", fuzzer_name);
                    apply_fuzzer(&mut draft, profile, &self.profiles.defaults);

                    if let Some(sanitizer_name) = sanitizer.filter(|name| !name.is_empty()) {
                        match profile.sanitizers.get(sanitizer_name) {
                            Some(sanitizer_profile) => {
                                debug!("Applying sanitizer profile {:?}", sanitizer_name);
                                env_changes = apply_sanitizer(&mut draft, sanitizer_profile);
                            }
                            None => warnings.push(ResolveWarning::UnknownSanitizer {
                                fuzzer: fuzzer_name.to_string(),
                                sanitizer: sanitizer_name.to_string(),
                            }),
                        }
                    }
                }
                None => warnings.push(ResolveWarning::UnknownFuzzer(fuzzer_name.to_string())),
            }
        }

        apply_overrides(&mut draft, overrides);

        for warning in &warnings {
            warn!("{}", warning);
        }

        Resolution {
            settings: InterceptSettings {
                matching_rules: Language::ALL.iter().map(|l| draft.rule(*l)).collect(),
            },
            env_changes,
            warnings,
        }
    }
}
