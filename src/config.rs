//! Typed configuration layers for settings resolution
//!
//! Three layers feed the resolver:
//! - [`BaseDefaults`]: compiler match patterns and the shipped toolchain
//! - [`ProfileTable`]: named fuzzer profiles plus the fuzzer-wide list defaults
//! - an optional TOML overlay ([`ConfigFile`]) that patches the built-in profiles
//!
//! List-valued keys in the overlay are `Option<Vec<String>>` so that an
//! absent key inherits the built-in value while an empty list clears it.

use crate::error::{InterceptError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default pattern for C compiler program names
pub const DEFAULT_CC_PATTERN: &str = r"^([^-]*-)*[mg]cc(-\d+(\.\d+){0,2})?$|^([^-]*-)*clang(-\d+(\.\d+){0,2})?$|^(|i)cc$|^(g|)xlc$";

/// Default pattern for C++ compiler program names
pub const DEFAULT_CXX_PATTERN: &str = r"^([^-]*-)*[cmg]\+\+(-\d+(\.\d+){0,2})?$|^([^-]*-)*clang\+\+(-\d+(\.\d+){0,2})?$|^(|i)cc$|^(g|)xlc$";

/// Sanitizer used when a fuzzer is selected without naming one
pub const DEFAULT_SANITIZER: &str = "address";

/// Runtime bug detector settings attached to a fuzzer profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerProfile {
    /// Compiler flags appended after the profile's add-arguments
    #[serde(default)]
    pub flags: Vec<String>,
    /// Environment variables set to "1" for the build
    #[serde(default)]
    pub set_env: Vec<String>,
    /// Environment variables removed from the build environment
    #[serde(default)]
    pub unset_env: Vec<String>,
}

/// Compiler replacement and flag injection for one fuzzing engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzerProfile {
    pub replace_cc: String,
    pub replace_cxx: String,
    pub add_arguments: Vec<String>,
    pub remove_arguments: Vec<String>,
    pub sanitizers: BTreeMap<String, SanitizerProfile>,
    #[serde(default)]
    pub inherit_defaults: DefaultsInheritance,
}

/// Which of a profile's lists get the fuzzer-wide defaults appended
///
/// A list set by the config file is taken as the final list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsInheritance {
    pub add_arguments: bool,
    pub remove_arguments: bool,
}

impl Default for DefaultsInheritance {
    fn default() -> Self {
        Self {
            add_arguments: true,
            remove_arguments: true,
        }
    }
}

impl DefaultsInheritance {
    pub const NONE: Self = Self {
        add_arguments: false,
        remove_arguments: false,
    };
}

/// Argument lists appended to every fuzzer profile's own lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzerDefaults {
    pub add_arguments: Vec<String>,
    pub remove_arguments: Vec<String>,
}

impl FuzzerDefaults {
    /// Debug info and optimization stripping shared by all fuzzing builds
    pub fn builtin() -> Self {
        Self {
            add_arguments: strings(&[
                "-g",
                "-gline-tables-only",
                "-DFUZZING_BUILD_MODE_UNSAFE_FOR_PRODUCTION",
            ]),
            remove_arguments: strings(&[
                "-O1", "-O2", "-O3", "-O4", "-Ofast", "-Os", "-Oz", "-Og",
            ]),
        }
    }
}

/// Paths of the compilers shipped alongside the interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub clang: String,
    pub clangxx: String,
    pub afl_clang: String,
    pub afl_clangxx: String,
}

impl Toolchain {
    /// Locate the shipped compilers relative to the running executable
    ///
    /// Missing tools fall back to their bare names so that `PATH` lookup
    /// at exec time can still find a system installation.
    pub fn discover() -> Self {
        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf));
        Self {
            clang: shipped_tool_path(root.as_deref(), "llvm/bin/clang"),
            clangxx: shipped_tool_path(root.as_deref(), "llvm/bin/clang++"),
            afl_clang: shipped_tool_path(root.as_deref(), "afl/bin/afl-clang"),
            afl_clangxx: shipped_tool_path(root.as_deref(), "afl/bin/afl-clang++"),
        }
    }

    /// Toolchain made of bare program names
    pub fn bare() -> Self {
        Self {
            clang: "clang".to_string(),
            clangxx: "clang++".to_string(),
            afl_clang: "afl-clang".to_string(),
            afl_clangxx: "afl-clang++".to_string(),
        }
    }
}

fn shipped_tool_path(root: Option<&Path>, relative: &str) -> String {
    let fallback = Path::new(relative)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative.to_string());

    match root.map(|r| r.join(relative)) {
        Some(candidate) if candidate.is_file() => candidate.to_string_lossy().into_owned(),
        _ => {
            warn!(
                "Could not find shipped {}, using fallback {:?}",
                relative, fallback
            );
            fallback
        }
    }
}

/// Lowest configuration layer: what a build looks like without a fuzzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseDefaults {
    pub match_cc: String,
    pub match_cxx: String,
    pub replace_cc: String,
    pub replace_cxx: String,
}

impl BaseDefaults {
    pub fn new(toolchain: &Toolchain) -> Self {
        Self {
            match_cc: DEFAULT_CC_PATTERN.to_string(),
            match_cxx: DEFAULT_CXX_PATTERN.to_string(),
            replace_cc: toolchain.clang.clone(),
            replace_cxx: toolchain.clangxx.clone(),
        }
    }

    /// Replace the default compilers with `CC` / `CXX` style overrides
    pub fn with_compilers(mut self, cc: Option<String>, cxx: Option<String>) -> Self {
        if let Some(cc) = cc.filter(|c| !c.is_empty()) {
            self.replace_cc = cc;
        }
        if let Some(cxx) = cxx.filter(|c| !c.is_empty()) {
            self.replace_cxx = cxx;
        }
        self
    }
}

/// All known fuzzer profiles, loaded once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileTable {
    pub defaults: FuzzerDefaults,
    pub profiles: BTreeMap<String, FuzzerProfile>,
}

impl ProfileTable {
    /// Built-in profiles for libFuzzer, AFL and llvm-cov coverage builds
    pub fn builtin(toolchain: &Toolchain) -> Self {
        let mut profiles = BTreeMap::new();

        profiles.insert(
            "libfuzzer".to_string(),
            FuzzerProfile {
                replace_cc: toolchain.clang.clone(),
                replace_cxx: toolchain.clangxx.clone(),
                add_arguments: strings(&[
                    "-fno-omit-frame-pointer",
                    "-fsanitize=fuzzer-no-link",
                    "-Og",
                ]),
                remove_arguments: strings(&["-fomit-frame-pointer"]),
                sanitizers: BTreeMap::from([
                    (
                        "address".to_string(),
                        SanitizerProfile {
                            flags: strings(&[
                                "-fsanitize=address,undefined",
                                "-fsanitize-address-use-after-scope",
                            ]),
                            ..Default::default()
                        },
                    ),
                    (
                        "memory".to_string(),
                        SanitizerProfile {
                            flags: strings(&["-fsanitize=memory,undefined"]),
                            ..Default::default()
                        },
                    ),
                    (
                        "thread".to_string(),
                        SanitizerProfile {
                            flags: strings(&["-fsanitize=thread,undefined"]),
                            ..Default::default()
                        },
                    ),
                ]),
                inherit_defaults: DefaultsInheritance::default(),
            },
        );

        profiles.insert(
            "afl".to_string(),
            FuzzerProfile {
                replace_cc: toolchain.afl_clang.clone(),
                replace_cxx: toolchain.afl_clangxx.clone(),
                add_arguments: strings(&["-O0"]),
                remove_arguments: Vec::new(),
                sanitizers: BTreeMap::from([
                    (
                        "address".to_string(),
                        SanitizerProfile {
                            set_env: strings(&["AFL_USE_ASAN"]),
                            unset_env: strings(&["AFL_USE_MSAN"]),
                            ..Default::default()
                        },
                    ),
                    (
                        "memory".to_string(),
                        SanitizerProfile {
                            set_env: strings(&["AFL_USE_MSAN"]),
                            unset_env: strings(&["AFL_USE_ASAN"]),
                            ..Default::default()
                        },
                    ),
                    (
                        "thread".to_string(),
                        SanitizerProfile {
                            unset_env: strings(&["AFL_USE_MSAN", "AFL_USE_ASAN"]),
                            ..Default::default()
                        },
                    ),
                ]),
                inherit_defaults: DefaultsInheritance::default(),
            },
        );

        profiles.insert(
            "llvm-cov".to_string(),
            FuzzerProfile {
                replace_cc: toolchain.clang.clone(),
                replace_cxx: toolchain.clangxx.clone(),
                add_arguments: strings(&[
                    "-fno-omit-frame-pointer",
                    "-fprofile-instr-generate",
                    "-fcoverage-mapping",
                    "-O0",
                ]),
                remove_arguments: strings(&["-fomit-frame-pointer"]),
                sanitizers: BTreeMap::new(),
                inherit_defaults: DefaultsInheritance::default(),
            },
        );

        Self {
            defaults: FuzzerDefaults::builtin(),
            profiles,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FuzzerProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Patch this table with the contents of a configuration file
    ///
    /// Profiles named in the file but unknown to the table start from
    /// `base`'s compilers and empty lists, and never inherit the
    /// fuzzer-wide defaults.
    pub fn apply_overlay(&mut self, file: &ConfigFile, base: &BaseDefaults) {
        if let Some(defaults) = &file.fuzzer_defaults {
            overlay_list(&mut self.defaults.add_arguments, &defaults.add_arguments);
            overlay_list(
                &mut self.defaults.remove_arguments,
                &defaults.remove_arguments,
            );
        }

        for (name, overlay) in &file.fuzzers {
            let profile = self.profiles.entry(name.clone()).or_insert_with(|| {
                debug!("Defining new fuzzer profile {:?} from config file", name);
                FuzzerProfile {
                    replace_cc: base.replace_cc.clone(),
                    replace_cxx: base.replace_cxx.clone(),
                    inherit_defaults: DefaultsInheritance::NONE,
                    ..Default::default()
                }
            });
            overlay.apply_to(profile);
        }
    }
}

fn overlay_list(target: &mut Vec<String>, overlay: &Option<Vec<String>>) {
    if let Some(list) = overlay {
        target.clone_from(list);
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// On-disk overlay for the built-in profile table
///
/// # Example TOML
/// ```toml
/// [fuzzer_defaults]
/// add_arguments = ["-g"]
///
/// [fuzzers.libfuzzer]
/// replace_cc = "/opt/llvm/bin/clang"
/// remove_arguments = []
///
/// [fuzzers.libfuzzer.sanitizers.undefined]
/// flags = ["-fsanitize=undefined"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub fuzzer_defaults: Option<ListOverlay>,
    #[serde(default)]
    pub fuzzers: BTreeMap<String, ProfileOverlay>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListOverlay {
    pub add_arguments: Option<Vec<String>>,
    pub remove_arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverlay {
    pub replace_cc: Option<String>,
    pub replace_cxx: Option<String>,
    pub add_arguments: Option<Vec<String>>,
    pub remove_arguments: Option<Vec<String>>,
    pub sanitizers: Option<BTreeMap<String, SanitizerOverlay>>,
}

impl ProfileOverlay {
    fn apply_to(&self, profile: &mut FuzzerProfile) {
        if let Some(cc) = &self.replace_cc {
            profile.replace_cc.clone_from(cc);
        }
        if let Some(cxx) = &self.replace_cxx {
            profile.replace_cxx.clone_from(cxx);
        }
        if self.add_arguments.is_some() {
            profile.inherit_defaults.add_arguments = false;
        }
        if self.remove_arguments.is_some() {
            profile.inherit_defaults.remove_arguments = false;
        }
        overlay_list(&mut profile.add_arguments, &self.add_arguments);
        overlay_list(&mut profile.remove_arguments, &self.remove_arguments);

        if let Some(sanitizers) = &self.sanitizers {
            for (name, overlay) in sanitizers {
                let sanitizer = profile.sanitizers.entry(name.clone()).or_default();
                overlay_list(&mut sanitizer.flags, &overlay.flags);
                overlay_list(&mut sanitizer.set_env, &overlay.set_env);
                overlay_list(&mut sanitizer.unset_env, &overlay.unset_env);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SanitizerOverlay {
    pub flags: Option<Vec<String>>,
    pub set_env: Option<Vec<String>>,
    pub unset_env: Option<Vec<String>>,
}

impl ConfigFile {
    /// Load an overlay from a TOML file
    ///
    /// # Errors
    /// Unreadable files and invalid TOML are both fatal.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| InterceptError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Parse an overlay; `origin` is only used in error messages
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| InterceptError::Config {
            path: PathBuf::from(origin),
            message: e.to_string(),
        })
    }
}
