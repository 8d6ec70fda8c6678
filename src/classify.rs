//! Lexical classification of compiler command lines
//!
//! Finds source inputs and the `-o` output in a single left-to-right
//! scan. No file system access is performed.

use std::path::Path;

/// Extensions of C, C++, Objective-C and assembler sources
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "i", "ii", "m", "mi", "mm", "mii", "C", "cc", "CC", "cp", "cpp", "cxx", "c++", "C++",
    "txx", "s", "S", "sx", "asm",
];

/// Inputs and output found in one command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub input_files: Vec<String>,
    /// Empty when the command line has no `-o`
    pub output_file: String,
}

/// Whether `arg` names a recognized source file
pub fn is_source_file(arg: &str) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Classify the arguments of a compiler invocation
pub fn classify(arguments: &[String]) -> CommandLine {
    let mut result = CommandLine::default();
    let mut output_follows = false;

    for arg in arguments {
        if output_follows {
            output_follows = false;
            result.output_file.clone_from(arg);
            continue;
        }
        if arg == "-o" {
            output_follows = true;
            continue;
        }
        if is_source_file(arg) {
            result.input_files.push(arg.clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_source_with_output() {
        let cl = classify(&args(&["cc", "-O2", "a.c", "-o", "a.o"]));
        assert_eq!(cl.input_files, vec!["a.c"]);
        assert_eq!(cl.output_file, "a.o");
    }

    #[test]
    fn test_multiple_sources_in_order() {
        let cl = classify(&args(&["cc", "x.c", "y.cpp", "z.S", "-o", "m.o"]));
        assert_eq!(cl.input_files, vec!["x.c", "y.cpp", "z.S"]);
        assert_eq!(cl.output_file, "m.o");
    }

    #[test]
    fn test_output_token_never_an_input() {
        let cl = classify(&args(&["cc", "-E", "in.c", "-o", "out.i"]));
        assert_eq!(cl.input_files, vec!["in.c"]);
        assert_eq!(cl.output_file, "out.i");
    }

    #[test]
    fn test_linker_only_has_no_inputs() {
        let cl = classify(&args(&["cc", "a.o", "b.o", "-lm", "-o", "prog"]));
        assert!(cl.input_files.is_empty());
        assert_eq!(cl.output_file, "prog");
    }

    #[test]
    fn test_no_output_flag() {
        let cl = classify(&args(&["cc", "-c", "dir/file.cc"]));
        assert_eq!(cl.input_files, vec!["dir/file.cc"]);
        assert_eq!(cl.output_file, "");
    }

    #[test]
    fn test_trailing_dash_o() {
        let cl = classify(&args(&["cc", "a.c", "-o"]));
        assert_eq!(cl.input_files, vec!["a.c"]);
        assert_eq!(cl.output_file, "");
    }

    #[test]
    fn test_extension_is_case_sensitive() {
        assert!(is_source_file("main.C"));
        assert!(is_source_file("lib.c++"));
        assert!(is_source_file("boot.asm"));
        assert!(!is_source_file("main.CPP"));
        assert!(!is_source_file("header.h"));
        assert!(!is_source_file("-DVERSION=1.c0"));
        assert!(!is_source_file("Makefile"));
    }

    #[test]
    fn test_empty_arguments() {
        assert_eq!(classify(&[]), CommandLine::default());
    }
}
