#![no_main]

use build_intercept::classify::classify;
use build_intercept::compilation_db;
use build_intercept::protocol::InterceptedCommand;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let arguments: Vec<String> = text.split('\0').map(str::to_string).collect();

    let cl = classify(&arguments);
    let db = compilation_db::build(&[InterceptedCommand {
        original_arguments: Vec::new(),
        replaced_arguments: arguments,
        directory: "/".to_string(),
    }]);
    assert_eq!(db.len(), cl.input_files.len());
});
