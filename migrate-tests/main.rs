#![warn(rust_2018_idioms, unreachable_pub)]
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod defs;
mod memory;
mod test;

fn main() -> ExitCode {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .canonicalize()
        .expect("failed to canonicalize CARGO_MANIFEST_DIR");
    let scenarios_dir = manifest_dir.join("migrate-tests").join("tests");

    let mut scenario_paths = Vec::new();
    collect_scenarios(&scenarios_dir, &mut scenario_paths);
    scenario_paths.sort();
    assert!(
        !scenario_paths.is_empty(),
        "no scenario files under {scenarios_dir:?}",
    );

    let trials = scenario_paths
        .into_iter()
        .map(|scenario_path| {
            let name = scenario_path
                .strip_prefix(&manifest_dir)
                .unwrap_or(&scenario_path)
                .to_string_lossy()
                .into_owned();
            libtest_mimic::Trial::test(name, move || {
                test::run_test(&scenario_path).map_err(Into::into)
            })
        })
        .collect();

    let conclusion = libtest_mimic::run(&libtest_mimic::Arguments::from_args(), trials);
    if conclusion.has_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn collect_scenarios(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in dir
        .read_dir()
        .unwrap_or_else(|e| panic!("failed to read {dir:?}: {e}"))
    {
        let entry = entry.unwrap_or_else(|e| panic!("failed to read {dir:?}: {e}"));
        let entry_path = entry.path();

        if entry_path.is_dir() {
            collect_scenarios(&entry_path, out);
        } else if matches!(
            entry_path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml"),
        ) {
            out.push(entry_path);
        }
    }
}
