use std::fs::File;
use std::path::Path;

use kestrel_hooks::script_harness::{
    load_fixture, run_fixture, FixtureScript, HarnessFixture, HarnessOutput, HarnessStep,
};

#[test]
fn convoy_fixture_matches_golden() {
    assert_fixture_matches("tests/fixtures/hook_harness/convoy.json", "tests/fixtures/hook_harness/convoy.golden.json");
}

#[test]
fn convoy_fixture_is_stable_across_runs() {
    let fixture = load_fixture("tests/fixtures/hook_harness/convoy.json").expect("load fixture");
    let first = run_fixture(&fixture).expect("run fixture first time");
    let second = run_fixture(&fixture).expect("run fixture second time");
    assert_eq!(first, second, "fixture should produce identical output across runs");
}

#[test]
fn excluded_stacks_are_not_saved_by_the_harness() {
    let fixture = HarnessFixture {
        no_save_stacks: Some(vec!["land".to_string()]),
        missions: vec![FixtureScript {
            name: "watch".to_string(),
            source: Some(r#"fn create() { hook_add("land", "a"); hook_add("enter", "b"); }"#.to_string()),
            path: None,
        }],
        events: Vec::new(),
        steps: vec![HarnessStep::SaveReload],
    };
    let output = run_fixture(&fixture).expect("run fixture");
    assert_eq!(output.results[0].saved, Some(1));
    let stacks: Vec<&str> = output.final_hooks.iter().map(|hook| hook.stack.as_str()).collect();
    assert_eq!(stacks, vec!["enter"], "the excluded land hook should be gone after reload");
}

#[test]
fn script_without_source_is_rejected() {
    let fixture = HarnessFixture {
        no_save_stacks: None,
        missions: vec![FixtureScript { name: "empty".to_string(), source: None, path: None }],
        events: Vec::new(),
        steps: Vec::new(),
    };
    let err = run_fixture(&fixture).unwrap_err();
    assert!(err.to_string().contains("empty"), "error should name the script: {err}");
}

fn assert_fixture_matches(fixture_path: &str, golden_path: &str) {
    let fixture = load_fixture(fixture_path).expect("load fixture");
    let output = run_fixture(&fixture).expect("run fixture");
    let golden_file = File::open(Path::new(golden_path)).expect("open golden");
    let golden: HarnessOutput = serde_json::from_reader(golden_file).expect("parse golden");
    assert_eq!(output, golden, "fixture {} diverged from golden {}", fixture_path, golden_path);
}
