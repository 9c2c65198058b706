// Engine discovery against fake executables

use std::fs;
use std::path::PathBuf;
use vidbatch::engine::{EngineLocator, LocateError, executable_name, locate_engine};

#[cfg(unix)]
#[test]
fn test_explicit_path_is_version_checked() {
    use crate::common::fake_engine::{FAKE_VERSION, FakeEngine};

    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default().install(dir.path(), "my-ffmpeg");

    let found = locate_engine(Some(engine.clone())).unwrap();
    assert_eq!(found.path, engine);
    assert_eq!(found.version.as_deref(), Some(FAKE_VERSION));
}

#[test]
fn test_unusable_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-ffmpeg");

    let err = locate_engine(Some(missing.clone())).unwrap_err();
    match err {
        LocateError::Unusable { path, .. } => assert_eq!(path, missing),
        other => panic!("expected Unusable, got {:?}", other),
    }
}

#[test]
fn test_falls_back_to_search_dir() {
    let dir = tempfile::tempdir().unwrap();
    let program = "vidbatch-test-engine-that-is-not-on-path";
    let candidate = dir.path().join(executable_name(program));
    fs::write(&candidate, b"").unwrap();

    let found = EngineLocator::new()
        .program(program)
        .search_dir(dir.path())
        .locate()
        .unwrap();
    assert_eq!(found.path, candidate);
}

#[test]
fn test_not_found_names_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let program = "vidbatch-test-engine-that-is-not-on-path";

    let err = EngineLocator::new()
        .program(program)
        .search_dir(dir.path())
        .locate()
        .unwrap_err();

    let expected: PathBuf = dir.path().join(executable_name(program));
    match &err {
        LocateError::NotFound { program: p, candidate } => {
            assert_eq!(p, program);
            assert_eq!(candidate, &expected);
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(err.to_string().contains("Is ffmpeg installed and in PATH?"));
}
