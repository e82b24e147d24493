//! CommandBuilder against real shell stages in a scratch directory.

use shipgate_ci::{CommandBuilder, StageConfig};
use shipgate_core::config::{BuildSettings, StageSettings};
use shipgate_core::{BuildError, Builder, SourceRef};

fn source() -> SourceRef {
    SourceRef::branch("main", "3f2a9c1e5d")
}

#[tokio::test]
async fn stages_run_in_order_and_output_becomes_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let builder = CommandBuilder::new(dir.path(), "dist/bundle.txt")
        .with_stage(StageConfig::shell("prepare", "mkdir -p dist", 30))
        .with_stage(StageConfig::shell(
            "bundle",
            "printf 'bundle:%s' \"$SHIPGATE_COMMIT\" > dist/bundle.txt",
            30,
        ));

    let output = builder.build(&source()).await.unwrap();
    assert_eq!(output.bytes, b"bundle:3f2a9c1e5d");
}

#[tokio::test]
async fn first_failing_stage_stops_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("later-ran");
    let builder = CommandBuilder::new(dir.path(), "out")
        .with_stage(StageConfig::shell("lint", "echo 'lint: 3 errors' >&2; exit 3", 30))
        .with_stage(StageConfig::shell(
            "bundle",
            format!("touch {}", marker.display()),
            30,
        ));

    let err = builder.build(&source()).await.unwrap_err();
    match err {
        BuildError::NonZeroExit {
            stage,
            code,
            stderr,
        } => {
            assert_eq!(stage, "lint");
            assert_eq!(code, 3);
            assert!(stderr.contains("3 errors"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn disabled_stages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let builder = CommandBuilder::new(dir.path(), "out.txt")
        .with_stage(StageConfig::shell("broken", "exit 1", 30).disabled())
        .with_stage(StageConfig::shell("write", "printf ok > out.txt", 30));

    let output = builder.build(&source()).await.unwrap();
    assert_eq!(output.bytes, b"ok");
}

#[tokio::test]
async fn missing_output_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let builder = CommandBuilder::new(dir.path(), "never-written")
        .with_stage(StageConfig::shell("noop", "true", 30));

    let err = builder.build(&source()).await.unwrap_err();
    assert!(matches!(err, BuildError::Reported(msg) if msg.contains("never-written")));
}

#[tokio::test]
async fn stage_timeout_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let builder = CommandBuilder::new(dir.path(), "out")
        .with_stage(StageConfig::new("slow", vec!["sleep".into(), "5".into()], 1));

    let err = builder.build(&source()).await.unwrap_err();
    assert!(matches!(err, BuildError::Timeout { stage, .. } if stage == "slow"));
}

#[tokio::test]
async fn built_from_configured_settings() {
    let dir = tempfile::tempdir().unwrap();
    let settings = BuildSettings {
        workdir: dir.path().to_path_buf(),
        output: "artifact.bin".into(),
        stages: vec![StageSettings {
            name: "write".into(),
            command: vec!["sh".into(), "-c".into(), "printf v7 > artifact.bin".into()],
            timeout_secs: 30,
            enabled: true,
        }],
    };
    let builder = CommandBuilder::from_settings(&settings);
    assert_eq!(builder.stages().len(), 1);

    let output = builder.build(&source()).await.unwrap();
    assert_eq!(output.bytes, b"v7");
}
