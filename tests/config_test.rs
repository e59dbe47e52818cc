mod common;

use common::{create_test_dir, manual_clock};
use export_reconciler::{read_config, ConfigError, NameVariant};
use std::time::Duration;

const CONFIG: &str = r#"{
    "downloadDir": "DOWNLOADS",
    "targetDate": "2025-08-13",
    "verificationTimeoutSecs": 6,
    "passCooldownSecs": 1,
    "deliverables": [
        {
            "baseName": "Household mother",
            "locator": "https://exports/mother",
            "pattern": {"variant": "simple"}
        },
        {
            "baseName": "muso_groupes",
            "heavy": true,
            "locator": "https://exports/groupes",
            "pattern": {"variant": "fixed-creation-date", "createdDate": "2025-03-25"},
            "exportWindow": {"start": "2025-01-01"}
        }
    ]
}"#;

fn write_config_file(dir: &std::path::Path, downloads: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("reconciler.json");
    let json = CONFIG.replace("DOWNLOADS", &downloads.display().to_string());
    std::fs::write(&path, json).unwrap();
    path
}

#[tokio::test]
async fn test_read_config_applies_defaults_and_overrides() {
    let temp = create_test_dir();
    let path = write_config_file(temp.path(), &temp.path().join("downloads"));

    let config = read_config(&path).await.unwrap();

    assert_eq!(config.deliverables.len(), 2);
    assert_eq!(config.max_global_passes, 3);
    assert_eq!(config.pass_cooldown(), Duration::from_secs(1));

    let groupes = &config.deliverables[1];
    assert!(groupes.heavy);
    assert!(matches!(
        groupes.pattern,
        NameVariant::FixedCreationDate { .. }
    ));
    assert_eq!(config.max_retries_for(groupes), config.heavy_max_retries);
    assert_eq!(
        config.verification_timeout_for(groupes),
        Duration::from_secs(config.heavy_verification_timeout_secs)
    );
}

#[tokio::test]
async fn test_read_config_rejects_duplicate_deliverables() {
    let temp = create_test_dir();
    let path = temp.path().join("bad.json");
    std::fs::write(
        &path,
        r#"{"downloadDir": "/tmp/x", "deliverables": [
            {"baseName": "a", "pattern": {"variant": "simple"}},
            {"baseName": "A", "pattern": {"variant": "simple"}}
        ]}"#,
    )
    .unwrap();

    let err = read_config(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateDeliverable(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_trigger_run_from_config_file() {
    use export_reconciler::{summarize, CommandTrigger, RetryCoordinator};
    use std::sync::Arc;

    let temp = create_test_dir();
    let downloads = temp.path().join("downloads");
    let path = write_config_file(temp.path(), &downloads);
    let config = read_config(&path).await.unwrap();

    // Simulates the browser: saves the file the platform would produce
    let script = r#"
        case "$EXPORT_NAME" in
            muso_groupes) name="muso_groupes (created 2025-03-25) $EXPORT_TARGET_DATE (1).xlsx" ;;
            *) name="$EXPORT_NAME $EXPORT_TARGET_DATE.xlsx" ;;
        esac
        printf 'PK-%s' "$1" > "$EXPORT_DOWNLOAD_DIR/$name"
    "#;
    let trigger = CommandTrigger::new(
        "sh",
        vec!["-c".to_string(), script.to_string(), "trigger".to_string()],
    );

    let result = RetryCoordinator::new(config, Arc::new(trigger), manual_clock())
        .run()
        .await
        .unwrap();

    assert!(result.is_complete(), "failed: {:?}", result.failed);
    let groupes = result.find_succeeded("muso_groupes").unwrap();
    assert_eq!(
        groupes.path,
        downloads.join("muso_groupes (created 2025-03-25) 2025-08-13 (1).xlsx")
    );
    assert_eq!(
        std::fs::read_to_string(&groupes.path).unwrap(),
        "PK-https://exports/groupes"
    );

    let report = summarize(&result);
    assert_eq!(report.succeeded_count, 2);
    assert!(report.final_missing.is_empty());
}
