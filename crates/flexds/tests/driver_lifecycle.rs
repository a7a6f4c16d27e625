//! Integration tests for the mount and unmount pipelines.
mod common;

use std::error::Error;

use common::{DOWNLOADED_CONTENTS, DOWNLOADED_FILE, Harness};
use flexds::dataset::{DatasetOptions, MountOptions, OptionsStore};
use flexds::driver::VolumeDriver;
use flexds::filesystem::DeviceOps;
use flexds_common::{FlexError, Phase};
use flexds_transfer::ObjectRef;

fn options(json: &str) -> MountOptions {
    MountOptions::from_json(json).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_init_reports_no_attach() {
    let harness = Harness::new();
    let capabilities = harness.driver.init().unwrap();
    assert!(!capabilities.attach);
    assert!(harness.journal.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_invalid_options_have_no_side_effects() {
    let harness = Harness::new();

    for json in [
        r#"{"input/s3Key":"k"}"#,
        r#"{"output/s3Key":"k","input/s3Bucket":"b","input/s3Key":"k"}"#,
    ] {
        let err = harness
            .driver
            .mount(&harness.target, &options(json))
            .await
            .unwrap_err();
        assert!(matches!(err, FlexError::Validation { .. }), "{err}");
    }

    assert!(harness.journal.is_empty());
    assert_eq!(harness.siblings(), vec!["data"]);
}

#[test_log::test(tokio::test)]
async fn test_mount_unmount_cycle_leaves_no_residue() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();

    harness.driver.mount(&harness.target, &options("{}")).await?;

    assert_eq!(
        harness.siblings(),
        vec!["data", "data.input", "data.json", "data.mount", "data.volume"]
    );
    assert_eq!(std::fs::metadata(harness.path(".volume"))?.len(), 1024 * 1024);
    assert!(harness.path(".mount").join("upper").is_dir());
    assert!(harness.path(".mount").join("work").is_dir());
    assert!(harness.device.is_mounted(&harness.target)?);

    harness.driver.unmount(&harness.target).await?;

    assert_eq!(harness.siblings(), vec!["data"]);
    assert!(!harness.device.is_mounted(&harness.target)?);
    assert!(!harness.device.is_mounted(&harness.path(".mount"))?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_mount_steps_run_in_order() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();

    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await?;

    let download = harness.journal.position("download").unwrap();
    let format = harness.journal.position("format ext4").unwrap();
    let loopback = harness.journal.position("mount-loopback").unwrap();
    let overlay = harness.journal.position("mount-overlay").unwrap();
    assert!(download < format && format < loopback && loopback < overlay);

    let entries = harness.journal.entries();
    let input = harness.path(".input");
    let mount = harness.path(".mount");
    assert_eq!(
        entries[overlay],
        format!(
            "mount-overlay {} lowerdir={},upperdir={},workdir={}",
            harness.target.display(),
            input.display(),
            mount.join("upper").display(),
            mount.join("work").display()
        )
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_input_is_downloaded_into_lower_layer() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();

    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await?;

    let input = harness.path(".input");
    assert_eq!(
        std::fs::read_to_string(input.join(DOWNLOADED_FILE))?,
        DOWNLOADED_CONTENTS
    );
    assert_eq!(
        harness.journal.entries()[0],
        format!("download s3://b/k {}", input.display())
    );

    let saved = OptionsStore::new().load(&harness.path(".json"))?;
    assert_eq!(
        saved,
        DatasetOptions {
            input: Some(ObjectRef::new("b", "k")),
            ..Default::default()
        }
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_loopback_failure_rolls_back_in_reverse() {
    let harness = Harness::new();
    harness.device.fail("mount-loopback");

    let err = harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await
        .unwrap_err();

    let FlexError::RolledBack { source, undone } = &err else {
        panic!("expected a rolled back mount, got {err:?}");
    };
    assert_eq!(
        *undone,
        vec![
            Phase::CreateBackingFile,
            Phase::ProvisionInput,
            Phase::SaveOptions
        ]
    );
    assert_eq!(source.phase(), Some(Phase::MountLoopback));
    assert!(
        err.to_string()
            .starts_with("failed to mount file system in a file: failed to mount-loopback"),
        "{err}"
    );

    assert_eq!(harness.siblings(), vec!["data"]);
    assert!(harness.journal.position("mount-overlay").is_none());
}

#[test_log::test(tokio::test)]
async fn test_overlay_failure_unmounts_backing_file() {
    let harness = Harness::new();
    harness.device.fail("mount-overlay");

    let err = harness
        .driver
        .mount(&harness.target, &options("{}"))
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ComposeOverlay));
    let unmount = harness
        .journal
        .position(&format!("unmount {}", harness.path(".mount").display()))
        .unwrap();
    assert!(unmount > harness.journal.position("mount-overlay").unwrap());
    assert_eq!(harness.siblings(), vec!["data"]);
}

#[test_log::test(tokio::test)]
async fn test_format_failure_reports_mkfs() {
    let harness = Harness::new();
    harness.device.fail("format");

    let err = harness
        .driver
        .mount(&harness.target, &options("{}"))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to create file system in a file: failed to execute mkfs command: injected failure"
    );
    assert_eq!(harness.siblings(), vec!["data"]);
}

#[test_log::test(tokio::test)]
async fn test_output_is_uploaded_before_overlay_unmount() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"output/s3Bucket":"results","output/s3Key":"run-1"}"#),
        )
        .await?;

    harness.driver.unmount(&harness.target).await?;

    let upload = harness
        .journal
        .position(&format!(
            "upload s3://results/run-1 {}",
            harness.target.display()
        ))
        .unwrap();
    let unmount = harness
        .journal
        .position(&format!("unmount {}", harness.target.display()))
        .unwrap();
    assert!(upload < unmount);
    assert_eq!(harness.siblings(), vec!["data"]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_second_mount_with_same_options_is_noop() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    let opts = options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#);

    harness.driver.mount(&harness.target, &opts).await?;
    let calls = harness.journal.entries().len();

    harness.driver.mount(&harness.target, &opts).await?;

    assert_eq!(harness.journal.entries().len(), calls);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_second_mount_with_other_options_fails() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await?;
    let calls = harness.journal.entries().len();

    let err = harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"other"}"#),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FlexError::Validation { .. }));
    assert!(err.to_string().contains("already mounted with different options"));
    assert_eq!(harness.journal.entries().len(), calls);

    // The first mount is untouched.
    let saved = OptionsStore::new().load(&harness.path(".json"))?;
    assert_eq!(saved.input, Some(ObjectRef::new("b", "k")));
    assert!(harness.device.is_mounted(&harness.target)?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_mount_reconciles_incomplete_attempt() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();

    // A killed attempt left its options and a partial input behind.
    OptionsStore::new().save(&harness.path(".json"), &DatasetOptions::default())?;
    std::fs::create_dir(harness.path(".input"))?;
    std::fs::write(harness.path(".input").join("partial"), b"x")?;

    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await?;

    assert!(!harness.path(".input").join("partial").exists());
    assert!(harness.path(".input").join(DOWNLOADED_FILE).exists());
    assert!(harness.device.is_mounted(&harness.target)?);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_unmount_without_options_succeeds() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();

    harness.driver.unmount(&harness.target).await?;

    assert!(harness.journal.is_empty());
    assert_eq!(harness.siblings(), vec!["data"]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_unmount_with_malformed_options_fails() {
    let harness = Harness::new();
    std::fs::write(harness.path(".json"), b"{\"Input\":").unwrap();

    let err = harness.driver.unmount(&harness.target).await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::LoadOptions));
    assert!(harness.journal.is_empty());
    assert!(harness.path(".json").exists());
}

#[test_log::test(tokio::test)]
async fn test_teardown_errors_are_aggregated_and_retryable() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    harness
        .driver
        .mount(
            &harness.target,
            &options(
                r#"{"input/s3Bucket":"b","input/s3Key":"k","output/s3Bucket":"results","output/s3Key":"run-1"}"#,
            ),
        )
        .await?;
    harness.device.fail("unmount");

    let err = harness.driver.unmount(&harness.target).await.unwrap_err();

    let FlexError::Teardown { errors } = &err else {
        panic!("expected aggregated errors, got {err:?}");
    };
    let phases: Vec<_> = errors.iter().map(FlexError::phase).collect();
    assert_eq!(
        phases,
        vec![
            Some(Phase::DecomposeOverlay),
            Some(Phase::UnmountLoopback),
            Some(Phase::DestroyBackingFile),
            Some(Phase::DestroyInput)
        ]
    );
    assert!(err.to_string().starts_with("4 unmount steps failed"));

    // Layers under a live mount are kept and the options survive for a retry.
    assert!(harness.path(".mount").join("upper").is_dir());
    assert!(harness.path(".volume").is_file());
    assert!(harness.path(".input").join(DOWNLOADED_FILE).is_file());
    assert!(harness.path(".json").exists());
    assert!(harness.device.is_mounted(&harness.target)?);

    harness.device.heal();
    harness.driver.unmount(&harness.target).await?;
    assert_eq!(harness.siblings(), vec!["data"]);

    let uploads = harness
        .journal
        .entries()
        .iter()
        .filter(|entry| entry.starts_with("upload"))
        .count();
    assert_eq!(uploads, 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_released_layers_are_deleted_when_overlay_is_busy() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await?;

    // Only the overlay refuses to go away.
    let device = harness.device.clone();
    let merged = harness.target.clone();
    harness.device.before("unmount", move |target| {
        if target == merged {
            device.fail("unmount");
        } else {
            device.heal();
        }
    });

    let err = harness.driver.unmount(&harness.target).await.unwrap_err();

    let FlexError::Teardown { errors } = &err else {
        panic!("expected aggregated errors, got {err:?}");
    };
    let phases: Vec<_> = errors.iter().map(FlexError::phase).collect();
    assert_eq!(
        phases,
        vec![Some(Phase::DecomposeOverlay), Some(Phase::DestroyInput)]
    );
    assert!(
        matches!(&errors[1], FlexError::Phase { source, .. } if matches!(**source, FlexError::InUse { .. })),
        "{}",
        errors[1]
    );
    assert_eq!(
        harness.siblings(),
        vec!["data", "data.input", "data.json"]
    );
    assert!(harness.path(".input").join(DOWNLOADED_FILE).is_file());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_rollback_keeps_original_error() {
    let harness = Harness::new();
    // Swap the backing file for a directory so deleting it fails.
    harness.device.before("mount-loopback", |file| {
        std::fs::remove_file(file).unwrap();
        std::fs::create_dir(file).unwrap();
    });
    harness.device.fail("mount-loopback");

    let err = harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"input/s3Bucket":"b","input/s3Key":"k"}"#),
        )
        .await
        .unwrap_err();

    let FlexError::RolledBack { source, undone } = &err else {
        panic!("expected a rolled back mount, got {err:?}");
    };
    assert_eq!(source.phase(), Some(Phase::MountLoopback));
    assert_eq!(err.phase(), Some(Phase::MountLoopback));
    assert_eq!(
        *undone,
        vec![
            Phase::CreateBackingFile,
            Phase::ProvisionInput,
            Phase::SaveOptions
        ]
    );
    assert!(
        err.to_string()
            .starts_with("failed to mount file system in a file: failed to mount-loopback"),
        "{err}"
    );

    // The other steps were still undone.
    assert_eq!(harness.siblings(), vec!["data", "data.volume"]);
}

#[test_log::test(tokio::test)]
async fn test_upload_failure_is_reported() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new();
    harness
        .driver
        .mount(
            &harness.target,
            &options(r#"{"output/s3Bucket":"results","output/s3Key":"run-1"}"#),
        )
        .await?;
    harness.transfer.fail_uploads();

    let err = harness.driver.unmount(&harness.target).await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::HandleOutput));
    assert!(
        err.to_string()
            .starts_with("failed to upload output: failed to upload data to object storage"),
        "{err}"
    );
    assert!(!harness.device.is_mounted(&harness.target)?);
    Ok(())
}
