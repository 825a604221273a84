use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;

use ShardSnap::cluster::ObjectRef;
use ShardSnap::report::{read_output, render_text, write_output, BackupReport, Phase, SnapshotOutcome};
use ShardSnap::topology::VolumeTarget;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("sstest-report-{prefix}-{pid}-{t}-{id}"))
}

fn target(volume: &str, shard: &str, ordinal: u32) -> VolumeTarget {
    VolumeTarget {
        volume_name: volume.into(),
        shard: shard.into(),
        ordinal,
        template: "data".into(),
    }
}

fn sample() -> BackupReport {
    BackupReport {
        run_token: "1700000000".into(),
        namespace: "db".into(),
        outcomes: vec![
            SnapshotOutcome::succeeded(
                target("data-s0-0", "s0", 0),
                ObjectRef::new("db", "data-s0-0-1700000000"),
                Duration::from_secs(90),
            ),
            SnapshotOutcome::failed(
                target("data-s1-0", "s1", 0),
                Some(ObjectRef::new("db", "data-s1-0-1700000000")),
                Duration::from_millis(250),
                "volumesnapshot data-s1-0-1700000000 failed: csi: busy",
            ),
        ],
        total_duration: Duration::from_millis(90_500),
        resume_error: None,
    }
}

#[test]
fn output_file_survives_a_reread() -> Result<()> {
    let root = unique_root("reread");
    let path = root.join("nested").join("output.json");
    let report = sample();

    report.write_output(&path)?;
    let out = read_output(&path)?;

    assert_eq!(out, report.to_output());
    assert_eq!(out.total_duration, "1m30.5s");
    assert_eq!(out.host_backup_stats[0].duration, "1m30s");
    assert_eq!(out.host_backup_stats[1].duration, "250ms");
    assert_eq!(out.host_backup_stats[1].snapshot.as_deref(), Some("data-s1-0-1700000000"));
    // tmp file is renamed away
    assert!(!path.with_extension("tmp").exists());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn rewrite_replaces_previous_report() -> Result<()> {
    let root = unique_root("rewrite");
    fs::create_dir_all(&root)?;
    let path = root.join("output.json");

    let mut first = sample().to_output();
    write_output(&path, &first)?;
    first.host_backup_stats.truncate(1);
    first.phase = Phase::Succeeded;
    write_output(&path, &first)?;

    let out = read_output(&path)?;
    assert_eq!(out.host_backup_stats.len(), 1);
    assert_eq!(out.phase, Phase::Succeeded);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn garbage_output_is_a_parse_error() -> Result<()> {
    let root = unique_root("garbage");
    fs::create_dir_all(&root)?;
    let path = root.join("output.json");
    fs::write(&path, b"[1,2,3]")?;

    let err = read_output(&path).unwrap_err();
    assert!(format!("{err:#}").contains("parse backup output"));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn text_rendering_has_one_line_per_target() {
    let text = render_text(&sample().to_output());
    assert!(text.starts_with("Backup run 1700000000 (namespace db)"));
    assert!(text.contains("Targets: 2"));
    assert_eq!(text.lines().filter(|l| l.trim_start().starts_with("- ")).count(), 2);
    assert!(text.contains("(volumesnapshot data-s1-0-1700000000 failed: csi: busy)"));
}
