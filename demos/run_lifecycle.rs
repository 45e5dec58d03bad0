//! Run Lifecycle Example
//!
//! Walks a run through locking, heartbeats, backup and restore, with the
//! resources handed out as registry handles the way a tracking server would.
//!
//! Run with: cargo run --example run_lifecycle

use aimstore::logging::init_logging;
use aimstore::object::{path, AimObject};
use aimstore::repo::{Repo, RepoConfig, RunProperties};
use aimstore::resource::{HandleRequest, ResourceFactory, ResourceRegistry};
use aimstore::run::{is_run_active, progress_age, LockWait, RunLock};
use aimstore::tree::TreeView;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("aimstore=debug");
    println!("=== aimstore Run Lifecycle ===\n");

    let dir = tempfile::tempdir()?;
    let config = RepoConfig::builder()
        .heartbeat_interval(Duration::from_millis(100))
        .lock_wait(LockWait::Timeout(Duration::from_millis(200)))
        .build()?;
    let repo = Arc::new(Repo::init(dir.path(), config)?);
    let registry = Arc::new(ResourceRegistry::new());
    let factory = ResourceFactory::new(Arc::clone(&repo), Arc::clone(&registry));
    let run_hash = repo.new_run_hash();

    // -------------------------------------------------------------------------
    // 1. Client requests: lock, heartbeat, trees
    // -------------------------------------------------------------------------
    println!("1. Requesting resources for run {run_hash}...");

    let requests = [
        HandleRequest::RunLock {
            run_hash: run_hash.clone(),
        },
        HandleRequest::RunHeartbeat {
            run_hash: run_hash.clone(),
        },
        HandleRequest::Tree {
            name: "meta".to_string(),
            sub: Some(run_hash.clone()),
            read_only: false,
            from_union: false,
        },
        HandleRequest::Tree {
            name: "seqs".to_string(),
            sub: Some(run_hash.clone()),
            read_only: false,
            from_union: false,
        },
        HandleRequest::RunProperties {
            run_hash: run_hash.clone(),
            read_only: false,
        },
    ];
    let mut handles = Vec::new();
    for request in &requests {
        let id = factory.request(request)?;
        println!("   {:?} -> {id}", request.kind());
        handles.push(id);
    }
    let lock = registry.dereference::<RunLock>(&handles[0])?;
    println!("   Lock owner: {:?}", RunLock::owner(repo.path(), lock.run_hash())?);

    // A second owner cannot take the lock
    match RunLock::acquire(repo.path(), &run_hash, LockWait::NoWait) {
        Err(e) => println!("   Second owner refused: {e}"),
        Ok(_) => println!("   Unexpectedly acquired the lock twice"),
    }

    // -------------------------------------------------------------------------
    // 2. Record data while the heartbeat ticks
    // -------------------------------------------------------------------------
    println!("\n2. Recording data...");

    let meta = registry.dereference::<TreeView>(&handles[2])?;
    let seqs = registry.dereference::<TreeView>(&handles[3])?;
    let props = registry.dereference::<RunProperties>(&handles[4])?;
    props.set_name("lifecycle-demo")?;
    meta.set(&path(["epochs"]), &AimObject::Int(3))?;
    seqs.set(&path(["accuracy"]), &AimObject::Array(vec![AimObject::Float(0.7)]))?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    println!(
        "   Active: {} (flag age {:?})",
        is_run_active(repo.path(), &run_hash, Duration::from_secs(1))?,
        progress_age(repo.path(), &run_hash)?
    );

    // -------------------------------------------------------------------------
    // 3. Back up, damage, restore
    // -------------------------------------------------------------------------
    println!("\n3. Backup and restore...");

    let archive = repo.backup_run(&run_hash)?;
    println!("   Archive: {}", archive.display());
    meta.set(&path(["epochs"]), &AimObject::Int(-1))?;

    repo.restore_run_backup(&run_hash)?;
    let restored = repo.request_tree("meta", Some(&run_hash), true, false)?;
    println!("   epochs after restore: {:?}", restored.get(&path(["epochs"]))?);

    // -------------------------------------------------------------------------
    // 4. Release everything
    // -------------------------------------------------------------------------
    println!("\n4. Releasing handles...");

    drop((lock, meta, seqs, props));
    let released = registry.release_all();
    repo.status_reporter(&run_hash).report_termination()?;
    println!("   Released {released} handles");
    println!(
        "   Active after termination: {}",
        is_run_active(repo.path(), &run_hash, Duration::from_secs(1))?
    );

    repo.close()?;
    println!("\n=== Done ===");
    Ok(())
}
