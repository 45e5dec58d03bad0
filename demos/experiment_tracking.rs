//! Experiment Tracking Example
//!
//! Records a small training run into a temporary repository: run properties,
//! hyperparameters with schema widening, per-epoch metrics, and a read back
//! through the union of all runs.
//!
//! Run with: cargo run --example experiment_tracking

use aimstore::logging::init_logging;
use aimstore::object::{path, AimObject, AimObjectKey};
use aimstore::repo::{run_meta_path, Repo, RepoConfig};
use aimstore::Error;

fn main() -> anyhow::Result<()> {
    init_logging("aimstore=info");
    println!("=== aimstore Experiment Tracking ===\n");

    let dir = tempfile::tempdir()?;
    let repo = Repo::init(dir.path(), RepoConfig::default())?;

    // -------------------------------------------------------------------------
    // 1. Create a run and describe it
    // -------------------------------------------------------------------------
    println!("1. Creating run...");

    let run_hash = repo.new_run_hash();
    let _lock = repo.request_run_lock(&run_hash)?;
    let props = repo.request_props(&run_hash, false)?;
    props.ensure_created_at()?;
    props.set_name("resnet50-baseline")?;
    props.set_experiment("imagenet")?;
    props.add_tag("gpu")?;

    println!("   Run hash: {run_hash}");
    println!("   Name: {:?}", props.name()?);
    println!("   Created: {:?}", props.created_at()?);
    println!("   Tags: {:?}", props.tags()?);

    // -------------------------------------------------------------------------
    // 2. Record hyperparameters
    // -------------------------------------------------------------------------
    println!("\n2. Recording hyperparameters...");

    let meta = repo.request_tree("meta", Some(&run_hash), false, false)?;
    let mut hparams = run_meta_path(&run_hash);
    hparams.push(AimObjectKey::from("hparams"));
    meta.set(
        &hparams,
        &AimObject::object([
            ("model", AimObject::from("resnet50")),
            ("batch_size", AimObject::Int(32)),
            ("learning_rate", AimObject::Int(1)),
            ("layers", AimObject::Array(vec![AimObject::Int(64), AimObject::Int(128)])),
        ]),
    )?;

    // An int slot accepts a float by widening to "number"
    let mut lr = hparams.clone();
    lr.push(AimObjectKey::from("learning_rate"));
    meta.set(&lr, &AimObject::Float(0.001))?;
    println!("   learning_rate schema: {:?}", meta.typename(&lr)?);

    // A string does not fit a numeric slot
    match meta.set(&lr, &AimObject::from("fast")) {
        Err(Error::TypeConflict { path, dtype, base_dtype }) => {
            println!("   Rejected {dtype} at {path} (recorded: {base_dtype})");
        }
        other => println!("   Unexpected result: {other:?}"),
    }

    // -------------------------------------------------------------------------
    // 3. Log metrics per epoch
    // -------------------------------------------------------------------------
    println!("\n3. Simulating training (5 epochs)...");

    let seqs = repo.request_tree("seqs", Some(&run_hash), false, false)?;
    for epoch in 0..5_i64 {
        #[allow(clippy::cast_precision_loss)]
        let loss = 2.5 / (epoch as f64 + 1.0) + 0.1;
        seqs.set(
            &[AimObjectKey::from("loss"), AimObjectKey::Int(epoch)],
            &AimObject::Float(loss),
        )?;
        println!("   Epoch {epoch}: loss={loss:.4}");
    }
    println!("   Logged steps: {}", seqs.keys(&path(["loss"]))?.len());

    // -------------------------------------------------------------------------
    // 4. Query across runs
    // -------------------------------------------------------------------------
    println!("\n4. Reading through the union tree...");

    let union = repo.request_tree("meta", None, true, true)?;
    for hash in repo.list_runs()? {
        let mut name = run_meta_path(&hash);
        name.extend(path(["props", "name"]));
        println!("   {hash}: {:?}", union.get(&name)?);
    }

    repo.close()?;
    println!("\n=== Done ===");
    Ok(())
}
