//! Command handlers.

use crate::{Args, Command, TransferArgs};
use anyhow::{anyhow, bail, Context, Result};
use biscuit_core::bids::postprocess::{
    generate_readme, set_dataset_name, update_participant_group, update_sidecar, write_readme,
};
use biscuit_core::bids::{BidsName, BidsTree, ScanQuery, SubjectKey};
use biscuit_core::config::BidsConfig;
use biscuit_core::copy::{format_size, VerifiedCopier};
use biscuit_core::merge::{
    mark_copied, plan_add_session, plan_add_subject, plan_merge, MergeAction, MergeOptions,
    MergePlan, MergeProgress, MergeReport, Merger,
};
use biscuit_core::metadata::SettingsStore;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run(args: Args) -> Result<()> {
    let store = match args.config_dir {
        Some(dir) => SettingsStore::new(dir),
        None => SettingsStore::user_default()?,
    };

    match args.command {
        Command::Tree { root } => {
            let tree = BidsTree::open(&root)?;
            print!("{}", tree);
        }
        Command::Scans {
            root,
            project,
            subject,
            session,
            task,
            acquisition,
            run,
        } => {
            let tree = BidsTree::open(&root)?;
            let query = ScanQuery {
                project,
                subject,
                session,
                task,
                acquisition,
                run,
            };
            for scan in tree.find_scans(&query) {
                let key = &scan.key.session;
                println!(
                    "{}\tsub-{}\tses-{}\t{}",
                    key.project, key.subject, key.session, scan
                );
            }
        }
        Command::Plan {
            src,
            dst,
            overwrite,
            json,
        } => {
            let dst = resolve_destination(&store, &src, dst)?;
            let options = MergeOptions {
                overwrite,
                ..Default::default()
            };
            let plan = plan_merge(&src, &dst, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{}", plan);
                println!("{} to transfer", format_size(plan.bytes_to_copy()));
            }
        }
        Command::Merge {
            src,
            dst,
            transfer,
            mark_copied: mark,
        } => {
            let dst = resolve_destination(&store, &src, dst)?;
            BidsTree::open_project(&src)
                .with_context(|| format!("{} is not a BIDS project", src.display()))?;
            let options = merge_options(&transfer);
            let plan = plan_merge(&src, &dst, &options)?;
            let report = execute(options, plan).await?;
            if mark {
                if let Some(renamed) = mark_copied(&src)? {
                    println!("Source renamed to {}", renamed.display());
                }
            }
            print_report(&report);
        }
        Command::Add {
            src,
            dst,
            subject,
            session,
            transfer,
        } => {
            let tree = BidsTree::open_project(&src)?;
            let project = tree
                .projects()
                .next()
                .ok_or_else(|| anyhow!("{} contains no project", src.display()))?;
            let subject_key = SubjectKey::new(&project.id, subject);
            let options = merge_options(&transfer);
            let plan = match session {
                Some(session) => {
                    plan_add_session(&tree, &subject_key.session(session), &dst, &options)?
                }
                None => plan_add_subject(&tree, &subject_key, &dst, &options)?,
            };
            let report = execute(options, plan).await?;
            print_report(&report);
        }
        Command::Name {
            subject,
            session,
            task,
            acquisition,
            run,
            ext,
        } => {
            for (_, path) in bids_name(subject, session, task, acquisition, run)
                .recording_files(&ext)?
            {
                println!("{}", path.display());
            }
        }
        Command::Copy {
            src,
            dst,
            algorithm,
        } => {
            let dst = if dst.is_dir() {
                let name = src
                    .file_name()
                    .ok_or_else(|| anyhow!("{} has no file name", src.display()))?;
                dst.join(name)
            } else {
                dst
            };
            let outcome = VerifiedCopier::new()
                .with_algorithm(algorithm)
                .copy(&src, &dst)?;
            println!(
                "Copied {} ({}, {} {})",
                dst.display(),
                format_size(outcome.bytes),
                algorithm,
                outcome.checksum.unwrap_or_default()
            );
        }
        Command::SetName { project, name } => {
            set_dataset_name(&project.join(BidsConfig::DESCRIPTION_FILENAME), &name)?;
        }
        Command::SetGroup {
            project,
            participant,
            group,
        } => {
            let participant_id = if participant.starts_with("sub-") {
                participant
            } else {
                format!("sub-{}", participant)
            };
            let path = project.join(BidsConfig::PARTICIPANTS_FILENAME);
            if !update_participant_group(&path, &participant_id, &group)? {
                bail!("{} is not listed in {}", participant_id, path.display());
            }
        }
        Command::Sidecar { sidecar, fields } => {
            let value: serde_json::Value =
                serde_json::from_str(&fields).context("fields must be a JSON object")?;
            let fields = value
                .as_object()
                .ok_or_else(|| anyhow!("fields must be a JSON object"))?;
            let written = update_sidecar(&sidecar, fields)?;
            if written.is_empty() {
                warn!("No editable fields given");
            } else {
                info!("Updated {}", written.join(", "));
            }
        }
        Command::Readme { project_id, out } => {
            let settings = store
                .project(&project_id)?
                .ok_or_else(|| anyhow!("No settings stored for project {}", project_id))?;
            let text = generate_readme(&settings);
            match out {
                Some(path) => write_readme(&path, &text)?,
                None => print!("{}", text),
            }
        }
    }
    Ok(())
}

fn bids_name(
    subject: String,
    session: Option<String>,
    task: Option<String>,
    acquisition: Option<String>,
    run: Option<u32>,
) -> BidsName {
    let mut name = BidsName::new(subject);
    if let Some(session) = session {
        name = name.session(session);
    }
    if let Some(task) = task {
        name = name.task(task);
    }
    if let Some(acquisition) = acquisition {
        name = name.acquisition(acquisition);
    }
    if let Some(run) = run {
        name = name.run(run);
    }
    name
}

fn merge_options(transfer: &TransferArgs) -> MergeOptions {
    MergeOptions {
        overwrite: transfer.overwrite,
        verify: !transfer.no_verify,
        algorithm: transfer.algorithm,
        mark_copied: false,
    }
}

/// Explicit destination, or `<archive path>/<project name>` from settings.
fn resolve_destination(store: &SettingsStore, src: &Path, dst: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dst) = dst {
        return Ok(dst);
    }
    let settings = store.load_settings()?;
    let archive = settings
        .archive_path
        .ok_or_else(|| anyhow!("No destination given and no archive path configured"))?;
    let name = src
        .file_name()
        .ok_or_else(|| anyhow!("{} has no folder name", src.display()))?;
    Ok(archive.join(name))
}

/// Execute `plan`, printing one line per finished file.
async fn execute(options: MergeOptions, plan: MergePlan) -> Result<MergeReport> {
    info!(
        "{} operations, {} to transfer",
        plan.len(),
        format_size(plan.bytes_to_copy())
    );
    let (tx, mut rx) = mpsc::channel::<MergeProgress>(256);
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            match progress.action {
                MergeAction::Done => println!(
                    "[{}/{}] {}",
                    progress.index + 1,
                    progress.total,
                    progress.relative
                ),
                MergeAction::Retrying => {
                    println!("{} was not copied correctly, retrying...", progress.relative)
                }
                MergeAction::Verifying => println!("{} (verifying)", progress.relative),
                _ => {}
            }
        }
    });

    let report = Merger::new(options).execute_with_progress(plan, tx).await;
    printer.await?;
    Ok(report?)
}

fn print_report(report: &MergeReport) {
    println!(
        "Complete! {} copied, {} overwritten, {} tables merged, {} kept ({})",
        report.copied,
        report.overwritten,
        report.tables_merged,
        report.skipped,
        format_size(report.bytes_copied)
    );
    for path in &report.retried {
        println!("  needed a second attempt: {}", path.display());
    }
}
