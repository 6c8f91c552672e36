//! Per-chute data and system directories, surfaced to the container as
//! volumes and the `PARADROP_DATA_DIR`/`PARADROP_SYSTEM_DIR` environment.

use std::path::PathBuf;

use crate::chute::VolumeBinding;
use crate::context::AgentContext;
use crate::plan::{Action, Target, phase};
use crate::update::{Update, UpdateType};
use crate::Result;

const INTERNAL_DATA_DIR: &str = "/data";
const INTERNAL_SYSTEM_DIR: &str = "/system";

pub(super) fn generate(update: &mut Update) -> Result<()> {
    match update.update_type {
        UpdateType::Create => {
            // A failed create must not leave directories behind.
            update.plan.register_with_abort(
                phase::CREATE_FILES,
                Action::CreateDataDirs,
                Action::RemoveDataDirs,
            );
        }
        // Data persists across updates of a running chute.
        UpdateType::Update => {
            update
                .plan
                .register(phase::CREATE_FILES, Action::CreateDataDirs);
        }
        UpdateType::Delete => {
            update
                .plan
                .register(phase::CLEANUP_FILES, Action::RemoveDataDirs);
        }
        UpdateType::Start | UpdateType::Stop | UpdateType::Restart => {}
    }

    Ok(())
}

fn chute_root(ctx: &AgentContext, name: &str) -> PathBuf {
    ctx.settings.data_dir.join("chutes").join(name)
}

pub(super) fn create_data_dirs(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let root = chute_root(ctx, &update.name);
    let data = root.join("data");
    let system = root.join("system");

    std::fs::create_dir_all(&data)?;
    std::fs::create_dir_all(&system)?;

    let chute = update.chute_mut(Target::New)?;
    chute.cache.volumes = Some(vec![
        VolumeBinding {
            host_path: data,
            bind: INTERNAL_DATA_DIR.to_owned(),
            read_only: false,
        },
        VolumeBinding {
            host_path: system,
            bind: INTERNAL_SYSTEM_DIR.to_owned(),
            read_only: true,
        },
    ]);
    chute.cache.internal_data_dir = Some(INTERNAL_DATA_DIR.to_owned());
    chute.cache.internal_system_dir = Some(INTERNAL_SYSTEM_DIR.to_owned());

    Ok(())
}

pub(super) fn remove_data_dirs(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let root = chute_root(ctx, &update.name);

    if let Err(e) = std::fs::remove_dir_all(&root) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %root.display(), "Could not remove chute directories: {e}");
            update.progress(format!("Could not remove {}: {e}", root.display()));
        }
    }

    Ok(())
}
