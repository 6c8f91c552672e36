//! Resource limits: validated here, rendered into the container host config
//! at create time.

use crate::plan::{Action, Target, phase};
use crate::update::{Update, UpdateType};
use crate::{Error, Result};

/// Docker refuses memory limits under 4 MiB.
const MIN_MEMORY_BYTES: i64 = 4 * 1024 * 1024;

pub(super) fn generate(update: &mut Update) -> Result<()> {
    if matches!(update.update_type, UpdateType::Create | UpdateType::Update) {
        update
            .plan
            .register(phase::RESOURCE_LIMITS, Action::SetResourceLimits);
    }

    Ok(())
}

pub(super) fn set_limits(update: &mut Update) -> Result<()> {
    let Some(config) = update.chute(Target::New)?.host_config.clone() else {
        return Ok(());
    };

    if let Some(cpu_shares) = config.cpu_shares {
        if cpu_shares < 2 {
            return Err(Error::validation(format!(
                "cpu_shares must be at least 2, got {cpu_shares}"
            )));
        }
        update.progress(format!("Limiting CPU shares to {cpu_shares}"));
    }

    if let Some(memory) = config.memory {
        if memory < MIN_MEMORY_BYTES {
            return Err(Error::validation(format!(
                "memory limit must be at least {MIN_MEMORY_BYTES} bytes, got {memory}"
            )));
        }
        update.progress(format!("Limiting memory to {memory} bytes"));
    }

    Ok(())
}
