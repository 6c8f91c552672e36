//! State checks: the update type must agree with what is deployed.

use crate::context::AgentContext;
use crate::plan::{Action, phase};
use crate::update::{Update, UpdateType};
use crate::{Error, Result};

pub(super) fn generate(update: &mut Update) -> Result<()> {
    update.plan.register(phase::CHECK_STATE, Action::CheckState);
    Ok(())
}

pub(super) fn check_state(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let exists = update.old.is_some() || ctx.chutes.contains(&update.name);

    match update.update_type {
        UpdateType::Create => {
            if exists {
                return Err(Error::validation(format!(
                    "chute '{}' already exists; use update instead",
                    update.name
                )));
            }
            if update.new.is_none() {
                return Err(Error::validation("create request carries no chute"));
            }
        }
        UpdateType::Update => {
            if !exists {
                return Err(Error::validation(format!(
                    "no chute named '{}' to update",
                    update.name
                )));
            }
            if update.new.is_none() {
                return Err(Error::validation("update request carries no chute"));
            }
        }
        UpdateType::Delete | UpdateType::Start | UpdateType::Stop | UpdateType::Restart => {
            if !exists {
                return Err(Error::validation(format!(
                    "no chute named '{}'",
                    update.name
                )));
            }
        }
    }

    Ok(())
}
