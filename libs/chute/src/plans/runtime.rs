//! Container runtime operations: images, containers, and the veth glue that
//! connects chute interfaces to their host bridges.

use crate::container::container_spec;
use crate::context::AgentContext;
use crate::error::ContainerError;
use crate::plan::{Action, Target, phase};
use crate::update::{Update, UpdateType};
use crate::{Error, Result};

pub(super) fn generate(update: &mut Update) -> Result<()> {
    let plan = &mut update.plan;

    match update.update_type {
        UpdateType::Create => {
            plan.register_with_abort(
                phase::PREPARE_IMAGE,
                Action::PrepareImage,
                Action::RemoveImage(Target::New),
            );
            plan.register_with_abort(
                phase::CREATE_CONTAINER,
                Action::CreateContainer,
                Action::RemoveContainer(Target::New),
            );
            plan.register(phase::START_CONTAINER, Action::StartContainer(Target::New));
            plan.register(
                phase::CONNECT_INTERFACES,
                Action::SetupNetInterfaces(Target::New),
            );
        }
        UpdateType::Update => {
            plan.register_with_abort(
                phase::STOP_RUNTIME,
                Action::StopContainer(Target::Old),
                Action::StartContainer(Target::Old),
            );
            plan.register_with_abort(
                phase::PREPARE_IMAGE,
                Action::PrepareImage,
                Action::RemoveImage(Target::New),
            );
            plan.register(
                phase::REPLACE_CONTAINER,
                Action::RemoveContainer(Target::Old),
            );
            plan.register_with_abort(
                phase::CREATE_CONTAINER,
                Action::CreateContainer,
                Action::RemoveContainer(Target::New),
            );
            plan.register(phase::START_CONTAINER, Action::StartContainer(Target::New));
            plan.register(
                phase::CONNECT_INTERFACES,
                Action::SetupNetInterfaces(Target::New),
            );
            plan.register(phase::CLEANUP_IMAGE, Action::RemoveImage(Target::Old));
        }
        UpdateType::Delete => {
            plan.register(phase::STOP_RUNTIME, Action::RemoveContainer(Target::Old));
            plan.register(phase::CLEANUP_IMAGE, Action::RemoveImage(Target::Old));
        }
        UpdateType::Start => {
            plan.register(phase::START_CONTAINER, Action::StartContainer(Target::Old));
            plan.register(
                phase::CONNECT_INTERFACES,
                Action::SetupNetInterfaces(Target::Old),
            );
        }
        UpdateType::Stop => {
            plan.register(phase::STOP_RUNTIME, Action::StopContainer(Target::Old));
        }
        UpdateType::Restart => {
            plan.register(phase::STOP_RUNTIME, Action::StopContainer(Target::Old));
            plan.register(phase::START_CONTAINER, Action::StartContainer(Target::Old));
            plan.register(
                phase::CONNECT_INTERFACES,
                Action::SetupNetInterfaces(Target::Old),
            );
        }
    }

    Ok(())
}

pub(super) async fn prepare_image(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let chute = update.chute(Target::New)?.clone();
    let image = chute.image_name();

    let mut lines = Vec::new();
    let mut sink = |line: String| lines.push(line);

    let result: Result<()> = if chute.external_image.is_some() {
        match ctx
            .engine
            .pull(&image, ctx.settings.registry_auth.as_ref(), &mut sink)
            .await
        {
            Ok(()) => Ok(()),
            Err(pull_error) => match &chute.dockerfile {
                // A failed pull falls back to a local build when we have
                // something to build from.
                Some(dockerfile) => {
                    sink(format!("{pull_error}"));
                    sink("Pull failed, attempting a local build.".to_owned());
                    ctx.engine
                        .build(&image, dockerfile, &mut sink)
                        .await
                        .map_err(Error::from)
                }
                None => Err(pull_error.into()),
            },
        }
    } else if let Some(dockerfile) = &chute.dockerfile {
        ctx.engine
            .build(&image, dockerfile, &mut sink)
            .await
            .map_err(Error::from)
    } else {
        Err(Error::validation(
            "no Dockerfile or image source supplied",
        ))
    };

    for line in lines {
        update.progress(line);
    }

    result
}

pub(super) async fn create_container(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let spec = container_spec(update.chute(Target::New)?, &ctx.settings.router_id);

    let id = ctx.engine.create(&spec).await?;
    update.progress(format!("Created container {id}"));

    Ok(())
}

pub(super) async fn start_container(update: &mut Update, ctx: &AgentContext, target: Target) -> Result<()> {
    let name = update.chute(target)?.name.clone();

    ctx.engine.start(&name).await?;

    match ctx.engine.inspect(&name).await {
        Ok(state) if state.running => match state.ip_address {
            Some(ip) => update.progress(format!("Chute {name} is running at {ip}")),
            None => update.progress(format!("Chute {name} is running")),
        },
        Ok(_) => return Err(ContainerError::NotRunning(name).into()),
        Err(e) => tracing::warn!(chute = %name, "Could not inspect container: {e}"),
    }

    Ok(())
}

pub(super) async fn stop_container(update: &mut Update, ctx: &AgentContext, target: Target) -> Result<()> {
    let name = update.chute(target)?.name.clone();

    ctx.engine.stop(&name).await?;
    update.progress(format!("Stopped chute {name}"));

    Ok(())
}

pub(super) async fn remove_container(update: &mut Update, ctx: &AgentContext, target: Target) -> Result<()> {
    let name = update.chute(target)?.name.clone();

    match ctx.engine.remove_container(&name, true).await {
        Ok(()) => Ok(()),
        Err(ContainerError::NotFound(_)) => {
            update.progress(format!("Container {name} was already gone"));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Image removal is best-effort: a shared or busy image is not a failure.
pub(super) async fn remove_image(update: &mut Update, ctx: &AgentContext, target: Target) -> Result<()> {
    let image = update.chute(target)?.image_name();

    if target == Target::Old && update.update_type == UpdateType::Update {
        if let Ok(new) = update.chute(Target::New) {
            if new.image_name() == image {
                return Ok(());
            }
        }
    }

    if let Err(e) = ctx.engine.remove_image(&image).await {
        update.progress(format!("Could not remove image {image}: {e}"));
    }

    Ok(())
}

/// Connects every allocated interface into the container with the external
/// glue tool: `<tool> <externalIntf> -i <internalIntf> <chute> <ip/prefix>`.
pub(super) async fn setup_net_interfaces(
    update: &mut Update,
    ctx: &AgentContext,
    target: Target,
) -> Result<()> {
    let chute = update.chute(target)?;
    let name = chute.name.clone();
    let records = chute.cache.network_interfaces.clone().unwrap_or_default();

    if records.is_empty() {
        return Ok(());
    }

    if !ctx.settings.apply_commands {
        update.progress(format!(
            "Skipping interface glue for {} interface(s) (dry run)",
            records.len()
        ));
        return Ok(());
    }

    for record in records {
        let output = tokio::process::Command::new(&ctx.settings.pipework)
            .arg(&record.external_intf)
            .arg("-i")
            .arg(&record.internal_intf)
            .arg(&name)
            .arg(&record.ipaddr_with_prefix)
            .output()
            .await
            .map_err(|e| Error::External {
                command: ctx.settings.pipework.display().to_string(),
                reason: format!("failed to spawn: {e}"),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            update.progress(format!("pipework: {line}"));
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::warn!(chute = %name, "pipework: {line}");
        }

        if !output.status.success() {
            return Err(Error::External {
                command: format!(
                    "{} {} -i {} {} {}",
                    ctx.settings.pipework.display(),
                    record.external_intf,
                    record.internal_intf,
                    name,
                    record.ipaddr_with_prefix
                ),
                reason: format!("exited with {}", output.status),
            });
        }
    }

    Ok(())
}
