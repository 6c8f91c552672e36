//! The reconciler: diffs a freshly parsed configuration against the loaded
//! one and turns the difference into an ordered command stream.
//!
//! Only one reconciliation runs at a time; the caller serializes access.

use std::path::{Path, PathBuf};

use crate::collection::ConfigCollection;
use crate::command::Command;
use crate::handlers::{ApplyContext, handler_for};
use crate::section::SectionKey;
use crate::{Result, parser};

pub struct ConfigManager {
    write_dir: PathBuf,
    current: ConfigCollection,
    previous_commands: Vec<Command>,
}

impl ConfigManager {
    pub fn new(write_dir: impl Into<PathBuf>) -> Self {
        ConfigManager {
            write_dir: write_dir.into(),
            current: ConfigCollection::new(),
            previous_commands: Vec::new(),
        }
    }

    pub fn write_dir(&self) -> &Path {
        &self.write_dir
    }

    /// The command stream emitted by the last load or unload.
    pub fn previous_commands(&self) -> &[Command] {
        &self.previous_commands
    }

    pub fn current(&self) -> &ConfigCollection {
        &self.current
    }

    /// Parses `search` (file or directory) and reconciles the running state
    /// with it. With `execute` false the plan is recorded but not run.
    pub async fn load_config(&mut self, search: &Path, execute: bool) -> Result<()> {
        let next = parser::parse_search(search)?;
        self.reconcile(next, execute).await
    }

    /// Reverts everything currently loaded.
    pub async fn unload(&mut self, execute: bool) -> Result<()> {
        let mut ctx = ApplyContext::new(self.write_dir.clone());

        let mut commands = Vec::new();
        for section in self.current.iter() {
            commands.extend(handler_for(section).revert(section, &self.current, &mut ctx)?);
        }
        commands.sort_by_key(|c| c.priority);

        if execute {
            for command in &commands {
                // Teardown is best-effort; record and keep going.
                if let Err(e) = command.run().await {
                    tracing::warn!(command = %command, "Teardown command failed: {e}");
                }
            }
        }

        self.previous_commands = commands;
        self.current = ConfigCollection::new();

        Ok(())
    }

    async fn reconcile(&mut self, mut next: ConfigCollection, execute: bool) -> Result<()> {
        let mut ctx = ApplyContext::new(self.write_dir.clone());

        let mut removed = Vec::new();
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        for section in self.current.iter() {
            let key = section.key().clone();
            match next.get(&key) {
                None => removed.push(key),
                Some(new) if new == section => unchanged.push(key),
                Some(_) => changed.push(key),
            }
        }
        let added: Vec<SectionKey> = next
            .keys()
            .filter(|key| self.current.get(key).is_none())
            .cloned()
            .collect();

        // Unchanged sections keep their derived runtime state (PID files,
        // created interfaces) so a later revert can still undo them.
        for key in &unchanged {
            let Some(old) = self.current.get(key) else {
                continue;
            };
            let state = old.state().clone();
            if let Some(vif) = &state.created_vif {
                ctx.claimed_vifs.insert(vif.clone());
            }
            if let Some(new) = next.get_mut(key) {
                new.set_state(state);
            }
        }

        let mut commands = Vec::new();

        for key in &removed {
            let Some(section) = self.current.get(key) else {
                continue;
            };
            commands.extend(handler_for(section).revert(section, &self.current, &mut ctx)?);
        }

        for key in &changed {
            let (Some(old), Some(new)) = (self.current.get(key), next.get(key)) else {
                continue;
            };
            let handler = handler_for(old);

            let update_revert = handler.update_revert(old, new, &self.current, &mut ctx);
            let update_apply = handler.update_apply(old, new, &next, &mut ctx);

            let (revert_cmds, apply_result) = match (update_revert, update_apply) {
                (Some(revert), Some(apply)) => (revert?, apply?),
                _ => (
                    handler.revert(old, &self.current, &mut ctx)?,
                    handler.apply(new, &next, &mut ctx)?,
                ),
            };

            commands.extend(revert_cmds);
            let (apply_cmds, state) = apply_result;
            commands.extend(apply_cmds);
            if let Some(section) = next.get_mut(key) {
                section.set_state(state);
            }
        }

        for key in &added {
            let (apply_cmds, state) = {
                let Some(section) = next.get(key) else {
                    continue;
                };
                handler_for(section).apply(section, &next, &mut ctx)?
            };

            commands.extend(apply_cmds);
            if let Some(section) = next.get_mut(key) {
                section.set_state(state);
            }
        }

        commands.sort_by_key(|c| c.priority);

        if execute {
            self.execute_batch(&commands, &next, &added, &changed, &mut ctx)
                .await?;
        }

        self.previous_commands = commands;
        self.current = next;

        Ok(())
    }

    /// Runs the batch in order. A failing forward command aborts the batch
    /// and rolls back whichever added or changed sections already ran;
    /// failing teardown commands are logged and skipped.
    async fn execute_batch(
        &self,
        commands: &[Command],
        next: &ConfigCollection,
        added: &[SectionKey],
        changed: &[SectionKey],
        ctx: &mut ApplyContext,
    ) -> Result<()> {
        let mut applied: Vec<SectionKey> = Vec::new();

        for command in commands {
            match command.run().await {
                Ok(()) => {
                    let forward = command.priority >= 0;
                    let ours = added.contains(&command.section) || changed.contains(&command.section);
                    if forward && ours && !applied.contains(&command.section) {
                        applied.push(command.section.clone());
                    }
                }
                Err(e) if command.priority < 0 => {
                    tracing::warn!(command = %command, "Teardown command failed: {e}");
                }
                Err(e) => {
                    tracing::error!(command = %command, "Command failed, rolling back: {e}");
                    self.rollback(&applied, next, ctx).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn rollback(&self, applied: &[SectionKey], next: &ConfigCollection, ctx: &mut ApplyContext) {
        let mut commands = Vec::new();

        for key in applied.iter().rev() {
            let Some(section) = next.get(key) else {
                continue;
            };
            match handler_for(section).revert(section, next, ctx) {
                Ok(cmds) => commands.extend(cmds),
                Err(e) => tracing::warn!(section = %key, "Could not plan rollback: {e}"),
            }
        }

        commands.sort_by_key(|c| c.priority);

        for command in &commands {
            if let Err(e) = command.run().await {
                tracing::warn!(command = %command, "Rollback command failed: {e}");
            }
        }
    }
}
