// src/command/execute.rs

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::command::{load_properties, Command, CreateKind, ListTarget, ShowTarget};
use crate::engine::CiContext;
use crate::errors::{CiError, Result};
use crate::fs::write_atomic;
use crate::repository::Repository;
use crate::tasks::Task;
use crate::types::format_duration;

/// What the orchestrator has to do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    Continue,
    Shutdown { force: bool },
}

/// Validate and run `command` against this node's context.
pub async fn execute_command(command: Command, ctx: &mut CiContext) -> Result<CommandEffect> {
    command.validate()?;
    let now = Utc::now();

    match command {
        Command::Shutdown { force } => return Ok(CommandEffect::Shutdown { force }),

        Command::Create {
            kind: CreateKind::Repository,
            name,
            url,
            ..
        } => create_repository(ctx, &name, url.unwrap_or_default())?,

        Command::Create {
            kind: CreateKind::Task,
            name,
            definition,
            ..
        } => create_task(ctx, &name, &definition.unwrap_or_default())?,

        Command::List { what } => publish_report(&render_list(ctx, what, now)?),

        Command::Show { what, name } => publish_report(&render_show(ctx, what, &name, now)?),

        Command::Stop { task, properties } => stop_task(ctx, &task, properties).await?,

        Command::Trigger { task } => {
            ctx.tasks.request_task(&mut ctx.events, &task)?;
            info!(task = %task, "task run requested");
        }
    }

    Ok(CommandEffect::Continue)
}

fn create_repository(ctx: &mut CiContext, name: &str, url: String) -> Result<()> {
    if ctx.repositories.get(name)?.is_some() {
        return Err(CiError::InvalidCommand(format!("repository {name} already exists")));
    }
    let repository = Repository::new(name, url, ctx.cluster.node_id())?;
    ctx.repositories.save(&repository)?;
    info!(repository = %repository.name, url = %repository.url, node = %repository.node_id, "repository created");

    // Scan the new repository on the next tick.
    ctx.last_repository_scan = None;
    Ok(())
}

fn create_task(ctx: &CiContext, name: &str, definition: &str) -> Result<()> {
    // The task scan never publishes these names.
    let temp_prefix = &ctx.config.daemon.temp_prefix;
    if name.starts_with('.') || name.starts_with(temp_prefix.as_str()) {
        return Err(CiError::InvalidCommand(format!(
            "task name {name:?} must not start with '.' or {temp_prefix:?}"
        )));
    }
    let target = ctx.layout.tasks.join(name);
    if ctx.fs.exists(&target) || ctx.cluster.tasks().contains(name)? {
        return Err(CiError::InvalidCommand(format!("task {name} already exists")));
    }
    let tmp = ctx
        .layout
        .tasks
        .join(format!("{}-{name}", ctx.config.daemon.temp_prefix));
    write_atomic(ctx.fs.as_ref(), &tmp, &target, definition.as_bytes())?;
    info!(task = %name, file = %target.display(), "task definition created");
    Ok(())
}

async fn stop_task(ctx: &mut CiContext, task_id: &str, properties: Option<PathBuf>) -> Result<()> {
    let properties = match properties {
        Some(path) => {
            let path = ctx.layout.resolve(path);
            if ctx.fs.exists(&path) {
                let loaded = load_properties(ctx.fs.as_ref(), &path).map_err(|err| {
                    CiError::InvalidCommand(format!("properties file {}: {err}", path.display()))
                })?;
                Some(loaded)
            } else {
                warn!(task = %task_id, file = %path.display(), "properties file not found; stopping without properties");
                None
            }
        }
        None => None,
    };

    ctx.tasks.stop_task(task_id, properties).await?;

    if let Some(runner) = &ctx.runner {
        if runner.is_running() && runner.job().task_id.as_deref() == Some(task_id) {
            warn!(task = %task_id, job_id = %runner.job().id, "stopping running job of stopped task");
            runner.stop();
        }
    }
    Ok(())
}

fn publish_report(report: &str) {
    println!("{report}");
    info!(report = %report, "command report");
}

fn render_list(ctx: &CiContext, what: ListTarget, now: DateTime<Utc>) -> Result<String> {
    let mut out = String::new();
    match what {
        ListTarget::Tasks => {
            let tasks = ctx.cluster.tasks().all()?;
            let _ = writeln!(out, "tasks ({}):", tasks.len());
            for task in &tasks {
                let _ = writeln!(
                    out,
                    "  - {} [{}] {} executions={}",
                    task.id,
                    task.phase(now),
                    task.trigger.describe(),
                    task.executions
                );
            }
        }
        ListTarget::Jobs => {
            let pending = ctx.cluster.jobs().snapshot()?;
            match &ctx.runner {
                Some(runner) if runner.is_running() => {
                    let _ = writeln!(out, "running on {}: {}", ctx.cluster.node_id(), runner.job());
                }
                _ => {
                    let _ = writeln!(out, "running on {}: none", ctx.cluster.node_id());
                }
            }
            let _ = writeln!(out, "pending jobs ({}):", pending.len());
            for job in &pending {
                let _ = writeln!(out, "  - {job}");
            }
        }
        ListTarget::Repositories => {
            let repositories = ctx.repositories.load_all()?;
            let _ = writeln!(out, "repositories ({}):", repositories.len());
            for repository in &repositories {
                let _ = writeln!(
                    out,
                    "  - {} {} revision={}{}",
                    repository.name,
                    repository.url,
                    repository.last_revision.as_deref().unwrap_or("-"),
                    if repository.last_error.is_some() { " (failing)" } else { "" }
                );
            }
        }
    }
    Ok(out.trim_end().to_string())
}

fn render_show(ctx: &CiContext, what: ShowTarget, name: &str, now: DateTime<Utc>) -> Result<String> {
    match what {
        ShowTarget::Task => {
            let task = ctx
                .cluster
                .tasks()
                .get(name)?
                .ok_or_else(|| CiError::TaskNotFound(name.to_string()))?;
            Ok(render_task(&task, now))
        }
        ShowTarget::Repository => {
            let repository = ctx
                .repositories
                .get(name)?
                .ok_or_else(|| CiError::RepositoryNotFound(name.to_string()))?;
            Ok(render_repository(&repository))
        }
    }
}

fn render_task(task: &Task, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "task {}", task.id);
    let _ = writeln!(out, "  phase:      {}", task.phase(now));
    let _ = writeln!(out, "  trigger:    {}", task.trigger.describe());
    let _ = writeln!(out, "  debounce:   {}", format_duration(task.trigger.debounce()));
    let _ = writeln!(out, "  created:    {}", task.created_at.to_rfc3339());
    let _ = writeln!(out, "  executions: {}", task.executions);
    if let Some(execution) = &task.last_execution {
        let _ = writeln!(out, "  last run:   {} {:?}", execution.at.to_rfc3339(), execution.outcome);
    }
    for (key, value) in &task.stop_properties {
        let _ = writeln!(out, "  stop.{key} = {value}");
    }
    let _ = writeln!(out, "  script:");
    for line in task.script.lines() {
        let _ = writeln!(out, "    {line}");
    }
    out.trim_end().to_string()
}

fn render_repository(repository: &Repository) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "repository {}", repository.name);
    let _ = writeln!(out, "  kind:      {}", repository.kind);
    let _ = writeln!(out, "  url:       {}", repository.url);
    let _ = writeln!(out, "  node:      {}", repository.node_id);
    let _ = writeln!(out, "  revision:  {}", repository.last_revision.as_deref().unwrap_or("-"));
    let _ = writeln!(
        out,
        "  last scan: {}",
        repository
            .last_scan
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(error) = &repository.last_error {
        let _ = writeln!(out, "  error:     {error}");
    }
    out.trim_end().to_string()
}
