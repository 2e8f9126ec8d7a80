//! Drydock CLI
//!
//! Command-line front door for sandbox lifecycle and ledger operations.

use std::path::Path;

use drydock::{
    Config, DevcontainerCli, IssuePriority, Ledger, NewIssue, NewTask, SandboxCoordinator,
    TaskFilter, TaskUpdate,
};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!();
    eprintln!("Sandbox commands:");
    eprintln!("  up [branch] [base]            Provision a sandbox (base defaults to HEAD branch)");
    eprintln!("  exec <branch> <task...>       Run an agent task in a sandbox");
    eprintln!("  merge <branch>                Rebase and fast-forward into the current branch");
    eprintln!("  down <branch> [--container-only]");
    eprintln!("  list                          List live sandboxes");
    eprintln!("  cleanup [--dry-run]           Reclaim orphaned sandbox branches");
    eprintln!();
    eprintln!("Ledger commands:");
    eprintln!("  orch create <description>");
    eprintln!("  orch list");
    eprintln!("  task create <orch-id> <title> [dep-id,dep-id,...]");
    eprintln!("  task list [--ready]");
    eprintln!("  task done <task-id>");
    eprintln!("  issue create <title> [high|medium|low]");
    eprintln!("  issue list");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }

    if let Err(e) = run(&args).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> drydock::Result<()> {
    let repo = std::env::current_dir()?;
    let config = Config::load(&repo)?;
    config.validate()?;

    match args[1].as_str() {
        "up" | "exec" | "merge" | "down" | "list" | "cleanup" => {
            let coord = SandboxCoordinator::new(DevcontainerCli::new(), config);
            run_sandbox(&coord, &repo, args).await
        }
        "orch" | "task" | "issue" => run_ledger(&repo, args),
        _ => usage(&args[0]),
    }
}

async fn run_sandbox(
    coord: &SandboxCoordinator<DevcontainerCli>,
    repo: &Path,
    args: &[String],
) -> drydock::Result<()> {
    // Stream environment output straight through.
    let progress = |line: &str| println!("{}", line);

    match args[1].as_str() {
        "up" => {
            let branch = args.get(2).map(String::as_str);
            let base = args.get(3).map(String::as_str).unwrap_or("HEAD");
            let up = coord.up(repo, branch, base, None, &progress).await?;
            print_json(&up)
        }
        "exec" => {
            if args.len() < 4 {
                usage(&args[0]);
            }
            let branch = &args[2];
            let (session_id, task_args) = match args.get(3).map(String::as_str) {
                Some("--resume") if args.len() > 5 => (Some(args[4].as_str()), &args[5..]),
                _ => (None, &args[3..]),
            };
            let task = task_args.join(" ");
            let exec = coord
                .exec(repo, branch, &task, session_id, &progress)
                .await?;
            print_json(&exec)?;
            if exec.exit_code != 0 {
                std::process::exit(exec.exit_code);
            }
            Ok(())
        }
        "merge" => {
            if args.len() < 3 {
                usage(&args[0]);
            }
            let outcome = coord.merge(repo, &args[2]).await?;
            print_json(&outcome)
        }
        "down" => {
            if args.len() < 3 {
                usage(&args[0]);
            }
            let container_only = args.iter().any(|a| a == "--container-only");
            coord.down(repo, &args[2], container_only).await
        }
        "list" => print_json(&coord.list(repo)?),
        "cleanup" => {
            let dry_run = args.iter().any(|a| a == "--dry-run");
            print_json(&coord.cleanup(repo, dry_run)?)
        }
        _ => unreachable!(),
    }
}

fn run_ledger(repo: &Path, args: &[String]) -> drydock::Result<()> {
    let ledger = Ledger::open(repo);
    let sub = args.get(2).map(String::as_str);

    match (args[1].as_str(), sub) {
        ("orch", Some("create")) => {
            let description = args.get(3).cloned().unwrap_or_else(|| usage(&args[0]));
            print_json(&ledger.orchestration_create(&description, None)?)
        }
        ("orch", Some("list")) => print_json(&ledger.orchestration_list(None)?),
        ("task", Some("create")) => {
            if args.len() < 5 {
                usage(&args[0]);
            }
            let dependencies = args
                .get(5)
                .map(|deps| deps.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            print_json(&ledger.task_create(NewTask {
                id: None,
                orchestration_id: args[3].clone(),
                title: args[4].clone(),
                description: String::new(),
                dependencies,
            })?)
        }
        ("task", Some("list")) => {
            let filter = TaskFilter {
                ready: args.iter().any(|a| a == "--ready"),
                ..TaskFilter::default()
            };
            print_json(&ledger.task_list(&filter)?)
        }
        ("task", Some("done")) => {
            let id = args.get(3).cloned().unwrap_or_else(|| usage(&args[0]));
            print_json(&ledger.task_update(
                &id,
                TaskUpdate {
                    status: Some(drydock::TaskStatus::Done),
                    ..TaskUpdate::default()
                },
            )?)
        }
        ("issue", Some("create")) => {
            let title = args.get(3).cloned().unwrap_or_else(|| usage(&args[0]));
            let priority = match args.get(4).map(String::as_str) {
                Some("high") => IssuePriority::High,
                Some("low") => IssuePriority::Low,
                _ => IssuePriority::Medium,
            };
            print_json(&ledger.issue_create(NewIssue {
                id: None,
                title,
                description: String::new(),
                priority,
                labels: Vec::new(),
            })?)
        }
        ("issue", Some("list")) => print_json(&ledger.issue_list(None)?),
        _ => usage(&args[0]),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> drydock::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(|e| drydock::Error::Config(e.to_string()))?
    );
    Ok(())
}
