use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use remind_cli::cli::{AddArgs, Cli, Command, EditArgs, parse_config_override};
use remind_core::alarm::{format_instant, format_time_for_display};
use remind_core::clock::{Clock, SystemClock, from_epoch_millis};
use remind_core::config::{Config, ConfigOverrides, load_config_with_fallback, merge_overrides};
use remind_core::error::AppError;
use remind_core::fire::{FireHandler, FireOutcome};
use remind_core::host::{AlarmHost, DeferredAlarmHost, TokioAlarmHost};
use remind_core::model::{NewTask, Task, TaskId, TaskStatus};
use remind_core::notice::{NoticeSink, UserNotice};
use remind_core::notify::notifier_from_env;
use remind_core::restore::{SweepReport, resync_with_store, run_restoration_sweep};
use remind_core::scheduler::ReminderScheduler;
use remind_core::storage::JsonTaskStore;
use remind_core::task_api::{ListFilter, TaskApi, TaskEdit};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "REMIND_LOG";
const DEFAULT_LOG_LEVEL: &str = "warn";
/// How often a long-lived session re-reads the store for reminders changed
/// by other `remind` invocations.
const RESYNC_INTERVAL: Duration = Duration::from_secs(15);

/// Prints scheduling feedback as it happens. JSON runs keep stdout for the
/// payload and send notices to stderr.
struct ConsoleNotices {
    json: bool,
}

impl NoticeSink for ConsoleNotices {
    fn notice(&self, notice: UserNotice) {
        tracing::debug!(task_id = notice.task_id(), "{notice}");
        if self.json || notice.is_warning() {
            eprintln!("{notice}");
        } else {
            println!("{notice}");
        }
    }
}

struct App {
    api: TaskApi,
    store: Arc<JsonTaskStore>,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<TokioAlarmHost>>,
}

impl App {
    /// Without a runtime handle reminders are only persisted; a later
    /// `watch` or interactive session arms them.
    fn open(
        config: &Config,
        clock: Arc<dyn Clock>,
        json: bool,
        runtime: Option<&Runtime>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(JsonTaskStore::from_env()?);
        tracing::debug!(path = %store.path().display(), "task store");

        let (host, timers): (Arc<dyn AlarmHost>, Option<Arc<TokioAlarmHost>>) = match runtime {
            Some(runtime) => {
                let handler = FireHandler::new(store.clone(), notifier_from_env()?, config.fire_check);
                handler.set_observer(Box::new(print_fire));
                let timers = Arc::new(TokioAlarmHost::new(
                    runtime.handle().clone(),
                    clock.clone(),
                    config.capability(),
                    Arc::new(handler),
                ));
                (timers.clone(), Some(timers))
            }
            None => (Arc::new(DeferredAlarmHost::new(config.capability())), None),
        };

        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            host,
            clock.clone(),
            Arc::new(ConsoleNotices { json }),
            config.lead_time(),
        ));

        Ok(Self {
            api: TaskApi::new(store.clone(), scheduler),
            store,
            clock,
            timers,
        })
    }

    fn restore(&self) -> SweepReport {
        run_restoration_sweep(self.store.as_ref(), self.api.scheduler())
    }

    /// Keeps live timers in step with the store until the task is aborted.
    fn spawn_resync(&self, runtime: &Runtime) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let scheduler = Arc::clone(self.api.scheduler());
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(RESYNC_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = Arc::clone(&store);
                let scheduler = Arc::clone(&scheduler);
                let synced = tokio::task::spawn_blocking(move || {
                    resync_with_store(store.as_ref(), &scheduler)
                })
                .await;
                match synced {
                    Ok(report) => {
                        for failure in &report.failures {
                            eprintln!(
                                "WARNING: reminder for task {} not updated: {}",
                                failure.task_id, failure.error
                            );
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "resync task failed"),
                }
            }
        })
    }

    fn shutdown(&self) {
        if let Some(timers) = self.timers.as_ref() {
            timers.shutdown();
        }
    }
}

fn print_fire(task_id: TaskId, outcome: &FireOutcome) {
    match outcome {
        FireOutcome::Displayed(alert) => {
            println!("Reminder: {} ({}) - {}", alert.title, task_id, alert.body);
        }
        FireOutcome::Suppressed(reason) => {
            tracing::info!(task_id, ?reason, "reminder dropped");
        }
        FireOutcome::DisplayFailed => {
            eprintln!("WARNING: could not display reminder for task {task_id}");
        }
    }
}

fn report_sweep(report: &SweepReport, json: bool) {
    if let Some(err) = report.load_error.as_ref() {
        eprintln!("WARNING: reminders not restored: {err}");
    }
    for failure in &report.failures {
        eprintln!(
            "WARNING: reminder for task {} not restored: {}",
            failure.task_id, failure.error
        );
    }

    if json {
        let payload = serde_json::json!({
            "rearmed": report.rearmed,
            "skipped_overdue": report.skipped_overdue,
            "failed": report.failures.iter().map(|failure| failure.task_id).collect::<Vec<_>>(),
        });
        println!("{payload}");
    } else {
        println!(
            "Restored {} reminder(s), skipped {} overdue",
            report.rearmed.len(),
            report.skipped_overdue.len()
        );
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Completed => "completed",
    }
}

fn alarm_label(task: &Task, clock: &dyn Clock) -> String {
    task.alarm_time
        .and_then(|millis| from_epoch_millis(millis, clock.now().offset()))
        .map(format_instant)
        .unwrap_or_else(|| "-".to_string())
}

fn due_label(task: &Task) -> String {
    match (task.due_date.as_deref(), task.due_time.as_deref()) {
        (Some(date), Some(time)) => format!("{date} {}", format_time_for_display(time)),
        (Some(date), None) => date.to_string(),
        _ => "-".to_string(),
    }
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: TaskId,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Due")]
    due: String,
    #[tabled(rename = "Reminder")]
    reminder: String,
    #[tabled(rename = "Priority")]
    priority: &'static str,
}

fn print_tasks_plain(api: &TaskApi, clock: &dyn Clock, tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }

    let rows: Vec<TaskRow> = tasks
        .iter()
        .map(|task| {
            let status = if api.is_overdue(task) {
                format!("{} (overdue)", status_label(task.status))
            } else {
                status_label(task.status).to_string()
            };
            let reminder = if task.has_reminder {
                alarm_label(task, clock)
            } else {
                "off".to_string()
            };
            TaskRow {
                id: task.id,
                title: task.title.clone(),
                status,
                due: due_label(task),
                reminder,
                priority: task.priority_label(),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

fn task_json(api: &TaskApi, task: &Task) -> serde_json::Value {
    serde_json::json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "created_at": task.created_at,
        "completed_at": task.completed_at,
        "due_date": task.due_date,
        "due_time": task.due_time,
        "has_reminder": task.has_reminder,
        "alarm_time": task.alarm_time,
        "category": task.category,
        "priority": task.priority,
        "overdue": api.is_overdue(task),
    })
}

fn print_task_json(api: &TaskApi, task: &Task) {
    println!("{}", task_json(api, task));
}

fn print_tasks_json(api: &TaskApi, tasks: &[Task]) {
    let payload = tasks.iter().map(|task| task_json(api, task)).collect();
    println!("{}", serde_json::Value::Array(payload));
}

fn print_task_details(api: &TaskApi, clock: &dyn Clock, task: &Task) {
    println!("Task {}: {}", task.id, task.title);
    if let Some(description) = task.description.as_deref() {
        println!("  Description: {description}");
    }
    let status = if api.is_overdue(task) {
        format!("{} (overdue)", status_label(task.status))
    } else {
        status_label(task.status).to_string()
    };
    println!("  Status:      {status}");
    println!("  Due:         {}", due_label(task));
    if task.has_reminder {
        println!("  Reminder:    {}", alarm_label(task, clock));
    } else {
        println!("  Reminder:    off");
    }
    println!("  Category:    {}", task.category);
    println!("  Priority:    {}", task.priority_label());
    println!("  Created:     {}", task.created_at);
    if let Some(completed_at) = task.completed_at.as_deref() {
        println!("  Completed:   {completed_at}");
    }
}

fn print_changed(api: &TaskApi, json: bool, verb: &str, task: &Task) {
    if json {
        print_task_json(api, task);
    } else {
        println!("{verb} task: {} ({})", task.title, task.id);
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(current.clone());
                current.clear();
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn collect_overrides(raw: &[String]) -> Result<ConfigOverrides, AppError> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry).map_err(AppError::invalid_input)?;
        overrides.apply(&parsed.key, &parsed.value)?;
    }
    Ok(overrides)
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(config.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn build_runtime() -> Result<Runtime, AppError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("remind-timers")
        .enable_all()
        .build()
        .map_err(AppError::from)
}

fn add_task(app: &App, args: AddArgs) -> Result<Task, AppError> {
    let title = match args.title {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Err(AppError::invalid_input("title is required")),
    };

    app.api.add(NewTask {
        title,
        description: args.description,
        due_date: args.due_date,
        due_time: args.due_time,
        has_reminder: args.remind,
        category: args.category,
        priority: args.priority,
    })
}

fn edit_task(app: &App, args: EditArgs) -> Result<Task, AppError> {
    app.api.edit(
        args.id,
        TaskEdit {
            title: args.title,
            description: args.description,
            due_date: args.due_date,
            due_time: args.due_time,
            clear_due: args.clear_due,
            category: args.category,
            priority: args.priority,
        },
    )
}

fn run_command(app: &App, command: Command, json: bool) -> Result<(), AppError> {
    let api = &app.api;
    match command {
        Command::Add(args) => {
            let task = add_task(app, args)?;
            print_changed(api, json, "Added", &task);
        }
        Command::Edit(args) => {
            let task = edit_task(app, args)?;
            print_changed(api, json, "Updated", &task);
        }
        Command::Reminder { id, off } => {
            let task = api.set_reminder(id, !off)?;
            if json {
                print_task_json(api, &task);
            } else if off {
                println!("Reminder off: {} ({})", task.title, task.id);
            } else {
                println!(
                    "Reminder at {}: {} ({})",
                    alarm_label(&task, app.clock.as_ref()),
                    task.title,
                    task.id
                );
            }
        }
        Command::Done { id } => {
            let task = api.complete(id)?;
            print_changed(api, json, "Completed", &task);
        }
        Command::Undo { id } => {
            let task = api.undo(id)?;
            print_changed(api, json, "Reopened", &task);
        }
        Command::Delete { id } => {
            let task = api.delete(id)?;
            print_changed(api, json, "Deleted", &task);
        }
        Command::ClearCompleted => {
            let removed = api.clear_completed()?;
            if json {
                print_tasks_json(api, &removed);
            } else {
                println!("Cleared {} completed task(s)", removed.len());
            }
        }
        Command::Show { id } => {
            let task = api.get(id)?;
            if json {
                print_task_json(api, &task);
            } else {
                print_task_details(api, app.clock.as_ref(), &task);
            }
        }
        Command::List { pending, completed } => {
            let filter = if pending {
                ListFilter::Pending
            } else if completed {
                ListFilter::Completed
            } else {
                ListFilter::All
            };
            let tasks = api.list(filter)?;
            if json {
                print_tasks_json(api, &tasks);
            } else {
                print_tasks_plain(api, app.clock.as_ref(), &tasks);
            }
        }
        Command::Watch => {
            return Err(AppError::invalid_input(
                "watch is only available as a standalone command",
            ));
        }
    }

    Ok(())
}

fn run_watch(config: &Config, clock: Arc<dyn Clock>, json: bool) -> Result<(), AppError> {
    let runtime = build_runtime()?;
    let app = App::open(config, clock, json, Some(&runtime))?;
    report_sweep(&app.restore(), json);
    let resync = app.spawn_resync(&runtime);
    if !json {
        println!("Watching reminders. Press Ctrl-C to stop.");
    }

    let result = runtime.block_on(tokio::signal::ctrl_c());
    resync.abort();
    app.shutdown();
    result.map_err(AppError::from)
}

fn run_interactive(config: &Config, clock: Arc<dyn Clock>) -> Result<(), AppError> {
    let runtime = build_runtime()?;
    let app = App::open(config, clock, false, Some(&runtime))?;
    report_sweep(&app.restore(), false);
    let resync = app.spawn_resync(&runtime);

    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("remind".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if !cli.config_override.is_empty() {
            eprintln!(
                "ERROR: {}",
                AppError::invalid_input("config overrides apply at startup only")
            );
            continue;
        }

        if let Err(err) = run_command(&app, cli.command, cli.json) {
            eprintln!("ERROR: {}", err);
        }
    }

    resync.abort();
    app.shutdown();
    Ok(())
}

fn run(cli: Option<Cli>, clock: Arc<dyn Clock>) -> Result<(), AppError> {
    let loaded = load_config_with_fallback();
    let overrides = match cli.as_ref() {
        Some(cli) => collect_overrides(&cli.config_override)?,
        None => ConfigOverrides::default(),
    };
    let config = merge_overrides(&loaded.config, &overrides);
    init_logging(&config);
    if let Some(err) = loaded.error {
        tracing::warn!(error = %err, "config not loaded, using defaults");
    }

    match cli {
        None => run_interactive(&config, clock),
        Some(Cli {
            command: Command::Watch,
            json,
            ..
        }) => run_watch(&config, clock, json),
        Some(cli) => {
            let app = App::open(&config, clock, cli.json, None)?;
            run_command(&app, cli.command, cli.json)
        }
    }
}

fn main() {
    // The local offset has to be read before any thread is spawned.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::local());

    let mut args = std::env::args_os();
    args.next();
    let cli = if args.next().is_none() {
        None
    } else {
        match Cli::try_parse() {
            Ok(cli) => Some(cli),
            Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                err.exit()
            }
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                std::process::exit(1);
            }
        }
    };

    if let Err(err) = run(cli, clock) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
