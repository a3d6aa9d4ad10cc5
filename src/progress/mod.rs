//! Parallel progress group
//!
//! Runs a named set of tasks concurrently under one logical stage. The first
//! task error cancels the shared token, every task is drained, and that first
//! error is returned. Rendering is TTY-aware: an in-place spinner redraw on
//! interactive terminals, plain transition lines everywhere else.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{ensure, Result};
use crossterm::cursor::MoveUp;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::notify::{format_duration, Notifier, Timer};

const REDRAW_INTERVAL: Duration = Duration::from_millis(100);
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Wording used for running/completed task lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelVariant {
    Installing,
    Validating,
    #[default]
    Running,
}

impl LabelVariant {
    pub fn running(&self) -> &'static str {
        match self {
            LabelVariant::Installing => "installing",
            LabelVariant::Validating => "validating",
            LabelVariant::Running => "running",
        }
    }

    pub fn completed(&self) -> &'static str {
        match self {
            LabelVariant::Installing => "installed",
            LabelVariant::Validating => "validated",
            LabelVariant::Running => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

struct TaskState {
    name: String,
    status: TaskStatus,
    start_order: Option<u64>,
}

struct GroupState {
    tasks: Vec<TaskState>,
    next_start_order: u64,
    spinner_frame: usize,
    drawn_lines: u16,
}

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

struct Task {
    name: String,
    run: TaskFn,
}

/// A named set of tasks executed in parallel under one stage title.
pub struct ProgressGroup {
    emoji: String,
    title: String,
    labels: LabelVariant,
    notifier: Notifier,
    tasks: Vec<Task>,
}

impl ProgressGroup {
    pub fn new(notifier: Notifier, emoji: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            emoji: emoji.into(),
            title: title.into(),
            labels: LabelVariant::default(),
            notifier,
            tasks: Vec::new(),
        }
    }

    pub fn labels(mut self, labels: LabelVariant) -> Self {
        self.labels = labels;
        self
    }

    /// Add a task. The function receives the group's cancellation token and
    /// must honor it.
    pub fn task<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(Task {
            name: name.into(),
            run: Box::new(move |token| Box::pin(f(token))),
        });
        self
    }

    /// Execute all tasks concurrently. Returns the first task error after
    /// every task has returned; sibling tasks are cancelled as soon as the
    /// first failure is observed.
    pub async fn run(self, cancel: &CancellationToken, timer: Option<&mut Timer>) -> Result<()> {
        let mut names: Vec<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        ensure!(
            names.len() == self.tasks.len(),
            "progress group task names must be unique"
        );

        self.notifier.header(&self.emoji, &self.title);

        let state = Arc::new(Mutex::new(GroupState {
            tasks: self
                .tasks
                .iter()
                .map(|t| TaskState {
                    name: t.name.clone(),
                    status: TaskStatus::Pending,
                    start_order: None,
                })
                .collect(),
            next_start_order: 0,
            spinner_frame: 0,
            drawn_lines: 0,
        }));

        let group_token = cancel.child_token();
        let first_error: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));
        let tty = self.notifier.is_tty();

        let mut timer = timer;
        if let Some(timer) = timer.as_deref_mut() {
            timer.start_stage(self.title.clone());
        }

        let mut handles = Vec::with_capacity(self.tasks.len());
        for (index, task) in self.tasks.into_iter().enumerate() {
            let state = state.clone();
            let token = group_token.clone();
            let first_error = first_error.clone();
            let notifier = self.notifier.clone();
            let labels = self.labels;
            let name = task.name;
            let run = task.run;

            handles.push(tokio::spawn(async move {
                {
                    let mut state = state.lock().expect("progress state poisoned");
                    let order = state.next_start_order;
                    state.next_start_order += 1;
                    let task = &mut state.tasks[index];
                    task.status = TaskStatus::Running;
                    task.start_order = Some(order);
                }
                if !tty {
                    notifier.activity(format!("{} {}", name, labels.running()));
                }

                let result = run(token.clone()).await;

                let mut state = state.lock().expect("progress state poisoned");
                match result {
                    Ok(()) => {
                        state.tasks[index].status = TaskStatus::Completed;
                        if !tty {
                            notifier.success(format!("{} {}", name, labels.completed()));
                        }
                    }
                    Err(err) => {
                        state.tasks[index].status = TaskStatus::Failed;
                        if !tty {
                            notifier.error(format!("{} failed", name));
                        }
                        let mut slot = first_error.lock().expect("error slot poisoned");
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                        drop(slot);
                        token.cancel();
                    }
                }
            }));
        }

        let renderer = if tty {
            let state = state.clone();
            let notifier = self.notifier.clone();
            let labels = self.labels;
            let stop = CancellationToken::new();
            let stop_child = stop.clone();
            let handle = tokio::spawn(async move {
                loop {
                    redraw(&notifier, &state, labels);
                    tokio::select! {
                        _ = stop_child.cancelled() => break,
                        _ = tokio::time::sleep(REDRAW_INTERVAL) => {}
                    }
                }
            });
            Some((stop, handle))
        } else {
            None
        };

        for handle in handles {
            // Task panics surface here; treat them as a task failure.
            if let Err(join_err) = handle.await {
                let mut slot = first_error.lock().expect("error slot poisoned");
                if slot.is_none() {
                    *slot = Some(anyhow::anyhow!("progress task panicked: {}", join_err));
                }
            }
        }

        if let Some((stop, handle)) = renderer {
            stop.cancel();
            let _ = handle.await;
            redraw(&self.notifier, &state, self.labels);
        }

        let error = first_error
            .lock()
            .expect("error slot poisoned")
            .take();

        match error {
            Some(err) => Err(err),
            None => {
                if let Some(timer) = timer.as_deref_mut() {
                    self.notifier.timer(
                        &format_duration(timer.stage_elapsed()),
                        &format_duration(timer.total_elapsed()),
                    );
                }
                Ok(())
            }
        }
    }
}

/// Redraw every task line in place: started tasks ordered by start time,
/// pending tasks trailing.
fn redraw(notifier: &Notifier, state: &Arc<Mutex<GroupState>>, labels: LabelVariant) {
    let mut state = state.lock().expect("progress state poisoned");
    let frame = SPINNER_FRAMES[state.spinner_frame % SPINNER_FRAMES.len()];
    state.spinner_frame = state.spinner_frame.wrapping_add(1);

    let mut started: Vec<&TaskState> = state
        .tasks
        .iter()
        .filter(|t| t.start_order.is_some())
        .collect();
    started.sort_by_key(|t| t.start_order);
    let pending = state.tasks.iter().filter(|t| t.start_order.is_none());

    let mut buf: Vec<u8> = Vec::new();
    if state.drawn_lines > 0 {
        let _ = buf.queue(MoveUp(state.drawn_lines));
    }
    let mut lines = 0u16;
    for task in started.into_iter().chain(pending) {
        let _ = buf.queue(Clear(ClearType::CurrentLine));
        let line = match task.status {
            TaskStatus::Pending => format!("{} {} pending", frame, task.name),
            TaskStatus::Running => format!("{} {} {}", frame, task.name, labels.running()),
            TaskStatus::Completed => format!("✔ {} {}", task.name, labels.completed()),
            TaskStatus::Failed => format!("✗ {} failed", task.name),
        };
        let _ = buf.write_all(line.as_bytes());
        let _ = buf.write_all(b"\n");
        lines += 1;
    }
    state.drawn_lines = lines;
    drop(state);

    if let Ok(text) = String::from_utf8(buf) {
        notifier.write_raw(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_support::CapturedNotifier;

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let captured = CapturedNotifier::new(false);
        let cancel = CancellationToken::new();
        let group = ProgressGroup::new(captured.notifier.clone(), "📦", "Installing components")
            .labels(LabelVariant::Installing)
            .task("metrics-server", |_| async { Ok(()) })
            .task("cert-manager", |_| async { Ok(()) });

        group.run(&cancel, None).await.expect("group should succeed");

        let out = captured.output();
        assert!(out.contains("📦 Installing components..."));
        assert!(out.contains("✔ metrics-server installed"));
        assert!(out.contains("✔ cert-manager installed"));
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let captured = CapturedNotifier::new(false);
        let cancel = CancellationToken::new();
        let group = ProgressGroup::new(captured.notifier.clone(), "📦", "Installing components")
            .labels(LabelVariant::Installing)
            .task("a", |_| async { Ok(()) })
            .task("b", |_| async { anyhow::bail!("chart pull failed") })
            .task("c", |token| async move {
                tokio::select! {
                    _ = token.cancelled() => anyhow::bail!("cancelled"),
                    _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(()),
                }
            });

        let err = group
            .run(&cancel, None)
            .await
            .expect_err("group should fail");
        assert!(err.to_string().contains("chart pull failed"));

        let out = captured.output();
        assert!(out.contains("✗ b failed"));
        assert!(out.contains("✗ c failed") || out.contains("► c installing"));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let captured = CapturedNotifier::new(false);
        let cancel = CancellationToken::new();
        let group = ProgressGroup::new(captured.notifier.clone(), "📦", "Validating")
            .task("same", |_| async { Ok(()) })
            .task("same", |_| async { Ok(()) });
        assert!(group.run(&cancel, None).await.is_err());
    }

    #[tokio::test]
    async fn test_timer_block_on_success() {
        let captured = CapturedNotifier::new(false);
        let cancel = CancellationToken::new();
        let mut timer = Timer::new();
        let group = ProgressGroup::new(captured.notifier.clone(), "🔍", "Validating manifests")
            .labels(LabelVariant::Validating)
            .task("kustomization", |_| async { Ok(()) });

        group
            .run(&cancel, Some(&mut timer))
            .await
            .expect("group should succeed");
        assert!(captured.output().contains("⏲ current: "));
    }

    #[test]
    fn test_label_variants() {
        assert_eq!(LabelVariant::Installing.running(), "installing");
        assert_eq!(LabelVariant::Installing.completed(), "installed");
        assert_eq!(LabelVariant::Validating.completed(), "validated");
        assert_eq!(LabelVariant::Running.completed(), "completed");
    }
}
