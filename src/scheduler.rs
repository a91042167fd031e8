//! Docking task planning and parallel execution.
//!
//! A batch runs in three phases: tasks are collected from the prepared
//! receptor and ligand trees, the pocket cache is warmed one receptor at a
//! time, then every task is docked on a worker pool. Workers only read the
//! pocket cache and each writes into its own output directory.

use crate::cache::PocketCache;
use crate::config::{DockingSettings, PipelineLayout};
use crate::errors::Result;
use crate::ligands::ligand_label;
use crate::mapping::GeneLigandMap;
use crate::pocket::{Pocket, PocketDetector, PocketLocator};
use crate::receptors::list_receptors;
use crate::table::{best_affinity, run_name};
use crate::tools::run_tool;
use crate::utils::run_with_threads;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Engine configuration file inside a run directory
pub const VINA_CONFIG: &str = "vina_config.txt";
/// Docked poses inside a run directory
pub const RESULT_POSES: &str = "result.pdbqt";
/// Engine log inside a run directory
pub const RESULT_LOG: &str = "result.log";

/// One receptor-ligand docking run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DockingTask {
    /// Gene of the receptor
    pub gene: String,
    /// Receptor name
    pub receptor: String,
    /// Ligand token
    pub ligand: String,
    /// Receptor structure, used for pocket detection
    pub receptor_pdb: PathBuf,
    /// Charge-prepared receptor
    pub receptor_pdbqt: PathBuf,
    /// Charge-prepared ligand
    pub ligand_pdbqt: PathBuf,
}

impl DockingTask {
    /// `{gene}__{receptor}__{ligand}`
    pub fn name(&self) -> String {
        run_name(&self.gene, &self.receptor, &self.ligand)
    }

    /// Output directory below `docking_root`.
    pub fn output_dir(&self, docking_root: &Path) -> PathBuf {
        docking_root.join(&self.gene).join(self.name())
    }
}

impl fmt::Display for DockingTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} x {} ({})", self.gene, self.ligand, self.receptor)
    }
}

/// A candidate task left out because an input artifact is missing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DroppedTask {
    /// Gene
    pub gene: String,
    /// Receptor name
    pub receptor: String,
    /// Ligand token
    pub ligand: String,
    /// Missing artifact
    pub reason: String,
}

/// Tasks to run plus the candidates that could not be scheduled.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TaskPlan {
    /// Runnable tasks
    pub tasks: Vec<DockingTask>,
    /// Candidates dropped for lack of a prepared artifact
    pub dropped: Vec<DroppedTask>,
    /// Size of the full receptor x ligand cross product
    pub expected: usize,
}

/// Build the task list from the normalized receptor tree and the gene-ligand
/// map. A candidate is dropped, with a log entry, when its prepared receptor
/// or prepared ligand is missing.
pub fn collect_tasks(
    receptor_pdb_root: &Path,
    receptor_pdbqt_root: &Path,
    ligand_pdbqt_root: &Path,
    map: &GeneLigandMap,
) -> Result<TaskPlan> {
    let mut plan = TaskPlan::default();
    for receptor in list_receptors(receptor_pdb_root)? {
        let Some(ligands) = map.get(&receptor.gene) else {
            debug!("Skipping {}: gene {} is not mapped", receptor.pdb.display(), receptor.gene);
            continue;
        };
        let ligands = ligands.ligands();
        plan.expected += ligands.len();

        let dropped = |ligand: &str, reason: String| DroppedTask {
            gene: receptor.gene.clone(),
            receptor: receptor.name.clone(),
            ligand: ligand.to_string(),
            reason,
        };

        let receptor_pdbqt = receptor.prepared_path(receptor_pdbqt_root);
        if !receptor_pdbqt.is_file() {
            error!(
                stage = "collect",
                gene = %receptor.gene,
                receptor = %receptor.name,
                "Missing prepared receptor {}",
                receptor_pdbqt.display()
            );
            let reason = format!("missing prepared receptor {}", receptor_pdbqt.display());
            plan.dropped
                .extend(ligands.iter().map(|l| dropped(l, reason.clone())));
            continue;
        }

        for ligand in ligands {
            let ligand_pdbqt = ligand_pdbqt_root.join(format!("{}.pdbqt", ligand_label(&ligand)));
            if !ligand_pdbqt.is_file() {
                warn!(
                    stage = "collect",
                    gene = %receptor.gene,
                    receptor = %receptor.name,
                    ligand = %ligand,
                    "Missing prepared ligand {}",
                    ligand_pdbqt.display()
                );
                let reason = format!("missing prepared ligand {}", ligand_pdbqt.display());
                plan.dropped.push(dropped(&ligand, reason));
                continue;
            }
            plan.tasks.push(DockingTask {
                gene: receptor.gene.clone(),
                receptor: receptor.name.clone(),
                ligand,
                receptor_pdb: receptor.pdb.clone(),
                receptor_pdbqt: receptor_pdbqt.clone(),
                ligand_pdbqt,
            });
        }
    }
    info!(
        "Scheduled {} of {} docking task(s), {} dropped",
        plan.tasks.len(),
        plan.expected,
        plan.dropped.len()
    );
    Ok(plan)
}

/// Lifecycle of a single docking task. Transitions only move forward.
///
/// Besides the engine path, `PocketResolving -> EngineFailed` covers a task
/// whose pocket resolved but whose engine configuration could not be
/// written; such a task never reaches `Configured`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not started
    Pending,
    /// Looking up the search box
    PocketResolving,
    /// No usable pocket; terminal
    PocketFailed,
    /// Engine configuration written
    Configured,
    /// Engine running
    Running,
    /// Engine finished; terminal
    Done,
    /// Engine failed, timed out or could not be configured; terminal
    EngineFailed,
    /// A previous run already produced a result; terminal
    Skipped,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::PocketFailed | TaskState::Done | TaskState::EngineFailed | TaskState::Skipped
        )
    }

    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, PocketResolving)
                | (Pending, Skipped)
                | (PocketResolving, PocketFailed)
                | (PocketResolving, Configured)
                | (PocketResolving, EngineFailed)
                | (Configured, Running)
                | (Running, Done)
                | (Running, EngineFailed)
        )
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(self.can_advance_to(next), "{self:?} -> {next:?}");
        *self = next;
    }
}

/// Everything a worker needs besides the task itself.
#[derive(Clone, Debug, Serialize)]
pub struct TaskContext {
    /// Root of the docking output tree
    pub docking_root: PathBuf,
    /// Root of the pocket cache
    pub pocket_cache_root: PathBuf,
    /// Engine search thoroughness
    pub exhaustiveness: u32,
    /// Poses written by the engine
    pub num_modes: u32,
    /// Search box padding
    pub pocket_padding: f64,
    /// Keep results of earlier runs
    pub skip_completed: bool,
    /// Engine time limit
    pub task_timeout: Option<Duration>,
}

impl TaskContext {
    /// Context for a run laid out as `layout`.
    pub fn new(layout: &PipelineLayout, settings: &DockingSettings) -> Self {
        Self {
            docking_root: layout.docking.clone(),
            pocket_cache_root: layout.temp_center.clone(),
            exhaustiveness: settings.exhaustiveness,
            num_modes: settings.num_modes,
            pocket_padding: settings.pocket_padding,
            skip_completed: settings.skip_completed,
            task_timeout: settings.task_timeout,
        }
    }
}

/// Runs a docking search described by a configuration file.
pub trait DockingEngine: Send + Sync {
    /// Dock with the configuration at `config`, giving up after `timeout`.
    fn dock(&self, config: &Path, timeout: Option<Duration>) -> Result<()>;
}

/// AutoDock Vina.
#[derive(Clone, Debug)]
pub struct Vina {
    executable: PathBuf,
}

impl Vina {
    /// Use the given `vina` binary.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl DockingEngine for Vina {
    fn dock(&self, config: &Path, timeout: Option<Duration>) -> Result<()> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--config").arg(config);
        run_tool("vina", cmd, timeout).map(|_| ())
    }
}

/// Render the engine configuration of a task.
pub fn vina_config(task: &DockingTask, pocket: &Pocket, out_dir: &Path, ctx: &TaskContext) -> String {
    let (c, s) = (pocket.center, pocket.size);
    let out = out_dir.display();
    format!(
        "receptor = {}\n\
         ligand = {}\n\
         center_x = {:.3}\ncenter_y = {:.3}\ncenter_z = {:.3}\n\
         size_x = {:.3}\nsize_y = {:.3}\nsize_z = {:.3}\n\
         out = {out}/{RESULT_POSES}\nlog = {out}/{RESULT_LOG}\n\
         exhaustiveness = {}\nnum_modes = {}\n",
        task.receptor_pdbqt.display(),
        task.ligand_pdbqt.display(),
        c.x,
        c.y,
        c.z,
        s.x,
        s.y,
        s.z,
        ctx.exhaustiveness,
        ctx.num_modes,
    )
}

/// Write the engine configuration into `out_dir`. Poses and log of an
/// earlier run in the same directory are removed, so a failed re-dock
/// leaves no result behind.
pub fn write_vina_config(
    task: &DockingTask,
    pocket: &Pocket,
    out_dir: &Path,
    ctx: &TaskContext,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    for stale in [RESULT_LOG, RESULT_POSES] {
        let path = out_dir.join(stale);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed previous {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    let config = out_dir.join(VINA_CONFIG);
    std::fs::write(&config, vina_config(task, pocket, out_dir, ctx))?;
    Ok(config)
}

/// Final state of one task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskOutcome {
    /// Run directory name
    pub name: String,
    /// Gene
    pub gene: String,
    /// Receptor name
    pub receptor: String,
    /// Ligand token
    pub ligand: String,
    /// Terminal state
    pub state: TaskState,
    /// Best affinity, when the engine wrote a ranked pose
    pub affinity: Option<f64>,
    /// Failure reason
    pub message: Option<String>,
}

impl TaskOutcome {
    fn new(task: &DockingTask, state: TaskState) -> Self {
        Self {
            name: task.name(),
            gene: task.gene.clone(),
            receptor: task.receptor.clone(),
            ligand: task.ligand.clone(),
            state,
            affinity: None,
            message: None,
        }
    }

    fn failed(task: &DockingTask, state: TaskState, message: impl ToString) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::new(task, state)
        }
    }

    /// A resolving task that ended without a pocket.
    fn without_pocket(task: &DockingTask, mut state: TaskState, reason: impl fmt::Display) -> Self {
        error!(stage = "pocket", gene = %task.gene, receptor = %task.receptor, ligand = %task.ligand, "{reason}");
        state.advance(TaskState::PocketFailed);
        Self::failed(task, state, reason)
    }
}

/// Dock one task. Failures are logged and reported in the outcome.
pub fn run_task(
    task: &DockingTask,
    ctx: &TaskContext,
    detector: &dyn PocketDetector,
    engine: &dyn DockingEngine,
) -> TaskOutcome {
    let mut state = TaskState::Pending;
    let out_dir = task.output_dir(&ctx.docking_root);
    let log = out_dir.join(RESULT_LOG);

    if ctx.skip_completed {
        if let Ok(Some(affinity)) = best_affinity(&log) {
            debug!("{task} already docked, skipping");
            state.advance(TaskState::Skipped);
            return TaskOutcome {
                affinity: Some(affinity),
                ..TaskOutcome::new(task, state)
            };
        }
    }

    state.advance(TaskState::PocketResolving);
    let locator = PocketLocator::new(
        detector,
        PocketCache::new(&ctx.pocket_cache_root),
        ctx.pocket_padding,
    );
    let pocket = match locator.locate(&task.receptor_pdb, &task.gene) {
        Ok(pocket) => pocket,
        Err(e) => return TaskOutcome::without_pocket(task, state, e),
    };

    let config = match write_vina_config(task, &pocket, &out_dir, ctx) {
        Ok(config) => config,
        Err(e) => {
            error!(stage = "configure", gene = %task.gene, receptor = %task.receptor, ligand = %task.ligand, "{e}");
            state.advance(TaskState::EngineFailed);
            return TaskOutcome::failed(task, state, e);
        }
    };
    state.advance(TaskState::Configured);
    trace!("Wrote {}", config.display());

    state.advance(TaskState::Running);
    match engine.dock(&config, ctx.task_timeout) {
        Ok(()) => {
            state.advance(TaskState::Done);
            info!("Docking completed: {task}");
            TaskOutcome {
                affinity: best_affinity(&log).ok().flatten(),
                ..TaskOutcome::new(task, state)
            }
        }
        Err(e) => {
            error!(stage = "dock", gene = %task.gene, receptor = %task.receptor, ligand = %task.ligand, "{e}");
            state.advance(TaskState::EngineFailed);
            TaskOutcome::failed(task, state, e)
        }
    }
}

/// Aggregate result of a docking batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchReport {
    /// Size of the full receptor x ligand cross product
    pub expected: usize,
    /// Tasks handed to the workers
    pub scheduled: usize,
    /// Candidates never scheduled
    pub dropped: Vec<DroppedTask>,
    /// Finished runs
    pub completed: Vec<TaskOutcome>,
    /// Runs kept from an earlier batch
    pub skipped: Vec<TaskOutcome>,
    /// Runs without a usable pocket
    pub pocket_failed: Vec<TaskOutcome>,
    /// Runs the engine did not finish
    pub engine_failed: Vec<TaskOutcome>,
}

impl BatchReport {
    /// Sort outcomes into the report.
    pub fn new(plan: &TaskPlan, outcomes: Vec<TaskOutcome>) -> Self {
        let mut report = Self {
            expected: plan.expected,
            scheduled: plan.tasks.len(),
            dropped: plan.dropped.clone(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.state {
                TaskState::Done => report.completed.push(outcome),
                TaskState::Skipped => report.skipped.push(outcome),
                TaskState::PocketFailed => report.pocket_failed.push(outcome),
                _ => report.engine_failed.push(outcome),
            }
        }
        report
    }

    /// Runs with a result, new or kept.
    pub fn succeeded(&self) -> usize {
        self.completed.len() + self.skipped.len()
    }

    /// Whether every candidate of the cross product produced a result.
    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.expected
    }
}

/// Drives pocket warm-up and the parallel docking phase.
pub struct DockingScheduler<'a> {
    detector: &'a dyn PocketDetector,
    engine: &'a dyn DockingEngine,
    context: TaskContext,
    num_threads: usize,
}

impl<'a> DockingScheduler<'a> {
    /// Scheduler writing into `layout` with `settings`.
    pub fn new(
        detector: &'a dyn PocketDetector,
        engine: &'a dyn DockingEngine,
        layout: &PipelineLayout,
        settings: &DockingSettings,
    ) -> Self {
        Self {
            detector,
            engine,
            context: TaskContext::new(layout, settings),
            num_threads: settings.num_threads,
        }
    }

    /// Context handed to every worker.
    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Resolve the pocket of every receptor used by `tasks`, one receptor at
    /// a time, so that workers only ever read the cache. Returns the
    /// `(gene, receptor)` pairs without a usable pocket, with the reason.
    pub fn warm_pocket_cache(&self, tasks: &[DockingTask]) -> BTreeMap<(String, String), String> {
        let locator = PocketLocator::new(
            self.detector,
            PocketCache::new(&self.context.pocket_cache_root),
            self.context.pocket_padding,
        );
        let mut seen = BTreeSet::new();
        let mut failed = BTreeMap::new();
        for task in tasks {
            let key = (task.gene.clone(), task.receptor.clone());
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Err(e) = locator.locate(&task.receptor_pdb, &task.gene) {
                warn!(gene = %task.gene, receptor = %task.receptor, "Pocket detection failed: {e}");
                failed.insert(key, e.to_string());
            }
        }
        info!(
            "Pocket cache ready for {} receptor(s), {} failed",
            seen.len() - failed.len(),
            failed.len()
        );
        failed
    }

    /// Dock `tasks` on the worker pool.
    pub fn execute(&self, tasks: &[DockingTask]) -> Result<Vec<TaskOutcome>> {
        let ctx = &self.context;
        let (detector, engine) = (self.detector, self.engine);
        run_with_threads(self.num_threads, || {
            debug!("Docking on {} thread(s)", rayon::current_num_threads());
            tasks
                .par_iter()
                .map(|task| run_task(task, ctx, detector, engine))
                .collect()
        })
    }

    /// Warm the pocket cache, then dock every planned task.
    pub fn run(&self, plan: &TaskPlan) -> Result<BatchReport> {
        let failed_pockets = self.warm_pocket_cache(&plan.tasks);
        let mut runnable = Vec::with_capacity(plan.tasks.len());
        let mut outcomes = Vec::new();
        for task in &plan.tasks {
            match failed_pockets.get(&(task.gene.clone(), task.receptor.clone())) {
                Some(reason) => {
                    let mut state = TaskState::Pending;
                    state.advance(TaskState::PocketResolving);
                    outcomes.push(TaskOutcome::without_pocket(task, state, reason));
                }
                None => runnable.push(task.clone()),
            }
        }
        outcomes.extend(self.execute(&runnable)?);

        let report = BatchReport::new(plan, outcomes);
        info!(
            "Docking finished: {} completed, {} skipped, {} pocket failures, {} engine failures",
            report.completed.len(),
            report.skipped.len(),
            report.pocket_failed.len(),
            report.engine_failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stand-in docking engine.

    use super::*;
    use crate::errors::DockingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a one-pose log where the configuration asks for it. Fails for
    /// configurations mentioning `fail_on`.
    #[derive(Default)]
    pub struct FakeEngine {
        pub calls: AtomicUsize,
        pub fail_on: Option<String>,
    }

    impl DockingEngine for FakeEngine {
        fn dock(&self, config: &Path, _timeout: Option<Duration>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = std::fs::read_to_string(config)?;
            if let Some(fail_on) = &self.fail_on {
                if content.contains(fail_on.as_str()) {
                    return Err(DockingError::tool_failed("vina", "exit status: 1", "bad ligand"));
                }
            }
            let log = content
                .lines()
                .find_map(|l| l.strip_prefix("log = "))
                .ok_or_else(|| DockingError::tool_failed("vina", "exit status: 1", "no log"))?;
            std::fs::write(log, "   1       -6.100          0          0\n")?;
            Ok(())
        }
    }
}
