//! Runnable experiments and the built-in dry-run collaborators.

use tracing::info;
use uuid::Uuid;

use lt_optimizer::EXPERIMENT_ID_KEY;
use lt_types::{Device, LtResult};

use crate::catalog::FactoryCatalog;
use crate::inject::{Injector, Slot};

/// The unit of work a worker runs once per snapshot.
pub trait Experiment: Send {
    fn run(&mut self) -> LtResult<()>;

    fn name(&self) -> &str {
        "experiment"
    }
}

pub const DRY_RUN_EXPERIMENT: &str = "lighter.experiments.DryRun";
pub const PLACEHOLDER_COLLABORATOR: &str = "lighter.collaborators.Placeholder";

/// Stand-in for any collaborator slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub device: Device,
}

/// Logs what the context assembled without doing any work.
///
/// Setting `dry_run.fail` to `true` in the config makes the run fail, which
/// is how scheduling failure paths are exercised end to end.
#[derive(Debug, Clone)]
pub struct DryRun {
    experiment_id: Option<String>,
    context_id: Uuid,
    device: Device,
    filled: Vec<Slot>,
    keys: Vec<String>,
    fail: bool,
}

impl DryRun {
    pub fn from_injector(injector: &mut Injector<'_>) -> LtResult<Self> {
        let filled = Slot::ALL
            .into_iter()
            .filter(|slot| injector.slot(*slot).is_ok())
            .collect();
        Ok(Self {
            experiment_id: injector.config().get(EXPERIMENT_ID_KEY),
            context_id: injector.context_id(),
            device: injector.device().clone(),
            filled,
            keys: injector.config().keys().map(str::to_string).collect(),
            fail: injector.value_or("dry_run.fail", false),
        })
    }

    pub fn filled_slots(&self) -> &[Slot] {
        &self.filled
    }
}

impl Experiment for DryRun {
    fn run(&mut self) -> LtResult<()> {
        let slots: Vec<&str> = self.filled.iter().map(Slot::name).collect();
        info!(
            experiment_id = self.experiment_id.as_deref().unwrap_or("-"),
            context_id = %self.context_id,
            device = %self.device,
            "Dry run: config keys [{}], slots [{}]",
            self.keys.join(", "),
            slots.join(", ")
        );
        if self.fail {
            return Err(lt_types::validation_error!("dry run asked to fail (dry_run.fail = true)"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

/// Catalog holding the built-in dry-run experiment and placeholder.
pub fn builtin_catalog() -> FactoryCatalog {
    let mut catalog = FactoryCatalog::new();
    catalog
        .register(PLACEHOLDER_COLLABORATOR, |injector: &mut Injector<'_>| {
            Ok(Placeholder {
                device: injector.device().clone(),
            })
        })
        .register_experiment(DRY_RUN_EXPERIMENT, DryRun::from_injector);
    catalog
}
