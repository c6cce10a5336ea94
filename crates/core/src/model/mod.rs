mod event;
mod formula;
mod goal;
mod project;
mod proposal;
mod run;
mod run_state;
mod run_step;
mod ticket;
mod trajectory;

pub use event::{Event, EventType};
pub use formula::{Formula, Measure, MeasureDirection, RiskTolerance};
pub use goal::Goal;
pub use project::Project;
pub use proposal::Proposal;
pub use run::{Run, RunMetadata, RunStatus, RunType};
pub use run_state::{CategoryStats, FormulaStats, RunState, SectorState};
pub use run_step::{RunStep, RunStepStatus};
pub use ticket::{Ticket, TicketStatus};
pub use trajectory::{Trajectory, TrajectoryState, TrajectoryStep, StepState, StepStatus};
