mod drain;
mod outcomes;

pub use drain::DrainTask;
pub use outcomes::{OutcomeLogger, OutcomeTally};
