//! Sequential, fail-fast case execution.

use super::{CaseEnv, TestCase};
use crate::context::RunContext;
use crate::core::{Outcome, TestResult};
use crate::errors::ErrorCode;
use crate::report::ResultAggregator;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

/// Executes an ordered case list against one run context.
///
/// Strictly sequential, at most one case in flight: later cases may depend
/// on device or relay state established by earlier ones, so the runner
/// never reorders or parallelises. The first failing result stops the phase
/// immediately; the aggregator keeps the partial record.
///
/// Any fault a case fails to anticipate is caught here and mapped to the
/// internal-error code. The engine never lets a case take the process down.
pub struct CaseRunner {
    cases: Vec<Arc<dyn TestCase>>,
}

impl CaseRunner {
    /// Creates a runner over an ordered case list.
    #[must_use]
    pub fn new(cases: Vec<Arc<dyn TestCase>>) -> Self {
        Self { cases }
    }

    /// Number of configured cases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// True if no cases are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Runs the list, recording each result in configured order.
    pub async fn run(
        &self,
        env: &CaseEnv,
        ctx: &mut RunContext,
        aggregator: &mut ResultAggregator,
    ) -> Outcome {
        let total = self.cases.len();
        for (index, case) in self.cases.iter().enumerate() {
            let name = case.name();
            info!(case = name, step = index + 1, total, "running case");

            let result = match AssertUnwindSafe(case.run(env, ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => TestResult::fail(
                    ErrorCode::INTERNAL_ERROR,
                    format!("case fault: {}", panic_message(&panic)),
                ),
            };

            let passed = result.is_pass();
            if passed {
                info!(case = name, "case passed: {}", result.message);
            } else {
                error!(
                    case = name,
                    code = result.code_value(),
                    "case failed: {}",
                    result.message
                );
            }
            aggregator.record(name, result);

            if !passed {
                return Outcome::Fail;
            }
        }
        Outcome::Pass
    }

    /// The name of the case at `index`, if any.
    #[must_use]
    pub fn case_name(&self, index: usize) -> Option<&str> {
        self.cases.get(index).map(|c| c.name())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageId;
    use crate::core::Phase;
    use crate::testing::{test_env, PanickingCase, ScriptedCase};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn runner_visits_in_order_and_halts_at_first_failure() {
        let env = test_env().build();
        let mut ctx = env.fresh_context();
        let a = ScriptedCase::pass("A");
        let b = ScriptedCase::fail("B", ErrorCode::ADC_VERIFICATION_FAIL);
        let c = ScriptedCase::pass("C");
        let (a_calls, b_calls, c_calls) = (a.calls(), b.calls(), c.calls());

        let runner = CaseRunner::new(vec![
            Arc::new(a) as Arc<dyn TestCase>,
            Arc::new(b),
            Arc::new(c),
        ]);
        let mut aggregator = ResultAggregator::new(Phase::Sequence, StageId::Three);
        let outcome = runner.run(&env.env, &mut ctx, &mut aggregator).await;

        assert_eq!(outcome, Outcome::Fail);
        let sealed = aggregator.seal();
        let names: Vec<&str> = sealed.steps.iter().map(|s| s.case.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(a_calls.get(), 1);
        assert_eq!(b_calls.get(), 1);
        assert_eq!(c_calls.get(), 0, "C must never be invoked");
    }

    #[tokio::test]
    async fn all_pass_yields_pass_outcome() {
        let env = test_env().build();
        let mut ctx = env.fresh_context();
        let runner = CaseRunner::new(vec![
            Arc::new(ScriptedCase::pass("A")) as Arc<dyn TestCase>,
            Arc::new(ScriptedCase::pass("B")),
        ]);
        let mut aggregator = ResultAggregator::new(Phase::SelfTest, StageId::One);

        let outcome = runner.run(&env.env, &mut ctx, &mut aggregator).await;
        assert_eq!(outcome, Outcome::Pass);
        assert!(aggregator.seal().passed());
    }

    #[tokio::test]
    async fn a_panicking_case_maps_to_internal_error() {
        let env = test_env().build();
        let mut ctx = env.fresh_context();
        let runner = CaseRunner::new(vec![
            Arc::new(PanickingCase::new("boom")) as Arc<dyn TestCase>,
            Arc::new(ScriptedCase::pass("after")),
        ]);
        let mut aggregator = ResultAggregator::new(Phase::Sequence, StageId::Two);

        let outcome = runner.run(&env.env, &mut ctx, &mut aggregator).await;
        assert_eq!(outcome, Outcome::Fail);
        let sealed = aggregator.seal();
        assert_eq!(sealed.code, ErrorCode::INTERNAL_ERROR.value());
        assert_eq!(sealed.steps.len(), 1);
        assert!(sealed.steps[0].result.message.contains("boom"));
    }
}
