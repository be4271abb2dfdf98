use crate::types::{Task, TaskOutput};

/// Decides whether an iterative task runs another iteration.
pub trait RefinementPolicy: Send + Sync {
    /// Called after every successful iteration below the iteration ceiling.
    /// `previous` is the last successful output before `current`.
    fn should_refine(
        &self,
        task: &Task,
        current: &TaskOutput,
        previous: Option<&TaskOutput>,
    ) -> bool;
}

/// Never refine: every task runs once.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefinement;

impl RefinementPolicy for NoRefinement {
    fn should_refine(&self, _: &Task, _: &TaskOutput, _: Option<&TaskOutput>) -> bool {
        false
    }
}

/// Refine until two consecutive iterations produce the same output.
#[derive(Debug, Default, Clone, Copy)]
pub struct UntilStable;

impl RefinementPolicy for UntilStable {
    fn should_refine(&self, _: &Task, current: &TaskOutput, previous: Option<&TaskOutput>) -> bool {
        match previous {
            Some(previous) => previous.content.trim() != current.content.trim(),
            None => true,
        }
    }
}

/// Wraps a closure as a refinement policy.
pub struct RefineWith<F>(pub F);

impl<F> RefinementPolicy for RefineWith<F>
where
    F: Fn(&Task, &TaskOutput, Option<&TaskOutput>) -> bool + Send + Sync,
{
    fn should_refine(
        &self,
        task: &Task,
        current: &TaskOutput,
        previous: Option<&TaskOutput>,
    ) -> bool {
        (self.0)(task, current, previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_agent::{CallResult, Tier};
    use std::time::Duration;

    fn output(content: &str) -> TaskOutput {
        TaskOutput {
            content: content.to_string(),
            call: CallResult {
                target_used: "t".into(),
                provider: "p".into(),
                model: "m".into(),
                tier: Tier::Economy,
                input_units: 0,
                output_units: 0,
                cost: 0.0,
                latency: Duration::ZERO,
                did_fallback: false,
                below_quality_threshold: false,
                output: content.to_string(),
                attempts: Vec::new(),
            },
            iterations: 1,
            cost: 0.0,
        }
    }

    #[test]
    fn test_until_stable() {
        let task = Task::new("t", "r", "p");
        assert!(UntilStable.should_refine(&task, &output("a"), None));
        assert!(UntilStable.should_refine(&task, &output("b"), Some(&output("a"))));
        assert!(!UntilStable.should_refine(&task, &output("b\n"), Some(&output("b"))));
        assert!(!NoRefinement.should_refine(&task, &output("a"), None));
    }

    #[test]
    fn test_closure_policy() {
        let policy = RefineWith(|_: &Task, current: &TaskOutput, _: Option<&TaskOutput>| {
            !current.content.contains("DONE")
        });
        let task = Task::new("t", "r", "p");
        assert!(policy.should_refine(&task, &output("draft"), None));
        assert!(!policy.should_refine(&task, &output("DONE"), None));
    }
}
