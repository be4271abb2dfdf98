use crate::types::Task;

/// Turns a task plus its context into the text sent to the provider.
pub trait PromptBuilder: Send + Sync {
    /// `dependency_outputs` holds `(dependency name, output)` for every
    /// completed dependency in declaration order. `previous` is the output
    /// of the prior iteration when refining.
    fn render(
        &self,
        task: &Task,
        dependency_outputs: &[(String, String)],
        previous: Option<&str>,
    ) -> String;
}

/// Appends dependency outputs and the previous attempt as markdown sections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatePromptBuilder;

impl PromptBuilder for TemplatePromptBuilder {
    fn render(
        &self,
        task: &Task,
        dependency_outputs: &[(String, String)],
        previous: Option<&str>,
    ) -> String {
        let mut prompt = task.prompt.clone();
        for (name, output) in dependency_outputs {
            prompt.push_str(&format!("\n\n## {name}\n{output}"));
        }
        if let Some(previous) = previous {
            prompt.push_str(&format!(
                "\n\n## Previous attempt\n{previous}\n\nImprove on the previous attempt."
            ));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_prompt_is_unchanged() {
        let task = Task::new("t", "r", "Say hi");
        assert_eq!(TemplatePromptBuilder.render(&task, &[], None), "Say hi");
    }

    #[test]
    fn test_dependencies_and_previous_are_appended() {
        let task = Task::new("report", "writer", "Write the report");
        let deps = vec![
            ("security".to_string(), "no issues".to_string()),
            ("perf".to_string(), "p99 40ms".to_string()),
        ];
        let prompt = TemplatePromptBuilder.render(&task, &deps, Some("draft 1"));
        assert!(prompt.starts_with("Write the report"));
        let security = prompt.find("## security\nno issues").unwrap_or(usize::MAX);
        let perf = prompt.find("## perf\np99 40ms").unwrap_or(usize::MAX);
        assert!(security < perf && perf != usize::MAX);
        assert!(prompt.contains("## Previous attempt\ndraft 1"));
    }
}
