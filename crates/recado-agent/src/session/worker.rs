//! Typed workers for the planner–orchestrator mode.
//!
//! Each worker type maps to a bounded category set; the router then
//! distributes the tool budget over whatever the plan requested,
//! intersected with what the worker is allowed to touch.

use crate::session::{AgentPlan, TaskStep, WorkerType};

/// Allowed tool categories per worker type. `General` gets everything the
/// registry knows.
pub fn worker_tool_set(worker: WorkerType) -> Option<&'static [&'static str]> {
    match worker {
        WorkerType::Reader => Some(&["conversation", "selfcode", "evaluation", "notes", "debugging"]),
        WorkerType::Analyzer => Some(&["evaluation", "selfcode", "debugging"]),
        WorkerType::Coder => Some(&["selfcode", "shell"]),
        WorkerType::Reporter => Some(&["evaluation", "notes", "debugging"]),
        WorkerType::General => None,
    }
}

/// Resolve the categories a task may use: the plan's requested tags
/// filtered by the worker's allowance, falling back to the full allowance
/// when the plan named nothing usable.
pub fn resolve_task_categories(task: &TaskStep, all_categories: &[String]) -> Vec<String> {
    let allowed: Vec<String> = match worker_tool_set(task.worker_type) {
        Some(set) => set.iter().map(|s| s.to_string()).collect(),
        None => all_categories.to_vec(),
    };
    let requested: Vec<String> = task
        .tools
        .iter()
        .filter(|t| allowed.iter().any(|a| a == *t))
        .cloned()
        .collect();
    if requested.is_empty() {
        allowed
    } else {
        requested
    }
}

/// Prompt handed to a worker's tool loop.
pub fn build_worker_prompt(task: &TaskStep, plan: &AgentPlan, prior_results: &str) -> String {
    let mut prompt = format!(
        "You are a {worker:?} worker inside a larger agent run.\n\
         Overall objective: {objective}\n\
         Your task (#{id}): {description}\n\
         Produce a concrete, self-contained result — the orchestrator will \
         combine it with the other tasks. State findings directly; do not \
         address the user.",
        worker = task.worker_type,
        objective = plan.objective,
        id = task.id,
        description = task.description,
    );
    if !plan.context_summary.is_empty() {
        prompt.push_str(&format!("\nContext: {}", plan.context_summary));
    }
    if !prior_results.is_empty() {
        prompt.push_str(&format!("\n\nResults from earlier tasks:\n{prior_results}"));
    }
    prompt
}

/// Concatenated results of completed tasks, for worker prompts and replans.
pub fn collect_results(plan: &AgentPlan) -> String {
    plan.tasks
        .iter()
        .filter_map(|t| {
            t.result
                .as_ref()
                .map(|r| format!("Task {} ({}): {}", t.id, t.description, r))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Span name for one worker execution.
pub fn worker_span_name(task: &TaskStep) -> String {
    format!("worker:task_{}", task.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TaskStatus;

    fn task(worker: WorkerType, tools: &[&str]) -> TaskStep {
        TaskStep {
            id: 1,
            description: "leer app/".to_string(),
            worker_type: worker,
            tools: tools.iter().map(|s| s.to_string()).collect(),
            status: TaskStatus::Pending,
            result: None,
            depends_on: Vec::new(),
        }
    }

    fn all() -> Vec<String> {
        ["conversation", "notes", "selfcode", "shell", "evaluation", "debugging"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn requested_categories_are_filtered_by_allowance() {
        // A reader asking for shell access does not get it.
        let t = task(WorkerType::Reader, &["selfcode", "shell"]);
        assert_eq!(resolve_task_categories(&t, &all()), vec!["selfcode"]);
    }

    #[test]
    fn empty_request_falls_back_to_full_allowance() {
        let t = task(WorkerType::Coder, &[]);
        assert_eq!(resolve_task_categories(&t, &all()), vec!["selfcode", "shell"]);
    }

    #[test]
    fn general_worker_sees_everything() {
        let t = task(WorkerType::General, &[]);
        assert_eq!(resolve_task_categories(&t, &all()).len(), all().len());
    }

    #[test]
    fn worker_prompt_carries_objective_and_priors() {
        let plan = AgentPlan {
            objective: "contar archivos".to_string(),
            context_summary: "proyecto recado".to_string(),
            tasks: vec![],
            replans: 0,
        };
        let t = task(WorkerType::Reporter, &[]);
        let prompt = build_worker_prompt(&t, &plan, "Task 1: hay 14 archivos");
        assert!(prompt.contains("contar archivos"));
        assert!(prompt.contains("hay 14 archivos"));
        assert!(prompt.contains("Reporter"));
    }
}
