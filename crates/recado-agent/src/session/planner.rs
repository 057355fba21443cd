//! Plan generation, replanning, and final synthesis.
//!
//! The planner asks for JSON and parses it tolerantly: fenced blocks, raw
//! objects, or the first `{…}` substring all work. A plan that still fails
//! to parse degrades to a single general-worker task instead of failing
//! the session.

use tracing::{debug, warn};

use crate::llm::{ChatMessage, ChatResponse, LlmClient, LlmError};
use crate::session::{AgentPlan, TaskStatus, TaskStep, WorkerType};

/// Plan plus the generation usage, so the caller can record the span.
pub struct PlanOutcome {
    pub plan: AgentPlan,
    pub response: ChatResponse,
    /// False when the model's JSON was unusable and the fallback plan was
    /// substituted.
    pub parsed: bool,
}

/// UNDERSTAND: produce a structured plan for `objective`.
pub async fn create_plan(
    llm: &dyn LlmClient,
    objective: &str,
    context: &str,
) -> Result<PlanOutcome, LlmError> {
    let prompt = format!(
        "Decompose this objective into a short ordered task plan.\n\
         Objective: {objective}\n\
         Context: {context}\n\n\
         Reply with ONLY a JSON object:\n\
         {{\"objective\": \"...\", \"context_summary\": \"...\", \"tasks\": [\n\
           {{\"id\": 1, \"description\": \"...\", \"worker_type\": \
         \"reader|analyzer|coder|reporter|general\", \"tools\": [\"category\", ...], \
         \"depends_on\": []}}\n\
         ]}}\n\
         Keep it to at most 6 tasks. Ids are 1-based; depends_on lists task ids."
    );
    let messages = [ChatMessage::system(prompt)];
    let response = llm.chat(&messages, false).await?;
    match parse_plan_json(&response.content, objective) {
        Some(plan) => Ok(PlanOutcome {
            plan,
            response,
            parsed: true,
        }),
        None => {
            warn!("plan JSON unusable, substituting single-task fallback");
            Ok(PlanOutcome {
                plan: fallback_plan(objective),
                response,
                parsed: false,
            })
        }
    }
}

/// Replan around a failed task, carrying prior results as context. The
/// caller enforces the replan cap.
pub async fn replan(
    llm: &dyn LlmClient,
    plan: &AgentPlan,
    failed_task: &TaskStep,
    results: &str,
) -> Result<PlanOutcome, LlmError> {
    let prompt = format!(
        "A task in the plan failed. Produce a revised plan for the remaining \
         work in the same JSON shape as before.\n\
         Objective: {}\n\
         Failed task: {} — {}\n\
         Results so far:\n{}\n\n\
         Reply with ONLY the JSON object.",
        plan.objective, failed_task.id, failed_task.description, results
    );
    let messages = [ChatMessage::system(prompt)];
    let response = llm.chat(&messages, false).await?;
    match parse_plan_json(&response.content, &plan.objective) {
        Some(mut new_plan) => {
            new_plan.replans = plan.replans + 1;
            Ok(PlanOutcome {
                plan: new_plan,
                response,
                parsed: true,
            })
        }
        None => {
            let mut fallback = fallback_plan(&plan.objective);
            fallback.replans = plan.replans + 1;
            Ok(PlanOutcome {
                plan: fallback,
                response,
                parsed: false,
            })
        }
    }
}

/// SYNTHESIZE: one user-facing answer from the completed plan.
pub async fn synthesize(llm: &dyn LlmClient, plan: &AgentPlan) -> Result<ChatResponse, LlmError> {
    let results: Vec<String> = plan
        .tasks
        .iter()
        .map(|t| {
            format!(
                "Task {} ({}): {}",
                t.id,
                t.description,
                t.result.as_deref().unwrap_or("(no result)")
            )
        })
        .collect();
    let prompt = format!(
        "Write the final answer for the user, in their language, from these \
         task results. Be direct and include the concrete findings.\n\
         Objective: {}\n\n{}",
        plan.objective,
        results.join("\n")
    );
    let messages = [ChatMessage::system(prompt)];
    llm.chat(&messages, false).await
}

/// Tolerant plan parsing: fenced JSON, raw JSON, or first-brace extraction.
pub fn parse_plan_json(text: &str, objective: &str) -> Option<AgentPlan> {
    let candidate = extract_json_candidate(text)?;
    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;
    let tasks_value = value.get("tasks")?.as_array()?;
    if tasks_value.is_empty() {
        return None;
    }

    let mut tasks = Vec::new();
    for (i, t) in tasks_value.iter().enumerate() {
        let description = t.get("description")?.as_str()?.to_string();
        let worker_type = t
            .get("worker_type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<WorkerType>().ok())
            .unwrap_or(WorkerType::General);
        let tools = t
            .get("tools")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let depends_on = t
            .get("depends_on")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as usize)).collect())
            .unwrap_or_default();
        let id = t
            .get("id")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(i + 1);
        tasks.push(TaskStep {
            id,
            description,
            worker_type,
            tools,
            status: TaskStatus::Pending,
            result: None,
            depends_on,
        });
    }
    debug!(tasks = tasks.len(), "plan parsed");
    Some(AgentPlan {
        objective: value
            .get("objective")
            .and_then(|v| v.as_str())
            .unwrap_or(objective)
            .to_string(),
        context_summary: value
            .get("context_summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        tasks,
        replans: 0,
    })
}

fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();
    // Fenced block first.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim().to_string());
        }
    }
    // Raw JSON or first-brace extraction.
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if e > s => Some(trimmed[s..=e].to_string()),
        _ => None,
    }
}

fn fallback_plan(objective: &str) -> AgentPlan {
    AgentPlan {
        objective: objective.to_string(),
        context_summary: String::new(),
        tasks: vec![TaskStep {
            id: 1,
            description: objective.to_string(),
            worker_type: WorkerType::General,
            tools: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            depends_on: Vec::new(),
        }],
        replans: 0,
    }
}

/// Tasks in execution order, respecting `depends_on`. Cycles or dangling
/// references break the chain — the remaining tasks append in id order so
/// nothing is silently dropped.
pub fn topological_order(plan: &AgentPlan) -> Vec<usize> {
    let mut done: Vec<usize> = Vec::new();
    let mut remaining: Vec<&TaskStep> = plan.tasks.iter().collect();
    remaining.sort_by_key(|t| t.id);
    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|d| done.contains(d) || !plan.tasks.iter().any(|x| x.id == *d))
            })
            .map(|t| t.id)
            .collect();
        if ready.is_empty() {
            // Dependency cycle — run the rest in id order.
            done.extend(remaining.iter().map(|t| t.id));
            break;
        }
        for id in ready {
            done.push(id);
            remaining.retain(|t| t.id != id);
        }
    }
    done
}
