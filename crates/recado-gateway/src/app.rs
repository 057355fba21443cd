//! Application wiring: build the shared runtime state from config and
//! register the built-in tool palette.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use recado_agent::llm_local::LocalLlm;
use recado_agent::messaging::WhatsappGateway;
use recado_agent::policy::PolicyEngine;
use recado_agent::tools::eval_tools::{DailyLogTool, DatasetStatsTool, RecentTraceTool};
use recado_agent::tools::fetch_tools::FetchUrlTool;
use recado_agent::tools::memory_tools::{ForgetMemoryTool, ListMemoriesTool, SaveMemoryTool};
use recado_agent::tools::notes_tools::{AddNoteTool, ListProjectNotesTool, SearchNotesTool};
use recado_agent::tools::selfcode_tools::{ListSourceFilesTool, ReadSourceFileTool, SearchSourceTool};
use recado_agent::tools::shell_tools::{ManageProcessTool, RunCommandTool};
use recado_agent::tools::ToolRegistry;
use recado_agent::{LlmClient, MessagingClient, RuntimeState};
use recado_core::RecadoConfig;
use recado_memory::types::NoteScope;
use recado_memory::MemoryStore;
use recado_shell::audit::AuditLog;
use recado_shell::registry::ProcessRegistry;
use recado_trace::TraceRecorder;

pub fn build_state(config: RecadoConfig) -> anyhow::Result<Arc<RuntimeState>> {
    let config = Arc::new(config);
    let store = Arc::new(
        MemoryStore::open(&config.database.path)
            .with_context(|| format!("opening database at {}", config.database.path))?,
    );
    let recorder = Arc::new(TraceRecorder::new(Arc::clone(&store), &config.tracing));
    let llm: Arc<dyn LlmClient> = Arc::new(LocalLlm::new(&config.llm));
    let messaging: Arc<dyn MessagingClient> =
        Arc::new(WhatsappGateway::new(&config.gateway.messaging_url));
    let processes = Arc::new(ProcessRegistry::new());
    let audit = Arc::new(
        AuditLog::open(&config.agent.audit_path)
            .with_context(|| format!("opening audit log at {}", config.agent.audit_path))?,
    );
    let policy = Arc::new(PolicyEngine::load(
        &config.agent.policy_path,
        config.agent.shell_allowlist.clone(),
    ));
    let registry = Arc::new(build_registry(&config, &store, &llm, &processes));

    Ok(Arc::new(RuntimeState::new(
        config, store, llm, messaging, recorder, registry, policy, processes, audit,
    )))
}

/// Register the built-in tools under their categories. Declaration order
/// matters — the router walks categories in this order when distributing
/// the tool budget.
fn build_registry(
    config: &RecadoConfig,
    store: &Arc<MemoryStore>,
    llm: &Arc<dyn LlmClient>,
    processes: &Arc<ProcessRegistry>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let project_root = PathBuf::from(
        config
            .agent
            .projects_root
            .clone()
            .unwrap_or_else(|| config.agent.workspace_dir.clone()),
    );

    registry.register(
        "conversation",
        Arc::new(SaveMemoryTool {
            store: Arc::clone(store),
        }),
    );
    registry.register(
        "conversation",
        Arc::new(ListMemoriesTool {
            store: Arc::clone(store),
        }),
    );
    registry.register(
        "conversation",
        Arc::new(ForgetMemoryTool {
            store: Arc::clone(store),
        }),
    );

    registry.register(
        "notes",
        Arc::new(AddNoteTool {
            store: Arc::clone(store),
            llm: Arc::clone(llm),
            scope: NoteScope::User,
        }),
    );
    registry.register(
        "notes",
        Arc::new(SearchNotesTool {
            store: Arc::clone(store),
            llm: Arc::clone(llm),
        }),
    );

    registry.register(
        "projects",
        Arc::new(AddNoteTool {
            store: Arc::clone(store),
            llm: Arc::clone(llm),
            scope: NoteScope::Project,
        }),
    );
    registry.register(
        "projects",
        Arc::new(ListProjectNotesTool {
            store: Arc::clone(store),
        }),
    );

    registry.register(
        "selfcode",
        Arc::new(ListSourceFilesTool {
            root: project_root.clone(),
        }),
    );
    registry.register(
        "selfcode",
        Arc::new(ReadSourceFileTool {
            root: project_root.clone(),
        }),
    );
    registry.register(
        "selfcode",
        Arc::new(SearchSourceTool { root: project_root }),
    );

    registry.register(
        "shell",
        Arc::new(RunCommandTool {
            processes: Arc::clone(processes),
            write_enabled: config.agent.write_enabled,
            cwd: config.agent.workspace_dir.clone(),
        }),
    );
    registry.register(
        "shell",
        Arc::new(ManageProcessTool {
            processes: Arc::clone(processes),
            write_enabled: config.agent.write_enabled,
        }),
    );

    registry.register(
        "evaluation",
        Arc::new(DatasetStatsTool {
            store: Arc::clone(store),
        }),
    );
    registry.register(
        "evaluation",
        Arc::new(RecentTraceTool {
            store: Arc::clone(store),
        }),
    );

    registry.register(
        "debugging",
        Arc::new(DailyLogTool {
            store: Arc::clone(store),
        }),
    );

    // Dynamic category: the router treats it like any built-in.
    registry.register("fetch", Arc::new(FetchUrlTool::new()));

    registry
}
