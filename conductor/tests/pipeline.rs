//! End-to-end pipeline tests: seeded queue through the scheduler with
//! scripted collaborators, verifying the snapshot on disk along the way.

use std::fs;

use conductor::core::context::{RunContext, RunOptions};
use conductor::core::task::TaskStatus;
use conductor::io::config::ConductorConfig;
use conductor::io::model::{ModelResponse, ToolCall};
use conductor::io::state_store::{load_snapshot, write_snapshot};
use conductor::io::tools::WorkspaceTools;
use conductor::io::workspace::Workspace;
use conductor::looping::{LoopStop, run_loop};
use conductor::start::{self, ConductorPaths};
use conductor::step::TaskRunner;
use conductor::test_support::{ScriptedApproval, ScriptedModelClient, ScriptedVcs};

const ANALYSIS_PLAIN: &str =
    r#"{"summary": "small change", "files": [], "gaps": [], "subtasks": []}"#;
const REVIEW_PASS: &str = r#"{"passed": true, "issues": [], "suggestions": []}"#;
const REFLECTION: &str = r#"{"lessons_learned": []}"#;
const CODER_CHANGE: &str =
    r#"{"files": [{"path": "src/a.rs", "content": "fn main() {}", "action": "create"}]}"#;

struct Harness {
    _temp: tempfile::TempDir,
    paths: ConductorPaths,
    workspace: Workspace,
    config: ConductorConfig,
}

impl Harness {
    fn seeded(seed: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        fs::create_dir_all(&paths.conductor_dir).expect("conductor dir");
        fs::write(&paths.seed_path, seed).expect("seed");
        start::init(&paths).expect("init");
        let workspace = Workspace::new(temp.path());
        Self {
            _temp: temp,
            paths,
            workspace,
            config: ConductorConfig::default(),
        }
    }

    fn drive(
        &self,
        model: &mut ScriptedModelClient,
        vcs: &ScriptedVcs,
        ctx: &mut RunContext,
    ) -> LoopStop {
        let tools = WorkspaceTools::new(self.workspace.clone());
        let mut approval = ScriptedApproval::default();
        let mut runner = TaskRunner {
            model,
            tools: &tools,
            vcs,
            workspace: &self.workspace,
            config: &self.config,
            state_path: &self.paths.tasks_path,
            reflections_dir: &self.paths.reflections_dir,
            supervise: true,
        };
        run_loop(&mut runner, ctx, &mut approval).expect("loop").stop
    }
}

fn text(t: &str) -> ModelResponse {
    ModelResponse {
        content: t.to_string(),
        ..ModelResponse::default()
    }
}

#[test]
fn seeded_chain_completes_and_snapshot_reflects_it() {
    let harness = Harness::seeded(
        r#"[{"id": "T0", "title": "Lay the base", "description": "d"},
            {"id": "T1", "title": "Build on it", "description": "d", "dependencies": ["T0"]},
            {"id": "T2", "title": "Finish", "description": "d", "dependencies": ["T1"]}]"#,
    );
    let mut responses = Vec::new();
    for _ in 0..3 {
        responses.extend([
            text(ANALYSIS_PLAIN),
            text(CODER_CHANGE),
            text(REVIEW_PASS),
            text(REFLECTION),
        ]);
    }
    let mut model = ScriptedModelClient::new(responses);
    let vcs = ScriptedVcs::with_changes();
    let mut ctx = start::load_run(&harness.paths, RunOptions::default()).expect("load");

    let stop = harness.drive(&mut model, &vcs, &mut ctx);

    assert_eq!(stop, LoopStop::Complete);
    assert_eq!(
        vcs.commit_messages(),
        vec![
            "agent: T0 - Lay the base".to_string(),
            "agent: T1 - Build on it".to_string(),
            "agent: T2 - Finish".to_string(),
        ]
    );

    // Disk agrees with memory.
    let snapshot = load_snapshot(&harness.paths.tasks_path).expect("snapshot");
    assert_eq!(snapshot.tasks.len(), 3);
    assert!(snapshot.tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert!(snapshot.tasks.iter().all(|t| t.commit_hash.is_some()));

    let counts = start::status(&harness.paths).expect("status");
    assert_eq!(counts.done, 3);
    assert_eq!(counts.total(), 3);
}

#[test]
fn interrupted_run_resumes_from_the_snapshot() {
    let harness = Harness::seeded(
        r#"[{"id": "T0", "title": "First", "description": "d"},
            {"id": "T1", "title": "Second", "description": "d", "dependencies": ["T0"]}]"#,
    );

    // Simulate a crash mid-task: T0 was in progress with its analysis cached.
    let mut snapshot = load_snapshot(&harness.paths.tasks_path).expect("snapshot");
    let t0 = snapshot.tasks.iter_mut().find(|t| t.id == "T0").expect("T0");
    t0.status = TaskStatus::InProgress;
    t0.analysis_cache = Some(ANALYSIS_PLAIN.to_string());
    write_snapshot(&harness.paths.tasks_path, &snapshot).expect("write");

    // T0 skips straight to coding; T1 runs the full pipeline.
    let mut model = ScriptedModelClient::new(vec![
        text(CODER_CHANGE),
        text(REVIEW_PASS),
        text(REFLECTION),
        text(ANALYSIS_PLAIN),
        text(CODER_CHANGE),
        text(REVIEW_PASS),
        text(REFLECTION),
    ]);
    let vcs = ScriptedVcs::with_changes();
    let mut ctx = start::load_run(&harness.paths, RunOptions::default()).expect("load");
    assert_eq!(ctx.queue.len(), 2);
    assert!(ctx.queue.iter().all(|t| t.status == TaskStatus::Pending));

    let stop = harness.drive(&mut model, &vcs, &mut ctx);

    assert_eq!(stop, LoopStop::Complete);
    assert_eq!(model.calls_seen(), 7);
    assert_eq!(model.remaining(), 0);
    assert_eq!(ctx.completed.len(), 2);
}

#[test]
fn coder_tool_calls_round_trip_through_the_workspace() {
    let harness = Harness::seeded(
        r#"[{"id": "T0", "title": "Inspect then change", "description": "d"}]"#,
    );
    harness
        .workspace
        .write("src/lib.rs", "pub fn existing() {}\n")
        .expect("prime workspace");

    let tool_pass = ModelResponse {
        content: "checking the current shape first".to_string(),
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "src/lib.rs"}),
        }],
        ..ModelResponse::default()
    };
    let mut model = ScriptedModelClient::new(vec![
        text(ANALYSIS_PLAIN),
        tool_pass,
        text(CODER_CHANGE),
        text(REVIEW_PASS),
        text(REFLECTION),
    ]);
    let vcs = ScriptedVcs::with_changes();
    let mut ctx = start::load_run(&harness.paths, RunOptions::default()).expect("load");

    let stop = harness.drive(&mut model, &vcs, &mut ctx);

    assert_eq!(stop, LoopStop::Complete);
    assert_eq!(model.calls_seen(), 5);
    // The follow-up coder request carries the tool result back to the model.
    let followup = &model.requests()[2];
    let rendered = serde_json::to_string(&followup.messages).expect("serialize");
    assert!(rendered.contains("pub fn existing()"));
    assert!(rendered.contains("call_1"));
}
