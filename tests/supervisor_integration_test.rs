//! Supervisor 端到端集成测试（MockBackend，无网络）

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive::config::AppConfig;
    use hive::core::{EngineBuilder, LOOP_LIMIT_MESSAGE, PLAN_PARSE_MESSAGE};
    use hive::llm::{l2_normalize, GenerateChunk, MockBackend, Part};
    use hive::memory::{KeywordNoveltyOracle, MemoryType};
    use hive::performance::Feedback;
    use hive::react::{StepStatus, WorkflowStep};
    use hive::{RunRequest, Supervisor, SupervisorEvent};
    use serde_json::json;

    fn engine(backend: Arc<MockBackend>) -> Supervisor {
        let mut config = AppConfig::default();
        config.retrieval.base_delay_ms = 1;
        EngineBuilder::new(config)
            .with_backend(backend)
            .with_novelty_oracle(Arc::new(KeywordNoveltyOracle::default()))
            .build()
            .unwrap()
    }

    async fn run(sup: &Supervisor, req: RunRequest) -> Vec<SupervisorEvent> {
        sup.run(req).await.unwrap().collect().await
    }

    fn last_user_text(backend: &MockBackend, call: usize) -> String {
        let req = &backend.stream_requests()[call];
        req.contents.last().map(|c| c.text()).unwrap_or_default()
    }

    fn plan_snapshots(events: &[SupervisorEvent]) -> Vec<Vec<WorkflowStep>> {
        events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::PlanUpdate { steps } => Some(steps.clone()),
                _ => None,
            })
            .collect()
    }

    fn rank(s: StepStatus) -> u8 {
        match s {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed => 2,
        }
    }

    #[tokio::test]
    async fn test_router_classifies_once_per_prompt() {
        let backend = Arc::new(MockBackend::new().with_responder(|_, _| {
            Ok(r#"{"reasoning": "general question", "agent_name": "General Assistant"}"#.to_string())
        }));
        let sup = engine(backend.clone());
        let a = sup.run(RunRequest::new("what time zone is Tokyo in?")).await.unwrap();
        let first_agent = a.agent.id.clone();
        a.collect().await;
        let b = sup.run(RunRequest::new("what time zone is Tokyo in?")).await.unwrap();
        assert_eq!(b.agent.id, first_agent);
        b.collect().await;
        assert_eq!(backend.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_greeting_goes_to_conversational_agent() {
        let backend = Arc::new(MockBackend::new().with_responder(|contents, _| {
            let text = contents.last().map(|c| c.text()).unwrap_or_default().to_lowercase();
            let agent = if text.contains("hello") || text.contains("how are you") {
                "General Assistant"
            } else {
                "Code Search"
            };
            Ok(json!({"reasoning": "intent classified", "agent_name": agent}).to_string())
        }));
        let sup = engine(backend);
        let handle = sup.run(RunRequest::new("hello, how are you today?")).await.unwrap();
        assert_eq!(handle.agent.id, "chat");
        let events = handle.collect().await;
        assert!(matches!(&events[0], SupervisorEvent::Routed { agent_id, .. } if agent_id == "chat"));
        assert!(matches!(events.last(), Some(SupervisorEvent::Done)));
    }

    #[tokio::test]
    async fn test_plan_with_missing_agent_continues() {
        let backend = Arc::new(MockBackend::new());
        backend.push_turn(vec![
            GenerateChunk::thought("splitting the request"),
            GenerateChunk::text(r#"{"plan": [{"step": 1, "agent": "General Assistant", "task": "find the bug"},"#),
            GenerateChunk::text(
                r#" {"step": 2, "agent": "Ghost Agent", "task": "haunt"}, {"step": 3, "agent": "General Assistant", "task": "write the fix"}]}"#,
            ),
            GenerateChunk::usage(20, 30),
        ]);
        backend.push_turn(vec![GenerateChunk::text("STEP-ONE-OUTPUT"), GenerateChunk::usage(40, 10)]);
        backend.push_turn(vec![GenerateChunk::text("the fix"), GenerateChunk::usage(60, 10)]);

        let sup = engine(backend.clone());
        let events = run(&sup, RunRequest::new("fix the login bug").with_agent("planner")).await;

        // 计划智能体 + 步骤 1 + 步骤 3；步骤 2 不调用后端
        assert_eq!(backend.stream_calls(), 3);
        let step3_prompt = last_user_text(&backend, 2);
        assert!(step3_prompt.contains("STEP-ONE-OUTPUT"));
        assert!(!step3_prompt.contains("was not found"));
        assert!(step3_prompt.contains("write the fix"));

        let snapshots = plan_snapshots(&events);
        let last = snapshots.last().unwrap();
        assert!(last.iter().all(|s| s.status == StepStatus::Completed));
        assert!(last[1].output.as_deref().unwrap().contains("Ghost Agent"));
        assert_eq!(last[2].output.as_deref(), Some("the fix"));
        assert!(matches!(events.last(), Some(SupervisorEvent::Done)));

        let recorded = events
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::RunRecorded { .. }))
            .count();
        assert_eq!(recorded, 3);
    }

    #[tokio::test]
    async fn test_plan_statuses_are_sequential() {
        let backend = Arc::new(MockBackend::new());
        backend.push_turn(vec![GenerateChunk::text(
            r#"{"plan": [{"step": 1, "agent": "chat", "task": "a"}, {"step": 2, "agent": "chat", "task": "b"}, {"step": 3, "agent": "chat", "task": "c"}]}"#,
        )]);
        let sup = engine(backend);
        let events = run(&sup, RunRequest::new("do three things").with_agent("planner")).await;
        let snapshots = plan_snapshots(&events);
        assert_eq!(snapshots.len(), 1 + 3 * 2);

        for snap in &snapshots {
            // 前面的步骤状态不低于后面的，且最多一个进行中
            for pair in snap.windows(2) {
                assert!(rank(pair[0].status) >= rank(pair[1].status));
                if pair[1].status != StepStatus::Pending {
                    assert_eq!(pair[0].status, StepStatus::Completed);
                }
            }
        }
        for i in 0..3 {
            let mut seen: Vec<StepStatus> = snapshots.iter().map(|s| s[i].status).collect();
            seen.dedup();
            assert_eq!(seen, vec![StepStatus::Pending, StepStatus::InProgress, StepStatus::Completed]);
        }
    }

    #[tokio::test]
    async fn test_invalid_plan_apologizes() {
        let backend = Arc::new(MockBackend::new());
        backend.push_turn(vec![GenerateChunk::text("Step one: look around. Step two: ...")]);
        let sup = engine(backend.clone());
        let events = run(&sup, RunRequest::new("plan something").with_agent("planner")).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::Error { message } if message == PLAN_PARSE_MESSAGE)));
        assert!(plan_snapshots(&events).is_empty());
        assert_eq!(backend.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_negative_feedback_rescores_and_remembers() {
        let backend = Arc::new(MockBackend::new());
        let sup = engine(backend.clone());
        let events = run(&sup, RunRequest::new("translate 'cat' to French").with_agent("chat")).await;
        let run_record = events
            .iter()
            .find_map(|e| match e {
                SupervisorEvent::RunRecorded { run } => Some(run.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(run_record.prompt, "translate 'cat' to French");

        let updated = sup
            .submit_feedback(&run_record.id, Feedback::Negative, Some("wrong language used"))
            .await
            .unwrap();
        let expected = run_record.efficiency * run_record.quality * 0.5;
        assert!((updated.final_score - expected).abs() < 1e-6);
        assert_eq!(updated.feedback, Some(Feedback::Negative));

        let memories = sup.long_term().list("chat").await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].memory_type, MemoryType::Feedback);
        assert!(memories[0].content.contains("wrong language used"));

        // 下一次运行：长期记忆与重试反馈都进入上下文
        run(
            &sup,
            RunRequest::new("translate 'dog' to French")
                .with_agent("chat")
                .with_retry("translate 'cat' to French", "answer in French please"),
        )
        .await;
        let prompt = last_user_text(&backend, 1);
        assert!(prompt.contains("wrong language used"));
        assert!(prompt.contains("\"answer in French please\""));
        assert!(prompt.contains("Recent Conversation"));
    }

    #[tokio::test]
    async fn test_retrieval_roundtrip_and_unit_norm() {
        let backend = Arc::new(MockBackend::new());
        let sup = engine(backend.clone());
        let retriever = sup.retriever();
        let text = "The login handler validates the session token before rendering the dashboard.";

        assert_eq!(retriever.ingest("src/login.rs", "file", text).await.unwrap(), 1);
        let chunks = retriever.store().get_source("src/login.rs").await.unwrap();
        for c in &chunks {
            let norm: f32 = c.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
        let hits = retriever.search("session token", 5).await.unwrap();
        assert_eq!(hits[0].chunk.source_id, "src/login.rs");

        assert!(retriever.remove("src/login.rs").await.unwrap());
        let hits = retriever.search("session token", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.source_id != "src/login.rs"));

        let calls_before = backend.embed_calls();
        retriever.ingest("src/login.rs", "file", text).await.unwrap();
        assert!(backend.embed_calls() > calls_before);
        let mut expected = hive::llm::mock::bag_of_words_embedding(text);
        l2_normalize(&mut expected);
        let again = retriever.store().get_source("src/login.rs").await.unwrap();
        assert_eq!(again[0].embedding, expected);
    }

    #[tokio::test]
    async fn test_context_agent_gets_file_blocks() {
        let backend = Arc::new(MockBackend::new());
        let sup = engine(backend.clone());
        sup.retriever()
            .ingest("src/db.rs", "file", "fn connect pool database url")
            .await
            .unwrap();
        run(&sup, RunRequest::new("how does the database pool connect?").with_agent("code_search")).await;
        let prompt = last_user_text(&backend, 0);
        assert!(prompt.contains("--- From file: src/db.rs ---"));

        sup.retriever().clear().await.unwrap();
        let events = run(&sup, RunRequest::new("anything indexed?").with_agent("code_search")).await;
        assert!(events.iter().any(
            |e| matches!(e, SupervisorEvent::Thought { text } if text == hive::react::NO_CONTEXT_FOUND)
        ));
    }

    #[tokio::test]
    async fn test_loop_limit_is_fatal_for_run() {
        let backend = Arc::new(MockBackend::new());
        for _ in 0..10 {
            backend.push_turn(vec![GenerateChunk::call("echo", json!({"text": "again"}))]);
        }
        let sup = engine(backend.clone());
        let events = run(&sup, RunRequest::new("loop forever").with_agent("chat")).await;
        assert_eq!(backend.stream_calls(), 10);
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::Error { message } if message == LOOP_LIMIT_MESSAGE)));
        assert!(!events.iter().any(|e| matches!(e, SupervisorEvent::RunRecorded { .. })));
        assert!(sup.tracker().runs_for_agent("chat").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_leaves_no_orphan_user_turn() {
        let backend = Arc::new(MockBackend::new());
        for _ in 0..10 {
            backend.push_turn(vec![GenerateChunk::call("echo", json!({"text": "again"}))]);
        }
        let sup = engine(backend.clone());
        run(&sup, RunRequest::new("loop forever").with_agent("chat")).await;
        assert!(sup.recent_turns(10).await.is_empty());

        run(&sup, RunRequest::new("hello there").with_agent("chat")).await;
        let turns = sup.recent_turns(10).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "hello there");
        assert!(!last_user_text(&backend, 10).contains("loop forever"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let backend = Arc::new(MockBackend::new());
        backend.push_turn(vec![GenerateChunk::call("launch_rockets", json!({"count": 3}))]);
        backend.push_turn(vec![GenerateChunk::text("I can't do that."), GenerateChunk::usage(12, 6)]);
        let sup = engine(backend.clone());
        let events = run(&sup, RunRequest::new("launch the rockets").with_agent("chat")).await;

        let result = events
            .iter()
            .find_map(|e| match e {
                SupervisorEvent::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result["success"], false);
        let second = &backend.stream_requests()[1].contents;
        assert!(second
            .iter()
            .any(|c| matches!(&c.parts[0], Part::FunctionResponse { name, .. } if name == "launch_rockets")));
        assert!(events.iter().any(|e| matches!(e, SupervisorEvent::RunRecorded { .. })));
    }

    #[tokio::test]
    async fn test_settings_tool_changes_next_turn() {
        let backend = Arc::new(MockBackend::new());
        backend.push_turn(vec![GenerateChunk::call(
            "update_agent_settings",
            json!({"agent": "chat", "temperature": 0.1}),
        )]);
        backend.push_turn(vec![GenerateChunk::text("Done, I'll be more precise.")]);
        let sup = engine(backend.clone());
        run(&sup, RunRequest::new("be less creative").with_agent("chat")).await;
        let calls = backend.stream_requests();
        assert_eq!(calls[0].config.temperature, Some(0.7));
        assert_eq!(calls[1].config.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_cancel_before_start_makes_no_backend_calls() {
        let backend = Arc::new(MockBackend::new());
        let sup = engine(backend.clone());
        let handle = sup.run(RunRequest::new("hello").with_agent("chat")).await.unwrap();
        handle.cancel();
        handle.cancel_and_wait().await;
        assert_eq!(backend.stream_calls(), 0);
        assert!(sup.tracker().runs_for_agent("chat").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_session_commits_novel_fact() {
        let backend = Arc::new(MockBackend::new());
        let sup = engine(backend.clone());
        run(&sup, RunRequest::new("I'm learning Rust").with_agent("chat")).await;
        run(&sup, RunRequest::new("keep answers short").with_agent("chat")).await;
        assert_eq!(sup.recent_turns(10).await.len(), 4);

        backend.push_response(r#"{"fact": "The user is learning Rust and prefers short answers."}"#);
        let item = sup.end_session("chat").await.unwrap().unwrap();
        assert_eq!(item.memory_type, MemoryType::SelfGenerated);
        assert!((item.weight - 0.5).abs() < f32::EPSILON);
        assert!(sup.recent_turns(10).await.is_empty());

        // 摘要为空时不写入
        run(&sup, RunRequest::new("thanks").with_agent("chat")).await;
        backend.push_response(r#"{"fact": null}"#);
        assert!(sup.end_session("chat").await.unwrap().is_none());
        assert_eq!(sup.long_term().list("chat").await.unwrap().len(), 1);
    }
}
