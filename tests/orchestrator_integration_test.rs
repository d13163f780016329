//! 编排流程集成测试：Scripted 模型 + 本地沙箱（临时目录）+ 内存存储

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use devcook::config::AppConfig;
    use devcook::core::{
        run_queue, AgentError, FailureReason, OrchestratorBuilder, RunOrchestrator, RunOutcome,
        RunRequest, GENERIC_ERROR_MESSAGE,
    };
    use devcook::llm::ScriptedLlmClient;
    use devcook::memory::{Message, Role};
    use devcook::react::Prompts;
    use devcook::store::{InMemoryStore, MessageRole, MessageStore, MessageType, NewMessage};
    use tokio_util::sync::CancellationToken;

    const WRITE_BUTTON: &str = r#"I'll create the file.
```json
{"tool": "createOrUpdateFiles", "args": {"files": [{"path": "index.html", "content": "<button/>"}]}}
```"#;
    const SUMMARY: &str = "<task_summary>\nCreated a button component\n</task_summary>";

    struct Harness {
        _tmp: tempfile::TempDir,
        store: Arc<InMemoryStore>,
        code_llm: Arc<ScriptedLlmClient>,
        aux_llm: Arc<ScriptedLlmClient>,
        orchestrator: RunOrchestrator,
    }

    fn harness(code_llm: ScriptedLlmClient, aux_llm: ScriptedLlmClient) -> Harness {
        harness_with(code_llm, aux_llm, |_| {})
    }

    fn harness_with(
        code_llm: ScriptedLlmClient,
        aux_llm: ScriptedLlmClient,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.data_dir = tmp.path().to_path_buf();
        std::fs::create_dir_all(cfg.templates_dir().join(&cfg.sandbox.template)).unwrap();
        std::fs::write(
            cfg.templates_dir().join(&cfg.sandbox.template).join("package.json"),
            "{}",
        )
        .unwrap();
        cfg.agent.write_retry.base_delay_ms = 1;
        tweak(&mut cfg);

        let store = Arc::new(InMemoryStore::new());
        let code_llm = Arc::new(code_llm);
        let aux_llm = Arc::new(aux_llm);
        let orchestrator = OrchestratorBuilder::new(cfg)
            .with_prompts(Prompts::default())
            .with_llm(code_llm.clone())
            .with_auxiliary_llm(aux_llm.clone())
            .with_store(store.clone())
            .build()
            .unwrap();
        Harness {
            _tmp: tmp,
            store,
            code_llm,
            aux_llm,
            orchestrator,
        }
    }

    fn request(value: &str) -> RunRequest {
        RunRequest {
            project_id: "p1".into(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_successful_run_persists_result_with_fragment() {
        let h = harness(
            ScriptedLlmClient::new([WRITE_BUTTON, SUMMARY]),
            ScriptedLlmClient::new(["Button Component", "Here's a button for you."]),
        );
        let outcome = h.orchestrator.run(&request("build a button")).await.unwrap();

        let RunOutcome::Success { url, title, summary, .. } = outcome else {
            panic!("expected success");
        };
        assert!(url.starts_with("https://3000-"));
        assert_eq!(title, "Button Component");
        assert_eq!(summary, SUMMARY);

        let messages = h.store.list_messages("p1").await.unwrap();
        assert_eq!(messages.len(), 1);
        let saved = &messages[0];
        assert_eq!(saved.role, MessageRole::Assistant);
        assert_eq!(saved.message_type, MessageType::Result);
        assert_eq!(saved.content, "Here's a button for you.");
        let fragment = saved.fragment.as_ref().unwrap();
        let expected: BTreeMap<String, String> =
            [("index.html".to_string(), "<button/>".to_string())].into();
        assert_eq!(fragment.files, expected);
        assert!(!fragment.sandbox_url.is_empty());
        assert_eq!(fragment.sandbox_url, url);

        // 标题与回复代理都只拿到摘要
        let aux_requests = h.aux_llm.requests();
        assert_eq!(aux_requests.len(), 2);
        assert_eq!(aux_requests[0][1].content, SUMMARY);
        assert_eq!(h.code_llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_iteration_ceiling_persists_generic_error() {
        let h = harness(
            ScriptedLlmClient::new(Vec::<String>::new()).with_fallback("Still thinking about the layout."),
            ScriptedLlmClient::new(["unused"]),
        );
        let outcome = h.orchestrator.run(&request("build a button")).await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                reason: FailureReason::Incomplete,
                ..
            }
        ));
        assert_eq!(h.code_llm.call_count(), 15);
        assert_eq!(h.aux_llm.call_count(), 0);

        let messages = h.store.list_messages("p1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::Error);
        assert_eq!(messages[0].content, GENERIC_ERROR_MESSAGE);
        assert!(messages[0].fragment.is_none());
    }

    #[tokio::test]
    async fn test_summary_without_files_is_failure() {
        let h = harness(ScriptedLlmClient::new([SUMMARY]), ScriptedLlmClient::new(["unused"]));
        let outcome = h.orchestrator.run(&request("build a button")).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                reason: FailureReason::NoFiles,
                ..
            }
        ));
        let messages = h.store.list_messages("p1").await.unwrap();
        assert_eq!(messages[0].content, GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_previous_messages_seed_history_oldest_first() {
        let h = harness(
            ScriptedLlmClient::new([WRITE_BUTTON, SUMMARY]),
            ScriptedLlmClient::new(["Button", "Done"]),
        );
        h.store.append_message(NewMessage::user("p1", "A")).await.unwrap();
        h.store
            .append_message(NewMessage {
                project_id: "p1".into(),
                content: "B".into(),
                role: "ASSISTANT".parse().unwrap(),
                message_type: MessageType::Result,
                fragment: None,
            })
            .await
            .unwrap();
        h.store.append_message(NewMessage::user("other", "Z")).await.unwrap();

        h.orchestrator.run(&request("C")).await.unwrap();

        let first = &h.code_llm.requests()[0];
        assert_eq!(first[0].role, Role::System);
        assert_eq!(
            first[1..].to_vec(),
            vec![Message::user("A"), Message::assistant("B"), Message::user("C")]
        );
    }

    #[tokio::test]
    async fn test_missing_template_propagates_sandbox_error() {
        let h = harness(ScriptedLlmClient::new([SUMMARY]), ScriptedLlmClient::new(["x"]));
        std::fs::remove_dir_all(h._tmp.path().join("templates")).unwrap();
        let result = h.orchestrator.run(&request("build a button")).await;
        assert!(matches!(result, Err(AgentError::Sandbox(_))));
        assert!(h.store.list_messages("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_persists_prompt_once_and_runs() {
        let h = harness(
            ScriptedLlmClient::new([WRITE_BUTTON, SUMMARY]),
            ScriptedLlmClient::new(["Button", "Done"]),
        );
        let code_llm = h.code_llm.clone();
        let store = h.store.clone();
        let orchestrator = Arc::new(h.orchestrator);

        let mut cfg = AppConfig::default();
        cfg.worker.max_concurrent_runs = 2;
        let (queue, worker) = run_queue(orchestrator, &cfg.worker, CancellationToken::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = tokio::spawn(worker.with_results(tx).run());

        assert!(matches!(
            queue.submit("p1", "").await,
            Err(AgentError::InvalidRequest(_))
        ));
        queue.submit("p1", "build a button").await.unwrap();
        drop(queue);

        assert_eq!(worker.await.unwrap(), 1);
        let (req, result) = rx.recv().await.unwrap();
        assert_eq!(req.value, "build a button");
        assert!(result.unwrap().is_success());

        let messages = store.list_messages("p1").await.unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);

        // 已持久化的 prompt 不会在对话中重复
        let first = &code_llm.requests()[0];
        let user_turns = first.iter().filter(|m| m.content == "build a button").count();
        assert_eq!(user_turns, 1);
    }

    #[tokio::test]
    async fn test_cancel_finishes_in_flight_run_and_drops_queued() {
        const SLOW_COMMAND: &str = r#"{"tool": "terminal", "args": {"command": "sleep 1"}}"#;
        let h = harness(
            ScriptedLlmClient::new([SLOW_COMMAND, WRITE_BUTTON, SUMMARY]),
            ScriptedLlmClient::new(["Button", "Done"]),
        );
        let store = h.store.clone();
        let orchestrator = Arc::new(h.orchestrator);

        let mut cfg = AppConfig::default();
        cfg.worker.max_concurrent_runs = 1;
        let cancel = CancellationToken::new();
        let (queue, worker) = run_queue(orchestrator, &cfg.worker, cancel.clone());
        queue.submit("p1", "build a button").await.unwrap();
        queue.submit("p2", "build a form").await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = tokio::spawn(worker.with_results(tx).run());
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();

        assert_eq!(worker.await.unwrap(), 1);
        let (req, result) = rx.recv().await.unwrap();
        assert_eq!(req.project_id, "p1");
        assert!(result.unwrap().is_success());
        assert!(rx.recv().await.is_none());

        // 排队中的请求只留下用户消息
        let p2: Vec<_> = store.list_messages("p2").await.unwrap().iter().map(|m| m.role).collect();
        assert_eq!(p2, vec![MessageRole::User]);

        assert!(matches!(
            queue.submit("p3", "build a table").await,
            Err(AgentError::Cancelled)
        ));
        assert!(store.list_messages("p3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_sandbox_still_persists_terminal_message() {
        let h = harness_with(
            ScriptedLlmClient::new([SUMMARY]),
            ScriptedLlmClient::new(["unused"]),
            |cfg| cfg.sandbox.timeout_secs = 0,
        );
        let outcome = h.orchestrator.run(&request("build a button")).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                reason: FailureReason::NoFiles,
                ..
            }
        ));
        let messages = h.store.list_messages("p1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, GENERIC_ERROR_MESSAGE);
    }
}
