//! Widget and panel behaviour driven through session events.

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;
    use shared::{
        config::SyncConfig,
        models::{ClientEvent, ConversationSummary, Message, SUPPORT_POOL_ID, SenderRole, Timestamp},
    };
    use tokio::sync::broadcast;

    use crate::{
        bootstrap::{BootstrapError, MockBootstrapApi},
        controller::{PanelController, SessionEventHandler, WidgetController, spawn_event_loop},
        engine::SyncEngine,
        error::ChatError,
        session::{ConnectionSession, SessionEvent},
        test_support::{BASE_MILLIS, customer, message, operator, registered_session, success},
    };

    fn engine(session: Arc<ConnectionSession>, bootstrap: MockBootstrapApi) -> SyncEngine {
        SyncEngine::new(session, Arc::new(bootstrap), None, &SyncConfig::default())
    }

    fn reply(id: &str, offset_ms: i64) -> Message {
        message(id, "op", Some("u1"), SenderRole::Operator, "how can we help?", offset_ms)
    }

    fn customer_message(id: &str, sender: &str) -> Message {
        message(id, sender, None, SenderRole::Customer, "hi", 0)
    }

    fn summary(counterpart_id: &str, display_name: &str, unread_count: u32) -> ConversationSummary {
        ConversationSummary {
            counterpart_id: counterpart_id.into(),
            display_name: display_name.into(),
            email: None,
            avatar: None,
            last_message: Some("hi".into()),
            last_message_time: Some(Timestamp::from_millis(BASE_MILLIS)),
            unread_count,
        }
    }

    #[tokio::test]
    async fn widget_toggle_marks_replies_read() {
        let (session, transport) = registered_session(customer()).await;
        let history = vec![reply("r1", 0), reply("r2", 1)];
        transport.respond_with(move |event| match event {
            ClientEvent::GetConversation(payload) => {
                assert_eq!(payload.user_id, "u1");
                Ok(success(&history))
            }
            _ => Ok(json!({"status": "success"})),
        });
        let widget = WidgetController::new(engine(session, MockBootstrapApi::new()));

        assert!(widget.toggle().await.unwrap());
        assert!(widget.is_open());
        assert_eq!(widget.messages().len(), 2);
        assert_eq!(transport.mark_read_requests().len(), 2);
        assert_eq!(widget.unread_count(), 0);

        assert!(!widget.toggle().await.unwrap());
        assert!(!widget.is_open());
        assert_eq!(widget.unread_count(), 0);
    }

    #[tokio::test]
    async fn widget_badge_counts_replies_while_closed() {
        let (session, transport) = registered_session(customer()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&Vec::<Message>::new())),
            _ => Ok(json!({"status": "success"})),
        });
        let widget = WidgetController::new(engine(session, MockBootstrapApi::new()));

        widget.handle_event(SessionEvent::NewMessage(reply("r1", 0))).await;
        widget.handle_event(SessionEvent::NewMessage(reply("r2", 1))).await;
        assert_eq!(widget.unread_count(), 2);
        assert!(transport.mark_read_requests().is_empty());

        widget.toggle().await.unwrap();
        assert_eq!(widget.unread_count(), 0);
        assert_eq!(transport.mark_read_requests().len(), 2);

        widget.handle_event(SessionEvent::NewMessage(reply("r3", 2))).await;
        assert_eq!(transport.mark_read_requests().len(), 3);
        assert_eq!(widget.messages().len(), 3);
        assert!(widget.messages().iter().all(|message| message.is_read));
        assert_eq!(widget.unread_count(), 0);
    }

    #[tokio::test]
    async fn widget_registration_resyncs_support_timeline() {
        let (session, transport) = registered_session(customer()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&vec![reply("r1", 0)])),
            _ => Ok(json!({"status": "success"})),
        });
        let widget = WidgetController::new(engine(session, MockBootstrapApi::new()));

        widget
            .handle_event(SessionEvent::Disconnected { reason: "gone".into() })
            .await;
        assert!(widget.engine().snapshot().stale);

        widget.handle_event(SessionEvent::Registered { resumed: true }).await;

        let snapshot = widget.engine().snapshot();
        assert!(!snapshot.stale);
        assert!(snapshot.timeline(SUPPORT_POOL_ID).unwrap().is_loaded());
        assert_eq!(widget.messages().len(), 1);
        assert_eq!(widget.unread_count(), 1);
    }

    #[tokio::test]
    async fn widget_sends_to_the_support_pool() {
        let (session, transport) = registered_session(customer()).await;
        transport.respond_with(|event| match event {
            ClientEvent::SendMessage(payload) => {
                let mut confirmed = message("99", "u1", None, SenderRole::Customer, &payload.message, 0);
                confirmed.created_at = Timestamp::now();
                Ok(success(&confirmed))
            }
            _ => Ok(json!({"status": "success"})),
        });
        let widget = WidgetController::new(engine(session, MockBootstrapApi::new()));

        assert!(widget.can_send());
        widget.send("where is my order?").await.unwrap();

        match &transport.requests()[0] {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.receiver_id, None);
                assert_eq!(payload.message, "where is my order?");
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(widget.messages().len(), 1);
        assert_eq!(widget.unread_count(), 0);
    }

    #[tokio::test]
    async fn panel_first_contact_gets_placeholder_entry() {
        let (session, _) = registered_session(operator()).await;
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap
            .expect_conversations()
            .times(1)
            .returning(|| Err(BootstrapError::Unsuccessful("conversations")));
        let panel = PanelController::new(engine(session, bootstrap));

        panel
            .handle_event(SessionEvent::NewMessage(customer_message("m1", "u9abcdef")))
            .await;

        let directory = panel.directory();
        let entry = directory.get("u9abcdef").unwrap();
        assert!(entry.synthesized);
        assert_eq!(entry.display_name, "User u9abc");
        assert_eq!(entry.unread_count, 1);
        assert_eq!(panel.total_unread(), 1);
    }

    #[tokio::test]
    async fn panel_first_contact_refreshes_directory() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(payload) => {
                Ok(success(&vec![customer_message("m1", &payload.user_id)]))
            }
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap
            .expect_conversations()
            .times(1)
            .returning(|| Ok(vec![summary("u9", "Nadia", 1)]));
        let panel = PanelController::new(engine(session, bootstrap));

        panel
            .handle_event(SessionEvent::NewMessage(customer_message("m1", "u9")))
            .await;

        let snapshot = panel.engine().snapshot();
        let entry = snapshot.directory.get("u9").unwrap();
        assert_eq!(entry.display_name, "Nadia");
        assert!(!entry.synthesized);
        assert_eq!(entry.unread_count, 1);
        assert!(snapshot.timeline("u9").unwrap().is_loaded());
        assert_eq!(panel.messages("u9").len(), 1);
    }

    #[tokio::test]
    async fn panel_duplicate_push_is_folded_once() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&vec![customer_message("42", "u7")])),
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap.expect_conversations().times(1).returning(|| Ok(vec![]));
        let panel = PanelController::new(engine(session, bootstrap));

        let push = customer_message("42", "u7");
        panel.handle_event(SessionEvent::NewMessage(push.clone())).await;
        panel.handle_event(SessionEvent::NewMessage(push)).await;

        assert_eq!(panel.messages("u7").len(), 1);
        assert_eq!(panel.directory().get("u7").unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn panel_marks_pushes_read_in_selected_conversation() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&Vec::<Message>::new())),
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap.expect_conversations().times(1).returning(|| Ok(vec![]));
        let panel = PanelController::new(engine(session, bootstrap));

        panel.select("u7").await.unwrap();
        assert_eq!(panel.selected().as_deref(), Some("u7"));

        panel
            .handle_event(SessionEvent::NewMessage(customer_message("m1", "u7")))
            .await;

        assert_eq!(transport.mark_read_requests().len(), 1);
        assert_eq!(panel.selected().as_deref(), Some("u7"));
        assert!(panel.messages("u7")[0].is_read);
        assert_eq!(panel.total_unread(), 0);

        panel.clear_selection();
        assert_eq!(panel.selected(), None);
        assert_eq!(panel.total_unread(), 0);
    }

    #[tokio::test]
    async fn panel_selection_cleared_when_conversation_disappears() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(_) => Ok(success(&Vec::<Message>::new())),
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        let mut calls = 0;
        bootstrap.expect_conversations().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![summary("u1", "Ada", 0)])
            } else {
                Ok(vec![])
            }
        });
        let panel = PanelController::new(engine(session, bootstrap));

        panel.refresh_directory().await.unwrap();
        panel.select("u1").await.unwrap();
        assert_eq!(panel.selected().as_deref(), Some("u1"));

        panel.refresh_directory().await.unwrap();
        assert_eq!(panel.selected(), None);
        assert!(panel.directory().is_empty());
    }

    #[tokio::test]
    async fn panel_send_requires_selection() {
        let (session, transport) = registered_session(operator()).await;
        let panel = PanelController::new(engine(session, MockBootstrapApi::new()));

        let err = panel.send("hello").await.unwrap_err();

        assert!(matches!(err, ChatError::NoActiveConversation));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn panel_registration_preloads_listed_conversations() {
        let (session, transport) = registered_session(operator()).await;
        transport.respond_with(|event| match event {
            ClientEvent::GetConversation(payload) => Ok(success(&vec![customer_message(
                &format!("m-{}", payload.user_id),
                &payload.user_id,
            )])),
            _ => Ok(json!({"status": "success"})),
        });
        let mut bootstrap = MockBootstrapApi::new();
        bootstrap
            .expect_conversations()
            .times(1)
            .returning(|| Ok(vec![summary("u1", "Ada", 1), summary("u2", "Grace", 1)]));
        let panel = PanelController::new(engine(session, bootstrap));

        panel
            .handle_event(SessionEvent::Disconnected { reason: "gone".into() })
            .await;
        assert!(panel.engine().snapshot().stale);

        panel.handle_event(SessionEvent::Registered { resumed: true }).await;

        let snapshot = panel.engine().snapshot();
        assert!(!snapshot.stale);
        for id in ["u1", "u2"] {
            assert!(snapshot.timeline(id).unwrap().is_loaded());
        }
        assert_eq!(panel.total_unread(), 2);
    }

    #[derive(Default)]
    struct RecordingHandler {
        handled: AtomicUsize,
        resyncs: AtomicUsize,
    }

    #[async_trait]
    impl SessionEventHandler for RecordingHandler {
        async fn handle_event(&self, _event: SessionEvent) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }

        async fn resynchronize(&self) {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn lagged_consumer_resynchronizes() {
        let (sender, receiver) = broadcast::channel(1);
        for id in ["1", "2", "3"] {
            sender
                .send(SessionEvent::NewMessage(customer_message(id, "u7")))
                .unwrap();
        }
        drop(sender);

        let handler = Arc::new(RecordingHandler::default());
        spawn_event_loop(Arc::clone(&handler), receiver).await.unwrap();

        assert_eq!(handler.resyncs.load(Ordering::SeqCst), 1);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }
}
