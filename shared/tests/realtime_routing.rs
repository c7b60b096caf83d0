mod common;

use common::{actor, Actor, FakeBackend};
use serde_json::{json, Value};

use vetemergency_shared::capabilities::{ChannelName, ClientFrame, ServerFrame};
use vetemergency_shared::model::{CaseFields, CaseId, NotificationId};
use vetemergency_shared::{AppState, Event};

fn login(email: &str) -> Event {
    Event::LoginRequested {
        email: email.into(),
        password: "123456".into(),
    }
}

/// Push `frame` through the actor's socket and let the app handle it.
async fn deliver(actor: &mut Actor, frame: ServerFrame) {
    actor.tap.push(frame);
    let event = match actor.app.next_realtime_frame().await {
        Some(Ok(frame)) => Event::RealtimeFrame(frame),
        Some(Err(error)) => Event::RealtimeFailed(error),
        None => Event::RealtimeDisconnected,
    };
    actor.app.update(event).await;
}

fn chat_channel(chat: u64) -> ChannelName {
    ChannelName::private(format!("chat.{chat}"))
}

fn pushed_message(id: u64, chat: u64, body: &str) -> Value {
    json!({"message": {"id": id, "chat_id": chat, "user_id": 3, "message": body}})
}

fn message_sent(channel: ChannelName, data: Value) -> ServerFrame {
    ServerFrame::Event {
        channel,
        event: ".MessageSent".into(),
        data,
    }
}

#[tokio::test]
async fn test_chat_push_only_lands_in_its_own_transcript() {
    let backend = FakeBackend::with_default_users();
    let (open_case, open_chat) = backend.accepted_case(5, 3);
    let (_, other_chat) = backend.accepted_case(5, 3);
    let mut client = actor(&backend);

    client.app.update(login("juan@cliente.com")).await;
    client
        .app
        .update(Event::OpenChat {
            case_id: CaseId::from(open_case),
        })
        .await;
    assert_eq!(client.app.view().state, AppState::Chat);
    assert!(client.tap.sent().iter().any(|f| matches!(
        f,
        ClientFrame::Subscribe { channel, .. } if *channel == chat_channel(open_chat)
    )));
    deliver(
        &mut client,
        ServerFrame::SubscriptionSucceeded {
            channel: chat_channel(open_chat),
        },
    )
    .await;
    assert_eq!(client.app.view().channels.chat, "subscribed");

    // Another chat's channel was never subscribed
    deliver(
        &mut client,
        message_sent(chat_channel(other_chat), pushed_message(900, other_chat, "otro chat")),
    )
    .await;
    // Right channel, payload for another chat
    deliver(
        &mut client,
        message_sent(chat_channel(open_chat), pushed_message(901, other_chat, "mal dirigido")),
    )
    .await;
    // Right channel, wrong event name
    deliver(
        &mut client,
        ServerFrame::Event {
            channel: chat_channel(open_chat),
            event: "EmergencyNotification".into(),
            data: pushed_message(902, open_chat, "evento ajeno"),
        },
    )
    .await;
    assert!(client.app.view().chat.unwrap().messages.is_empty());

    deliver(
        &mut client,
        message_sent(chat_channel(open_chat), pushed_message(903, open_chat, "Voy en camino")),
    )
    .await;
    deliver(
        &mut client,
        message_sent(chat_channel(open_chat), pushed_message(903, open_chat, "Voy en camino")),
    )
    .await;

    let view = client.app.view();
    assert!(view.error.is_none());
    let chat = view.chat.unwrap();
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.messages[0].id, "903");
    assert_eq!(chat.messages[0].sender_name, "Dr. María García");
    assert!(!chat.messages[0].is_mine);
}

#[tokio::test]
async fn test_push_after_close_is_not_applied() {
    let backend = FakeBackend::with_default_users();
    let (case, chat) = backend.accepted_case(5, 3);
    let mut client = actor(&backend);

    client.app.update(login("juan@cliente.com")).await;
    client
        .app
        .update(Event::OpenChat {
            case_id: CaseId::from(case),
        })
        .await;
    deliver(
        &mut client,
        ServerFrame::SubscriptionSucceeded {
            channel: chat_channel(chat),
        },
    )
    .await;
    client.app.update(Event::CloseChat).await;
    assert!(client.tap.sent().contains(&ClientFrame::Unsubscribe {
        channel: chat_channel(chat)
    }));
    assert_eq!(client.app.view().channels.chat, "unsubscribed");

    deliver(
        &mut client,
        message_sent(chat_channel(chat), pushed_message(910, chat, "tarde")),
    )
    .await;
    let view = client.app.view();
    assert_eq!(view.state, AppState::Dashboard);
    assert!(view.chat.is_none());
    assert!(view.error.is_none());
}

#[tokio::test]
async fn test_alert_is_announced_once() {
    let backend = FakeBackend::with_default_users();
    let mut vet = actor(&backend);
    let mut client = actor(&backend);

    vet.app.update(login("maria@vet.com")).await;
    deliver(
        &mut vet,
        ServerFrame::SubscriptionSucceeded {
            channel: ChannelName::private("emergencies.admin.3"),
        },
    )
    .await;
    vet.app.update(Event::DismissToast).await;
    assert!(vet.app.view().notifications.is_empty());

    client.app.update(login("juan@cliente.com")).await;
    client
        .app
        .update(Event::CreateCaseRequested(CaseFields {
            species: "perro".into(),
            weight: "12.5".into(),
            breed: "Labrador".into(),
            symptoms: "vómitos".into(),
            description: String::new(),
        }))
        .await;
    let notification_id = backend.notification_ids(3).remove(0);

    let alert = ServerFrame::Event {
        channel: ChannelName::private("emergencies.admin.3"),
        event: ".EmergencyNotification".into(),
        data: json!({"id": notification_id, "message": "Nueva emergencia: perro"}),
    };
    let pulls = backend.count("GET /notifications/unread");
    deliver(&mut vet, alert.clone()).await;

    let view = vet.app.view();
    assert_eq!(view.toast.map(|t| t.message).as_deref(), Some("Nueva emergencia: perro"));
    assert_eq!(view.notifications.len(), 1);
    assert!(view.cases.is_empty());
    assert_eq!(backend.count("GET /notifications/unread"), pulls + 1);
    assert_eq!(backend.count("GET /emergency-requests/my"), 4);

    vet.app.update(Event::DismissToast).await;
    deliver(&mut vet, alert).await;
    let view = vet.app.view();
    assert!(view.toast.is_none());
    assert_eq!(view.notifications.len(), 1);
    assert_eq!(backend.count("GET /notifications/unread"), pulls + 1);
}

#[tokio::test]
async fn test_dismissing_twice_is_harmless() {
    let backend = FakeBackend::with_default_users();
    let mut client = actor(&backend);
    let mut vet = actor(&backend);

    client.app.update(login("juan@cliente.com")).await;
    client
        .app
        .update(Event::CreateCaseRequested(CaseFields {
            species: "gato".into(),
            weight: "4".into(),
            breed: "Siamés".into(),
            symptoms: "no come".into(),
            description: String::new(),
        }))
        .await;
    vet.app.update(login("maria@vet.com")).await;
    let id = vet.app.view().notifications[0].id.clone();

    for _ in 0..2 {
        vet.app
            .update(Event::DismissNotification {
                notification_id: NotificationId::from(id.as_str()),
            })
            .await;
        let view = vet.app.view();
        assert!(view.error.is_none());
        assert!(view.notifications.is_empty());
    }
    assert_eq!(backend.count(&format!("DELETE /notifications/{id}")), 2);
    assert_eq!(backend.count("GET /notifications/unread"), 3);
}

#[tokio::test]
async fn test_dropped_socket_resubscribes_once() {
    let backend = FakeBackend::with_default_users();
    let mut vet = actor(&backend);
    vet.app.update(login("maria@vet.com")).await;
    deliver(
        &mut vet,
        ServerFrame::SubscriptionSucceeded {
            channel: ChannelName::private("emergencies.admin.3"),
        },
    )
    .await;
    assert_eq!(vet.tap.connect_count(), 1);
    vet.tap.clear_sent();

    vet.tap.close_remote();
    assert!(vet.app.next_realtime_frame().await.is_none());
    vet.app.update(Event::RealtimeDisconnected).await;

    assert_eq!(vet.tap.connect_count(), 2);
    let sent = vet.tap.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        ClientFrame::Subscribe { channel, .. } if channel.as_str() == "private-emergencies.admin.3"
    ));
    let view = vet.app.view();
    assert_eq!(view.channels.alerts, "subscribing");
    assert!(view.error.is_none());
    assert_eq!(backend.count("POST /broadcasting/auth"), 2);
}

#[tokio::test]
async fn test_rejected_channel_auth_keeps_the_dashboard() {
    let backend = FakeBackend::with_default_users();
    let mut vet = actor(&backend);
    vet.app.update(login("maria@vet.com")).await;

    deliver(
        &mut vet,
        ServerFrame::SubscriptionError {
            channel: ChannelName::private("emergencies.admin.3"),
            status: Some(403),
            message: "Forbidden".into(),
        },
    )
    .await;

    let view = vet.app.view();
    assert_eq!(view.state, AppState::Dashboard);
    assert!(view.is_authenticated);
    assert_eq!(view.channels.alerts, "failed");
    let error = view.error.expect("channel failure is shown");
    assert_eq!(error.message, "Live updates are unavailable right now.");
}

#[tokio::test]
async fn test_reopening_a_chat_retries_a_refused_channel() {
    let backend = FakeBackend::with_default_users();
    let (case, chat) = backend.accepted_case(5, 3);
    let mut client = actor(&backend);
    client.app.update(login("juan@cliente.com")).await;

    // 1. Socket refused: the chat opens from history alone
    client.tap.refuse_connections();
    client
        .app
        .update(Event::OpenChat {
            case_id: CaseId::from(case),
        })
        .await;
    let view = client.app.view();
    assert_eq!(view.state, AppState::Chat);
    assert_eq!(view.channels.chat, "unsubscribed");
    assert!(view.error.is_some());
    assert_eq!(client.tap.connect_count(), 0);

    // 2. Same chat again once the server is reachable
    client.tap.accept_connections();
    client.app.update(Event::DismissError).await;
    client
        .app
        .update(Event::OpenChat {
            case_id: CaseId::from(case),
        })
        .await;

    let view = client.app.view();
    assert_eq!(view.state, AppState::Chat);
    assert!(view.error.is_none());
    assert_eq!(view.channels.chat, "subscribing");
    assert_eq!(client.tap.connect_count(), 1);
    assert!(client.tap.sent().iter().any(|f| matches!(
        f,
        ClientFrame::Subscribe { channel, .. } if *channel == chat_channel(chat)
    )));
    assert_eq!(backend.count(&format!("GET /private-chat/{chat}")), 1);

    // 3. A third open with a live channel sends nothing new
    client
        .app
        .update(Event::OpenChat {
            case_id: CaseId::from(case),
        })
        .await;
    assert_eq!(client.tap.connect_count(), 1);
    assert_eq!(client.tap.sent().len(), 1);
}
