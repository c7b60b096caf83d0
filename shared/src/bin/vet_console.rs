//! Terminal shell for the client core: reads commands from stdin and prints
//! the view model as JSON after every event.

use std::io::BufRead;
use tokio::sync::mpsc;

use vetemergency_shared::capabilities::{PusherSocket, RealtimeTransport};
use vetemergency_shared::model::{CaseFields, CaseId, NotificationId};
use vetemergency_shared::runtime;
use vetemergency_shared::{App, Capabilities, ClientConfig, ClientContext, Event};

const HELP: &str = "commands: login <email> <password> | logout | refresh | \
create <species> <weight> <breed> <symptoms...> | accept <case> [notification] | \
dismiss <notification> | open <case> | close | send <text...> | quit";

fn parse_command(line: &str) -> Option<Event> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let rest: Vec<&str> = words.collect();

    let event = match (command, rest.as_slice()) {
        ("login", [email, password]) => Event::LoginRequested {
            email: (*email).to_string(),
            password: (*password).to_string(),
        },
        ("logout", []) => Event::LogoutRequested,
        ("refresh", []) => Event::DashboardRefreshRequested,
        ("create", [species, weight, breed, symptoms @ ..]) if !symptoms.is_empty() => {
            Event::CreateCaseRequested(CaseFields {
                species: (*species).to_string(),
                weight: (*weight).to_string(),
                breed: (*breed).to_string(),
                symptoms: symptoms.join(" "),
                description: String::new(),
            })
        }
        ("accept", [case_id]) => Event::AcceptCaseRequested {
            case_id: CaseId::from(*case_id),
            notification_id: None,
        },
        ("accept", [case_id, notification_id]) => Event::AcceptCaseRequested {
            case_id: CaseId::from(*case_id),
            notification_id: Some(NotificationId::from(*notification_id)),
        },
        ("dismiss", [notification_id]) => Event::DismissNotification {
            notification_id: NotificationId::from(*notification_id),
        },
        ("open", [case_id]) => Event::OpenChat {
            case_id: CaseId::from(*case_id),
        },
        ("close", []) => Event::CloseChat,
        ("send", words) if !words.is_empty() => Event::SendMessage {
            body: words.join(" "),
        },
        _ => return None,
    };
    Some(event)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vetemergency_shared=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let db_path = std::env::var("VET_DB_PATH").unwrap_or_else(|_| "vet-emergency.db".into());
    let caps = Capabilities::native(&db_path)?;

    let transport = config.realtime.as_ref().map(|rt| {
        let socket = PusherSocket::new(rt.websocket_url())
            .with_handshake_timeout(config.request_timeout);
        Box::new(socket) as Box<dyn RealtimeTransport>
    });
    let ctx = ClientContext::new(config, caps);
    let mut app = App::new(ctx, transport);

    let (tx, rx) = mpsc::channel(32);

    if let (Ok(email), Ok(password)) = (std::env::var("VET_EMAIL"), std::env::var("VET_PASSWORD")) {
        tx.send(Event::LoginRequested { email, password }).await?;
    }

    std::thread::spawn(move || {
        eprintln!("{HELP}");
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line == "quit" {
                break;
            }
            if line.is_empty() {
                continue;
            }
            match parse_command(line) {
                Some(event) => {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                None => eprintln!("{HELP}"),
            }
        }
    });

    runtime::run(&mut app, rx, |view| match serde_json::to_string_pretty(view) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("could not render view: {e}"),
    })
    .await;

    Ok(())
}
