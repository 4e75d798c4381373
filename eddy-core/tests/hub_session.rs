//! Integration tests for the hub session through the client actor.
//!
//! A scripted hub sits on the far end of an in-memory duplex stream and
//! checks the login sequence, search answering and outbound traffic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eddy_core::client::{ClientContext, ClientHandle, SearchQuery, spawn_client};
use eddy_core::config::EddyConfig;
use eddy_core::events::Event;
use eddy_core::network::{BoxedStream, Connection, Inbound};
use eddy_core::protocol::{Message, SearchOrigin, SearchRequest};
use eddy_core::share::{Listing, MemoryIndex};
use eddy_core::ClientError;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct HubFixture {
    hub: Connection<DuplexStream>,
    handle: ClientHandle,
    events: mpsc::UnboundedReceiver<Event>,
}

fn listing(name: &str, size: u64) -> Listing {
    Listing {
        name: name.to_string(),
        path: PathBuf::from("/nonexistent").join(name),
        size,
        tth: None,
    }
}

async fn fixture() -> HubFixture {
    let mut index = MemoryIndex::new();
    index.add(listing("movies\\movie one.avi", 700));
    index.add(listing("movie two.mkv", 300));
    index.add(listing("notes.txt", 5));

    let context = ClientContext::new(EddyConfig::for_testing(), Arc::new(index));
    let events = context.events.subscribe_channel();
    let handle = spawn_client(context);

    let (client_end, hub_end) = tokio::io::duplex(64 * 1024);
    let stream: BoxedStream = Box::new(client_end);
    handle.attach_hub(stream).await.unwrap();

    HubFixture {
        hub: Connection::new(hub_end, "fake hub"),
        handle,
        events,
    }
}

impl HubFixture {
    async fn send(&mut self, message: Message) {
        self.hub.send(&message).await.unwrap();
        self.hub.flush().await.unwrap();
    }

    async fn next(&mut self) -> Message {
        match timeout(Duration::from_secs(5), self.hub.next_inbound())
            .await
            .expect("client went quiet")
            .unwrap()
        {
            Some(Inbound::Frame(message)) => message,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    async fn login(&mut self) {
        self.send(Message::Lock {
            lock: b"EXTENDEDPROTOCOL_hub_lock".to_vec(),
            pk: b"fakehub".to_vec(),
        })
        .await;
        assert!(matches!(self.next().await, Message::Key { .. }));

        self.send(Message::HubName {
            name: "Test Hub".to_string(),
        })
        .await;
        assert_eq!(
            self.next().await,
            Message::ValidateNick {
                nick: "tester".to_string()
            }
        );

        self.send(Message::Hello {
            nick: "tester".to_string(),
        })
        .await;
        assert!(matches!(self.next().await, Message::Version { .. }));
        assert_eq!(self.next().await, Message::GetNickList);
        match self.next().await {
            Message::MyInfo(info) => {
                assert_eq!(info.nick, "tester");
                assert!(info.description.contains("M:P"));
                assert!(info.description.contains("S:4"));
                assert_eq!(info.share_size, 1005);
            }
            other => panic!("expected MyINFO, got {other:?}"),
        }
    }

    async fn wait_for_event(&mut self, wanted: impl Fn(&Event) -> bool) -> Event {
        loop {
            let event = timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("event not published")
                .unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_login_sequence() {
    let mut fixture = fixture().await;
    fixture.login().await;

    let validated = fixture
        .wait_for_event(|event| matches!(event, Event::HubValidated { .. }))
        .await;
    assert_eq!(
        validated,
        Event::HubValidated {
            hub_name: Some("Test Hub".to_string())
        }
    );
}

#[tokio::test]
async fn test_passive_search_is_answered_through_hub() {
    let mut fixture = fixture().await;
    fixture.login().await;

    let request = SearchRequest::for_query(
        SearchOrigin::Passive {
            nick: "alice".to_string(),
        },
        "movie",
    );
    fixture.send(Message::Search(request)).await;

    let mut paths = Vec::new();
    for _ in 0..2 {
        match fixture.next().await {
            Message::SearchResult(result) => {
                assert_eq!(result.nick, "tester");
                assert_eq!((result.open_slots, result.total_slots), (4, 4));
                assert_eq!(result.hub_name, "Test Hub");
                assert_eq!(result.hub_address, "127.0.0.1:411");
                assert_eq!(result.target.as_deref(), Some("alice"));
                assert!(result.size.is_some());
                paths.push(result.path);
            }
            other => panic!("expected $SR, got {other:?}"),
        }
    }
    paths.sort();
    assert_eq!(paths, vec!["movie two.mkv", "movies\\movie one.avi"]);
}

#[tokio::test]
async fn test_roster_follows_hub() {
    let mut fixture = fixture().await;
    fixture.login().await;
    fixture
        .send(Message::NickList {
            nicks: vec!["alice".to_string(), "bob".to_string()],
        })
        .await;
    fixture
        .send(Message::Quit {
            nick: "bob".to_string(),
        })
        .await;

    let mut roster = Vec::new();
    for _ in 0..100 {
        roster = fixture.handle.roster().await.unwrap();
        if roster.contains(&"alice".to_string()) && !roster.contains(&"bob".to_string()) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(roster.contains(&"alice".to_string()));
    assert!(!roster.contains(&"bob".to_string()));
}

#[tokio::test]
async fn test_outbound_chat_and_search() {
    let mut fixture = fixture().await;
    fixture.login().await;

    fixture.handle.send_chat("hello hub").await.unwrap();
    assert_eq!(
        fixture.next().await,
        Message::Chat {
            from: "tester".to_string(),
            text: "hello hub".to_string(),
        }
    );

    fixture
        .handle
        .search(SearchQuery::Text("some file".to_string()))
        .await
        .unwrap();
    match fixture.next().await {
        Message::Search(request) => {
            assert_eq!(
                request.origin,
                SearchOrigin::Passive {
                    nick: "tester".to_string()
                }
            );
            assert_eq!(request.terms(), vec!["some", "file"]);
        }
        other => panic!("expected $Search, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rev_connect_is_answered_in_passive_mode() {
    let mut fixture = fixture().await;
    fixture.login().await;

    fixture
        .send(Message::RevConnectToMe {
            from: "alice".to_string(),
            to: "tester".to_string(),
        })
        .await;
    assert_eq!(
        fixture.next().await,
        Message::RevConnectToMe {
            from: "tester".to_string(),
            to: "alice".to_string(),
        }
    );
}

#[tokio::test]
async fn test_rejected_nick_disconnects() {
    let mut fixture = fixture().await;
    fixture
        .send(Message::ValidateDenied {
            nick: "tester".to_string(),
        })
        .await;

    let event = fixture
        .wait_for_event(|event| matches!(event, Event::HubDisconnected { .. }))
        .await;
    match event {
        Event::HubDisconnected { reason } => assert!(reason.contains("tester")),
        _ => unreachable!(),
    }

    let mut result = Ok(());
    for _ in 0..100 {
        result = fixture.handle.send_chat("anyone?").await;
        if result.is_err() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(result, Err(ClientError::NotConnected)));
}
