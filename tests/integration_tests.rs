//! Integration tests for the room server and client over real TCP
//!
//! These tests bind a server on an ephemeral port and drive it either with
//! raw framed sessions or with the full client loop.

use client::network::{Client, ClientConfig};
use client::session::{ClientEvent, ClientSession, Countdown, Request};
use server::config::ServerConfig;
use server::level_registry::MemoryStageSource;
use server::network::Server;
use shared::framing::{read_frame, write_frame, FrameConfig};
use shared::protocol::input_bits;
use shared::record::Recording;
use shared::stage::StageTemplate;
use shared::HashToken;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        countdown: Duration::from_millis(50),
        level_grace: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let source = Arc::new(MemoryStageSource::new([StageTemplate::demo("hills")]));
    let server = Server::bind(config, source).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn hills() -> HashToken {
    HashToken::new("hills").unwrap()
}

/// A framed connection decoded through the client session.
struct TestClient {
    stream: TcpStream,
    session: ClientSession,
    frame: FrameConfig,
    events: VecDeque<ClientEvent>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let mut client = TestClient {
            stream: TcpStream::connect(addr).await.unwrap(),
            session: ClientSession::new(),
            frame: FrameConfig::default(),
            events: VecDeque::new(),
        };
        client.flush().await;
        client.wait_for(|e| *e == ClientEvent::Welcome).await;
        client
    }

    async fn flush(&mut self) {
        if let Some(message) = self.session.take_outgoing() {
            write_frame(&mut self.stream, &message, &self.frame)
                .await
                .unwrap();
        }
    }

    async fn send(&mut self, requests: &[Request]) {
        for request in requests {
            self.session.request(*request);
        }
        self.flush().await;
    }

    async fn wait_for(&mut self, matches: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        loop {
            while let Some(event) = self.events.pop_front() {
                if matches(&event) {
                    return event;
                }
            }
            let payload = timeout(STEP_TIMEOUT, read_frame(&mut self.stream, &self.frame))
                .await
                .expect("timed out waiting for the server")
                .unwrap();
            let events = self.session.handle_message(&payload).unwrap();
            self.events.extend(events);
        }
    }

    async fn create_room(&mut self) -> HashToken {
        self.send(&[Request::CreateRoom(hills())]).await;
        match self
            .wait_for(|e| matches!(e, ClientEvent::WaitRoom { .. }))
            .await
        {
            ClientEvent::WaitRoom { room, admin } => {
                assert!(admin);
                room
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    async fn start_index(&mut self) -> usize {
        match self
            .wait_for(|e| matches!(e, ClientEvent::StartRoom { .. }))
            .await
        {
            ClientEvent::StartRoom { player_index, .. } => player_index,
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Polls the countdown until the room runs, returning the player count.
    async fn await_running(&mut self) -> usize {
        loop {
            self.send(&[Request::GetStartCountdown]).await;
            match self
                .wait_for(|e| matches!(e, ClientEvent::Countdown(_)))
                .await
            {
                ClientEvent::Countdown(Countdown::Started { player_count }) => {
                    return player_count
                }
                _ => sleep(Duration::from_millis(10)).await,
            }
        }
    }
}

/// LOBBY FLOW TESTS
mod lobby_tests {
    use super::*;

    #[tokio::test]
    async fn ask_stage_reports_known_and_unknown() {
        let addr = start_server().await;
        let mut client = TestClient::connect(addr).await;

        let missing = HashToken::new("nowhere").unwrap();
        client
            .send(&[Request::AskStage(hills()), Request::AskStage(missing)])
            .await;
        assert_eq!(
            client.wait_for(|e| matches!(e, ClientEvent::StageInfo(_))).await,
            ClientEvent::StageInfo(Some(hills()))
        );
        assert_eq!(
            client.wait_for(|e| matches!(e, ClientEvent::StageInfo(_))).await,
            ClientEvent::StageInfo(None)
        );
    }

    #[tokio::test]
    async fn two_players_create_join_and_play() {
        let addr = start_server().await;
        let mut admin = TestClient::connect(addr).await;
        let mut guest = TestClient::connect(addr).await;

        let room = admin.create_room().await;
        guest.send(&[Request::ChooseRoom(room)]).await;
        assert_eq!(
            guest
                .wait_for(|e| matches!(e, ClientEvent::WaitRoom { .. }))
                .await,
            ClientEvent::WaitRoom { room, admin: false }
        );

        admin.send(&[Request::StartRoom(room)]).await;
        assert_eq!(admin.start_index().await, 0);
        assert_eq!(guest.start_index().await, 1);

        // The guest's own poll now answers with its seat.
        guest.send(&[Request::WaitRoom(room)]).await;
        assert_eq!(guest.start_index().await, 1);

        // Let the room run for a while before either side learns its size.
        sleep(Duration::from_millis(200)).await;

        assert_eq!(admin.await_running().await, 2);
        admin.send(&[Request::Play(input_bits::RIGHT)]).await;
        admin
            .wait_for(|e| matches!(e, ClientEvent::Frame(_)))
            .await;
        assert_eq!(admin.session.game().players().len(), 2);
        assert!(admin.session.game().blocks().count() > 0);

        assert_eq!(guest.await_running().await, 2);
        for _ in 0..5 {
            guest
                .wait_for(|e| matches!(e, ClientEvent::Frame(_)))
                .await;
        }
        assert!(guest.session.game().block(1).is_some());
    }

    #[tokio::test]
    async fn started_room_rejects_late_joiners() {
        let addr = start_server().await;
        let mut admin = TestClient::connect(addr).await;
        let room = admin.create_room().await;
        admin.send(&[Request::StartRoom(room)]).await;
        assert_eq!(admin.start_index().await, 0);

        let mut late = TestClient::connect(addr).await;
        late.send(&[Request::ChooseRoom(room), Request::AskStage(hills())])
            .await;
        // Only the stage reply comes back; the join is dropped.
        assert_eq!(
            late.wait_for(|_| true).await,
            ClientEvent::StageInfo(Some(hills()))
        );
    }
}

/// PROTOCOL ERROR TESTS
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn unknown_opcode_closes_connection() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = FrameConfig::default();

        write_frame(&mut stream, &[99], &frame).await.unwrap();
        let result = timeout(STEP_TIMEOUT, read_frame(&mut stream, &frame))
            .await
            .expect("server kept the connection open");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn other_users_survive_a_violation() {
        let addr = start_server().await;
        let mut good = TestClient::connect(addr).await;

        // Two WELCOMEs and no END_MSG: a truncated message.
        let mut bad = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut bad, &[0, 0], &FrameConfig::default())
            .await
            .unwrap();

        good.send(&[Request::AskStage(hills())]).await;
        assert_eq!(
            good.wait_for(|e| matches!(e, ClientEvent::StageInfo(_))).await,
            ClientEvent::StageInfo(Some(hills()))
        );
    }
}

/// FULL CLIENT TESTS
mod client_tests {
    use super::*;

    #[tokio::test]
    async fn client_runs_a_room_and_records_input() {
        let addr = start_server().await;
        let record = std::env::temp_dir().join(format!(
            "netplay-integration-{}.rec",
            std::process::id()
        ));

        let config = ClientConfig {
            server_addr: addr.to_string(),
            stage: "hills".to_string(),
            record: Some(record.clone()),
            start_delay: Duration::from_millis(50),
            round_trip_budget: Duration::from_millis(5),
            max_frames: Some(30),
            goal_reset_at: Some(10),
            ..ClientConfig::default()
        };

        let summary = timeout(Duration::from_secs(10), Client::new(config).unwrap().run())
            .await
            .expect("client did not finish")
            .unwrap();

        assert!(summary.room.is_some());
        assert_eq!(summary.player_index, Some(0));
        assert!(summary.frames >= 30);
        assert_eq!(summary.game.players().len(), 1);
        assert!(summary.game.blocks().count() > 0);

        let recording = Recording::load(&record).unwrap();
        assert!(!recording.is_empty());
        let _ = std::fs::remove_file(&record);
    }

    #[tokio::test]
    async fn client_fails_on_unknown_stage() {
        let addr = start_server().await;
        let config = ClientConfig {
            server_addr: addr.to_string(),
            stage: "nowhere".to_string(),
            ..ClientConfig::default()
        };

        let result = timeout(STEP_TIMEOUT, Client::new(config).unwrap().run())
            .await
            .expect("client did not finish");
        assert!(matches!(
            result,
            Err(client::network::ClientError::UnknownStage(_))
        ));
    }
}
