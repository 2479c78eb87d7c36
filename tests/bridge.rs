//! End-to-end tests: a fake game server talks to the bridge over loopback
//! TCP, using the scripts shipped in `scripts/`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use polbridge::{Bridge, BridgeServer, Config, Environment};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, LocalSet};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const SKILLWIN_MESSAGE: &str =
    r#"[1,"SendSysMessageUC",["1001","You feel more skilled.","ENU",3,946]]"#;

fn demo_scripts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scripts")
}

/// Start a bridge on an ephemeral port. Must be called inside a LocalSet.
async fn start_bridge() -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
    let config = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        scripts_root: demo_scripts(),
        ..Config::default()
    };
    let bridge = Bridge::from_config(&config, Environment::Production).unwrap();
    let server = BridgeServer::bind(&config.listen_addr, bridge).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::task::spawn_local(server.serve(async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx, handle)
}

/// The game-server side of a connection.
struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for the bridge")
            .unwrap()
    }

    async fn expect_line(&mut self, expected: &str) {
        assert_eq!(self.next_line().await.as_deref(), Some(expected));
    }

    /// Expect nothing to arrive for `quiet`.
    async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(line) = tokio::time::timeout(quiet, self.lines.next_line()).await {
            panic!("expected no frame, got {:?}", line.unwrap());
        }
    }

    /// Expect a command line followed by its argument line.
    async fn expect_frame(&mut self, command: &str, arguments: &str) {
        self.expect_line(command).await;
        self.expect_line(arguments).await;
    }
}

#[tokio::test]
async fn test_skillwin_round_trip() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("exec\n[7,\"misc/skillwin.ecl\",[\"@mr1001\",\"@mr1002\"]]\n").await;
            peer.expect_frame("do", SKILLWIN_MESSAGE).await;

            // The connection stays responsive while the script waits.
            peer.send("ping\n").await;
            peer.expect_line("pong").await;

            peer.send("doret\n[1,null]\n").await;
            peer.expect_frame("ret", r#"[7,1,"OK"]"#).await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_package_start_reports_core_version() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("exec\n[11,\":moonwalker:start.ecl\",[]]\n").await;
            peer.expect_frame("do", r#"[1,"polcore",["verstr"]]"#).await;
            peer.send("doret\n[1,\"$POL100\"]\n").await;
            peer.expect_frame("ret", r#"[11,1,"OK POL100"]"#).await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_package_script_queries_object() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("exec\n[9,\":moonwalker:greet\",[\"@mr42\"]]\n").await;
            peer.expect_frame("qry", r#"[1,"@mr42","name"]"#).await;
            peer.send("doret\n[1,\"$Bob\"]\n").await;
            peer.expect_frame("ret", r#"[9,1,["Bob","moonwalks"]]"#).await;

            // A second run gets a fresh request id and can decline.
            peer.send("exec\n[10,\":moonwalker:greet\",[\"@mr43\"]]\n").await;
            peer.expect_frame("qry", r#"[2,"@mr43","name"]"#).await;
            peer.send("doret\n[2,null]\n").await;
            peer.expect_frame("ret", "[10,0,null]").await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_remote_error_fails_script() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("exec\n[3,\"misc/skillwin\",[\"@mr1001\",\"@mr1002\"]]\n").await;
            peer.expect_frame("do", SKILLWIN_MESSAGE).await;
            peer.send("doret\n[1,\"€No such character\"]\n").await;
            peer.expect_frame("err", r#"["Error while executing script \"misc/skillwin\"."]"#)
                .await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_sandbox_violations_are_reported() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("exec\n[4,\"../../etc/passwd\",[]]\n").await;
            peer.expect_frame("err", r#"["Error while executing script \"../../etc/passwd\"."]"#)
                .await;

            peer.send("exec\n[5,\":nopkg:start\",[]]\n").await;
            peer.expect_frame("err", r#"["Error while executing script \":nopkg:start\"."]"#)
                .await;

            // The connection survives script failures.
            peer.send("PING\n").await;
            peer.expect_line("pong").await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_unknown_command_closes_connection() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut peer = Peer::connect(addr).await;

            peer.send("dance\n").await;
            peer.expect_frame("err", r#"["Unsupported command: dance"]"#).await;
            assert_eq!(peer.next_line().await, None);

            // Other peers are unaffected.
            let mut other = Peer::connect(addr).await;
            other.send("ping\n").await;
            other.expect_line("pong").await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_connections_keep_their_own_request_ids() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start_bridge().await;
            let mut first = Peer::connect(addr).await;
            let mut second = Peer::connect(addr).await;

            // Both connections number their first request 1.
            first.send("exec\n[1,\":moonwalker:greet\",[\"@mr1\"]]\n").await;
            first.expect_frame("qry", r#"[1,"@mr1","name"]"#).await;
            second.send("exec\n[2,\":moonwalker:greet\",[\"@mr2\"]]\n").await;
            second.expect_frame("qry", r#"[1,"@mr2","name"]"#).await;

            // Answering id 1 on one connection leaves the other waiting.
            second.send("doret\n[1,\"$Bee\"]\n").await;
            second.expect_frame("ret", r#"[2,1,["Bee","moonwalks"]]"#).await;
            first.expect_silence(Duration::from_millis(300)).await;

            first.send("doret\n[1,\"$Ay\"]\n").await;
            first.expect_frame("ret", r#"[1,1,["Ay","moonwalks"]]"#).await;

            stop.send(()).unwrap();
            server.await.unwrap();
        })
        .await;
}
