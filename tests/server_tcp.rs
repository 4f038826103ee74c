// tests/server_tcp.rs

mod common;

use common::{entries_in, init_tracing, sh_settings, with_timeout};
use liverun::server::{ServerFrame, Server};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, value: serde_json::Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Option<ServerFrame> {
        let line = with_timeout(self.lines.next_line()).await.unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn recv_until_finished(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.recv().await.expect("connection closed early");
            let done = matches!(frame, ServerFrame::Finished { .. });
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

fn stdout_of(frames: &[ServerFrame]) -> String {
    frames
        .iter()
        .filter_map(|f| match f {
            ServerFrame::Output { channel, data, .. } if channel.to_string() == "stdout" => {
                Some(data.as_str())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn tcp_client_runs_a_program_end_to_end() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let server = Server::bind("127.0.0.1", 0, sh_settings(root.path()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let mut client = Client::connect(addr).await;

    // Garbage is answered with an error frame; the connection survives.
    client.send_raw("{not json").await;
    match client.recv().await {
        Some(ServerFrame::Error { kind, .. }) => assert_eq!(kind, "protocol"),
        other => panic!("expected protocol error, got {other:?}"),
    }

    client
        .send(json!({"type": "submit", "code": "read n; echo \"n=$n\""}))
        .await;
    loop {
        match client.recv().await {
            Some(ServerFrame::System { message }) if message == "Execution Started" => break,
            Some(_) => {}
            None => panic!("connection closed early"),
        }
    }
    client.send(json!({"type": "input", "data": "42\n"})).await;

    let frames = client.recv_until_finished().await;
    assert_eq!(stdout_of(&frames), "n=42\n");
    assert_eq!(
        frames.last(),
        Some(&ServerFrame::Finished {
            run_id: 1,
            exit_code: Some(0),
            signal: None,
        })
    );

    drop(client);
    stop_tx.send(()).unwrap();
    with_timeout(server_task).await.unwrap().unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn shutdown_terminates_running_sessions() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let server = Server::bind("127.0.0.1", 0, sh_settings(root.path()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let mut client = Client::connect(addr).await;
    client
        .send(json!({"type": "submit", "code": "echo up; while :; do sleep 0.1; done"}))
        .await;
    loop {
        match client.recv().await {
            Some(ServerFrame::Output { data, .. }) if data.contains("up") => break,
            Some(_) => {}
            None => panic!("connection closed early"),
        }
    }

    stop_tx.send(()).unwrap();
    with_timeout(server_task).await.unwrap().unwrap();

    // The server closes the connection without finishing the run.
    while let Some(frame) = client.recv().await {
        assert!(
            !matches!(frame, ServerFrame::Finished { .. }),
            "unexpected {frame:?}"
        );
    }
    assert_eq!(entries_in(root.path()), 0);
}
