//! Raw client that performs the upgrade by hand and then speaks frames, for
//! tests that need to misbehave on the wire.

#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use wspipe::{
    Role,
    Transport,
    frame::{Frame, FrameCodec, FrameDecoder, FrameEncoder},
};

pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

pub fn upgrade_request(path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: memory\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Read an HTTP response head byte by byte so no frame byte is consumed.
pub async fn read_head(stream: &mut Transport<DuplexStream>) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.expect("response head");
        head.push(byte);
    }
    String::from_utf8(head).expect("ascii head")
}

pub struct RawClient {
    pub frames: FramedRead<ReadHalf<Transport<DuplexStream>>, FrameDecoder>,
    pub sink: FramedWrite<WriteHalf<Transport<DuplexStream>>, FrameEncoder>,
}

impl RawClient {
    /// Upgrade `stream` and return the response head with the framed client.
    pub async fn connect(mut stream: Transport<DuplexStream>, path: &str) -> (String, Self) {
        stream
            .write_all(upgrade_request(path).as_bytes())
            .await
            .expect("write request");
        let head = read_head(&mut stream).await;
        let codec = FrameCodec::new(Role::Client, 1 << 20);
        let (read, write) = tokio::io::split(stream);
        (
            head,
            Self {
                frames: FramedRead::new(read, codec.decoder()),
                sink: FramedWrite::new(write, codec.encoder()),
            },
        )
    }

    pub async fn send(&mut self, frame: Frame) { self.sink.send(frame).await.expect("send frame"); }

    /// Write bytes straight to the transport, bypassing the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let inner = self.sink.get_mut();
        inner.write_all(bytes).await.expect("write raw");
        inner.flush().await.expect("flush raw");
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.next().await.map(|frame| frame.expect("decode frame"))
    }
}
