//! WebSocket transport backed by axum's upgraded socket.

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::connection::{Frame, FrameSink, FrameStream, Transport, TransportError};

pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Stream = WebSocketStream;

    fn split(self) -> (Self::Sink, Self::Stream) {
        let (sink, stream) = self.socket.split();
        (WebSocketSink(sink), WebSocketStream(stream))
    }
}

pub struct WebSocketSink(SplitSink<WebSocket, WsMessage>);

impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
            Frame::Ping(data) => WsMessage::Ping(data.into()),
            Frame::Pong(data) => WsMessage::Pong(data.into()),
            Frame::Close => WsMessage::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

pub struct WebSocketStream(SplitStream<WebSocket>);

impl FrameStream for WebSocketStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = match self.0.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };
        let frame = match message {
            WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
            WsMessage::Binary(data) => Frame::Binary(data.to_vec()),
            WsMessage::Ping(data) => Frame::Ping(data.to_vec()),
            WsMessage::Pong(data) => Frame::Pong(data.to_vec()),
            WsMessage::Close(close) => {
                if let Some(error) = close_error(close.map(|frame| frame.code)) {
                    return Some(Err(error));
                }
                Frame::Close
            }
        };
        Some(Ok(frame))
    }
}

/// Normal closure and going-away are clean; any other code is a failure.
fn close_error(code: Option<u16>) -> Option<TransportError> {
    match code {
        None | Some(close_code::NORMAL) | Some(close_code::AWAY) => None,
        Some(code) => Some(TransportError::Abnormal { code }),
    }
}
